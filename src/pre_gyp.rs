//! node-pre-gyp finder capability.
//!
//! The package-manager idiom needs `find()` from whichever node-pre-gyp
//! package is available. The engine does not look for it itself: a
//! [`PreGypLoader`] is injected, so hosts and tests can supply their own.
//! [`NodeModulesPreGypLoader`] is the default and evaluates the package's
//! `binary` manifest section directly.

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::NativesOptions;
use crate::resolve::{current_dir, normalize_path};

pub const SCOPED_PACKAGE: &str = "@mapbox/node-pre-gyp";
pub const LEGACY_PACKAGE: &str = "node-pre-gyp";

/// `find(package_json_path, options)` of a loaded helper package.
pub trait BinaryFinder: Send + Sync {
    fn find(&self, package_json: &Path, options: &NativesOptions) -> Option<PathBuf>;
}

pub trait PreGypLoader: Send + Sync {
    /// Load the helper published as `package`, as seen from `module_root`.
    fn load(&self, package: &str, module_root: &Path) -> Option<Box<dyn BinaryFinder>>;
}

/// Names to try, the one the source imported first.
pub fn package_order(imported: Option<&str>) -> [&'static str; 2] {
    match imported {
        Some(name) if name.starts_with('@') => [SCOPED_PACKAGE, LEGACY_PACKAGE],
        _ => [LEGACY_PACKAGE, SCOPED_PACKAGE],
    }
}

pub fn load_finder(
    loader: &dyn PreGypLoader,
    imported: Option<&str>,
    module_root: &Path,
) -> Option<Box<dyn BinaryFinder>> {
    for package in package_order(imported) {
        if let Some(finder) = loader.load(package, module_root) {
            debug!(package = package, "loaded binary finder");
            return Some(finder);
        }
    }
    debug!(root = %module_root.display(), "no node-pre-gyp package available");
    None
}

/// Finds the helper under `node_modules` of the module root or any ancestor,
/// then of the working directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeModulesPreGypLoader;

impl PreGypLoader for NodeModulesPreGypLoader {
    fn load(&self, package: &str, module_root: &Path) -> Option<Box<dyn BinaryFinder>> {
        let cwd = current_dir();
        module_root
            .ancestors()
            .chain(cwd.ancestors())
            .map(|dir| dir.join("node_modules").join(package).join("package.json"))
            .find(|manifest| manifest.is_file())
            .map(|_| Box::new(ManifestFinder) as Box<dyn BinaryFinder>)
    }
}

/// Evaluates `binary.module_path` / `binary.module_name` of the add-on's
/// package.json the way node-pre-gyp's `find` does.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestFinder;

impl BinaryFinder for ManifestFinder {
    fn find(&self, package_json: &Path, options: &NativesOptions) -> Option<PathBuf> {
        let data = fs::read_to_string(package_json).ok()?;
        let manifest: Value = serde_json::from_str(&data).ok()?;
        let binary = manifest.get("binary")?;

        let module_name = binary.get("module_name")?.as_str()?;
        let module_path = binary.get("module_path")?.as_str()?;

        let vars = template_vars(&manifest, module_name, options);
        let module_path = expand_template(module_path, &vars)?;

        let base = package_json
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(current_dir);
        Some(normalize_path(
            &base
                .join(module_path)
                .join(format!("{}.node", module_name)),
        ))
    }
}

fn template_vars(
    manifest: &Value,
    module_name: &str,
    options: &NativesOptions,
) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    let platform = options.effective_platform();
    let arch = options.effective_arch();

    vars.insert("module_name", module_name.to_string());
    vars.insert("configuration", "Release".to_string());
    vars.insert("target_platform", platform.clone());
    vars.insert("platform", platform);
    vars.insert("target_arch", arch.clone());
    vars.insert("arch", arch);
    if let Some(name) = manifest.get("name").and_then(Value::as_str) {
        vars.insert("name", name.to_string());
    }
    if let Some(version) = manifest.get("version").and_then(Value::as_str) {
        vars.insert("version", version.to_string());
    }
    if let Some(abi) = &options.node_abi {
        vars.insert("node_abi", abi.clone());
    }
    if let Some(napi) = &options.napi_build_version {
        vars.insert("napi_build_version", napi.clone());
    }
    if let Some(libc) = &options.libc {
        vars.insert("libc", libc.clone());
    }
    vars
}

/// Substitute `{name}` placeholders. An unknown placeholder makes the whole
/// path unresolvable.
fn expand_template(template: &str, vars: &HashMap<&'static str, String>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let close = open + rest[open..].find('}')?;
        let key = &rest[open + 1..close];
        out.push_str(vars.get(key)?);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingLoader {
        available: Vec<&'static str>,
        attempts: Mutex<Vec<String>>,
    }

    struct FixedFinder;

    impl BinaryFinder for FixedFinder {
        fn find(&self, _: &Path, _: &NativesOptions) -> Option<PathBuf> {
            Some(PathBuf::from("/fixed.node"))
        }
    }

    impl PreGypLoader for RecordingLoader {
        fn load(&self, package: &str, _: &Path) -> Option<Box<dyn BinaryFinder>> {
            self.attempts.lock().unwrap().push(package.to_string());
            if self.available.contains(&package) {
                Some(Box::new(FixedFinder))
            } else {
                None
            }
        }
    }

    #[test]
    fn test_package_order_follows_import() {
        assert_eq!(package_order(Some("@mapbox/node-pre-gyp")), [SCOPED_PACKAGE, LEGACY_PACKAGE]);
        assert_eq!(package_order(Some("node-pre-gyp")), [LEGACY_PACKAGE, SCOPED_PACKAGE]);
        assert_eq!(package_order(None), [LEGACY_PACKAGE, SCOPED_PACKAGE]);
    }

    #[test]
    fn test_falls_back_to_second_package() {
        let loader = RecordingLoader {
            available: vec![SCOPED_PACKAGE],
            attempts: Mutex::new(Vec::new()),
        };
        assert!(load_finder(&loader, Some("node-pre-gyp"), Path::new("/")).is_some());
        assert_eq!(
            *loader.attempts.lock().unwrap(),
            vec![LEGACY_PACKAGE.to_string(), SCOPED_PACKAGE.to_string()]
        );
    }

    #[test]
    fn test_unavailable_helper() {
        let loader = RecordingLoader {
            available: vec![],
            attempts: Mutex::new(Vec::new()),
        };
        assert!(load_finder(&loader, None, Path::new("/")).is_none());
    }

    #[test]
    fn test_manifest_finder_expands_module_path() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("package.json");
        fs::write(
            &manifest,
            r#"{
                "name": "sqlite3",
                "version": "5.1.6",
                "binary": {
                    "module_name": "node_sqlite3",
                    "module_path": "./lib/binding/napi-v{napi_build_version}-{platform}-{libc}-{arch}"
                }
            }"#,
        )
        .unwrap();

        let options = NativesOptions {
            target_platform: Some("linux".to_string()),
            target_arch: Some("x64".to_string()),
            napi_build_version: Some("6".to_string()),
            libc: Some("glibc".to_string()),
            ..Default::default()
        };

        assert_eq!(
            ManifestFinder.find(&manifest, &options),
            Some(dir.path().join("lib/binding/napi-v6-linux-glibc-x64/node_sqlite3.node"))
        );
    }

    #[test]
    fn test_manifest_finder_unknown_variable() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("package.json");
        fs::write(
            &manifest,
            r#"{ "binary": { "module_name": "addon", "module_path": "./lib/{node_abi}" } }"#,
        )
        .unwrap();

        assert_eq!(ManifestFinder.find(&manifest, &NativesOptions::default()), None);
    }

    #[test]
    fn test_node_modules_loader() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("node_modules").join(SCOPED_PACKAGE);
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("package.json"), "{}").unwrap();

        let root = dir.path().join("packages/app");
        fs::create_dir_all(&root).unwrap();

        assert!(NodeModulesPreGypLoader.load(SCOPED_PACKAGE, &root).is_some());
    }
}
