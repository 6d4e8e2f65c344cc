//! Path Resolver
//!
//! Turns the textual reference found in a load expression into the absolute
//! path of a native binary, and discovers the module root a file belongs to.

use std::cell::OnceCell;
use std::path::{Component, Path, PathBuf};

/// Extensions recognized as native binaries, in probe order.
pub const NATIVE_EXTENSIONS: [&str; 2] = ["node", "dll"];

/// Files or directories whose presence marks a module root.
const ROOT_MARKERS: [&str; 2] = ["package.json", "node_modules"];

pub fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Lexically normalize a path: make it absolute against the cwd and fold `.`
/// and `..` components. Symlinks are not followed.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        current_dir().join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

pub fn has_native_extension(reference: &str) -> bool {
    Path::new(reference)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            NATIVE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".");
    raw.push(ext);
    PathBuf::from(raw)
}

/// Resolve `reference` against the directory of `originating_file` (or the cwd)
/// and decide whether it names a native binary.
///
/// A reference that already carries a native extension is accepted without
/// touching the disk; existence is checked when the binary is copied. Anything
/// else is probed with each known extension appended.
pub fn resolve_native_binary(reference: &str, originating_file: Option<&Path>) -> Option<PathBuf> {
    let base = originating_file
        .and_then(|file| file.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(current_dir);
    let candidate = normalize_path(&base.join(reference));

    if has_native_extension(reference) {
        return Some(candidate);
    }

    NATIVE_EXTENSIONS
        .iter()
        .map(|ext| with_appended_extension(&candidate, ext))
        .find(|probe| probe.exists())
}

/// Walk up from the directory of `file` to the first ancestor holding a root
/// marker. Falls back to the top-most ancestor.
pub fn find_module_root(file: &Path) -> PathBuf {
    let start = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => normalize_path(dir),
        _ => current_dir(),
    };

    let mut top = start.clone();
    for dir in start.ancestors() {
        if ROOT_MARKERS.iter().any(|marker| dir.join(marker).exists()) {
            return dir.to_path_buf();
        }
        top = dir.to_path_buf();
    }
    top
}

/// Per-file rewrite context. The module root is computed on first use and
/// cached for the rest of the file.
#[derive(Debug)]
pub struct MatchContext<'a> {
    pub file: &'a Path,
    module_root: OnceCell<PathBuf>,
}

impl<'a> MatchContext<'a> {
    pub fn new(file: &'a Path) -> Self {
        Self {
            file,
            module_root: OnceCell::new(),
        }
    }

    pub fn module_root(&self) -> &Path {
        self.module_root.get_or_init(|| find_module_root(self.file))
    }

    pub fn file_dir(&self) -> PathBuf {
        self.file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(current_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_normalize_folds_dots() {
        let path = normalize_path(Path::new("/a/b/./c/../d.node"));
        assert_eq!(path, PathBuf::from("/a/b/d.node"));
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        assert!(has_native_extension("./build/addon.NODE"));
        assert!(has_native_extension("lib/win.Dll"));
        assert!(!has_native_extension("./addon.js"));
        assert!(!has_native_extension("./addon"));
    }

    #[test]
    fn test_explicit_extension_accepted_without_existence() {
        let dir = tempfile::tempdir().unwrap();
        let importer = dir.path().join("index.js");
        let resolved = resolve_native_binary("./missing.node", Some(&importer));
        assert_eq!(resolved, Some(dir.path().join("missing.node")));
    }

    #[test]
    fn test_probes_node_then_dll() {
        let dir = tempfile::tempdir().unwrap();
        let importer = dir.path().join("index.js");
        fs::write(dir.path().join("addon.dll"), b"dll").unwrap();

        assert_eq!(
            resolve_native_binary("./addon", Some(&importer)),
            Some(dir.path().join("addon.dll"))
        );

        fs::write(dir.path().join("addon.node"), b"node").unwrap();
        assert_eq!(
            resolve_native_binary("./addon", Some(&importer)),
            Some(dir.path().join("addon.node"))
        );
    }

    #[test]
    fn test_unresolvable_reference() {
        let dir = tempfile::tempdir().unwrap();
        let importer = dir.path().join("index.js");
        assert_eq!(resolve_native_binary("./nothing", Some(&importer)), None);
        assert_eq!(resolve_native_binary("fs", Some(&importer)), None);
    }

    #[test]
    fn test_module_root_finds_package_json() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pkg");
        fs::create_dir_all(root.join("lib/deep")).unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();

        let file = root.join("lib/deep/index.js");
        assert_eq!(find_module_root(&file), root);

        let ctx = MatchContext::new(&file);
        assert_eq!(ctx.module_root(), root.as_path());
        assert_eq!(ctx.file_dir(), root.join("lib/deep"));
    }

    #[test]
    fn test_module_root_accepts_node_modules_marker() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();

        assert_eq!(find_module_root(&root.join("src/main.js")), root);
    }
}
