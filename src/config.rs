//! Engine configuration.
//!
//! Options arrive from the host as JSON (camelCase keys). Every value is
//! optional; the `effective_*` accessors apply the defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::NativesResult;

/// Environment variable overriding the `compiled` directory probed for
/// `bindings`-style add-ons.
pub const COMPILED_DIR_ENV: &str = "NODE_BINDINGS_COMPILED_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct NativesOptions {
    /// Directory the binaries are copied into. Default: `./`.
    pub copy_to: Option<String>,
    /// Prefix of the logical names emitted into the bundle. Default: `./`.
    pub dest_dir: Option<String>,
    /// Emit a position map for rewritten files. Default: true.
    pub source_map: Option<bool>,
    /// Lowercase alias accepted for `sourceMap`.
    pub sourcemap: Option<bool>,
    pub target_platform: Option<String>,
    pub target_arch: Option<String>,
    /// Node version used by the `compiled/{version}/...` bindings location.
    pub node_version: Option<String>,
    /// ABI label (`node-v115`, ...) for node-pre-gyp `module_path` templates.
    pub node_abi: Option<String>,
    pub napi_build_version: Option<String>,
    pub libc: Option<String>,
}

impl NativesOptions {
    pub fn from_json(json: &str) -> NativesResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: serde_json::Value) -> NativesResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn effective_copy_to(&self) -> PathBuf {
        PathBuf::from(self.copy_to.as_deref().unwrap_or("./"))
    }

    pub fn effective_dest_dir(&self) -> &str {
        self.dest_dir.as_deref().unwrap_or("./")
    }

    /// Either spelling set to `false` disables position maps.
    pub fn effective_source_map(&self) -> bool {
        self.source_map != Some(false) && self.sourcemap != Some(false)
    }

    pub fn effective_platform(&self) -> String {
        self.target_platform
            .clone()
            .unwrap_or_else(|| host_platform().to_string())
    }

    pub fn effective_arch(&self) -> String {
        self.target_arch
            .clone()
            .unwrap_or_else(|| host_arch().to_string())
    }

    pub fn effective_compiled_dir(&self) -> String {
        std::env::var(COMPILED_DIR_ENV)
            .ok()
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(|| "compiled".to_string())
    }
}

/// Host OS in Node's `process.platform` naming.
pub fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// Host CPU in Node's `process.arch` naming.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = NativesOptions::default();
        assert_eq!(options.effective_copy_to(), PathBuf::from("./"));
        assert_eq!(options.effective_dest_dir(), "./");
        assert!(options.effective_source_map());
    }

    #[test]
    fn test_camel_case_options() {
        let options = NativesOptions::from_json(
            r#"{ "copyTo": "dist/libs", "destDir": "./libs", "targetPlatform": "linux", "targetArch": "arm64" }"#,
        )
        .unwrap();
        assert_eq!(options.effective_copy_to(), PathBuf::from("dist/libs"));
        assert_eq!(options.effective_dest_dir(), "./libs");
        assert_eq!(options.effective_platform(), "linux");
        assert_eq!(options.effective_arch(), "arm64");
    }

    #[test]
    fn test_either_source_map_spelling_disables() {
        let upper = NativesOptions::from_json(r#"{ "sourceMap": false }"#).unwrap();
        let lower = NativesOptions::from_json(r#"{ "sourcemap": false }"#).unwrap();
        assert!(!upper.effective_source_map());
        assert!(!lower.effective_source_map());
    }

    #[test]
    fn test_invalid_options_rejected() {
        assert!(NativesOptions::from_json(r#"{ "copyTo": 42 }"#).is_err());
    }
}
