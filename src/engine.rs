//! Rewrite Engine
//!
//! Owns the relocation registry for one build and exposes the operations the
//! host bundler calls: reference resolution, per-file source rewriting,
//! externalization of the emitted tokens and the output preamble.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::config::NativesOptions;
use crate::error::{NativesError, NativesResult};
use crate::idioms::{IdiomContext, IDIOMS};
use crate::pre_gyp::{NodeModulesPreGypLoader, PreGypLoader};
use crate::registry::{NameMapper, RelocationRecord, RelocationRegistry};
use crate::resolve::{normalize_path, resolve_native_binary, MatchContext};
use crate::source_edit::{PositionMap, SourceEdit};

/// Marks module ids owned by this engine. The NUL byte keeps other resolvers
/// from claiming them.
pub const TOKEN_PREFIX: &str = "\0natives:";

/// Gives ES output a `require` to load the relocated binaries with.
pub const ES_INTRO: &str =
    "import { createRequire } from 'module'; const require = createRequire(import.meta.url);";

const COMMONJS_REQUIRE_SUFFIX: &str = "?commonjs-require";

pub fn token_for(logical_name: &str) -> String {
    format!("{}{}", TOKEN_PREFIX, logical_name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteOutput {
    pub code: String,
    pub map: Option<PositionMap>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReference {
    pub id: String,
    pub external: bool,
}

/// Text the host wraps around an externalized deferred load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicImportSyntax {
    pub left: &'static str,
    pub right: &'static str,
}

pub struct NativesEngine {
    options: NativesOptions,
    registry: Mutex<RelocationRegistry>,
    mapper: Option<NameMapper>,
    pre_gyp: Box<dyn PreGypLoader>,
    warnings: Mutex<Vec<String>>,
}

impl NativesEngine {
    pub fn new(options: NativesOptions) -> Self {
        let registry =
            RelocationRegistry::new(options.effective_dest_dir(), options.effective_copy_to());
        Self {
            options,
            registry: Mutex::new(registry),
            mapper: None,
            pre_gyp: Box::new(NodeModulesPreGypLoader),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mapper(mut self, mapper: NameMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_pre_gyp_loader(mut self, loader: Box<dyn PreGypLoader>) -> Self {
        self.pre_gyp = loader;
        self
    }

    pub fn options(&self) -> &NativesOptions {
        &self.options
    }

    pub fn pre_gyp_loader(&self) -> &dyn PreGypLoader {
        self.pre_gyp.as_ref()
    }

    fn registry(&self) -> MutexGuard<'_, RelocationRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the copy directory.
    pub fn build_start(&self) -> NativesResult<()> {
        let dir = self.options.effective_copy_to();
        fs::create_dir_all(&dir).map_err(|source| NativesError::Io { path: dir, source })
    }

    /// Relocate `path`, copying it on first sight. Idempotent per path.
    pub fn relocate(&self, path: &Path) -> NativesResult<RelocationRecord> {
        let assignment = self.registry().assign(path, self.mapper.as_ref())?;
        if let Some(warning) = assignment.copy.as_ref().and_then(|outcome| outcome.warning()) {
            self.warnings
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(warning.to_string());
        }
        Ok(assignment.record)
    }

    /// Resolve `reference` as a native binary and return its token, or None
    /// when it does not name one.
    pub fn relocate_reference(
        &self,
        reference: &str,
        originating_file: Option<&Path>,
    ) -> NativesResult<Option<String>> {
        let Some(path) = resolve_native_binary(reference, originating_file) else {
            return Ok(None);
        };
        let record = self.relocate(&path)?;
        Ok(Some(token_for(&record.logical_name)))
    }

    /// Binary discovery for the host's resolver. Ids prefixed by other
    /// plugins (`\0plugin:...`, `...?commonjs-require`) are unwrapped first.
    pub fn resolve_id(&self, importee: &str, importer: Option<&str>) -> NativesResult<Option<String>> {
        if importee.starts_with(TOKEN_PREFIX) {
            return Ok(Some(importee.to_string()));
        }

        let importer = importer.map(strip_plugin_prefix);
        let mut importee = strip_plugin_prefix(importee);
        if let Some(stripped) = importee.strip_suffix(COMMONJS_REQUIRE_SUFFIX) {
            importee = stripped.strip_prefix('\0').unwrap_or(stripped);
        }

        self.relocate_reference(importee, importer.map(Path::new))
    }

    /// Rewrite every recognized native load in `code`. `Ok(None)` means the
    /// file is unchanged and should pass through as-is.
    pub fn rewrite(&self, code: &str, id: &str) -> NativesResult<Option<RewriteOutput>> {
        if id.starts_with('\0') {
            return Ok(None);
        }

        let file = MatchContext::new(Path::new(id));
        let cx = IdiomContext {
            code,
            file: &file,
            engine: self,
        };
        let mut edit = SourceEdit::new(code);

        for idiom in IDIOMS {
            if idiom.apply(&cx, &mut edit)? {
                debug!(file = id, idiom = ?idiom, "rewrote native load");
            }
        }

        if !edit.has_changes() {
            return Ok(None);
        }

        let map = self
            .options
            .effective_source_map()
            .then(|| edit.generate_position_map(id));
        Ok(Some(RewriteOutput {
            code: edit.to_text(),
            map,
        }))
    }

    /// Rewrite a batch of `(code, id)` files in parallel. Results keep the
    /// input order.
    pub fn rewrite_many(&self, files: &[(String, String)]) -> Vec<NativesResult<Option<RewriteOutput>>> {
        files
            .par_iter()
            .map(|(code, id)| self.rewrite(code, id))
            .collect()
    }

    /// Externalize a deferred load produced by this engine.
    pub fn resolve_dynamic_import(&self, id: &str) -> Option<ExternalReference> {
        if let Some(name) = id.strip_prefix(TOKEN_PREFIX) {
            return Some(ExternalReference {
                id: name.to_string(),
                external: true,
            });
        }

        self.registry()
            .get(&normalize_path(Path::new(id)))
            .map(|record| ExternalReference {
                id: record.logical_name.clone(),
                external: true,
            })
    }

    /// Preamble for the output chunk. Only ES output (the default format)
    /// lacks a `require`, and only once something was relocated.
    pub fn output_intro(&self, format: Option<&str>) -> Option<&'static str> {
        let format = format.unwrap_or("es");
        if (format == "es" || format == "esm" || format == "module") && !self.registry().is_empty() {
            Some(ES_INTRO)
        } else {
            None
        }
    }

    pub fn render_dynamic_import(&self) -> DynamicImportSyntax {
        DynamicImportSyntax {
            left: "require(",
            right: ")",
        }
    }

    /// Drain the warnings collected since the last call.
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.warnings.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn relocation_count(&self) -> usize {
        self.registry().len()
    }

    pub fn record_for(&self, path: &Path) -> Option<RelocationRecord> {
        self.registry().get(&normalize_path(path)).cloned()
    }

    pub fn records(&self) -> Vec<RelocationRecord> {
        let mut records: Vec<_> = self.registry().records().cloned().collect();
        records.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        records
    }
}

/// `\0plugin:rest` -> `rest`
fn strip_plugin_prefix(id: &str) -> &str {
    match id.strip_prefix('\0').and_then(|rest| rest.find(':').map(|i| &rest[i + 1..])) {
        Some(rest) => rest,
        None => id,
    }
}
