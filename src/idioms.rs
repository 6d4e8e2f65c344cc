//! Pattern Rewriters
//!
//! One recognizer per conventional way of loading a native add-on. Each scans
//! the original text independently, computes the binary the match implies and
//! records an overwrite with a deferred load of the relocated file. A match
//! that cannot be resolved is left as it is.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::engine::{token_for, NativesEngine};
use crate::error::NativesResult;
use crate::pre_gyp::load_finder;
use crate::resolve::{normalize_path, resolve_native_binary, MatchContext};
use crate::source_edit::SourceEdit;
use crate::static_eval::{static_eval, EvalScope};

lazy_static! {
    /// `require('<literal>')`
    static ref REQUIRE_LITERAL_RE: Regex =
        Regex::new(r#"require\(\s*['"]([^'"\n]*?)['"]\s*\)"#).unwrap();

    /// `require('bindings')(<arg>?)`
    static ref BINDINGS_RE: Regex =
        Regex::new(r#"require\(\s*['"]bindings['"]\s*\)\(([^)]*)\)"#).unwrap();

    /// `const binary = require('@mapbox/node-pre-gyp');`
    static ref PRE_GYP_IMPORT_RE: Regex = Regex::new(
        r#"(?:var|let|const)\s+([A-Za-z0-9_$]+)\s*=\s*require\(\s*['"](@mapbox/node-pre-gyp|node-pre-gyp)['"]\s*\)"#
    )
    .unwrap();
}

/// Marker whose presence enables the package-manager idiom.
const PRE_GYP_MARKER: &str = "node-pre-gyp";

/// Variable name assumed for the finder when no import statement is found.
const DEFAULT_FINDER_VAR: &str = "binary";

const DEFAULT_BINDINGS_ALIAS: &str = "bindings.node";

/// `D1 V1 = FINDER.find(path.resolve(path.join(__dirname, <expr>))); D2 V2 = require(V1)`
const PRE_GYP_PAIR_TEMPLATE: &str = concat!(
    r#"\b(var|let|const)\s+([A-Za-z0-9_$]+)\s*=\s*FINDER\.find\(\s*path\.resolve\(\s*path\.join\(\s*__dirname\s*,\s*(['"][^\n]*?['"])\s*\)\s*\)\s*\)\s*;?"#,
    r#"\s*(var|let|const)\s+([A-Za-z0-9_$]+)\s*=\s*require\(\s*([A-Za-z0-9_$]+)\s*\)"#
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idiom {
    DirectBinary,
    BindingsHelper,
    GenericLiteral,
    PreGypFinder,
}

/// Application order. Earlier idioms win overlapping spans.
pub const IDIOMS: [Idiom; 4] = [
    Idiom::DirectBinary,
    Idiom::BindingsHelper,
    Idiom::GenericLiteral,
    Idiom::PreGypFinder,
];

pub struct IdiomContext<'a> {
    pub code: &'a str,
    pub file: &'a MatchContext<'a>,
    pub engine: &'a NativesEngine,
}

impl Idiom {
    /// Record overwrites for every resolvable match. Returns whether any
    /// overwrite was recorded.
    pub fn apply(self, cx: &IdiomContext<'_>, edit: &mut SourceEdit<'_>) -> NativesResult<bool> {
        match self {
            Idiom::DirectBinary => replace_all(cx, edit, &REQUIRE_LITERAL_RE, rewrite_direct),
            Idiom::BindingsHelper => replace_all(cx, edit, &BINDINGS_RE, rewrite_bindings),
            Idiom::GenericLiteral => replace_all(cx, edit, &REQUIRE_LITERAL_RE, rewrite_generic),
            Idiom::PreGypFinder => rewrite_pre_gyp(cx, edit),
        }
    }
}

fn replace_all<F>(
    cx: &IdiomContext<'_>,
    edit: &mut SourceEdit<'_>,
    pattern: &Regex,
    rewrite: F,
) -> NativesResult<bool>
where
    F: Fn(&IdiomContext<'_>, &Captures<'_>) -> NativesResult<Option<String>>,
{
    let mut replaced = false;
    for caps in pattern.captures_iter(cx.code) {
        let Some(whole) = caps.get(0) else { continue };
        if edit.overlaps(whole.start(), whole.end()) {
            continue;
        }
        if let Some(replacement) = rewrite(cx, &caps)? {
            replaced |= edit.overwrite(whole.start(), whole.end(), replacement);
        }
    }
    Ok(replaced)
}

/// JSON string literal, which is also a valid JS string literal.
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn deferred_load(token: &str) -> String {
    format!("import({})", js_string(token))
}

fn eval_scope(engine: &NativesEngine) -> EvalScope {
    let options = engine.options();
    EvalScope::for_target(
        &options.effective_platform(),
        &options.effective_arch(),
        options.node_version.as_deref(),
    )
}

fn rewrite_direct(cx: &IdiomContext<'_>, caps: &Captures<'_>) -> NativesResult<Option<String>> {
    let Some(path) = resolve_native_binary(&caps[1], Some(cx.file.file)) else {
        return Ok(None);
    };
    // an already relocated reference names a copy that is not on disk here
    if !path.exists() {
        return Ok(None);
    }

    let record = cx.engine.relocate(&path)?;
    Ok(Some(deferred_load(&token_for(&record.logical_name))))
}

fn rewrite_bindings(cx: &IdiomContext<'_>, caps: &Captures<'_>) -> NativesResult<Option<String>> {
    let argument = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");

    let mut alias = if argument.is_empty() {
        DEFAULT_BINDINGS_ALIAS.to_string()
    } else {
        match static_eval(argument, &eval_scope(cx.engine)) {
            Some(alias) => alias,
            None => {
                debug!(argument = argument, "bindings argument is not a literal");
                return Ok(None);
            }
        }
    };
    if !alias.ends_with(".node") {
        alias.push_str(".node");
    }

    let candidates = bindings_candidates(cx.engine, cx.file.module_root(), &alias);
    let Some(fallback) = candidates.first().cloned() else {
        return Ok(None);
    };
    let chosen = candidates
        .into_iter()
        .find(|candidate| candidate.exists())
        .unwrap_or(fallback);

    let record = cx.engine.relocate(&chosen)?;
    Ok(Some(deferred_load(&token_for(&record.logical_name))))
}

/// Locations probed for a `bindings` add-on, in priority order.
pub fn bindings_candidates(engine: &NativesEngine, module_root: &Path, alias: &str) -> Vec<PathBuf> {
    let options = engine.options();
    let mut candidates = vec![
        module_root.join("build").join(alias),
        module_root.join("build").join("Debug").join(alias),
        module_root.join("build").join("Release").join(alias),
    ];
    if let Some(version) = &options.node_version {
        candidates.push(
            module_root
                .join(options.effective_compiled_dir())
                .join(version)
                .join(options.effective_platform())
                .join(options.effective_arch())
                .join(alias),
        );
    }
    candidates.into_iter().map(|c| normalize_path(&c)).collect()
}

fn rewrite_generic(cx: &IdiomContext<'_>, caps: &Captures<'_>) -> NativesResult<Option<String>> {
    let mut reference = caps[1].to_string();
    if !reference.ends_with(".node") {
        reference.push_str(".node");
    }

    // rooted literals still resolve under the module root
    let relative = reference.trim_start_matches(|c: char| c == '/' || c == '\\');
    let path = normalize_path(&cx.file.module_root().join(relative));
    if !path.exists() {
        return Ok(None);
    }

    let record = cx.engine.relocate(&path)?;
    Ok(Some(deferred_load(&token_for(&record.logical_name))))
}

fn pre_gyp_pair_pattern(finder_var: &str) -> Option<Regex> {
    let pattern = PRE_GYP_PAIR_TEMPLATE.replace("FINDER", &regex::escape(finder_var));
    Regex::new(&pattern).ok()
}

fn rewrite_pre_gyp(cx: &IdiomContext<'_>, edit: &mut SourceEdit<'_>) -> NativesResult<bool> {
    if !cx.code.contains(PRE_GYP_MARKER) {
        return Ok(false);
    }

    let import = PRE_GYP_IMPORT_RE.captures(cx.code);
    let finder_var = import
        .as_ref()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_FINDER_VAR);
    let imported = import.as_ref().and_then(|caps| caps.get(2)).map(|m| m.as_str());

    let Some(pair_re) = pre_gyp_pair_pattern(finder_var) else {
        return Ok(false);
    };

    let mut replaced = false;
    for caps in pair_re.captures_iter(cx.code) {
        let Some(whole) = caps.get(0) else { continue };
        // `require(V1)` must load the path bound just before
        if caps[6] != caps[2] || edit.overlaps(whole.start(), whole.end()) {
            continue;
        }

        let Some(reference) = static_eval(&caps[3], &eval_scope(cx.engine)) else {
            debug!(expr = &caps[3], "pre-gyp package path is not a literal");
            continue;
        };

        let Some(finder) = load_finder(cx.engine.pre_gyp_loader(), imported, cx.file.module_root())
        else {
            return Ok(replaced);
        };

        let package_json = normalize_path(&cx.file.file_dir().join(reference));
        let Some(binary_path) = finder.find(&package_json, cx.engine.options()) else {
            debug!(package = %package_json.display(), "finder returned no binary");
            continue;
        };

        let record = cx.engine.relocate(&normalize_path(&binary_path))?;
        let replacement = format!(
            "{} {} = {}; {} {} = {}",
            &caps[1],
            &caps[2],
            js_string(&record.logical_name.replace('\\', "/")),
            &caps[4],
            &caps[5],
            deferred_load(&token_for(&record.logical_name)),
        );
        replaced |= edit.overwrite(whole.start(), whole.end(), replacement);
    }

    Ok(replaced)
}
