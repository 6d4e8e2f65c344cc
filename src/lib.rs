//! # Native Add-on Relocation
//!
//! Rewrites the ways JavaScript modules load native `.node` add-ons so that a
//! bundle can ship without the original `node_modules` layout.
//!
//! ## Invariants
//!
//! 1. **One record per binary**: a binary is known by its absolute, normalized
//!    path. Every reference to it, from any file, shares one relocation record
//!    and one copy.
//!
//! 2. **Unique logical names**: binaries sharing a basename get `name_1.node`,
//!    `name_2.node`, ... in order of discovery.
//!
//! 3. **Idiom order**: direct binary reference, `bindings` helper, generic
//!    literal, node-pre-gyp finder. An earlier idiom's overwrite wins.
//!
//! 4. **Permissive matching**: a load that cannot be resolved statically is
//!    left byte-for-byte as written. Missing binaries are warnings.
//!
//! 5. **Tokens**: rewritten loads are `import("\0natives:<logical name>")`.
//!    The host externalizes them and renders them as `require(...)`.

mod config;
mod copy;
mod engine;
mod error;
mod idioms;
mod pre_gyp;
mod registry;
mod resolve;
mod source_edit;
mod static_eval;

#[cfg(feature = "napi")]
mod bindings;


pub use config::{host_arch, host_platform, NativesOptions, COMPILED_DIR_ENV};
pub use copy::CopyOutcome;
pub use engine::{
    token_for, DynamicImportSyntax, ExternalReference, NativesEngine, RewriteOutput, ES_INTRO,
    TOKEN_PREFIX,
};
pub use error::{NativesError, NativesResult};
pub use idioms::{Idiom, IDIOMS};
pub use pre_gyp::{
    BinaryFinder, ManifestFinder, NodeModulesPreGypLoader, PreGypLoader, LEGACY_PACKAGE,
    SCOPED_PACKAGE,
};
pub use registry::{Mapping, NameMapper, RelocationRecord, MAX_NAME_ATTEMPTS};
pub use resolve::{find_module_root, resolve_native_binary, NATIVE_EXTENSIONS};
pub use source_edit::{PositionMap, Segment};
pub use static_eval::{static_eval, EvalScope};

/// Environment variable holding the log filter (`warn` when unset).
pub const LOG_ENV: &str = "NATIVES_LOG";

/// Install the fmt subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
