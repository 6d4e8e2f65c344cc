//! Error types for the relocation engine.
//!
//! Almost every failure mode of the engine degrades to "leave the source
//! unchanged" or "warn and continue". The variants here are the few conditions
//! that are surfaced to the host.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum NativesError {
    #[error("Could not find a free logical name for {} after {attempts} attempts", .path.display())]
    NameExhausted { path: PathBuf, attempts: u32 },

    #[error("Logical name {name} for {} is already used by another binary", .path.display())]
    NameTaken { path: PathBuf, name: String },

    #[error("Invalid natives options: {0}")]
    InvalidOptions(#[from] serde_json::Error),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type NativesResult<T> = Result<T, NativesError>;
