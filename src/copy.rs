//! Copy Scheduler
//!
//! Places a relocated binary at its copy destination. Called by the registry
//! exactly once per record, while the registry lock is held.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::registry::RelocationRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    /// The source binary does not exist. Carries the build warning.
    Missing(String),
    /// The source exists but the copy failed. Carries the build warning.
    Failed(String),
}

impl CopyOutcome {
    pub fn warning(&self) -> Option<&str> {
        match self {
            CopyOutcome::Copied => None,
            CopyOutcome::Missing(message) | CopyOutcome::Failed(message) => Some(message),
        }
    }
}

pub fn ensure_copied(record: &RelocationRecord) -> CopyOutcome {
    let source = &record.source_path;
    if !source.exists() {
        let message = format!("{} does not exist", source.display());
        warn!(source = %source.display(), "native binary missing, reference will be broken");
        return CopyOutcome::Missing(message);
    }

    match copy_file(source, &record.copy_destination) {
        Ok(()) => {
            debug!(
                source = %source.display(),
                destination = %record.copy_destination.display(),
                "copied native binary"
            );
            CopyOutcome::Copied
        }
        Err(e) => {
            let message = format!(
                "Failed to copy {} to {}: {}",
                source.display(),
                record.copy_destination.display(),
                e
            );
            warn!("{}", message);
            CopyOutcome::Failed(message)
        }
    }
}

fn copy_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::copy(source, destination).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(source: PathBuf, destination: PathBuf) -> RelocationRecord {
        RelocationRecord {
            source_path: source,
            logical_name: "./addon.node".to_string(),
            copy_destination: destination,
        }
    }

    #[test]
    fn test_copies_into_new_directories() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("addon.node");
        fs::write(&source, b"\x7fELF").unwrap();
        let destination = dir.path().join("out/nested/addon.node");

        let outcome = ensure_copied(&record(source, destination.clone()));
        assert_eq!(outcome, CopyOutcome::Copied);
        assert_eq!(fs::read(destination).unwrap(), b"\x7fELF");
    }

    #[test]
    fn test_missing_source_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("gone.node");
        let destination = dir.path().join("out/gone.node");

        let outcome = ensure_copied(&record(source.clone(), destination.clone()));
        assert!(matches!(outcome, CopyOutcome::Missing(_)));
        assert_eq!(
            outcome.warning(),
            Some(format!("{} does not exist", source.display()).as_str())
        );
        assert!(!destination.exists());
    }

    #[test]
    fn test_unwritable_destination_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("addon.node");
        fs::write(&source, b"bin").unwrap();
        let blocker = dir.path().join("out");
        fs::write(&blocker, b"not a directory").unwrap();
        let destination = blocker.join("addon.node");

        let outcome = ensure_copied(&record(source.clone(), destination.clone()));
        assert!(matches!(outcome, CopyOutcome::Failed(_)));
        let warning = outcome.warning().unwrap();
        assert!(warning.starts_with(&format!("Failed to copy {}", source.display())));
        assert!(warning.contains(&destination.display().to_string()));
        assert!(blocker.is_file());
    }
}
