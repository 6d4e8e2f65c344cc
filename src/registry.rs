//! Relocation Registry
//!
//! Maps each native binary (by absolute path) to the logical name it is known
//! by in the bundle and the location it is copied to. The registry is the only
//! mutation surface for relocations; the engine keeps it behind a lock so that
//! record creation, name selection and the copy form one critical section.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::copy::{ensure_copied, CopyOutcome};
use crate::error::{NativesError, NativesResult};

/// Upper bound on collision suffixes tried for one basename.
pub const MAX_NAME_ATTEMPTS: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationRecord {
    pub source_path: PathBuf,
    pub logical_name: String,
    pub copy_destination: PathBuf,
}

/// What a custom mapper decides for one binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapping {
    /// Use this exact logical name and copy destination.
    Record { name: String, copy_to: PathBuf },
    /// Derive the default record from this path's basename instead.
    Name(String),
}

pub type NameMapper = Box<dyn Fn(&Path) -> Mapping + Send + Sync>;

/// Result of [`RelocationRegistry::assign`]. `copy` is `None` when the record
/// already existed and nothing was copied.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub record: RelocationRecord,
    pub copy: Option<CopyOutcome>,
}

#[derive(Debug)]
pub struct RelocationRegistry {
    records: HashMap<PathBuf, RelocationRecord>,
    names: HashSet<String>,
    dest_dir: String,
    copy_to: PathBuf,
}

impl RelocationRegistry {
    pub fn new(dest_dir: impl Into<String>, copy_to: impl Into<PathBuf>) -> Self {
        Self {
            records: HashMap::new(),
            names: HashSet::new(),
            dest_dir: dest_dir.into(),
            copy_to: copy_to.into(),
        }
    }

    pub fn get(&self, path: &Path) -> Option<&RelocationRecord> {
        self.records.get(path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &RelocationRecord> {
        self.records.values()
    }

    pub fn assign(&mut self, path: &Path, mapper: Option<&NameMapper>) -> NativesResult<Assignment> {
        if let Some(existing) = self.records.get(path) {
            return Ok(Assignment {
                record: existing.clone(),
                copy: None,
            });
        }

        let (logical_name, copy_destination) = match mapper.map(|map| map(path)) {
            Some(Mapping::Record { name, copy_to }) => {
                if self.names.contains(&name) {
                    warn!(name = %name, source = %path.display(), "custom mapper reused a logical name");
                    return Err(NativesError::NameTaken {
                        path: path.to_path_buf(),
                        name,
                    });
                }
                (name, copy_to)
            }
            Some(Mapping::Name(name)) => self.default_mapping(Path::new(&name))?,
            None => self.default_mapping(path)?,
        };

        let record = RelocationRecord {
            source_path: path.to_path_buf(),
            logical_name,
            copy_destination,
        };
        debug!(
            source = %record.source_path.display(),
            name = %record.logical_name,
            "relocating native binary"
        );

        let outcome = ensure_copied(&record);
        self.names.insert(record.logical_name.clone());
        self.records.insert(path.to_path_buf(), record.clone());

        Ok(Assignment {
            record,
            copy: Some(outcome),
        })
    }

    fn default_mapping(&self, path: &Path) -> NativesResult<(String, PathBuf)> {
        let basename = self.find_available_basename(path)?;
        Ok((
            rebase_module(&self.dest_dir, &basename),
            self.copy_to.join(&basename),
        ))
    }

    /// The file's basename, or `stem_N.ext` for the first N whose logical
    /// name is unclaimed.
    fn find_available_basename(&self, path: &Path) -> NativesResult<String> {
        let basename = file_name_lossy(path);
        if !self.names.contains(&rebase_module(&self.dest_dir, &basename)) {
            return Ok(basename);
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        for i in 1..=MAX_NAME_ATTEMPTS {
            let candidate = format!("{}_{}{}", stem, i, ext);
            if !self.names.contains(&rebase_module(&self.dest_dir, &candidate)) {
                return Ok(candidate);
            }
        }

        Err(NativesError::NameExhausted {
            path: path.to_path_buf(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Join `basename` under the logical-name prefix using forward slashes.
pub fn rebase_module(dest_dir: &str, basename: &str) -> String {
    let separator = if dest_dir.ends_with('/') || dest_dir.ends_with('\\') {
        ""
    } else {
        "/"
    };
    format!("{}{}{}", dest_dir, separator, basename).replace('\\', "/")
}
