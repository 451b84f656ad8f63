//! Access to the external configuration registry.
//!
//! The registry stores one flat [`Properties`] dictionary per entry and
//! notifies its own subscribers when an entry changes. From the engine's point
//! of view every call is an opaque remote mutation that may fail.

mod memory;

pub use memory::{InMemoryRegistry, MemoryEntry};

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::provenance::Properties;

/// Property holding the [`FileMarker`] of the file an entry was loaded from.
pub const MARKER_KEY: &str = "confsync.source";

/// Identity property assigned by the registry.
pub const PID_KEY: &str = "service.pid";

/// Factory identity property assigned by the registry.
pub const FACTORY_PID_KEY: &str = "service.factoryPid";

/// Keys the engine never compares when deciding whether an entry changed.
pub const BOOKKEEPING_KEYS: [&str; 3] = [MARKER_KEY, PID_KEY, FACTORY_PID_KEY];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("registry entry {0} does not exist")]
    NotFound(String),

    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("cannot build a file URI for {0}")]
pub struct MarkerError(PathBuf);

/// Canonical absolute `file://` URI of a configuration file.
///
/// Entries are matched to files through this marker alone, so a file keeps
/// its entry regardless of what id its name maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileMarker(String);

impl FileMarker {
    pub fn for_path(path: &Path) -> Result<Self, MarkerError> {
        let absolute = std::path::absolute(path).map_err(|_| MarkerError(path.to_path_buf()))?;
        let url = Url::from_file_path(&absolute).map_err(|()| MarkerError(path.to_path_buf()))?;
        Ok(Self(url.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Equality filter `(key=value)` used to query the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    key: String,
    value: String,
}

impl Filter {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        properties.get(&self.key) == Some(&self.value)
    }
}

/// Renders the filter with the value escaped.
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}={})", self.key, escape_filter_value(&self.value))
    }
}

/// Prefixes filter metacharacters `\ ( ) = *` with a backslash.
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '(' | ')' | '=' | '*') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Operations the engine needs from a configuration registry.
pub trait Registry: Send + Sync {
    type Entry: Send;

    /// Lists the entries whose properties match `filter`.
    fn list(&self, filter: &Filter) -> Result<Vec<Self::Entry>, RegistryError>;

    /// Returns the entry with the given id, creating it if needed.
    fn create_single(&self, pid: &str) -> Result<Self::Entry, RegistryError>;

    /// Creates a new instance of the factory `factory_pid`.
    fn create_factory(&self, factory_pid: &str) -> Result<Self::Entry, RegistryError>;

    /// Current properties of the entry, or `None` if it was never updated.
    fn properties(&self, entry: &Self::Entry) -> Result<Option<Properties>, RegistryError>;

    fn update(&self, entry: &Self::Entry, properties: Properties) -> Result<(), RegistryError>;

    fn delete(&self, entry: Self::Entry) -> Result<(), RegistryError>;

    /// Finds the entry created from the file identified by `marker`.
    fn lookup_by_marker(&self, marker: &FileMarker) -> Result<Option<Self::Entry>, RegistryError> {
        let filter = Filter::equals(MARKER_KEY, marker.as_str());
        Ok(self.list(&filter)?.into_iter().next())
    }
}
