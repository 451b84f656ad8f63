//! Keeps a configuration registry in sync with a directory of TOML files.
//!
//! Each file `<id>[-<factory_id>].<ext>` under the watched directory maps to
//! one registry entry. The [`Engine`] pushes a file's flattened contents into
//! its entry whenever the file changes, and deletes the entry when the file
//! goes away. [`provenance::recover`] turns the flat dictionaries back into a
//! structured [`Config`] with the origin of every value.

pub mod config;
pub mod engine;
mod error;
pub mod identity;
pub mod provenance;
pub mod reconcile;
pub mod registry;
pub mod watcher;

pub use config::{Config, ConfigError, ConfigLoader};
pub use engine::{Engine, EngineBuilder, EngineSettings};
pub use error::Error;
pub use identity::Identity;
pub use provenance::{flatten, recover, Properties};
pub use reconcile::{Outcome, Reconciler};
pub use registry::{FileMarker, InMemoryRegistry, Registry};
pub use watcher::{DirectoryWatcher, WatchEvent, WatchHandler, WatchKind};
