//! Pushes configuration files into the registry.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ConfigLoader};
use crate::identity::{Identity, IdentityError};
use crate::provenance::flatten;
use crate::registry::{FileMarker, MarkerError, Registry, RegistryError, BOOKKEEPING_KEYS, MARKER_KEY};
use crate::watcher::{WatchEvent, WatchHandler, WatchKind};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// What reconciling one event did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The entry received new properties.
    Updated,
    /// The entry already held the file's properties.
    Unchanged,
    Deleted,
    /// The file was deleted and had no entry.
    Absent,
}

/// Applies watch events to a registry.
///
/// Events must be fed one at a time: reconciling reads the entry, compares,
/// then writes, and nothing guards that sequence against a concurrent call.
pub struct Reconciler<R> {
    registry: Arc<R>,
    loader: ConfigLoader,
    extension: String,
}

impl<R> Reconciler<R> {
    pub fn new(registry: Arc<R>, loader: ConfigLoader, extension: impl Into<String>) -> Self {
        Self {
            registry,
            loader,
            extension: extension.into(),
        }
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }
}

impl<R: Registry> Reconciler<R> {
    /// Reconciles `event`, logging instead of returning failures.
    pub fn on_event(&self, event: &WatchEvent) {
        let identity = match Identity::from_path(&event.path, &self.extension) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(path = %event.path.display(), error = %e, "skipping file with malformed name");
                return;
            }
        };

        match self.reconcile_identity(&identity, event) {
            Ok(outcome) => {
                debug!(identity = %identity, kind = ?event.kind, ?outcome, "reconciled configuration file");
            }
            Err(e) => {
                error!(
                    identity = %identity,
                    path = %event.path.display(),
                    error = %e,
                    "failed to reconcile configuration file"
                );
            }
        }
    }

    pub fn reconcile(&self, event: &WatchEvent) -> Result<Outcome, ReconcileError> {
        let identity = Identity::from_path(&event.path, &self.extension)?;
        self.reconcile_identity(&identity, event)
    }

    fn reconcile_identity(
        &self,
        identity: &Identity,
        event: &WatchEvent,
    ) -> Result<Outcome, ReconcileError> {
        let marker = FileMarker::for_path(&event.path)?;
        match event.kind {
            WatchKind::Created | WatchKind::Modified => self.push(identity, &event.path, &marker),
            WatchKind::Deleted => self.remove(identity, &marker),
        }
    }

    fn push(
        &self,
        identity: &Identity,
        path: &Path,
        marker: &FileMarker,
    ) -> Result<Outcome, ReconcileError> {
        let mut properties = flatten(&self.loader.load_file(path)?);

        // A failed update below leaves a created entry without properties,
        // which the marker lookup cannot find, so a retry creates another.
        let entry = match self.registry.lookup_by_marker(marker)? {
            Some(entry) => entry,
            None if identity.is_factory() => self.registry.create_factory(identity.id())?,
            None => self.registry.create_single(identity.id())?,
        };

        let current = self.registry.properties(&entry)?.map(|mut current| {
            for key in BOOKKEEPING_KEYS {
                current.remove(key);
            }
            current
        });
        if current.as_ref() == Some(&properties) {
            return Ok(Outcome::Unchanged);
        }

        properties.insert(MARKER_KEY.to_string(), marker.to_string());
        self.registry.update(&entry, properties)?;
        info!(identity = %identity, marker = %marker, "updated registry entry");
        Ok(Outcome::Updated)
    }

    fn remove(&self, identity: &Identity, marker: &FileMarker) -> Result<Outcome, ReconcileError> {
        let Some(entry) = self.registry.lookup_by_marker(marker)? else {
            return Ok(Outcome::Absent);
        };
        self.registry.delete(entry)?;
        info!(identity = %identity, marker = %marker, "deleted registry entry");
        Ok(Outcome::Deleted)
    }
}

impl<R: Registry + 'static> WatchHandler for Reconciler<R> {
    fn handle(&self, event: &WatchEvent) {
        self.on_event(event);
    }
}
