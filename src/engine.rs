//! The synchronization engine: a watcher wired to a reconciler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::config::{ConfigError, ConfigLoader};
use crate::reconcile::Reconciler;
use crate::registry::Registry;
use crate::watcher::DirectoryWatcher;
use crate::Error;

/// Where the engine looks for files and how it loads them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory holding the configuration files.
    pub base_path: PathBuf,
    /// File extension, without the dot.
    pub extension: String,
    /// Prefix of environment variables that override file values.
    pub env_prefix: Option<String>,
    /// Files merged beneath every configuration file, lowest priority first.
    pub defaults: Vec<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("conf"),
            extension: "conf".to_string(),
            env_prefix: None,
            defaults: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Reads settings from a TOML file, with `CONFSYNC__*` environment
    /// variables taking precedence.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        ConfigLoader::new()
            .with_defaults_file(path, true)
            .with_env("CONFSYNC", "__")
            .build()
    }

    /// A loader that layers [`defaults`](Self::defaults) beneath each file
    /// and the [`env_prefix`](Self::env_prefix) variables above it.
    pub fn loader(&self) -> ConfigLoader {
        let loader = self
            .defaults
            .iter()
            .fold(ConfigLoader::new(), |loader, path| loader.with_defaults_file(path, true));
        match &self.env_prefix {
            Some(prefix) => loader.with_env(prefix.clone(), "__"),
            None => loader,
        }
    }
}

/// Keeps a registry in sync with a directory of configuration files.
///
/// ## Example
///
/// ```no_run
/// use std::sync::Arc;
/// use confsync::{Engine, EngineSettings, InMemoryRegistry};
///
/// let registry = Arc::new(InMemoryRegistry::new());
/// let mut engine = Engine::builder()
///     .with_registry(Arc::clone(&registry))
///     .with_settings(EngineSettings::from_file("confsync.toml")?)
///     .build()?;
///
/// engine.start()?;
/// // ...
/// engine.stop();
/// engine.wait()?;
/// # Ok::<(), confsync::Error>(())
/// ```
pub struct Engine<R> {
    settings: EngineSettings,
    reconciler: Arc<Reconciler<R>>,
    watcher: Option<DirectoryWatcher>,
}

impl Engine<()> {
    /// Creates a new builder for constructing an `Engine`.
    pub fn builder() -> EngineBuilder<()> {
        EngineBuilder {
            registry: None,
            settings: EngineSettings::default(),
            loader: None,
        }
    }
}

impl<R> Engine<R> {
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<R> {
        self.reconciler.registry()
    }

    /// Returns `true` while the watch loop runs and has not been asked to stop.
    pub fn is_running(&self) -> bool {
        self.watcher
            .as_ref()
            .is_some_and(|w| !w.is_stopping() && !w.is_finished())
    }

    /// Signals the watch loop to exit. Does not wait for it.
    pub fn stop(&mut self) {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.stop();
        }
    }

    /// Waits for the watch loop to exit and returns how it ended.
    ///
    /// Returns immediately if the engine was never started.
    pub fn wait(&mut self) -> Result<(), Error> {
        match self.watcher.take() {
            Some(watcher) => Ok(watcher.wait()?),
            None => Ok(()),
        }
    }
}

impl<R: Registry + 'static> Engine<R> {
    /// Starts watching [`EngineSettings::base_path`].
    ///
    /// Every file already present is reconciled first. A loop that was
    /// stopped or died is joined before the new one starts.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        if let Some(previous) = self.watcher.take() {
            if let Err(e) = previous.wait() {
                warn!(error = %e, "previous watch loop ended with an error");
            }
        }

        let watcher = DirectoryWatcher::start(
            &self.settings.base_path,
            &self.settings.extension,
            Arc::clone(&self.reconciler),
        )?;
        self.watcher = Some(watcher);
        Ok(())
    }
}

/// Builder for constructing an [`Engine`].
///
/// The builder starts without a registry (`EngineBuilder<()>`) and transitions
/// to `EngineBuilder<R>` when [`with_registry`](Self::with_registry) is called.
#[must_use = "builders do nothing until .build() is called"]
pub struct EngineBuilder<R> {
    registry: Option<Arc<R>>,
    settings: EngineSettings,
    loader: Option<ConfigLoader>,
}

impl EngineBuilder<()> {
    /// Attaches the registry the engine pushes configuration into.
    pub fn with_registry<R>(self, registry: Arc<R>) -> EngineBuilder<R> {
        EngineBuilder {
            registry: Some(registry),
            settings: self.settings,
            loader: self.loader,
        }
    }
}

impl<R> EngineBuilder<R> {
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the loader derived from the settings.
    pub fn with_loader(mut self, loader: ConfigLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Builds the `Engine`.
    ///
    /// Returns an error if no registry was provided.
    pub fn build(self) -> Result<Engine<R>, Error> {
        let registry = self.registry.ok_or(Error::MissingRegistry)?;
        let loader = self.loader.unwrap_or_else(|| self.settings.loader());
        let reconciler = Reconciler::new(registry, loader, self.settings.extension.clone());
        Ok(Engine {
            settings: self.settings,
            reconciler: Arc::new(reconciler),
            watcher: None,
        })
    }
}
