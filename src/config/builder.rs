use std::path::Path;

use serde::de::DeserializeOwned;

use super::env::EnvSource;
use super::file::FileSource;
use super::source::ConfigSource;
use super::value::Config;
use super::ConfigError;

/// Loads configuration files on top of a stack of default sources.
///
/// Default sources are merged in registration order, with later sources
/// overriding earlier ones. The file being loaded goes on top of the defaults,
/// and override sources (typically environment variables) go on top of the file.
/// Nested tables are merged recursively; other values (including arrays) are
/// replaced entirely.
///
/// ## Variable References
///
/// String values can reference other config values using `${path.to.field}` syntax:
///
/// ```toml
/// [server]
/// host = "localhost"
/// port = 8080
/// url = "http://${server.host}:${server.port}/api"
/// ```
///
/// Use `$$` to escape a literal `$` (e.g., `$${VAR}` becomes `${VAR}`).
/// References that no layer defines are left unresolved rather than rejected.
///
/// ## Example
///
/// ```no_run
/// use confsync::config::ConfigLoader;
///
/// let loader = ConfigLoader::new()
///     .with_defaults_file("conf/defaults.toml", true)
///     .with_env("MYAPP", "__");
///
/// let config = loader.load_file("conf/service-a.conf")?;
/// # Ok::<(), confsync::config::ConfigError>(())
/// ```
#[derive(Debug, Default)]
#[must_use = "a loader does nothing until .load() or .load_file() is called"]
pub struct ConfigLoader {
    defaults: Vec<Box<dyn ConfigSource>>,
    overrides: Vec<Box<dyn ConfigSource>>,
}

impl ConfigLoader {
    /// Creates a loader with no default sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a TOML file to the defaults.
    ///
    /// If `required` is `true`, loading fails if the file doesn't exist.
    /// Optional files that are missing are silently skipped.
    pub fn with_defaults_file(self, path: impl AsRef<Path>, required: bool) -> Self {
        self.with_default_source(FileSource::new(path, required))
    }

    pub fn with_default_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.defaults.push(Box::new(source));
        self
    }

    /// Loads overrides from environment variables with the given prefix.
    ///
    /// Environment variables are mapped to config paths by:
    /// 1. Removing the prefix and separator
    /// 2. Splitting remaining segments on the separator
    /// 3. Converting path segments to lowercase
    ///
    /// Values are coerced from strings to the most specific type:
    /// integer, float, boolean, or string (fallback).
    pub fn with_env(self, prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        self.with_override_source(EnvSource::new(prefix, separator))
    }

    pub fn with_override_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.overrides.push(Box::new(source));
        self
    }

    /// Merges the defaults and overrides and resolves references.
    pub fn load(&self) -> Result<Config, ConfigError> {
        self.load_layered(None)
    }

    /// Parses `path`, merges it between the defaults and the overrides, and
    /// resolves references.
    ///
    /// Every layer is read fresh on each call.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        self.load_layered(Some(path.as_ref()))
    }

    /// Loads, resolves and deserializes the defaults and overrides.
    pub fn build<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        self.load()?.deserialize()
    }

    fn load_layered(&self, path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut merged = Config::empty();

        for source in &self.defaults {
            merged.merge(source.load()?);
        }

        if let Some(path) = path {
            merged.merge(FileSource::new(path, true).load()?);
        }

        for source in &self.overrides {
            merged.merge(source.load()?);
        }

        // Resolve ${...} references after all sources are merged
        merged.resolve()
    }
}
