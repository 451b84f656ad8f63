//! TOML files as configuration layers.

use std::path::{Path, PathBuf};

use super::parse::parse_file;
use super::source::ConfigSource;
use super::value::Config;
use super::ConfigError;

/// A layer read from a TOML file on every load.
///
/// An optional file that does not exist contributes nothing. A file that
/// exists but fails to parse is an error either way.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    required: bool,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>, required: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            required,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<Config, ConfigError> {
        match parse_file(&self.path) {
            Err(ConfigError::FileNotFound(_)) if !self.required => Ok(Config::empty()),
            result => result,
        }
    }
}
