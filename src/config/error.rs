use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("required config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config '{origin}': {source}")]
    ParseError {
        origin: String,
        source: toml_edit::TomlError,
    },

    #[error("failed to deserialize config: {0}")]
    DeserializeError(#[from] toml::de::Error),

    #[error("circular reference detected at {0}")]
    CircularReference(String),

    #[error("invalid key path: {0}")]
    InvalidPath(String),

    #[error("cannot reference non-scalar value: {0}")]
    NonScalarReference(String),

    #[error("unclosed reference (missing '}}') in {0:?}")]
    UnclosedReference(String),

    #[error("configuration is not fully resolved: {0}")]
    Unresolved(String),
}
