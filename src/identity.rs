//! Mapping between configuration file names and registry identities.
//!
//! A file named `<id>[-<factory_id>].<ext>` configures the entry `id`. When a
//! factory id is present, the file configures one instance of the factory `id`.

use std::fmt;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("file name {name:?} does not end with .{extension}")]
    MissingExtension { name: String, extension: String },

    #[error("file name {0:?} does not contain a configuration id")]
    Malformed(String),

    #[error("path {0:?} has no file name")]
    NoFileName(String),
}

/// Logical identity of a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    id: String,
    factory_id: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, factory_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            factory_id,
        }
    }

    /// Derives the identity from a file name such as `a.conf` or `b-f.conf`.
    ///
    /// The text before the first `-` is the id, the rest is the factory id.
    pub fn from_file_name(name: &str, extension: &str) -> Result<Self, IdentityError> {
        let stem = name
            .strip_suffix(extension)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(|| IdentityError::MissingExtension {
                name: name.to_string(),
                extension: extension.to_string(),
            })?;

        let (id, factory_id) = match stem.split_once('-') {
            Some((id, factory_id)) => (id, Some(factory_id)),
            None => (stem, None),
        };

        if id.is_empty() || factory_id.is_some_and(str::is_empty) {
            return Err(IdentityError::Malformed(name.to_string()));
        }

        Ok(Self::new(id, factory_id.map(str::to_string)))
    }

    pub fn from_path(path: &Path, extension: &str) -> Result<Self, IdentityError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IdentityError::NoFileName(path.display().to_string()))?;
        Self::from_file_name(name, extension)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn factory_id(&self) -> Option<&str> {
        self.factory_id.as_deref()
    }

    pub fn is_factory(&self) -> bool {
        self.factory_id.is_some()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.factory_id {
            Some(factory_id) => write!(f, "{}-{}", self.id, factory_id),
            None => f.write_str(&self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_identity() {
        let identity = Identity::from_file_name("a.conf", "conf").unwrap();
        assert_eq!(identity, Identity::new("a", None));
        assert_eq!(identity.to_string(), "a");
        assert!(!identity.is_factory());
    }

    #[test]
    fn test_factory_identity() {
        let identity = Identity::from_file_name("b-f.conf", "conf").unwrap();
        assert_eq!(identity.id(), "b");
        assert_eq!(identity.factory_id(), Some("f"));
        assert_eq!(identity.to_string(), "b-f");
    }

    #[test]
    fn test_splits_on_first_dash_only() {
        let identity = Identity::from_file_name("org.acme.http-main-v2.conf", "conf").unwrap();
        assert_eq!(identity.id(), "org.acme.http");
        assert_eq!(identity.factory_id(), Some("main-v2"));
    }

    #[test]
    fn test_absent_factory_differs_from_any_value() {
        assert_ne!(Identity::new("a", None), Identity::new("a", Some("".into())));
        assert_ne!(Identity::new("a", None), Identity::new("a", Some("f".into())));
    }

    #[test]
    fn test_missing_extension() {
        assert!(matches!(
            Identity::from_file_name("a.toml", "conf"),
            Err(IdentityError::MissingExtension { .. })
        ));
        assert!(matches!(
            Identity::from_file_name("aconf", "conf"),
            Err(IdentityError::MissingExtension { .. })
        ));
        assert!(matches!(
            Identity::from_file_name("README", "conf"),
            Err(IdentityError::MissingExtension { .. })
        ));
    }

    #[test]
    fn test_malformed_names() {
        assert!(matches!(Identity::from_file_name(".conf", "conf"), Err(IdentityError::Malformed(_))));
        assert!(matches!(Identity::from_file_name("-f.conf", "conf"), Err(IdentityError::Malformed(_))));
        assert!(matches!(Identity::from_file_name("a-.conf", "conf"), Err(IdentityError::Malformed(_))));
    }

    #[test]
    fn test_from_path_uses_file_name() {
        let identity = Identity::from_path(Path::new("/etc/svc/conf/b-f.conf"), "conf").unwrap();
        assert_eq!(identity, Identity::new("b", Some("f".into())));
    }
}
