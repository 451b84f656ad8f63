//! Configuration loading, merging and resolution.
//!
//! Files are TOML. Values keep track of where they were defined so that the
//! origin can travel through a flat property dictionary and back.

mod builder;
mod env;
mod error;
mod file;
mod parse;
mod resolve;
mod source;
mod value;

pub use builder::ConfigLoader;
pub use env::EnvSource;
pub use error::ConfigError;
pub use file::FileSource;
pub use parse::{parse_file, parse_str};
pub use resolve::resolve_references;
pub use source::ConfigSource;
pub use value::{Config, ConfigValue, KeyPath, Origin, ValueKind};
