use super::value::Config;
use super::ConfigError;

/// A layer in the configuration loading pipeline.
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    fn load(&self) -> Result<Config, ConfigError>;
}
