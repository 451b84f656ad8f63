//! Encoding of structured configuration into flat property dictionaries and back.
//!
//! Registries hand subscribers a flat `key -> string` dictionary. To keep the
//! provenance of each value, [`flatten`] writes two kinds of sibling keys:
//!
//! - `<key>.origin` holds the origin description (`"app.conf: 3"`).
//! - `<key>.expr` holds the template of a value that was still an unresolved
//!   `${...}` expression. It replaces the `<key>` entry, and always comes with
//!   a `<key>.origin`, [`UNKNOWN_ORIGIN`] if the value had none.
//!
//! [`recover`] and [`recover_map`] rebuild a [`Config`] from such a dictionary.
//! The result is not resolved: merge it with the original default sources and
//! call [`Config::resolve`] to obtain final values.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use tracing::debug;

use crate::config::{parse_str, Config, ConfigError, ConfigValue, KeyPath, Origin, ValueKind};

/// Flat dictionary as stored by the registry.
pub type Properties = BTreeMap<String, String>;

pub const ORIGIN_SUFFIX: &str = ".origin";
pub const EXPR_SUFFIX: &str = ".expr";

/// Origin written for expressions that carry none, so they survive recovery.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Flattens `config` into a property dictionary.
pub fn flatten(config: &Config) -> Properties {
    let mut properties = Properties::new();

    for (path, value) in config.leaves() {
        let key = path.to_string();
        let origin = value.origin().map(Origin::description);
        let origin = match value.kind() {
            ValueKind::Expression(template) => {
                properties.insert(format!("{key}{EXPR_SUFFIX}"), template.clone());
                Some(origin.unwrap_or(UNKNOWN_ORIGIN))
            }
            _ => {
                properties.insert(key.clone(), value.render_unquoted());
                origin
            }
        };
        if let Some(origin) = origin {
            properties.insert(format!("{key}{ORIGIN_SUFFIX}"), origin.to_string());
        }
    }

    properties
}

/// Recovers a configuration from an ordered property dictionary.
///
/// Only keys that carry an `.origin` sibling are recovered. Literal values come
/// back as strings tagged with their origin; expressions come back as
/// unresolved values merged beneath the literals. An `.origin` key with
/// neither sibling is skipped: it is usually a leaf that is itself named
/// `origin`, recovered through its own `.origin.origin` key.
pub fn recover(properties: &Properties) -> Result<Config, ConfigError> {
    recover_with(properties.keys().map(String::as_str), |key| {
        properties.get(key).map(String::as_str)
    })
}

/// Same as [`recover`], for unordered maps.
pub fn recover_map<S: BuildHasher>(
    properties: &HashMap<String, String, S>,
) -> Result<Config, ConfigError> {
    recover_with(properties.keys().map(String::as_str), |key| {
        properties.get(key).map(String::as_str)
    })
}

fn recover_with<'a, K, F>(keys: K, lookup: F) -> Result<Config, ConfigError>
where
    K: Iterator<Item = &'a str>,
    F: Fn(&str) -> Option<&'a str>,
{
    let mut config = Config::empty();

    for key in keys {
        let Some(value_key) = key.strip_suffix(ORIGIN_SUFFIX) else {
            continue;
        };
        let Some(origin) = lookup(key).map(Origin::new) else {
            continue;
        };

        if let Some(literal) = lookup(value_key) {
            let path = KeyPath::parse(value_key)?;
            config = config.with_value(&path, ConfigValue::string(literal).with_origin(origin));
        } else if let Some(template) = lookup(format!("{value_key}{EXPR_SUFFIX}").as_str()) {
            let fallback = synthesize(value_key, template, origin)?;
            config = config.with_fallback(fallback);
        } else {
            debug!(key, "no value or expression for origin key, skipping");
        }
    }

    Ok(config)
}

/// Parses `<key> = "<template>"` into a single-entry config tagged with `origin`.
fn synthesize(value_key: &str, template: &str, origin: Origin) -> Result<Config, ConfigError> {
    let path = KeyPath::parse(value_key)?;
    let assignment = format!("{path} = {}", ConfigValue::string(template).render());
    let parsed = parse_str(&assignment, origin.description())?;

    Ok(match parsed.get_path(&path) {
        Some(value) => {
            let value = value.clone().with_origin(origin);
            Config::empty().with_value(&path, value)
        }
        None => parsed,
    })
}
