use super::source::ConfigSource;
use super::value::{Config, ConfigValue, KeyPath, Origin};
use super::ConfigError;

/// Environment variables mapped onto config paths.
///
/// `PREFIX<sep>DATABASE<sep>PORT=5432` becomes `database.port = 5432`.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
    separator: String,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        let separator = separator.into();
        assert!(!separator.is_empty(), "separator must not be empty");
        Self {
            prefix: prefix.into(),
            separator,
        }
    }

    /// Builds a config from an explicit set of variables.
    pub fn from_vars<I>(&self, vars: I) -> Config
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix_with_sep = format!("{}{}", self.prefix, self.separator);
        let mut config = Config::empty();

        for (key, value) in vars {
            let Some(path_str) = key.strip_prefix(&prefix_with_sep) else {
                continue;
            };

            let path: Vec<String> = path_str
                .split(&self.separator)
                .map(|s| s.to_lowercase())
                .collect();
            if path.iter().any(String::is_empty) {
                continue;
            }

            let origin = Origin::new(format!("env variable {key}"));
            config = config.with_value(&KeyPath::new(path), coerce_value(&value).with_origin(origin));
        }

        config
    }
}

impl ConfigSource for EnvSource {
    fn load(&self) -> Result<Config, ConfigError> {
        Ok(self.from_vars(std::env::vars()))
    }
}

fn coerce_value(s: &str) -> ConfigValue {
    if s.eq_ignore_ascii_case("true") {
        return ConfigValue::boolean(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return ConfigValue::boolean(false);
    }

    if looks_like_integer(s) {
        if let Ok(i) = s.parse::<i64>() {
            return ConfigValue::integer(i);
        }
    }

    if s.contains('.') {
        if let Ok(f) = s.parse::<f64>() {
            return ConfigValue::float(f);
        }
    }

    ConfigValue::string(s)
}

fn looks_like_integer(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValueKind;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_maps_prefixed_variables_to_paths() {
        let source = EnvSource::new("APP", "__");
        let config = source.from_vars(vars(&[
            ("APP__DATABASE__HOST", "db.local"),
            ("APP__DATABASE__PORT", "5432"),
            ("OTHER__DATABASE__HOST", "ignored"),
            ("APP__", "ignored"),
            ("APP__A____B", "ignored"),
        ]));

        assert_eq!(
            config.get("database.host").unwrap().and_then(ConfigValue::as_str),
            Some("db.local")
        );
        assert_eq!(
            config.get("database.port").unwrap().map(ConfigValue::kind),
            Some(&ValueKind::Integer(5432))
        );
        assert_eq!(config.leaves().len(), 2);
        assert_eq!(
            config
                .get("database.port")
                .unwrap()
                .and_then(ConfigValue::origin)
                .map(Origin::description),
            Some("env variable APP__DATABASE__PORT")
        );
    }

    #[test]
    fn test_coerce_value() {
        assert_eq!(coerce_value("TRUE"), ConfigValue::boolean(true));
        assert_eq!(coerce_value("-12"), ConfigValue::integer(-12));
        assert_eq!(coerce_value("1.5"), ConfigValue::float(1.5));
        assert_eq!(coerce_value("1.2.3"), ConfigValue::string("1.2.3"));
        assert_eq!(coerce_value("-"), ConfigValue::string("-"));
    }
}
