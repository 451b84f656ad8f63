//! TOML parsing that keeps track of where each value was defined.

use std::ops::Range;
use std::path::Path;

use toml_edit::{ImDocument, Item, Table, Value};

use super::resolve::{has_references, literal_text, parse_template};
use super::value::{Config, ConfigValue, Origin};
use super::ConfigError;

/// Parses TOML text into a [`Config`].
///
/// Every value is tagged with an [`Origin`] of the form `"<origin_name>: <line>"`.
/// Strings containing `${...}` references become unresolved expressions;
/// other strings have `$$` unescaped.
pub fn parse_str(src: &str, origin_name: &str) -> Result<Config, ConfigError> {
    let doc = ImDocument::parse(src).map_err(|e| ConfigError::ParseError {
        origin: origin_name.to_string(),
        source: e,
    })?;
    let origins = Origins {
        src,
        name: origin_name,
    };
    convert_table(doc.as_table(), &origins)
}

/// Reads and parses a TOML file, naming origins after the path.
pub fn parse_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.to_path_buf())
        } else {
            ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    parse_str(&contents, &path.display().to_string())
}

struct Origins<'a> {
    src: &'a str,
    name: &'a str,
}

impl Origins<'_> {
    fn at(&self, span: Option<Range<usize>>) -> Option<Origin> {
        let start = span?.start.min(self.src.len());
        let line = self.src.as_bytes()[..start]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1;
        Some(Origin::file_line(self.name, line))
    }
}

fn tag(value: ConfigValue, origin: Option<Origin>) -> ConfigValue {
    match origin {
        Some(origin) => value.with_origin(origin),
        None => value,
    }
}

fn convert_table(table: &Table, origins: &Origins<'_>) -> Result<Config, ConfigError> {
    let mut config = Config::empty();
    for (key, item) in table.iter() {
        let key_span = table.get_key_value(key).and_then(|(k, _)| k.span());
        if let Some(value) = convert_item(item, key_span, origins)? {
            config.insert(key, value);
        }
    }
    Ok(config)
}

fn convert_item(
    item: &Item,
    key_span: Option<Range<usize>>,
    origins: &Origins<'_>,
) -> Result<Option<ConfigValue>, ConfigError> {
    let value = match item {
        Item::None => return Ok(None),
        Item::Value(value) => convert_value(value, key_span, origins)?,
        Item::Table(table) => tag(
            ConfigValue::object(convert_table(table, origins)?),
            origins.at(table.span().or(key_span)),
        ),
        Item::ArrayOfTables(tables) => {
            let items = tables
                .iter()
                .map(|t| {
                    let object = ConfigValue::object(convert_table(t, origins)?);
                    Ok(tag(object, origins.at(t.span())))
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            tag(ConfigValue::list(items), origins.at(key_span))
        }
    };
    Ok(Some(value))
}

fn convert_value(
    value: &Value,
    key_span: Option<Range<usize>>,
    origins: &Origins<'_>,
) -> Result<ConfigValue, ConfigError> {
    let converted = match value {
        Value::String(s) => string_value(s.value())?,
        Value::Integer(i) => ConfigValue::integer(*i.value()),
        Value::Float(f) => ConfigValue::float(*f.value()),
        Value::Boolean(b) => ConfigValue::boolean(*b.value()),
        Value::Datetime(dt) => ConfigValue::string(dt.value().to_string()),
        Value::Array(array) => ConfigValue::list(
            array
                .iter()
                .map(|v| convert_value(v, None, origins))
                .collect::<Result<_, _>>()?,
        ),
        Value::InlineTable(table) => {
            let mut config = Config::empty();
            for (key, item) in table.iter() {
                let item_key_span = table.get_key_value(key).and_then(|(k, _)| k.span());
                config.insert(key, convert_value(item, item_key_span, origins)?);
            }
            ConfigValue::object(config)
        }
    };
    Ok(tag(converted, origins.at(value.span().or(key_span))))
}

fn string_value(raw: &str) -> Result<ConfigValue, ConfigError> {
    let segments = parse_template(raw)?;
    if has_references(&segments) {
        Ok(ConfigValue::expression(raw))
    } else {
        Ok(ConfigValue::string(literal_text(segments)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValueKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn origin_of(config: &Config, path: &str) -> String {
        config
            .get(path)
            .unwrap()
            .and_then(ConfigValue::origin)
            .map(|o| o.description().to_string())
            .unwrap()
    }

    #[test]
    fn test_values_carry_line_origins() {
        let config = parse_str(
            "name = \"svc\"\n\n[server]\nport = 8080\nenabled = true\n",
            "app.conf",
        )
        .unwrap();

        assert_eq!(origin_of(&config, "name"), "app.conf: 1");
        assert_eq!(origin_of(&config, "server.port"), "app.conf: 4");
        assert_eq!(origin_of(&config, "server.enabled"), "app.conf: 5");
        assert_eq!(
            config.get("server.port").unwrap(),
            Some(&ConfigValue::integer(8080).with_origin(Origin::new("app.conf: 4")))
        );
    }

    #[test]
    fn test_dotted_keys_and_inline_tables() {
        let config = parse_str("a.b = 1\nc = { d = \"x\" }\n", "inline.conf").unwrap();
        assert_eq!(origin_of(&config, "a.b"), "inline.conf: 1");
        assert_eq!(config.get("c.d").unwrap().and_then(ConfigValue::as_str), Some("x"));
        assert_eq!(origin_of(&config, "c.d"), "inline.conf: 2");
    }

    #[test]
    fn test_references_become_expressions() {
        let config = parse_str("y = \"${z}\"\nlit = \"$${z}\"\n", "e.conf").unwrap();
        assert_eq!(
            config.get("y").unwrap().map(ConfigValue::kind),
            Some(&ValueKind::Expression("${z}".into()))
        );
        assert_eq!(config.get("lit").unwrap().and_then(ConfigValue::as_str), Some("${z}"));
    }

    #[test]
    fn test_array_of_tables() {
        let config = parse_str("[[peer]]\nhost = \"a\"\n[[peer]]\nhost = \"b\"\n", "p.conf").unwrap();
        let ValueKind::List(peers) = config.get("peer").unwrap().unwrap().kind() else {
            panic!("expected list");
        };
        assert_eq!(peers.len(), 2);
        let second = peers[1].as_object().unwrap();
        assert_eq!(second.get("host").unwrap().and_then(ConfigValue::as_str), Some("b"));
    }

    #[test]
    fn test_parse_error_names_origin() {
        let result = parse_str("key = ", "broken.conf");
        assert!(matches!(result, Err(ConfigError::ParseError { origin, .. }) if origin == "broken.conf"));
    }

    #[test]
    fn test_unclosed_reference_is_rejected() {
        let result = parse_str("key = \"${open\"", "x.conf");
        assert!(matches!(result, Err(ConfigError::UnclosedReference(_))));
    }

    #[test]
    fn test_parse_file_uses_path_as_origin() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# header").unwrap();
        writeln!(file, "key = \"value\"").unwrap();

        let config = parse_file(file.path()).unwrap();
        assert_eq!(
            origin_of(&config, "key"),
            format!("{}: 2", file.path().display())
        );
    }

    #[test]
    fn test_parse_file_missing() {
        let result = parse_file(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
