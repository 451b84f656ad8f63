//! Structured configuration values with origin tracking.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;

use super::ConfigError;

/// Human-readable description of where a value was defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    description: String,
}

impl Origin {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }

    /// Origin pointing at a line of a named source, rendered as `"<name>: <line>"`.
    pub fn file_line(name: impl fmt::Display, line: usize) -> Self {
        Self::new(format!("{name}: {line}"))
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// The payload of a [`ConfigValue`].
///
/// `Expression` holds the raw `${...}` template of a value that could not be
/// resolved yet. A value is either a literal or an expression, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    List(Vec<ConfigValue>),
    Object(Config),
    Expression(String),
}

/// A configuration value together with its optional origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValue {
    kind: ValueKind,
    origin: Option<Origin>,
}

impl ConfigValue {
    pub fn new(kind: ValueKind) -> Self {
        Self { kind, origin: None }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn integer(value: i64) -> Self {
        Self::new(ValueKind::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ValueKind::Boolean(value))
    }

    pub fn list(items: Vec<ConfigValue>) -> Self {
        Self::new(ValueKind::List(items))
    }

    pub fn object(config: Config) -> Self {
        Self::new(ValueKind::Object(config))
    }

    /// An unresolved substitution such as `${server.host}`.
    pub fn expression(template: impl Into<String>) -> Self {
        Self::new(ValueKind::Expression(template.into()))
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut ValueKind {
        &mut self.kind
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Config> {
        match &self.kind {
            ValueKind::Object(config) => Some(config),
            _ => None,
        }
    }

    /// Returns the template text if this value is an unresolved expression.
    pub fn as_expression(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::Expression(template) => Some(template),
            _ => None,
        }
    }

    /// Returns `true` if neither this value nor anything nested in it is an expression.
    pub fn is_resolved(&self) -> bool {
        match &self.kind {
            ValueKind::Expression(_) => false,
            ValueKind::List(items) => items.iter().all(ConfigValue::is_resolved),
            ValueKind::Object(config) => config.is_resolved(),
            _ => true,
        }
    }

    /// Renders the value in TOML syntax (strings are quoted).
    pub fn render(&self) -> String {
        self.to_toml().to_string()
    }

    /// Renders the value the way flat property dictionaries carry it:
    /// strings and expressions as their raw text, everything else in TOML syntax.
    pub fn render_unquoted(&self) -> String {
        match &self.kind {
            ValueKind::String(s) | ValueKind::Expression(s) => s.clone(),
            _ => self.render(),
        }
    }

    pub(crate) fn to_toml(&self) -> toml::Value {
        match &self.kind {
            ValueKind::String(s) | ValueKind::Expression(s) => toml::Value::String(s.clone()),
            ValueKind::Integer(i) => toml::Value::Integer(*i),
            ValueKind::Float(f) => toml::Value::Float(*f),
            ValueKind::Boolean(b) => toml::Value::Boolean(*b),
            ValueKind::List(items) => {
                toml::Value::Array(items.iter().map(ConfigValue::to_toml).collect())
            }
            ValueKind::Object(config) => toml::Value::Table(config.to_toml()),
        }
    }
}

/// A dotted key path such as `server.host` or `labels."app.kubernetes.io/name"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parses a dotted path. Segments may be double-quoted to contain dots.
    pub fn parse(path: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidPath(path.to_string());
        let mut segments = Vec::new();
        let mut chars = path.chars().peekable();

        loop {
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }

            let mut segment = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => segment.push(chars.next().ok_or_else(invalid)?),
                        _ => segment.push(ch),
                    }
                }
                if !closed {
                    return Err(invalid());
                }
                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
            } else {
                while let Some(&ch) = chars.peek() {
                    if ch == '.' || ch == '"' {
                        break;
                    }
                    segment.push(ch);
                    chars.next();
                }
                let trimmed = segment.trim();
                if trimmed.is_empty() {
                    return Err(invalid());
                }
                segment = trimmed.to_string();
            }
            segments.push(segment);

            match chars.next() {
                None => break,
                Some('.') => continue,
                Some(_) => return Err(invalid()),
            }
        }

        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            if is_bare(segment) {
                f.write_str(segment)?;
            } else {
                write!(f, "\"{}\"", segment.replace('\\', "\\\\").replace('"', "\\\""))?;
            }
        }
        Ok(())
    }
}

fn is_bare(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// An ordered tree of configuration values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    entries: BTreeMap<String, ConfigValue>,
}

impl Config {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the top-level entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.entries.insert(key.into(), value);
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut ConfigValue> {
        self.entries.values_mut()
    }

    /// Looks up a value by its dotted path.
    pub fn get(&self, path: &str) -> Result<Option<&ConfigValue>, ConfigError> {
        Ok(self.get_path(&KeyPath::parse(path)?))
    }

    pub fn get_path(&self, path: &KeyPath) -> Option<&ConfigValue> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.entries.get(first)?;
        for segment in rest {
            current = current.as_object()?.entries.get(segment)?;
        }
        Some(current)
    }

    /// Returns a copy with `value` placed at `path`, replacing whatever was there.
    ///
    /// Intermediate objects are created as needed; non-object values in the
    /// way are replaced.
    pub fn with_value(mut self, path: &KeyPath, value: ConfigValue) -> Self {
        set_at_path(&mut self, path.segments(), value);
        self
    }

    /// Merges `fallback` beneath `self`: on conflict `self` wins, objects
    /// are merged recursively.
    pub fn with_fallback(self, fallback: Config) -> Self {
        let mut merged = fallback;
        merged.merge(self);
        merged
    }

    /// Merges `overlay` on top of `self`: on conflict `overlay` wins.
    pub fn merge(&mut self, overlay: Config) {
        deep_merge(self, overlay);
    }

    /// Every non-object value with its full path, in key order.
    ///
    /// Lists are leaves. Empty objects contribute nothing.
    pub fn leaves(&self) -> Vec<(KeyPath, &ConfigValue)> {
        let mut out = Vec::new();
        collect_leaves(self, &KeyPath::default(), &mut out);
        out
    }

    /// Returns `true` if no expression remains anywhere in the tree.
    pub fn is_resolved(&self) -> bool {
        self.entries.values().all(ConfigValue::is_resolved)
    }

    pub fn to_toml(&self) -> toml::Table {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_toml()))
            .collect()
    }

    /// Deserializes the tree into a typed structure.
    ///
    /// Fails if any expression is left unresolved.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        if let Some((path, _)) = self.leaves().into_iter().find(|(_, v)| !v.is_resolved()) {
            return Err(ConfigError::Unresolved(path.to_string()));
        }
        toml::Value::Table(self.to_toml())
            .try_into()
            .map_err(ConfigError::DeserializeError)
    }
}

fn collect_leaves<'a>(config: &'a Config, prefix: &KeyPath, out: &mut Vec<(KeyPath, &'a ConfigValue)>) {
    for (key, value) in &config.entries {
        let path = prefix.child(key.clone());
        match value.kind() {
            ValueKind::Object(nested) => collect_leaves(nested, &path, out),
            _ => out.push((path, value)),
        }
    }
}

fn set_at_path(config: &mut Config, path: &[String], value: ConfigValue) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };

    if rest.is_empty() {
        config.entries.insert(first.clone(), value);
        return;
    }

    if !matches!(config.entries.get(first).map(ConfigValue::kind), Some(ValueKind::Object(_))) {
        config
            .entries
            .insert(first.clone(), ConfigValue::object(Config::empty()));
    }

    if let Some(ValueKind::Object(nested)) = config.entries.get_mut(first).map(ConfigValue::kind_mut) {
        set_at_path(nested, rest, value);
    }
}

fn deep_merge(base: &mut Config, overlay: Config) {
    for (key, value) in overlay.entries {
        match (base.entries.get_mut(&key), value) {
            (
                Some(ConfigValue {
                    kind: ValueKind::Object(base_table),
                    origin,
                }),
                ConfigValue {
                    kind: ValueKind::Object(overlay_table),
                    origin: overlay_origin,
                },
            ) => {
                deep_merge(base_table, overlay_table);
                if overlay_origin.is_some() {
                    *origin = overlay_origin;
                }
            }
            (_, value) => {
                base.entries.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> KeyPath {
        KeyPath::parse(s).unwrap()
    }

    #[test]
    fn test_key_path_quoted_segments() {
        let parsed = path(r#"labels."app.name".tier"#);
        assert_eq!(parsed.segments(), ["labels", "app.name", "tier"]);
        assert_eq!(parsed.to_string(), r#"labels."app.name".tier"#);
        assert_eq!(KeyPath::parse(&parsed.to_string()).unwrap(), parsed);
    }

    #[test]
    fn test_key_path_rejects_empty_segment() {
        assert!(matches!(KeyPath::parse("a..b"), Err(ConfigError::InvalidPath(_))));
        assert!(matches!(KeyPath::parse(""), Err(ConfigError::InvalidPath(_))));
        assert!(matches!(KeyPath::parse("\"open"), Err(ConfigError::InvalidPath(_))));
    }

    #[test]
    fn test_with_value_creates_intermediate_objects() {
        let config = Config::empty().with_value(&path("server.http.port"), ConfigValue::integer(80));
        assert_eq!(
            config.get("server.http.port").unwrap(),
            Some(&ConfigValue::integer(80))
        );
    }

    #[test]
    fn test_with_value_replaces_subtree() {
        let config = Config::empty()
            .with_value(&path("a.b"), ConfigValue::integer(1))
            .with_value(&path("a"), ConfigValue::string("flat"));
        assert_eq!(config.get("a").unwrap().and_then(ConfigValue::as_str), Some("flat"));
        assert_eq!(config.get("a.b").unwrap(), None);
    }

    #[test]
    fn test_with_fallback_prefers_self() {
        let front = Config::empty()
            .with_value(&path("db.host"), ConfigValue::string("prod"))
            .with_value(&path("db.pool"), ConfigValue::list(vec![ConfigValue::integer(1)]));
        let back = Config::empty()
            .with_value(&path("db.host"), ConfigValue::string("localhost"))
            .with_value(&path("db.port"), ConfigValue::integer(5432))
            .with_value(
                &path("db.pool"),
                ConfigValue::list(vec![ConfigValue::integer(2), ConfigValue::integer(3)]),
            );

        let merged = front.with_fallback(back);
        assert_eq!(merged.get("db.host").unwrap().and_then(ConfigValue::as_str), Some("prod"));
        assert_eq!(merged.get("db.port").unwrap(), Some(&ConfigValue::integer(5432)));
        assert_eq!(merged.get("db.pool").unwrap().map(ConfigValue::render), Some("[1]".into()));
    }

    #[test]
    fn test_leaves_skip_empty_objects() {
        let config = Config::empty()
            .with_value(&path("a.b"), ConfigValue::boolean(true))
            .with_value(&path("empty"), ConfigValue::object(Config::empty()))
            .with_value(&path("z"), ConfigValue::expression("${a.b}"));
        let leaves: Vec<String> = config.leaves().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(leaves, vec!["a.b", "z"]);
        assert!(!config.is_resolved());
    }

    #[test]
    fn test_render_forms() {
        assert_eq!(ConfigValue::string("hi").render(), "\"hi\"");
        assert_eq!(ConfigValue::string("hi").render_unquoted(), "hi");
        assert_eq!(ConfigValue::integer(42).render_unquoted(), "42");
        assert_eq!(ConfigValue::boolean(false).render_unquoted(), "false");
        assert_eq!(ConfigValue::expression("${x}").render_unquoted(), "${x}");
    }

    #[test]
    fn test_deserialize_rejects_unresolved() {
        let config = Config::empty().with_value(&path("x"), ConfigValue::expression("${y}"));
        let result: Result<toml::Table, _> = config.deserialize();
        assert!(matches!(result, Err(ConfigError::Unresolved(p)) if p == "x"));
    }
}
