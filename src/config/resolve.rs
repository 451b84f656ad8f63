//! Variable reference resolution for configuration values.
//!
//! Supports `${section.field}` syntax for cross-referencing values within config.
//! Use `$${...}` to escape and produce a literal `${...}`.
//!
//! Resolution is partial: a reference to a path that does not exist leaves the
//! value as an [`ValueKind::Expression`], so it can be resolved later once more
//! sources have been merged in.

use super::value::{Config, ConfigValue, KeyPath, ValueKind};
use super::ConfigError;

/// A piece of a string template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Reference(String),
}

impl Config {
    /// Resolves every `${path}` reference whose target is known and fully resolved.
    ///
    /// A template that consists of a single reference takes the referenced
    /// value, type included. Templates mixing text and references interpolate
    /// scalar values. References to missing paths are left in place.
    pub fn resolve(mut self) -> Result<Config, ConfigError> {
        resolve_references(&mut self)?;
        Ok(self)
    }
}

/// Resolves references in place until no more substitutions can be made.
///
/// Returns an error if the remaining unresolved values depend on each other.
pub fn resolve_references(config: &mut Config) -> Result<(), ConfigError> {
    loop {
        let snapshot = config.clone();
        let substitutions = resolve_pass(config, &snapshot)?;
        if substitutions == 0 {
            return check_cycles(config);
        }
    }
}

/// Splits a template into literal text and references, unescaping `$$`.
pub(crate) fn parse_template(s: &str) -> Result<Vec<Segment>, ConfigError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            literal.push(ch);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                literal.push('$');
            }
            Some('{') => {
                chars.next();
                let path = consume_until(&mut chars, '}')
                    .ok_or_else(|| ConfigError::UnclosedReference(s.to_string()))?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Reference(path.trim().to_string()));
            }
            _ => literal.push('$'),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

pub(crate) fn has_references(segments: &[Segment]) -> bool {
    segments.iter().any(|s| matches!(s, Segment::Reference(_)))
}

/// Joins the literal text of a template that has no references.
pub(crate) fn literal_text(segments: Vec<Segment>) -> String {
    segments
        .into_iter()
        .map(|s| match s {
            Segment::Literal(text) | Segment::Reference(text) => text,
        })
        .collect()
}

fn consume_until(chars: &mut std::iter::Peekable<std::str::Chars>, delim: char) -> Option<String> {
    let mut result = String::new();
    for ch in chars.by_ref() {
        if ch == delim {
            return Some(result);
        }
        result.push(ch);
    }
    None
}

fn resolve_pass(config: &mut Config, root: &Config) -> Result<usize, ConfigError> {
    let mut count = 0;
    for value in config.values_mut() {
        count += resolve_value(value, root)?;
    }
    Ok(count)
}

fn resolve_value(value: &mut ConfigValue, root: &Config) -> Result<usize, ConfigError> {
    let resolved = match value.kind_mut() {
        ValueKind::Expression(template) => resolve_template(template, root)?,
        ValueKind::Object(nested) => return resolve_pass(nested, root),
        ValueKind::List(items) => {
            let mut count = 0;
            for item in items.iter_mut() {
                count += resolve_value(item, root)?;
            }
            return Ok(count);
        }
        _ => return Ok(0),
    };

    match resolved {
        Some(kind) => {
            *value.kind_mut() = kind;
            Ok(1)
        }
        None => Ok(0),
    }
}

/// Returns the substituted value, or `None` if some reference is not ready.
fn resolve_template(template: &str, root: &Config) -> Result<Option<ValueKind>, ConfigError> {
    let segments = parse_template(template)?;

    if let [Segment::Reference(path)] = segments.as_slice() {
        return Ok(lookup(root, path)?
            .filter(|target| target.is_resolved())
            .map(|target| target.kind().clone()));
    }

    let mut result = String::new();
    for segment in &segments {
        match segment {
            Segment::Literal(text) => result.push_str(text),
            Segment::Reference(path) => {
                let Some(target) = lookup(root, path)?.filter(|t| t.is_resolved()) else {
                    return Ok(None);
                };
                result.push_str(&scalar_to_string(target, path)?);
            }
        }
    }
    Ok(Some(ValueKind::String(result)))
}

fn lookup<'a>(root: &'a Config, path: &str) -> Result<Option<&'a ConfigValue>, ConfigError> {
    Ok(root.get_path(&KeyPath::parse(path)?))
}

fn scalar_to_string(value: &ConfigValue, path: &str) -> Result<String, ConfigError> {
    match value.kind() {
        ValueKind::String(s) => Ok(s.clone()),
        ValueKind::Integer(i) => Ok(i.to_string()),
        ValueKind::Float(f) => Ok(f.to_string()),
        ValueKind::Boolean(b) => Ok(b.to_string()),
        ValueKind::List(_) | ValueKind::Object(_) | ValueKind::Expression(_) => {
            Err(ConfigError::NonScalarReference(path.to_string()))
        }
    }
}

/// Fails if any unresolved leaf depends, directly or transitively, on itself.
fn check_cycles(config: &Config) -> Result<(), ConfigError> {
    let mut nodes: Vec<(KeyPath, Vec<KeyPath>)> = Vec::new();
    for (path, value) in config.leaves() {
        if value.is_resolved() {
            continue;
        }
        let mut references = Vec::new();
        collect_references(value, &mut references)?;
        nodes.push((path, references));
    }

    let edges: Vec<Vec<usize>> = nodes
        .iter()
        .map(|(_, references)| {
            nodes
                .iter()
                .enumerate()
                .filter(|(_, (target, _))| references.iter().any(|r| overlaps(r, target)))
                .map(|(i, _)| i)
                .collect()
        })
        .collect();

    // 0 = unvisited, 1 = on stack, 2 = done
    let mut state = vec![0u8; nodes.len()];
    for start in 0..nodes.len() {
        if let Some(node) = find_cycle(start, &edges, &mut state) {
            return Err(ConfigError::CircularReference(nodes[node].0.to_string()));
        }
    }
    Ok(())
}

fn find_cycle(node: usize, edges: &[Vec<usize>], state: &mut [u8]) -> Option<usize> {
    match state[node] {
        1 => return Some(node),
        2 => return None,
        _ => {}
    }
    state[node] = 1;
    for &next in &edges[node] {
        if let Some(found) = find_cycle(next, edges, state) {
            return Some(found);
        }
    }
    state[node] = 2;
    None
}

fn collect_references(value: &ConfigValue, out: &mut Vec<KeyPath>) -> Result<(), ConfigError> {
    match value.kind() {
        ValueKind::Expression(template) => {
            for segment in parse_template(template)? {
                if let Segment::Reference(path) = segment {
                    out.push(KeyPath::parse(&path)?);
                }
            }
        }
        ValueKind::List(items) => {
            for item in items {
                collect_references(item, out)?;
            }
        }
        ValueKind::Object(nested) => {
            for (_, item) in nested.iter() {
                collect_references(item, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn overlaps(a: &KeyPath, b: &KeyPath) -> bool {
    a.segments().starts_with(b.segments()) || b.segments().starts_with(a.segments())
}
