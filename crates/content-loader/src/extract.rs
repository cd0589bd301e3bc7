use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::tracker::Fingerprint;

/// Errors from parsing or evaluating field paths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid field path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("field path `{path}` did not resolve: {reason}")]
    Unresolved { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed path expression such as `$.labels.agent_discovered_os` or `$.items[0]['name']`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, ExtractError> {
        let segments = parse_segments(raw).map_err(|reason| ExtractError::InvalidPath {
            path: raw.to_owned(),
            reason,
        })?;
        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walk `value` along this path.
    pub fn resolve<'v>(&self, value: &'v Value) -> Result<&'v Value, ExtractError> {
        let mut current = value;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map
                    .get(key)
                    .ok_or_else(|| self.unresolved(format!("missing key `{key}`")))?,
                (Segment::Index(index), Value::Array(items)) => items.get(*index).ok_or_else(|| {
                    self.unresolved(format!("index {index} out of range (len {})", items.len()))
                })?,
                (Segment::Key(key), other) => {
                    return Err(self.unresolved(format!(
                        "expected an object for key `{key}`, found {}",
                        kind_of(other)
                    )));
                }
                (Segment::Index(index), other) => {
                    return Err(self.unresolved(format!(
                        "expected an array for index {index}, found {}",
                        kind_of(other)
                    )));
                }
            };
        }
        Ok(current)
    }

    fn unresolved(&self, reason: String) -> ExtractError {
        ExtractError::Unresolved {
            path: self.raw.clone(),
            reason,
        }
    }
}

impl FromStr for FieldPath {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Evaluates an ordered list of field paths against a JSON value.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    paths: Vec<FieldPath>,
}

impl FieldExtractor {
    pub fn new<S: AsRef<str>>(paths: &[S]) -> Result<Self, ExtractError> {
        let paths = paths
            .iter()
            .map(|p| FieldPath::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { paths })
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[FieldPath] {
        &self.paths
    }

    /// Produce the fingerprint of `value`, one scalar per path, in path order.
    ///
    /// Any path that fails to resolve, or resolves to an object or array,
    /// fails the whole extraction.
    pub fn extract(&self, value: &Value) -> Result<Fingerprint, ExtractError> {
        let mut values = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let found = path.resolve(value)?;
            if found.is_object() || found.is_array() {
                return Err(path.unresolved(format!("expected a scalar, found {}", kind_of(found))));
            }
            values.push(found.clone());
        }
        Ok(Fingerprint::new(values))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn parse_segments(raw: &str) -> Result<Vec<Segment>, String> {
    let rest = raw
        .strip_prefix('$')
        .ok_or_else(|| "must start with `$`".to_owned())?;
    let chars: Vec<char> = rest.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                if start == i {
                    return Err(format!("expected a field name at offset {}", start + 1));
                }
                segments.push(Segment::Key(chars[start..i].iter().collect()));
            }
            '[' => {
                i += 1;
                match chars.get(i) {
                    Some(&quote @ ('\'' | '"')) => {
                        i += 1;
                        let start = i;
                        while i < chars.len() && chars[i] != quote {
                            i += 1;
                        }
                        if i >= chars.len() {
                            return Err("unterminated quoted key".to_owned());
                        }
                        segments.push(Segment::Key(chars[start..i].iter().collect()));
                        i += 1;
                    }
                    _ => {
                        let start = i;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                        if start == i {
                            return Err(format!("expected an index or quoted key at offset {}", start + 1));
                        }
                        let digits: String = chars[start..i].iter().collect();
                        let index = digits
                            .parse::<usize>()
                            .map_err(|e| format!("bad index `{digits}`: {e}"))?;
                        segments.push(Segment::Index(index));
                    }
                }
                if chars.get(i) != Some(&']') {
                    return Err(format!("expected `]` at offset {}", i + 1));
                }
                i += 1;
            }
            c => return Err(format!("unexpected `{c}` at offset {}", i + 1)),
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn release() -> Value {
        json!({
            "type": "TELEGRAF",
            "version": "1.11.0",
            "labels": {
                "agent_discovered_os": "linux",
                "agent_discovered_arch": "amd64"
            },
            "exe": ["telegraf", "--config"],
            "weird key": 7
        })
    }

    #[test]
    fn parses_dots_brackets_and_quotes() {
        let path = FieldPath::parse("$.labels['agent_discovered_os']").unwrap();
        assert_eq!(path.resolve(&release()).unwrap(), &json!("linux"));

        let path = FieldPath::parse("$.exe[1]").unwrap();
        assert_eq!(path.resolve(&release()).unwrap(), &json!("--config"));

        let path = FieldPath::parse("$[\"weird key\"]").unwrap();
        assert_eq!(path.resolve(&release()).unwrap(), &json!(7));
    }

    #[test]
    fn root_path_resolves_to_value() {
        let path = FieldPath::parse("$").unwrap();
        assert_eq!(path.resolve(&json!("x")).unwrap(), &json!("x"));
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["type", "$.", "$[", "$['open", "$[x]", "$.a]", "$..a"] {
            assert!(
                matches!(FieldPath::parse(bad), Err(ExtractError::InvalidPath { .. })),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn extracts_in_path_order() {
        let extractor = FieldExtractor::new(&["$.version", "$.type"]).unwrap();
        let fp = extractor.extract(&release()).unwrap();
        assert_eq!(fp.values(), &[json!("1.11.0"), json!("TELEGRAF")]);
    }

    #[test]
    fn missing_key_names_the_path() {
        let extractor = FieldExtractor::new(&["$.type", "$.labels.missing"]).unwrap();
        let err = extractor.extract(&release()).unwrap_err();
        match err {
            ExtractError::Unresolved { path, .. } => assert_eq!(path, "$.labels.missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn type_mismatch_and_range_fail() {
        let extractor = FieldExtractor::new(&["$.type.inner"]).unwrap();
        assert!(extractor.extract(&release()).is_err());

        let extractor = FieldExtractor::new(&["$.exe[5]"]).unwrap();
        assert!(extractor.extract(&release()).is_err());

        let extractor = FieldExtractor::new(&["$.labels[0]"]).unwrap();
        assert!(extractor.extract(&release()).is_err());
    }

    #[test]
    fn composite_values_are_not_fingerprints() {
        let extractor = FieldExtractor::new(&["$.labels"]).unwrap();
        assert!(matches!(
            extractor.extract(&release()),
            Err(ExtractError::Unresolved { .. })
        ));
    }

    #[test]
    fn extraction_is_deterministic() {
        let extractor = FieldExtractor::new(&["$.type", "$.labels.agent_discovered_arch"]).unwrap();
        let a = extractor.extract(&release()).unwrap();
        let b = extractor.extract(&release()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn null_is_a_valid_scalar() {
        let extractor = FieldExtractor::new(&["$.subscope"]).unwrap();
        let fp = extractor.extract(&json!({"subscope": null})).unwrap();
        assert_eq!(fp.values(), &[Value::Null]);
    }
}
