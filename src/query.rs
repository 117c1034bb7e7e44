use std::fmt;

use crate::errors::{Error, Result};
use crate::parser::{ParseError, Parser};
use crate::value::Value;

/// A structural location inside a document: `.a.b[0]['x y']`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String), // .foo or ['foo']
    Index(usize), // [0]
}

/// Hook used to resolve the first segment of a query.
///
/// Plain values look keys up in objects; other scopes can resolve reserved
/// keys specially.
pub trait KeyExtractor {
    fn extract_by_key(&self, key: &str) -> Option<Value>;
}

impl KeyExtractor for Value {
    fn extract_by_key(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.get(key).cloned(),
            _ => None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `a.b[0]`, `.a['b c']` or `[1].a`. An empty string is the root.
    pub fn parse(input: &str) -> Result<Self> {
        parse_query(input).map_err(Error::from)
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(Segment::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(Segment::Index(index));
        self
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Put `prefix` in front of this query.
    pub fn prepend(&mut self, prefix: &Query) {
        let mut segments = prefix.segments.clone();
        segments.append(&mut self.segments);
        self.segments = segments;
    }

    /// Walk `root` structurally. The empty query yields `root` itself.
    pub fn extract(&self, root: &Value) -> Result<Value> {
        let mut current = root.clone();
        for seg in &self.segments {
            current = step(&current, seg).ok_or_else(|| Error::NotFound(self.to_string()))?;
        }
        Ok(current)
    }

    /// Resolve the first key through `root`'s extractor, the rest structurally.
    pub fn extract_with(&self, root: &dyn KeyExtractor) -> Result<Value> {
        let not_found = || Error::NotFound(self.to_string());
        let mut segments = self.segments.iter();
        let mut current = match segments.next() {
            None => return Err(not_found()),
            Some(Segment::Key(k)) => root.extract_by_key(k).ok_or_else(not_found)?,
            Some(Segment::Index(_)) => return Err(not_found()),
        };
        for seg in segments {
            current = step(&current, seg).ok_or_else(not_found)?;
        }
        Ok(current)
    }
}

fn step(v: &Value, seg: &Segment) -> Option<Value> {
    match (v, seg) {
        (Value::Object(map), Segment::Key(k)) => map.get(k).cloned(),
        (Value::Array(items), Segment::Index(i)) => items.get(*i).cloned(),
        _ => None,
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) if is_identifier(k) => write!(f, ".{k}"),
            Segment::Key(k) => write!(f, "['{}']", k.replace('\'', "\\'")),
            Segment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c == '-' || c.is_ascii_alphanumeric())
}

fn parse_query(input: &str) -> std::result::Result<Query, ParseError> {
    let mut p = Parser::new(input.trim());
    let mut query = Query::new();
    if p.eof() {
        return Ok(query);
    }
    // the leading dot is optional
    if !p.peek_str(".") && !p.peek_str("[") {
        query.segments.push(Segment::Key(parse_key(&mut p)?));
    }
    while !p.eof() {
        if p.consume_char('.') {
            query.segments.push(Segment::Key(parse_key(&mut p)?));
            continue;
        }
        if p.consume_char('[') {
            p.skip_ws();
            if p.peek_char() == Some('\'') || p.peek_char() == Some('"') {
                let key = p.parse_quoted_string()?;
                p.skip_ws();
                p.expect(']')?;
                query.segments.push(Segment::Key(key));
                continue;
            }
            let content = p.capture_until(']')?;
            p.expect(']')?;
            let mut tmp = Parser::new(content.trim());
            let idx = tmp.parse_int()?;
            if !tmp.eof() || idx < 0 {
                return Err(ParseError::InvalidSyntax(format!("bad index [{content}]")));
            }
            query.segments.push(Segment::Index(idx as usize));
            continue;
        }
        return Err(ParseError::InvalidSyntax(format!(
            "unexpected character {:?} in path",
            p.peek_char().unwrap_or_default()
        )));
    }
    Ok(query)
}

fn parse_key(p: &mut Parser) -> std::result::Result<String, ParseError> {
    let start = p.position();
    while let Some(c) = p.peek_char() {
        if c == '.' || c == '[' {
            break;
        }
        p.bump();
    }
    let key = p.slice(start, p.position());
    if key.is_empty() {
        return Err(ParseError::InvalidSyntax("key expected".into()));
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn departments() -> Value {
        Value::from(json!({
            "departments": [
                {"team": [{"name": "Alice Johnson"}, {"name": "Bob Smith"}]},
                {"team": [{"name": "Carol Lee"}, {"name": "David Kim"}]}
            ],
            "x y": {"z": true}
        }))
    }

    #[test]
    fn parse_and_render() {
        let q = Query::parse("departments[0].team[1].name").unwrap();
        assert_eq!(q.to_string(), ".departments[0].team[1].name");
        let q = Query::parse(".a['b c'][2]").unwrap();
        assert_eq!(q.segments().len(), 3);
        assert_eq!(q.to_string(), ".a['b c'][2]");
        assert!(Query::parse("").unwrap().is_empty());
    }

    #[test]
    fn invalid_paths() {
        assert!(Query::parse(".a[x]").is_err());
        assert!(Query::parse(".a[-1]").is_err());
        assert!(Query::parse(".a..b").is_err());
        assert!(Query::parse(".a['b").is_err());
    }

    #[test]
    fn extract_nested_values() {
        let root = departments();
        let q = Query::parse(".departments[1].team[0].name").unwrap();
        assert_eq!(q.extract(&root).unwrap(), Value::from("Carol Lee"));
        let q = Query::new().key("x y").key("z");
        assert_eq!(q.extract(&root).unwrap(), Value::Bool(true));
    }

    #[test]
    fn missing_values_report_the_query() {
        let err = Query::parse(".departments[5]")
            .unwrap()
            .extract(&departments())
            .unwrap_err();
        assert_eq!(err.to_string(), r#"".departments[5]" not found"#);
    }

    struct Reserved;

    impl KeyExtractor for Reserved {
        fn extract_by_key(&self, key: &str) -> Option<Value> {
            (key == "$").then(|| Value::from(json!({"id": 7})))
        }
    }

    #[test]
    fn custom_key_extraction() {
        let q = Query::new().key("$").key("id");
        assert_eq!(q.extract_with(&Reserved).unwrap(), Value::Int(7));
        assert!(Query::new().key("id").extract_with(&Reserved).is_err());
    }

    #[test]
    fn prepend_builds_root_to_leaf() {
        let mut q = Query::new().key("bar");
        q.prepend(&Query::new().key("foo"));
        assert_eq!(q.to_string(), ".foo.bar");
    }
}
