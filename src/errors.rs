//! Errors carrying the structural path they originate from
//!
//! Failures deep inside a document bubble up through maps and arrays; each
//! level prepends its segment so the final path reads root-to-leaf. A
//! [`PathError`] can also hold the source document node the path points into,
//! which is only used to render an excerpt.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::query::Query;
use crate::source::SourceNode;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("function \"{0}\" is not defined")]
    UndefinedFunction(String),

    #[error("function \"{name}\" expects {expected} argument(s) but got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("cannot register \"{name}\": {reason}")]
    Registration { name: String, reason: String },

    #[error("\"{0}\" not found")]
    NotFound(String),

    #[error("set an actual value twice")]
    ActualValueAlreadySet,

    #[error("the actual value \"$\" is not available")]
    ActualValueUnavailable,

    #[error("{0}")]
    Assertion(String),

    #[error("invalid expectation: {0}")]
    Build(String),

    #[error("{message}: {source}")]
    Wrapped {
        message: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Path(PathError),

    #[error(transparent)]
    Multi(MultiPathError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Operations shared by [`PathError`] and [`MultiPathError`].
trait PathAware {
    fn append_path(&mut self, prefix: &Query);
    fn wrap_message(&mut self, message: &str);
    fn set_node_and_colored(&mut self, node: Arc<dyn SourceNode>, colored: bool);
}

impl Error {
    fn path_aware(&mut self) -> Option<&mut dyn PathAware> {
        match self {
            Error::Path(e) => Some(e),
            Error::Multi(e) => Some(e),
            _ => None,
        }
    }

    /// Path of a single path error; `None` for aggregates and plain errors.
    pub fn path(&self) -> Option<&Query> {
        match self {
            Error::Path(e) => Some(&e.path),
            _ => None,
        }
    }
}

/// Error with the structural path it occurred at.
pub struct PathError {
    pub path: Query,
    pub node: Option<Arc<dyn SourceNode>>,
    pub colored: bool,
    pub err: Box<Error>,
}

impl PathError {
    pub fn new(path: Query, err: Error) -> Self {
        Self {
            path,
            node: None,
            colored: false,
            err: Box::new(err),
        }
    }

    fn excerpt(&self) -> Option<String> {
        self.node.as_ref()?.excerpt(&self.path, self.colored)
    }
}

impl PathAware for PathError {
    fn append_path(&mut self, prefix: &Query) {
        self.path.prepend(prefix);
    }

    fn wrap_message(&mut self, message: &str) {
        let inner = std::mem::replace(&mut *self.err, Error::Message(String::new()));
        *self.err = match inner {
            Error::Path(_) | Error::Multi(_) => wrap(inner, message),
            other => Error::Wrapped {
                message: message.to_string(),
                source: Box::new(other),
            },
        };
    }

    fn set_node_and_colored(&mut self, node: Arc<dyn SourceNode>, colored: bool) {
        self.node = Some(node);
        self.colored = colored;
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(mut excerpt) = self.excerpt().filter(|s| !s.is_empty()) {
            if !excerpt.ends_with('\n') {
                excerpt.push('\n');
            }
            return write!(f, "\n{excerpt}{}", self.err);
        }
        if !self.path.is_empty() {
            return write!(f, "{}: {}", self.path, self.err);
        }
        write!(f, "{}", self.err)
    }
}

impl fmt::Debug for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathError")
            .field("path", &self.path.to_string())
            .field("has_node", &self.node.is_some())
            .field("colored", &self.colored)
            .field("err", &self.err)
            .finish()
    }
}

impl std::error::Error for PathError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.err)
    }
}

/// Several independent failures, each keeping its own path.
#[derive(Default)]
pub struct MultiPathError {
    pub node: Option<Arc<dyn SourceNode>>,
    pub errs: Vec<Error>,
}

impl MultiPathError {
    pub fn new(errs: Vec<Error>) -> Self {
        Self { node: None, errs }
    }
}

impl PathAware for MultiPathError {
    fn append_path(&mut self, prefix: &Query) {
        for err in &mut self.errs {
            if let Some(e) = err.path_aware() {
                e.append_path(prefix);
            }
        }
    }

    fn wrap_message(&mut self, message: &str) {
        for err in &mut self.errs {
            let taken = std::mem::replace(err, Error::Message(String::new()));
            *err = wrap(taken, message);
        }
    }

    fn set_node_and_colored(&mut self, node: Arc<dyn SourceNode>, colored: bool) {
        for err in &mut self.errs {
            if let Some(e) = err.path_aware() {
                e.set_node_and_colored(node.clone(), colored);
            }
        }
        self.node = Some(node);
    }
}

impl fmt::Display for MultiPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errs.len() == 1 {
            write!(f, "1 error occurred:")?;
        } else {
            write!(f, "{} errors occurred:", self.errs.len())?;
        }
        for err in &self.errs {
            let msg = err.to_string();
            write!(f, "\n{}", msg.trim_start_matches(|c: char| c == '\t' || c == ' '))?;
        }
        Ok(())
    }
}

impl fmt::Debug for MultiPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiPathError")
            .field("has_node", &self.node.is_some())
            .field("errs", &self.errs)
            .finish()
    }
}

impl std::error::Error for MultiPathError {}

/// Path error from a dotted path and a message.
pub fn error_path(path: &str, message: impl Into<String>) -> Error {
    with_path(Error::Message(message.into()), path)
}

pub fn error_query(query: &Query, message: impl Into<String>) -> Error {
    with_query(Error::Message(message.into()), query)
}

/// Aggregate errors; `None` when there is nothing to report.
pub fn errors(errs: Vec<Error>) -> Option<Error> {
    if errs.is_empty() {
        return None;
    }
    Some(Error::Multi(MultiPathError::new(errs)))
}

/// Prefix the cause with `message`, keeping any path information.
pub fn wrap(mut err: Error, message: impl AsRef<str>) -> Error {
    if let Some(e) = err.path_aware() {
        e.wrap_message(message.as_ref());
        return err;
    }
    Error::Path(PathError::new(
        Query::new(),
        Error::Wrapped {
            message: message.as_ref().to_string(),
            source: Box::new(err),
        },
    ))
}

pub fn wrap_path(err: Error, path: &str, message: impl AsRef<str>) -> Error {
    with_path(wrap(err, message), path)
}

/// Prepend a dotted path such as `foo` or `foo.bar[0]`.
pub fn with_path(err: Error, path: &str) -> Error {
    let query = Query::parse(path).unwrap_or_else(|_| Query::new().key(path));
    with_query(err, &query)
}

/// Prepend a single map key, taken literally.
pub fn with_key(err: Error, key: &str) -> Error {
    with_query(err, &Query::new().key(key))
}

pub fn with_index(err: Error, index: usize) -> Error {
    with_query(err, &Query::new().index(index))
}

pub fn with_query(mut err: Error, query: &Query) -> Error {
    if let Some(e) = err.path_aware() {
        e.append_path(query);
        return err;
    }
    Error::Path(PathError::new(query.clone(), err))
}

/// Attach the source document; errors without path information are unchanged.
pub fn with_node_and_colored(mut err: Error, node: Arc<dyn SourceNode>, colored: bool) -> Error {
    if let Some(e) = err.path_aware() {
        e.set_node_and_colored(node, colored);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plain(msg: &str) -> Error {
        Error::Assertion(msg.to_string())
    }

    #[derive(Debug)]
    struct Fixed(&'static str);

    impl SourceNode for Fixed {
        fn excerpt(&self, path: &Query, _colored: bool) -> Option<String> {
            (!path.is_empty()).then(|| format!("> {}", self.0))
        }
    }

    #[test]
    fn outer_path_is_prepended() {
        let err = with_path(with_path(plain("boom"), "bar"), "foo");
        assert_eq!(err.to_string(), ".foo.bar: boom");
        assert_eq!(err.path().unwrap().to_string(), ".foo.bar");
    }

    #[test]
    fn bare_message_without_path() {
        let err = wrap(plain("boom"), "request failed");
        assert_eq!(err.to_string(), "request failed: boom");
    }

    #[test]
    fn wrap_keeps_path_and_cause() {
        let err = wrap_path(with_index(plain("boom"), 2), "items", "invalid item");
        assert_eq!(err.to_string(), ".items[2]: invalid item: boom");
    }

    #[test]
    fn keys_with_dots_stay_single_segments() {
        let err = with_key(plain("boom"), "a.b");
        assert_eq!(err.to_string(), "['a.b']: boom");
    }

    #[test]
    fn multi_error_rendering() {
        let err = errors(vec![
            with_path(plain("expected 1 but got 2"), "a"),
            with_path(plain("expected 3 but got 4"), "b"),
        ])
        .unwrap();
        assert_eq!(
            err.to_string(),
            "2 errors occurred:\n.a: expected 1 but got 2\n.b: expected 3 but got 4"
        );
        let single = errors(vec![plain("\t\tindented")]).unwrap();
        assert_eq!(single.to_string(), "1 error occurred:\nindented");
        assert!(errors(Vec::new()).is_none());
    }

    #[test]
    fn multi_error_forwards_path_and_wrap() {
        let err = errors(vec![with_path(plain("x"), "a"), plain("y")]).unwrap();
        let err = with_path(err, "root");
        let err = wrap(err, "all assertions failed");
        assert_eq!(
            err.to_string(),
            "2 errors occurred:\n.root.a: all assertions failed: x\nall assertions failed: y"
        );
    }

    #[test]
    fn node_renders_excerpt_before_message() {
        let err = with_path(plain("boom"), "a");
        let err = with_node_and_colored(err, Arc::new(Fixed("a: 1")), false);
        assert_eq!(err.to_string(), "\n> a: 1\nboom");
    }

    #[test]
    fn node_without_excerpt_falls_back_to_path() {
        let err = wrap(plain("boom"), "ctx");
        let err = with_node_and_colored(err, Arc::new(Fixed("unused")), true);
        assert_eq!(err.to_string(), "ctx: boom");
    }

    #[test]
    fn node_is_ignored_for_plain_errors() {
        let err = with_node_and_colored(plain("boom"), Arc::new(Fixed("a")), false);
        assert!(matches!(err, Error::Assertion(_)));
    }
}
