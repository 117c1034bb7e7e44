//! Assertions built from expected documents
//!
//! ```yaml
//! id: 1
//! name: "{{regexp <-}}: ^a"
//! tags: "{{contains <-}}: admin"
//! age: "{{$ >= 18}}"
//! ```
//!
//! Plain maps and arrays compare field by field, plain scalars compare for
//! equality, and template leaves may produce matchers or reference the actual
//! value `$` directly.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::comparison;
use crate::errors::{error_query, errors, with_index, with_key, with_query, wrap, Error, Result};
use crate::lazy::Lazy;
use crate::query::Query;
use crate::template::{is_left_arrow_call, Template};
use crate::value::Value;

type MatchFn = dyn Fn(&Value) -> Result<()> + Send + Sync;
type AsyncMatchFn = dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync;

#[derive(Debug, Clone)]
pub enum Assertion {
    Equal(Value),
    /// Apply the inner assertion to the value at a path.
    Query(Query, Box<Assertion>),
    And(Vec<Assertion>),
    Or(Vec<Assertion>),
    Contains(Box<Assertion>),
    Custom(Custom),
}

/// A named matcher or a deferred template.
#[derive(Clone)]
pub struct Custom {
    name: String,
    kind: CustomKind,
}

#[derive(Clone)]
enum CustomKind {
    Func(Arc<MatchFn>),
    Async(Arc<AsyncMatchFn>),
    Lazy(Lazy),
}

impl Custom {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: CustomKind::Func(Arc::new(f)),
        }
    }

    pub fn with_async<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: CustomKind::Async(Arc::new(f)),
        }
    }

    pub fn lazy(lazy: Lazy) -> Self {
        Self {
            name: "lazy".into(),
            kind: CustomKind::Lazy(lazy),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn assert(&self, actual: &Value) -> Result<()> {
        match &self.kind {
            CustomKind::Func(f) => f(actual),
            CustomKind::Async(f) => f(actual.clone()).await,
            CustomKind::Lazy(lazy) => match lazy.call(actual.clone()).await? {
                Value::Assertion(a) => a.assert(actual).await,
                Value::Bool(true) => Ok(()),
                Value::Bool(false) => Err(Error::Assertion(format!(
                    "assertion failed for {actual}"
                ))),
                expected => Assertion::Equal(expected).assert(actual).await,
            },
        }
    }
}

impl fmt::Debug for Custom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CustomKind::Lazy(lazy) => f.debug_tuple("Custom").field(lazy).finish(),
            _ => f.debug_tuple("Custom").field(&self.name).finish(),
        }
    }
}

impl Assertion {
    pub fn assert<'a>(&'a self, actual: &'a Value) -> BoxFuture<'a, Result<()>> {
        async move {
            match self {
                Assertion::Equal(expected) => {
                    if comparison::equal(expected, actual) {
                        Ok(())
                    } else {
                        Err(Error::Assertion(format!(
                            "expected {expected} but got {actual}"
                        )))
                    }
                }
                Assertion::Query(query, inner) => {
                    let v = query
                        .extract(actual)
                        .map_err(|_| error_query(query, "value not found"))?;
                    inner.assert(&v).await.map_err(|e| with_query(e, query))
                }
                Assertion::And(children) => {
                    let mut errs = Vec::new();
                    for child in children {
                        if let Err(e) = child.assert(actual).await {
                            // one entry per child, able to take the enclosing path
                            errs.push(with_query(e, &Query::new()));
                        }
                    }
                    errors(errs).map_or(Ok(()), Err)
                }
                Assertion::Or(children) => {
                    let mut errs = Vec::with_capacity(children.len());
                    for child in children {
                        match child.assert(actual).await {
                            Ok(()) => return Ok(()),
                            Err(e) => errs.push(wrap(e, "all assertions failed")),
                        }
                    }
                    errors(errs).map_or(Ok(()), Err)
                }
                Assertion::Contains(inner) => contains(inner, actual).await,
                Assertion::Custom(custom) => custom.assert(actual).await,
            }
        }
        .boxed()
    }
}

async fn contains(inner: &Assertion, actual: &Value) -> Result<()> {
    let mut last = None;
    match actual {
        Value::Array(items) => {
            for item in items {
                match inner.assert(item).await {
                    Ok(()) => return Ok(()),
                    Err(e) => last = Some(e),
                }
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                match inner.assert(item).await {
                    Ok(()) => return Ok(()),
                    Err(e) => last = Some(e),
                }
            }
        }
        Value::String(s) => match inner {
            Assertion::Equal(Value::String(sub)) if s.contains(sub.as_str()) => return Ok(()),
            Assertion::Equal(Value::String(sub)) => {
                last = Some(Error::Assertion(format!("{sub:?} is not a substring of {s:?}")))
            }
            _ => {
                return Err(Error::Assertion(
                    "only a string can be searched for in a string".into(),
                ))
            }
        },
        other => {
            return Err(Error::Assertion(format!(
                "expected an array, object or string but got {}",
                other.type_name()
            )))
        }
    }
    let err = last.unwrap_or_else(|| Error::Assertion(format!("{actual} is empty")));
    Err(wrap(err, "doesn't contain expected value"))
}

/// Build an assertion from an expected document.
///
/// Templates are evaluated with `$` available; a failure names the path of
/// the offending field.
pub async fn build(template: &Template, expected: &Value) -> Result<Assertion> {
    build_value(template, expected).await
}

/// Like [`build`], but a malformed expectation is a bug in the caller.
pub async fn must_build(template: &Template, expected: &Value) -> Assertion {
    match build(template, expected).await {
        Ok(a) => a,
        Err(e) => panic!("failed to build assertion: {e}"),
    }
}

fn build_value<'a>(template: &'a Template, expected: &'a Value) -> BoxFuture<'a, Result<Assertion>> {
    async move {
        match expected {
            Value::Object(map) if is_left_arrow_call(map) => {
                Ok(from_value(template.execute_lazy(expected).await?))
            }
            Value::Object(map) => {
                let mut children = Vec::with_capacity(map.len());
                for (k, v) in map {
                    let key = template.execute_key(k).await.map_err(|e| with_key(e, k))?;
                    let child = build_value(template, v)
                        .await
                        .map_err(|e| with_key(e, &key))?;
                    children.push(Assertion::Query(Query::new().key(key), Box::new(child)));
                }
                Ok(Assertion::And(children))
            }
            Value::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for (i, v) in items.iter().enumerate() {
                    let child = build_value(template, v)
                        .await
                        .map_err(|e| with_index(e, i))?;
                    children.push(Assertion::Query(Query::new().index(i), Box::new(child)));
                }
                Ok(Assertion::And(children))
            }
            Value::String(s) if s.contains("{{") => {
                Ok(from_value(template.execute_lazy(expected).await?))
            }
            other => Ok(from_value(other.clone())),
        }
    }
    .boxed()
}

/// Convert an evaluated value into an assertion.
pub fn from_value(v: Value) -> Assertion {
    match v {
        Value::Assertion(a) => *a,
        Value::Lazy(lazy) => Assertion::Custom(Custom::lazy(lazy)),
        Value::Object(map) => Assertion::And(
            map.into_iter()
                .map(|(k, v)| Assertion::Query(Query::new().key(k), Box::new(from_value(v))))
                .collect(),
        ),
        Value::Array(items) => Assertion::And(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| Assertion::Query(Query::new().index(i), Box::new(from_value(v))))
                .collect(),
        ),
        other => Assertion::Equal(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::functions::Registry;
    use crate::value::from_yaml_str;
    use pretty_assertions::assert_eq;

    fn yaml(s: &str) -> Value {
        from_yaml_str(s).unwrap()
    }

    async fn assertion(expected: &str) -> Assertion {
        let t = Template::new(Context::new(Value::Null, Registry::with_assertions()));
        must_build(&t, &yaml(expected)).await
    }

    #[tokio::test]
    async fn nested_failures_keep_their_grouping_and_paths() {
        let a = assertion("a:\n  b: 1\n  c: [1, 2]\n").await;
        let err = a.assert(&yaml("a:\n  b: 2\n  c: [1, 3]\n")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "1 error occurred:\n2 errors occurred:\n.a.b: expected 1 but got 2\n1 error occurred:\n.a.c[1]: expected 2 but got 3"
        );
    }

    #[tokio::test]
    async fn and_reports_one_entry_per_failing_child() {
        let a = assertion("'{{and <-}}':\n  - {a: 1, b: 1}\n  - {c: 1}\n").await;
        match a.assert(&yaml("{}")).await.unwrap_err() {
            Error::Multi(m) => assert_eq!(m.errs.len(), 2),
            other => panic!("expected an aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn combinator_failures_carry_the_field_path() {
        let a = assertion("x: '{{and <-}}: [1, 2]'\n").await;
        let err = a.assert(&yaml("x: 3\n")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "1 error occurred:\n2 errors occurred:\n.x: expected 1 but got 3\n.x: expected 2 but got 3"
        );
    }

    #[tokio::test]
    async fn missing_fields() {
        let a = assertion("a: 1\n").await;
        let err = a.assert(&yaml("b: 1\n")).await.unwrap_err();
        assert_eq!(err.to_string(), "1 error occurred:\n.a: value not found");
    }

    #[tokio::test]
    async fn contains_strings_and_collections() {
        let a = Assertion::Contains(Box::new(Assertion::Equal(Value::from("ell"))));
        assert!(a.assert(&Value::from("hello")).await.is_ok());
        let err = a.assert(&Value::from("world")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "doesn't contain expected value: \"ell\" is not a substring of \"world\""
        );

        let a = Assertion::Contains(Box::new(Assertion::Equal(Value::Int(2))));
        assert!(a.assert(&yaml("x: 1\ny: 2\n")).await.is_ok());
        let err = a.assert(&yaml("[]")).await.unwrap_err();
        assert_eq!(err.to_string(), "doesn't contain expected value: [] is empty");
        assert!(a.assert(&Value::Int(2)).await.is_err());
    }

    #[tokio::test]
    async fn lazy_results_are_interpreted() {
        let a = assertion("v: '{{$ > 1}}'\nw: '{{upper($)}}'\n").await;
        assert!(a.assert(&yaml("v: 2\nw: ABC\n")).await.is_ok());
        // the second run evaluates both templates again
        let err = a.assert(&yaml("v: 0\nw: abc\n")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "2 errors occurred:\n.v: assertion failed for 0\n.w: expected \"ABC\" but got \"abc\""
        );
    }

    #[tokio::test]
    async fn invalid_expectations_fail_to_build() {
        let t = Template::new(Context::new(Value::Null, Registry::with_assertions()));
        let err = build(&t, &yaml("a:\n  - '{{unknown(1)}}'\n")).await.unwrap_err();
        assert_eq!(err.to_string(), ".a[0]: function \"unknown\" is not defined");
    }
}
