//! Built-in matchers
//!
//! Every matcher turns its argument into an [`Assertion`] and is reachable
//! both as a call (`{{lessThan(3)}}`) and as a left-arrow function
//! (`{{lessThan <-}}: 3`).

use std::cmp::Ordering;
use std::ops::RangeInclusive;
use std::sync::Arc;

use futures_util::FutureExt;
use regex::Regex;

use super::{check_arity, Function, LeftArrowFunc};
use crate::assertion::{self, Assertion, Custom};
use crate::comparison::{cmp_values, is_zero};
use crate::errors::{Error, Result};
use crate::value::Value;

type BuildFn = dyn Fn(Vec<Value>) -> Result<Assertion> + Send + Sync;

/// A named assertion builder.
#[derive(Clone)]
pub struct MatcherFn {
    name: String,
    arity: RangeInclusive<usize>,
    build: Arc<BuildFn>,
}

impl MatcherFn {
    pub fn new<F>(name: impl Into<String>, arity: RangeInclusive<usize>, build: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Assertion> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            build: Arc::new(build),
        }
    }

    /// Matcher taking exactly one argument.
    pub fn unary<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(Value) -> Result<Assertion> + Send + Sync + 'static,
    {
        Self::new(name, 1..=1, move |mut args| {
            build(args.pop().unwrap_or_default())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Function for MatcherFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> RangeInclusive<usize> {
        self.arity.clone()
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        Ok(Value::from((self.build)(args.to_vec())?))
    }
}

impl LeftArrowFunc for MatcherFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn exec(&self, arg: Value) -> Result<Value> {
        // a null argument satisfies matchers without parameters
        let args = if self.arity.contains(&1) || !arg.is_null() {
            vec![arg]
        } else {
            Vec::new()
        };
        check_arity(self, args.len())?;
        Ok(Value::from((self.build)(args)?))
    }
}

pub fn all() -> Vec<MatcherFn> {
    vec![
        MatcherFn::new("and", 1..=usize::MAX, |args| {
            Ok(Assertion::And(children(args)))
        }),
        MatcherFn::new("or", 1..=usize::MAX, |args| {
            Ok(Assertion::Or(children(args)))
        }),
        MatcherFn::unary("contains", |arg| {
            Ok(Assertion::Contains(Box::new(assertion::from_value(arg))))
        }),
        MatcherFn::unary("notContains", not_contains),
        MatcherFn::new("notZero", 0..=0, |_| Ok(not_zero())),
        compare("lessThan", "less than", |o| o == Ordering::Less),
        compare("lessThanOrEqual", "less than or equal to", |o| o != Ordering::Greater),
        compare("greaterThan", "greater than", |o| o == Ordering::Greater),
        compare("greaterThanOrEqual", "greater than or equal to", |o| {
            o != Ordering::Less
        }),
        MatcherFn::unary("regexp", regexp),
    ]
}

/// Combinator children: a single array argument spreads into its elements.
fn children(mut args: Vec<Value>) -> Vec<Assertion> {
    if args.len() == 1 && matches!(args[0], Value::Array(_)) {
        if let Some(Value::Array(items)) = args.pop() {
            args = items;
        }
    }
    args.into_iter().map(assertion::from_value).collect()
}

fn not_contains(arg: Value) -> Result<Assertion> {
    let expected = arg.to_string();
    let inner = Assertion::Contains(Box::new(assertion::from_value(arg)));
    Ok(Assertion::Custom(Custom::with_async(
        "notContains",
        move |actual| {
            let inner = inner.clone();
            let expected = expected.clone();
            async move {
                match inner.assert(&actual).await {
                    Ok(()) => Err(Error::Assertion(format!(
                        "expected {actual} not to contain {expected}"
                    ))),
                    Err(_) => Ok(()),
                }
            }
            .boxed()
        },
    )))
}

fn not_zero() -> Assertion {
    Assertion::Custom(Custom::new("notZero", |actual| {
        if is_zero(actual) {
            return Err(Error::Assertion(format!(
                "expected a non-zero value but got {actual}"
            )));
        }
        Ok(())
    }))
}

fn compare(
    name: &'static str,
    relation: &'static str,
    accept: fn(Ordering) -> bool,
) -> MatcherFn {
    MatcherFn::unary(name, move |expected| {
        if expected.is_callable() {
            return Err(Error::Build(format!(
                "{name}: cannot compare against a {} value",
                expected.type_name()
            )));
        }
        Ok(Assertion::Custom(Custom::new(name, move |actual| {
            match cmp_values(actual, &expected) {
                Some(o) if accept(o) => Ok(()),
                Some(_) => Err(Error::Assertion(format!(
                    "{actual} is not {relation} {expected}"
                ))),
                None => Err(Error::Assertion(format!(
                    "cannot compare {actual} with {expected}"
                ))),
            }
        })))
    })
}

fn regexp(pattern: Value) -> Result<Assertion> {
    let Value::String(pattern) = pattern else {
        return Err(Error::Build(format!(
            "regexp: pattern must be a string but got {}",
            pattern.type_name()
        )));
    };
    let re = Regex::new(&pattern)
        .map_err(|e| Error::Build(format!("regexp: invalid pattern {pattern:?}: {e}")))?;
    Ok(Assertion::Custom(Custom::new("regexp", move |actual| {
        match actual {
            Value::String(s) if re.is_match(s) => Ok(()),
            Value::String(_) => Err(Error::Assertion(format!(
                "expected {actual} to match /{}/",
                re.as_str()
            ))),
            other => Err(Error::Assertion(format!(
                "expected a string but got {}",
                other.type_name()
            ))),
        }
    })))
}
