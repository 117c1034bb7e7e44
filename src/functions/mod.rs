use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::value::Value;

pub mod matchers;

/// Trait for pluggable functions callable from `{{ name(args) }}`.
pub trait Function: Send + Sync {
    fn name(&self) -> &str;
    /// Accepted argument counts; an upper bound of `usize::MAX` is variadic.
    fn arity(&self) -> RangeInclusive<usize>;
    fn call(&self, args: &[Value]) -> Result<Value>;
}

/// Function applied through a `{{ name <- }}: arg` map key.
///
/// `exec` receives the evaluated argument document; the actual value reaches
/// the returned assertion later, when it is applied.
pub trait LeftArrowFunc: Send + Sync {
    fn name(&self) -> &str;
    fn exec(&self, arg: Value) -> Result<Value>;
}

/// Signature-checked function table shared by every evaluation of a step.
#[derive(Clone, Default)]
pub struct Registry {
    functions: Arc<HashMap<String, Arc<dyn Function>>>,
    left_arrows: Arc<HashMap<String, Arc<dyn LeftArrowFunc>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<_> = self.functions.keys().collect();
        functions.sort();
        let mut left_arrows: Vec<_> = self.left_arrows.keys().collect();
        left_arrows.sort();
        f.debug_struct("Registry")
            .field("functions", &functions)
            .field("left_arrows", &left_arrows)
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Template helpers only.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.insert_function(Arc::new(builtins::Lower));
        r.insert_function(Arc::new(builtins::Upper));
        r.insert_function(Arc::new(builtins::First));
        r.insert_function(Arc::new(builtins::Unique));
        r.insert_function(Arc::new(builtins::OrDefault));
        r.insert_function(Arc::new(builtins::Len));
        r
    }

    /// Template helpers plus the built-in matchers.
    pub fn with_assertions() -> Self {
        let mut r = Self::with_builtins();
        for m in matchers::all() {
            let m = Arc::new(m);
            r.insert_function(m.clone());
            r.insert_left_arrow(m);
        }
        r
    }

    pub fn register<F: Function + 'static>(&mut self, f: F) -> Result<()> {
        validate_name(f.name())?;
        let arity = f.arity();
        if arity.is_empty() {
            return Err(Error::Registration {
                name: f.name().to_string(),
                reason: format!("empty arity range {}..={}", arity.start(), arity.end()),
            });
        }
        if self.functions.contains_key(f.name()) {
            return Err(already_registered(f.name()));
        }
        self.insert_function(Arc::new(f));
        Ok(())
    }

    pub fn register_left_arrow<F: LeftArrowFunc + 'static>(&mut self, f: F) -> Result<()> {
        validate_name(f.name())?;
        if self.left_arrows.contains_key(f.name()) {
            return Err(already_registered(f.name()));
        }
        self.insert_left_arrow(Arc::new(f));
        Ok(())
    }

    /// Register a matcher both as a call and as a left-arrow function.
    pub fn register_matcher(&mut self, m: matchers::MatcherFn) -> Result<()> {
        validate_name(m.name())?;
        if self.functions.contains_key(m.name()) || self.left_arrows.contains_key(m.name()) {
            return Err(already_registered(m.name()));
        }
        let m = Arc::new(m);
        self.insert_function(m.clone());
        self.insert_left_arrow(m);
        Ok(())
    }

    /// Add every entry of `other`; names already present are rejected.
    pub fn merge(&mut self, other: &Registry) -> Result<()> {
        if let Some(name) = other
            .functions
            .keys()
            .find(|n| self.functions.contains_key(n.as_str()))
            .or_else(|| {
                other
                    .left_arrows
                    .keys()
                    .find(|n| self.left_arrows.contains_key(n.as_str()))
            })
        {
            return Err(already_registered(name));
        }
        for f in other.functions.values() {
            self.insert_function(f.clone());
        }
        for f in other.left_arrows.values() {
            self.insert_left_arrow(f.clone());
        }
        Ok(())
    }

    pub fn function(&self, name: &str) -> Result<Arc<dyn Function>> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UndefinedFunction(name.to_string()))
    }

    pub fn left_arrow(&self, name: &str) -> Result<Arc<dyn LeftArrowFunc>> {
        self.left_arrows
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UndefinedFunction(format!("{name} <-")))
    }

    /// Look up `name` and check the argument count before calling it.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let f = self.function(name)?;
        check_arity(f.as_ref(), args.len())?;
        f.call(args)
    }

    fn insert_function(&mut self, f: Arc<dyn Function>) {
        Arc::make_mut(&mut self.functions).insert(f.name().to_string(), f);
    }

    fn insert_left_arrow(&mut self, f: Arc<dyn LeftArrowFunc>) {
        Arc::make_mut(&mut self.left_arrows).insert(f.name().to_string(), f);
    }
}

fn already_registered(name: &str) -> Error {
    Error::Registration {
        name: name.to_string(),
        reason: "already registered".into(),
    }
}

/// Names are dotted identifiers such as `lower` or `assert.lessThan`.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
                && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        });
    if valid {
        Ok(())
    } else {
        Err(Error::Registration {
            name: name.to_string(),
            reason: "name must be a dotted identifier".into(),
        })
    }
}

pub fn check_arity(f: &dyn Function, got: usize) -> Result<()> {
    let arity = f.arity();
    if arity.contains(&got) {
        return Ok(());
    }
    let expected = match (*arity.start(), *arity.end()) {
        (lo, usize::MAX) => format!("at least {lo}"),
        (lo, hi) if lo == hi => lo.to_string(),
        (lo, hi) => format!("{lo} to {hi}"),
    };
    Err(Error::Arity {
        name: f.name().to_string(),
        expected,
        got,
    })
}

/// Adapter turning a closure into a [`Function`].
pub struct FnFunction<F> {
    name: String,
    arity: RangeInclusive<usize>,
    f: F,
}

impl<F> FnFunction<F>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, arity: RangeInclusive<usize>, f: F) -> Self {
        Self {
            name: name.into(),
            arity,
            f,
        }
    }
}

impl<F> Function for FnFunction<F>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }
    fn arity(&self) -> RangeInclusive<usize> {
        self.arity.clone()
    }
    fn call(&self, args: &[Value]) -> Result<Value> {
        (self.f)(args)
    }
}

/// Adapter turning a closure into a [`LeftArrowFunc`].
pub struct FnLeftArrow<F> {
    name: String,
    f: F,
}

impl<F> FnLeftArrow<F>
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> LeftArrowFunc for FnLeftArrow<F>
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }
    fn exec(&self, arg: Value) -> Result<Value> {
        (self.f)(arg)
    }
}

pub mod builtins {
    use super::*;
    use itertools::Itertools;

    fn arg(args: &[Value], i: usize) -> Value {
        args.get(i).cloned().unwrap_or_default()
    }

    pub struct Lower;
    impl Function for Lower {
        fn name(&self) -> &str { "lower" }
        fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::String(t) => Value::String(t.to_lowercase()),
                other => other,
            })
        }
    }

    pub struct Upper;
    impl Function for Upper {
        fn name(&self) -> &str { "upper" }
        fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::String(t) => Value::String(t.to_uppercase()),
                other => other,
            })
        }
    }

    /// First element of an array; null otherwise.
    pub struct First;
    impl Function for First {
        fn name(&self) -> &str { "first" }
        fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::Array(a) => a.into_iter().next().unwrap_or_default(),
                _ => Value::Null,
            })
        }
    }

    /// Deduplicate an array; identity for non-arrays.
    pub struct Unique;
    impl Function for Unique {
        fn name(&self) -> &str { "unique" }
        fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::Array(a) => Value::Array(
                    a.into_iter()
                        .unique_by(|x| x.to_json().to_string())
                        .collect(),
                ),
                other => other,
            })
        }
    }

    /// `or_default(v, d)`: `d` when `v` is null or an empty array.
    pub struct OrDefault;
    impl Function for OrDefault {
        fn name(&self) -> &str { "or_default" }
        fn arity(&self) -> RangeInclusive<usize> { 2..=2 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            Ok(match arg(args, 0) {
                Value::Null => arg(args, 1),
                Value::Array(a) if a.is_empty() => arg(args, 1),
                other => other,
            })
        }
    }

    pub struct Len;
    impl Function for Len {
        fn name(&self) -> &str { "len" }
        fn arity(&self) -> RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> Result<Value> {
            let n = match &arg(args, 0) {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => {
                    return Err(Error::Runtime(format!(
                        "len: unsupported {} argument",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(n as i64))
        }
    }
}
