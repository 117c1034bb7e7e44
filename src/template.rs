//! Template evaluation
//!
//! A template is any [`Value`]. Strings may embed `{{ expr }}` actions, map
//! keys may be templates themselves, and a map whose only key is
//! `{{ name <- }}` applies the left-arrow function `name` to its value.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use indexmap::IndexMap;
use tracing::trace;

use crate::comparison::{cmp_values, loose_equal};
use crate::context::{Context, Options};
use crate::errors::{with_index, with_key, Error, Result};
use crate::expression::{parse_expr, BinaryOp, Expr, UnaryOp};
use crate::functions::Registry;
use crate::lazy::WaitContext;
use crate::query::{KeyExtractor, Query, Segment};
use crate::value::{self, Value};

/// Evaluates templates against a shared [`Context`].
#[derive(Debug, Clone)]
pub struct Template {
    context: Arc<Context>,
    timeout: Option<Duration>,
}

impl Template {
    pub fn new(context: Context) -> Self {
        Self {
            context: Arc::new(context),
            timeout: None,
        }
    }

    /// Deadline for each deferred evaluation attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn from_options(options: &Options, functions: Registry) -> Self {
        Self {
            context: Arc::new(Context::new(options.data(), functions)),
            timeout: options.timeout(),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Evaluate eagerly; referencing `$` is an error.
    pub async fn execute(&self, data: &Value) -> Result<Value> {
        Evaluator::new(&self.context, None).execute(data).await
    }

    pub(crate) async fn execute_key(&self, key: &str) -> Result<String> {
        Evaluator::new(&self.context, None).execute_key(key).await
    }
}

/// Whether `map` is a `{{ name <- }}: arg` application.
pub fn is_left_arrow_call(map: &IndexMap<String, Value>) -> bool {
    map.keys().any(|k| left_arrow_name(k).is_some())
}

fn left_arrow_name(key: &str) -> Option<String> {
    match split_template(key).as_slice() {
        [Piece::Action(src)] => match parse_expr(src) {
            Ok(Expr::LeftArrow(name)) => Some(name),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Piece<'a> {
    Text(&'a str),
    Action(&'a str),
}

/// Split `a {{ x }} b` into text and action pieces.
///
/// A `{{` never closed by `}}` is plain text.
pub(crate) fn split_template(s: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let body = &rest[start + 2..];
        let Some(end) = body.find("}}") else {
            break;
        };
        if start > 0 {
            pieces.push(Piece::Text(&rest[..start]));
        }
        pieces.push(Piece::Action(body[..end].trim()));
        rest = &body[end + 2..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    pieces
}

/// Key lookup where `$` names the actual value.
struct Scope<'a> {
    data: &'a Value,
    actual: Option<&'a Value>,
}

impl KeyExtractor for Scope<'_> {
    fn extract_by_key(&self, key: &str) -> Option<Value> {
        if key == "$" {
            return self.actual.cloned();
        }
        self.data.extract_by_key(key)
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Evaluator<'a> {
    context: &'a Context,
    wait: Option<&'a WaitContext>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(context: &'a Context, wait: Option<&'a WaitContext>) -> Self {
        Self { context, wait }
    }

    pub(crate) fn execute<'b>(self, data: &'b Value) -> BoxFuture<'b, Result<Value>>
    where
        'a: 'b,
    {
        async move {
            match data {
                Value::String(s) => self.execute_string(s).await,
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        out.push(self.execute(item).await.map_err(|e| with_index(e, i))?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(map) if is_left_arrow_call(map) => self.apply_left_arrow(map).await,
                Value::Object(map) => {
                    let mut out = IndexMap::with_capacity(map.len());
                    for (k, v) in map {
                        let key = self.execute_key(k).await.map_err(|e| with_key(e, k))?;
                        let value = self.execute(v).await.map_err(|e| with_key(e, &key))?;
                        out.insert(key, value);
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other.clone()),
            }
        }
        .boxed()
    }

    async fn apply_left_arrow(self, map: &IndexMap<String, Value>) -> Result<Value> {
        if map.len() != 1 {
            let key = map.keys().find(|k| left_arrow_name(k).is_some());
            let err = Error::Runtime(
                "a left arrow function must be the only key of its map".into(),
            );
            return Err(match key {
                Some(k) => with_key(err, k),
                None => err,
            });
        }
        let Some((key, arg)) = map.first() else {
            return Err(Error::Runtime("empty left arrow application".into()));
        };
        let name = left_arrow_name(key)
            .ok_or_else(|| with_key(Error::Runtime("not a left arrow function".into()), key))?;
        let f = self
            .context
            .functions()
            .left_arrow(&name)
            .map_err(|e| with_key(e, key))?;
        let arg = self.execute(arg).await.map_err(|e| with_key(e, key))?;
        trace!(function = %name, "applying left arrow function");
        f.exec(arg).map_err(|e| with_key(e, key))
    }

    pub(crate) async fn execute_key(self, key: &str) -> Result<String> {
        if !key.contains("{{") {
            return Ok(key.to_string());
        }
        match self.execute_string(key).await? {
            v @ (Value::Array(_) | Value::Object(_) | Value::Lazy(_) | Value::Assertion(_)) => {
                Err(Error::Runtime(format!(
                    "a map key must be a scalar but got {}",
                    v.type_name()
                )))
            }
            v => v.to_template_string(),
        }
    }

    async fn execute_string(self, s: &str) -> Result<Value> {
        if !s.contains("{{") {
            return Ok(Value::String(s.to_string()));
        }
        if let Some(doc) = left_arrow_document(s)? {
            return self.execute(&doc).await;
        }
        let pieces = split_template(s);
        if let [Piece::Action(src)] = pieces.as_slice() {
            return self.eval_action(src).await;
        }
        let mut out = String::new();
        for piece in pieces {
            match piece {
                Piece::Text(t) => out.push_str(t),
                Piece::Action(src) => out.push_str(&self.eval_action(src).await?.to_template_string()?),
            }
        }
        Ok(Value::String(out))
    }

    async fn eval_action(self, src: &str) -> Result<Value> {
        trace!(expression = src, "evaluating");
        let expr = parse_expr(src)?;
        if let Expr::LeftArrow(name) = &expr {
            return Err(Error::Runtime(format!(
                "left arrow function \"{name}\" must be used as a map key"
            )));
        }
        self.eval(&expr).await
    }

    fn eval<'b>(self, expr: &'b Expr) -> BoxFuture<'b, Result<Value>>
    where
        'a: 'b,
    {
        async move {
            match expr {
                Expr::Literal(v) => Ok(v.clone()),
                Expr::Actual => self.actual().await,
                Expr::Ident(_) | Expr::Member(..) | Expr::Index(..) => self.eval_access(expr).await,
                Expr::Call(name, args) => {
                    let f = self.context.functions().function(name)?;
                    crate::functions::check_arity(f.as_ref(), args.len())?;
                    let mut values = Vec::with_capacity(args.len());
                    for a in args {
                        values.push(self.eval(a).await?);
                    }
                    f.call(&values)
                }
                Expr::Unary(op, e) => unary(*op, self.eval(e).await?),
                Expr::Binary(BinaryOp::And, l, r) => {
                    if !self.eval(l).await?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(self.eval(r).await?.is_truthy()))
                }
                Expr::Binary(BinaryOp::Or, l, r) => {
                    if self.eval(l).await?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(self.eval(r).await?.is_truthy()))
                }
                Expr::Binary(op, l, r) => {
                    let l = self.eval(l).await?;
                    let r = self.eval(r).await?;
                    binary(*op, &l, &r)
                }
                Expr::LeftArrow(name) => Err(Error::Runtime(format!(
                    "left arrow function \"{name}\" must be used as a map key"
                ))),
            }
        }
        .boxed()
    }

    /// Resolve `a.b[0]` style chains through the key extraction hook.
    async fn eval_access(self, expr: &Expr) -> Result<Value> {
        let mut segments = Vec::new();
        let mut root = expr;
        loop {
            match root {
                Expr::Member(base, name) => {
                    segments.push(Segment::Key(name.clone()));
                    root = base;
                }
                Expr::Index(base, idx) => {
                    segments.push(match self.eval(idx).await? {
                        Value::Int(i) if i >= 0 => Segment::Index(i as usize),
                        Value::String(k) => Segment::Key(k),
                        other => {
                            return Err(Error::Runtime(format!(
                                "cannot index with a {} value",
                                other.type_name()
                            )))
                        }
                    });
                    root = base;
                }
                _ => break,
            }
        }
        let mut query = Query::new();
        for seg in segments.into_iter().rev() {
            query.push(seg);
        }
        let not_found = |_| Error::NotFound(expr.to_string());
        match root {
            Expr::Ident(name) => {
                query.prepend(&Query::new().key(name.as_str()));
                query.extract_with(self.context.data()).map_err(not_found)
            }
            Expr::Actual => {
                let actual = self.actual().await?;
                let scope = Scope {
                    data: self.context.data(),
                    actual: Some(&actual),
                };
                query.prepend(&Query::new().key("$"));
                query.extract_with(&scope).map_err(not_found)
            }
            other => {
                let base = self.eval(other).await?;
                query.extract(&base).map_err(not_found)
            }
        }
    }

    async fn actual(self) -> Result<Value> {
        match self.wait {
            Some(wait) => wait.actual().await,
            None => Err(Error::ActualValueUnavailable),
        }
    }
}

/// A string holding a whole `{{ f <- }}: arg` document, `arg` being YAML.
fn left_arrow_document(s: &str) -> Result<Option<Value>> {
    let head = s.trim_start();
    let Some(body) = head.strip_prefix("{{") else {
        return Ok(None);
    };
    let Some(end) = body.find("}}") else {
        return Ok(None);
    };
    let key = &head[..end + 4];
    let Some(rest) = body[end + 2..].strip_prefix(':') else {
        return Ok(None);
    };
    if left_arrow_name(key).is_none() {
        return Ok(None);
    }
    // a lone action would read as a YAML flow mapping
    let arg = match split_template(rest.trim()).as_slice() {
        [Piece::Action(_)] => Value::String(rest.trim().to_string()),
        _ => value::from_yaml_str(rest)?,
    };
    let mut doc = IndexMap::new();
    doc.insert(key.to_string(), arg);
    Ok(Some(Value::Object(doc)))
}

fn unary(op: UnaryOp, v: Value) -> Result<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| Error::Runtime("integer overflow".into())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, other) => Err(Error::Runtime(format!(
            "cannot negate a {} value",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let mismatch = || {
        Error::Runtime(format!(
            "operator {} cannot be applied to {} and {}",
            op.symbol(),
            l.type_name(),
            r.type_name()
        ))
    };
    if l.is_callable() || r.is_callable() {
        return Err(mismatch());
    }
    let overflow = || Error::Runtime("integer overflow".into());
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_equal(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_equal(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let o = cmp_values(l, r).ok_or_else(|| {
                Error::Runtime(format!("cannot compare {l} with {r}"))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::Le => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            }))
        }
        BinaryOp::Add => match (l, r) {
            (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
            (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
                "{}{}",
                l.to_template_string()?,
                r.to_template_string()?
            ))),
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b).cloned().collect()))
            }
            _ => float_op(l, r, |a, b| a + b).ok_or_else(mismatch),
        },
        BinaryOp::Sub => match (l, r) {
            (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
            _ => float_op(l, r, |a, b| a - b).ok_or_else(mismatch),
        },
        BinaryOp::Mul => match (l, r) {
            (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
            _ => float_op(l, r, |a, b| a * b).ok_or_else(mismatch),
        },
        BinaryOp::Div => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(Error::Runtime("division by zero".into())),
            (Value::Int(a), Value::Int(b)) => a.checked_div(*b).map(Value::Int).ok_or_else(overflow),
            _ => float_op(l, r, |a, b| a / b).ok_or_else(mismatch),
        },
        BinaryOp::Rem => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(Error::Runtime("division by zero".into())),
            (Value::Int(a), Value::Int(b)) => a.checked_rem(*b).map(Value::Int).ok_or_else(overflow),
            _ => Err(mismatch()),
        },
        // short-circuited by the evaluator
        BinaryOp::And => Ok(Value::Bool(l.is_truthy() && r.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(l.is_truthy() || r.is_truthy())),
    }
}

fn float_op(l: &Value, r: &Value, f: fn(f64, f64) -> f64) -> Option<Value> {
    match (l, r) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Some(Value::Float(f(l.as_f64()?, r.as_f64()?)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn template(vars: serde_json::Value) -> Template {
        Template::new(Context::new(
            Value::from(json!({ "vars": vars })),
            Registry::with_assertions(),
        ))
    }

    async fn eval(s: &str) -> Result<Value> {
        template(json!({"n": 2, "name": "bob", "items": [{"id": 7}]}))
            .execute(&Value::from(s))
            .await
    }

    #[test]
    fn splits_templates() {
        assert_eq!(
            split_template("a {{ x }}b{{y}}"),
            vec![Piece::Text("a "), Piece::Action("x"), Piece::Text("b"), Piece::Action("y")]
        );
        assert_eq!(split_template("{{ x"), vec![Piece::Text("{{ x")]);
        assert_eq!(
            split_template("{{x}} and {{ y"),
            vec![Piece::Action("x"), Piece::Text(" and {{ y")]
        );
    }

    #[tokio::test]
    async fn unclosed_braces_are_text() {
        assert_eq!(eval("{{ not a template").await.unwrap(), Value::from("{{ not a template"));
        assert_eq!(eval("n={{vars.n}} {{").await.unwrap(), Value::from("n=2 {{"));
    }

    #[tokio::test]
    async fn single_action_keeps_type() {
        assert_eq!(eval("{{vars.n * 2}}").await.unwrap(), Value::Int(4));
        assert_eq!(eval("{{ vars.items[0] }}").await.unwrap(), Value::from(json!({"id": 7})));
        assert_eq!(eval("{{vars.n / 4.0}}").await.unwrap(), Value::Float(0.5));
    }

    #[tokio::test]
    async fn mixed_text_interpolates() {
        assert_eq!(
            eval("hi {{upper(vars.name)}} x{{vars.n}}").await.unwrap(),
            Value::from("hi BOB x2")
        );
        assert_eq!(eval("{{null}}-").await.unwrap(), Value::from("-"));
    }

    #[tokio::test]
    async fn operators() {
        assert_eq!(eval("{{1 < 2 && !false}}").await.unwrap(), Value::Bool(true));
        assert_eq!(eval("{{'10' == 10}}").await.unwrap(), Value::Bool(true));
        assert_eq!(eval("{{7 % 4 - -1}}").await.unwrap(), Value::Int(4));
        assert_eq!(eval("{{'a' + 1}}").await.unwrap(), Value::from("a1"));
        assert!(eval("{{1 / 0}}").await.is_err());
        assert!(eval("{{true < 1}}").await.is_err());
    }

    #[tokio::test]
    async fn lookup_failures_name_the_expression() {
        let err = eval("{{vars.items[3].id}}").await.unwrap_err();
        assert_eq!(err.to_string(), r#""vars.items[3].id" not found"#);
        let err = eval("{{nope(1)}}").await.unwrap_err();
        assert_eq!(err.to_string(), r#"function "nope" is not defined"#);
    }

    #[tokio::test]
    async fn actual_is_unavailable_eagerly() {
        let err = eval("{{$ + 1}}").await.unwrap_err();
        assert!(matches!(err, Error::ActualValueUnavailable));
    }

    #[tokio::test]
    async fn keys_are_templates() {
        let t = template(json!({"k": "id"}));
        let out = t
            .execute(&Value::from(json!({"{{vars.k}}_x": "{{vars.k}}"})))
            .await
            .unwrap();
        assert_eq!(out, Value::from(json!({"id_x": "id"})));
        let err = t
            .execute(&Value::from(json!({"{{vars}}": 1})))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("['{{vars}}']: runtime error: a map key must be a scalar"));
    }

    #[tokio::test]
    async fn left_arrow_must_be_alone() {
        let t = template(json!({}));
        let err = t
            .execute(&Value::from(json!({"{{contains <-}}": 1, "other": 2})))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "['{{contains <-}}']: runtime error: a left arrow function must be the only key of its map"
        );
        let out = t
            .execute(&Value::from(json!({"{{contains <-}}": 1})))
            .await
            .unwrap();
        assert!(matches!(out, Value::Assertion(_)));
    }

    #[tokio::test]
    async fn left_arrow_documents_in_strings() {
        let t = template(json!({"id": 3}));
        let doc = left_arrow_document("{{contains <-}}:\n  ids: |-\n    {{contains <-}}: 1")
            .unwrap()
            .unwrap();
        assert_eq!(
            doc.to_json(),
            json!({"{{contains <-}}": {"ids": "{{contains <-}}: 1"}})
        );
        let doc = left_arrow_document("{{contains <-}}: {{vars.id}}").unwrap().unwrap();
        assert_eq!(doc.to_json(), json!({"{{contains <-}}": "{{vars.id}}"}));
        assert!(left_arrow_document("{{vars.id}}: x").unwrap().is_none());
        assert!(left_arrow_document("{{contains <-}} 1").unwrap().is_none());

        let out = t.execute(&Value::from("{{contains <-}}: {{vars.id}}")).await.unwrap();
        assert!(matches!(out, Value::Assertion(_)));
    }
}
