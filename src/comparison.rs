use std::cmp::Ordering;

use crate::value::Value;

/// Loose ordering used by expression operators.
///
/// Numbers compare numerically across int/float and against numeric strings;
/// `None` means the pair has no meaningful order.
pub fn cmp_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::String(sa), Value::String(sb)) => Some(sa.cmp(sb)),
        (Value::Bool(ba), Value::Bool(bb)) => Some(ba.cmp(bb)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::Int(_) | Value::Float(_), Value::String(s)) => {
            let n = s.trim().parse::<f64>().ok()?;
            a.as_f64()?.partial_cmp(&n)
        }
        (Value::String(s), Value::Int(_) | Value::Float(_)) => {
            let n = s.trim().parse::<f64>().ok()?;
            n.partial_cmp(&b.as_f64()?)
        }
        _ => None,
    }
}

/// Loose equality for `==` / `!=` in expressions.
pub fn loose_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            equal(a, b)
        }
        _ => cmp_values(a, b) == Some(Ordering::Equal),
    }
}

/// Strict structural equality used by assertions.
///
/// Ints and floats are compared numerically; no other coercion happens.
/// Object key order is irrelevant. Callables never compare equal.
pub fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.as_f64() == b.as_f64()
        }
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| equal(v, w)).unwrap_or(false))
        }
        _ => false,
    }
}

/// Whether a value is the zero value of its type.
pub fn is_zero(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Int(n) => *n == 0,
        Value::Float(f) => *f == 0.0,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Lazy(_) | Value::Assertion(_) => false,
    }
}
