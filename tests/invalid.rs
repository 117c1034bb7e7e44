use pretty_assertions::assert_eq;
use scenario_assert as sa;
use scenario_assert::{assertion, Context, Registry, Template, Value};
use serde_json::json;

fn template() -> Template {
    Template::new(Context::new(
        Value::from(json!({"vars": {"items": [1, 2]}})),
        Registry::with_assertions(),
    ))
}

async fn build_err(expected: serde_json::Value) -> String {
    assertion::build(&template(), &Value::from(expected))
        .await
        .unwrap_err()
        .to_string()
}

#[tokio::test]
async fn test_invalid_regexp_pattern() {
    // an unbalanced group is rejected while building, not while asserting
    let err = build_err(json!({"name": "{{regexp('(')}}"})).await;
    assert!(
        err.starts_with(".name: invalid expectation: regexp: invalid pattern \"(\""),
        "{err}"
    );
}

#[tokio::test]
async fn test_regexp_pattern_must_be_a_string() {
    let err = build_err(json!({"name": {"{{regexp <-}}": 1}})).await;
    assert_eq!(
        err,
        ".name['{{regexp <-}}']: invalid expectation: regexp: pattern must be a string but got int"
    );
}

#[tokio::test]
async fn test_matcher_arity() {
    let err = build_err(json!({"n": "{{lessThan(1, 2)}}"})).await;
    assert_eq!(
        err,
        ".n: function \"lessThan\" expects 1 argument(s) but got 2"
    );
}

#[tokio::test]
async fn test_unknown_left_arrow_function() {
    let err = build_err(json!({"x": {"{{nope <-}}": 1}})).await;
    assert_eq!(err, ".x['{{nope <-}}']: function \"nope <-\" is not defined");
}

#[tokio::test]
async fn test_left_arrow_mixed_with_other_keys() {
    let err = build_err(json!({"x": {"{{contains <-}}": 1, "y": 2}})).await;
    assert_eq!(
        err,
        ".x['{{contains <-}}']: runtime error: a left arrow function must be the only key of its map"
    );
}

#[tokio::test]
async fn test_left_arrow_in_a_leaf() {
    // `<-` only makes sense as a map key
    let err = build_err(json!({"x": "{{contains <-}}"})).await;
    assert!(err.starts_with(".x: "), "{err}");
}

#[tokio::test]
async fn test_malformed_expressions() {
    let err = build_err(json!({"x": "{{1 +}}"})).await;
    assert_eq!(err, ".x: parse error: expression expected");
}

#[tokio::test]
async fn test_unclosed_braces_are_literal_text() {
    // without a closing `}}` there is no action to evaluate
    let expected = Value::from(json!({"x": "{{vars.items"}));
    let a = assertion::build(&template(), &expected).await.unwrap();
    assert!(a.assert(&expected).await.is_ok());
}

#[tokio::test]
async fn test_out_of_range_index() {
    let err = build_err(json!({"x": ["{{vars.items[2]}}"]})).await;
    assert_eq!(err, ".x[0]: \"vars.items[2]\" not found");
}

#[tokio::test]
async fn test_non_scalar_key() {
    let err = build_err(json!({"{{vars.items}}": 1})).await;
    assert!(err.starts_with("['{{vars.items}}']: runtime error: "), "{err}");
}

#[tokio::test]
#[should_panic(expected = "failed to build assertion")]
async fn test_must_build_panics() {
    assertion::must_build(&template(), &Value::from(json!({"x": "{{unknown()}}"}))).await;
}

#[tokio::test]
async fn test_duplicate_registration() {
    let mut functions = Registry::with_builtins();
    let err = functions
        .register(sa::FnFunction::new("lower", 1..=1, |args| Ok(args[0].clone())))
        .unwrap_err();
    assert!(err.to_string().starts_with("cannot register \"lower\": "), "{err}");

    let err = functions
        .register(sa::FnFunction::new("not a name", 0..=0, |_| Ok(Value::Null)))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot register \"not a name\": name must be a dotted identifier"
    );
}
