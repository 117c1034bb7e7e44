use std::sync::Arc;

use pretty_assertions::assert_eq;
use scenario_assert as sa;
use scenario_assert::errors::with_node_and_colored;
use scenario_assert::{assertion, Assertion, Context, FnLeftArrow, Registry, Template, Value};
use serde_json::json;

fn yaml(s: &str) -> Value {
    sa::from_yaml_str(s).unwrap()
}

fn template() -> Template {
    Template::new(Context::new(Value::Null, Registry::with_assertions()))
}

/// `f` builds a containment check from its argument.
fn contains_template() -> Template {
    let mut functions = Registry::new();
    functions
        .register_left_arrow(FnLeftArrow::new("f", |arg| {
            Ok(Value::from(Assertion::Contains(Box::new(
                assertion::from_value(arg),
            ))))
        }))
        .unwrap();
    Template::new(Context::new(Value::Null, functions))
}

#[tokio::test]
async fn test_left_arrow_simple() {
    let t = contains_template();
    let v = t.execute(&Value::from("{{f <-}}: 1")).await.unwrap();
    let a = assertion::from_value(v);
    assert!(a.assert(&Value::from(json!([0, 1]))).await.is_ok());
    assert!(a.assert(&Value::from(json!([2, 3]))).await.is_err());
}

#[tokio::test]
async fn test_left_arrow_nested_document() {
    let t = contains_template();
    let doc = "{{f <-}}:\n  ids: |-\n    {{f <-}}: 1";
    let v = t.execute(&Value::from(doc)).await.unwrap();
    let a = assertion::from_value(v);
    assert!(a.assert(&Value::from(json!([{"ids": [0, 1]}]))).await.is_ok());
    assert!(a.assert(&Value::from(json!([{"ids": [2, 3]}]))).await.is_err());
}

#[tokio::test]
async fn test_less_than_scenario() {
    let a = assertion::must_build(&template(), &yaml("value: '{{lessThan <-}}: 1'")).await;
    assert!(a.assert(&yaml("value: 0")).await.is_ok());
    let err = a.assert(&yaml("value: 2")).await.unwrap_err();
    assert_eq!(err.to_string(), "1 error occurred:\n.value: 2 is not less than 1");
}

#[tokio::test]
async fn test_and_reports_every_failure() {
    let expected = yaml(
        r#"
"{{and <-}}":
  - "{{lessThan <-}}: 1"
  - "{{greaterThan <-}}: 5"
"#,
    );
    let a = assertion::must_build(&template(), &expected).await;
    let err = a.assert(&Value::Int(3)).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "2 errors occurred:\n3 is not less than 1\n3 is not greater than 5"
    );
    match err {
        sa::Error::Multi(m) => assert_eq!(m.errs.len(), 2),
        other => panic!("expected an aggregate error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_or_passes_when_any_alternative_passes() {
    let expected = yaml(
        r#"
"{{or <-}}":
  - "{{lessThan <-}}: 1"
  - "{{greaterThan <-}}: 5"
"#,
    );
    let a = assertion::must_build(&template(), &expected).await;
    assert!(a.assert(&Value::Int(0)).await.is_ok());
    assert!(a.assert(&Value::Int(9)).await.is_ok());
    let err = a.assert(&Value::Int(3)).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "2 errors occurred:\nall assertions failed: 3 is not less than 1\nall assertions failed: 3 is not greater than 5"
    );
}

#[tokio::test]
async fn test_contains_reports_path_of_field() {
    let expected = yaml("tags: '{{contains <-}}: admin'\n");
    let a = assertion::must_build(&template(), &expected).await;
    assert!(a.assert(&yaml("tags: [user, admin]")).await.is_ok());
    let err = a.assert(&yaml("tags: [user]")).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "1 error occurred:\n.tags: doesn't contain expected value: expected \"admin\" but got \"user\""
    );
}

#[tokio::test]
async fn test_actual_value_in_expressions() {
    let expected = yaml(
        r#"
id: "{{$ > 0}}"
name: "{{lower($) == 'bob'}}"
"#,
    );
    let a = assertion::must_build(&template(), &expected).await;
    assert!(a.assert(&yaml("id: 3\nname: BOB")).await.is_ok());
    assert!(a.assert(&yaml("id: 0\nname: Bob")).await.is_err());
}

#[tokio::test]
async fn test_plain_documents_match_themselves() {
    let doc = yaml(
        r#"
id: 1
name: alice
scores: [1, 2.5, null]
profile:
  active: true
  tags: {}
"#,
    );
    let a = assertion::build(&template(), &doc).await.unwrap();
    assert!(a.assert(&doc).await.is_ok());
}

#[tokio::test]
async fn test_and_under_a_field_keeps_the_field_path() {
    let expected = yaml(
        r#"
score:
  "{{and <-}}":
    - "{{lessThan <-}}: 1"
    - "{{greaterThan <-}}: 5"
"#,
    );
    let a = assertion::must_build(&template(), &expected).await;
    assert!(a.assert(&yaml("score: 0\n")).await.is_err());
    let err = a.assert(&yaml("score: 3\n")).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "1 error occurred:\n2 errors occurred:\n.score: 3 is not less than 1\n.score: 3 is not greater than 5"
    );
    let sa::Error::Multi(outer) = err else {
        panic!("expected an aggregate error");
    };
    match outer.errs.as_slice() {
        [sa::Error::Multi(inner)] => {
            assert_eq!(inner.errs.len(), 2);
            for e in &inner.errs {
                assert_eq!(e.path().map(ToString::to_string).as_deref(), Some(".score"));
            }
        }
        other => panic!("expected one nested aggregate, got {other:?}"),
    }
}

#[tokio::test]
async fn test_errors_render_document_excerpt() {
    let text = "name: alice\nage: \"{{greaterThan <-}}: 18\"\n";
    let a = assertion::must_build(&template(), &yaml(text)).await;
    let err = a.assert(&yaml("name: bob\nage: 10")).await.unwrap_err();
    let err = with_node_and_colored(err, Arc::new(sa::YamlSource::new(text)), false);
    let rendered = err.to_string();
    assert!(rendered.starts_with("2 errors occurred:\n"), "{rendered}");
    assert!(rendered.contains("name: alice"), "{rendered}");
    assert!(rendered.contains("age: \"{{greaterThan <-}}: 18\""), "{rendered}");
    assert!(rendered.contains("expected \"alice\" but got \"bob\""), "{rendered}");
    assert!(rendered.contains("10 is not greater than 18"), "{rendered}");
    // the excerpt replaces the inline path prefix
    assert!(!rendered.contains(".age: 10"), "{rendered}");
}

#[tokio::test]
async fn test_excerpts_follow_flow_collections() {
    let text = "user: {name: alice, tags: [a, b]}\n";
    let a = assertion::must_build(&template(), &yaml(text)).await;
    let err = a
        .assert(&yaml("user: {name: alice, tags: [a, c]}"))
        .await
        .unwrap_err();
    let err = with_node_and_colored(err, Arc::new(sa::YamlSource::new(text)), false);
    let rendered = err.to_string();
    assert!(rendered.contains("user: {name: alice, tags: [a, b]}"), "{rendered}");
    assert!(rendered.contains("expected \"b\" but got \"c\""), "{rendered}");
}

#[tokio::test]
async fn test_vars_feed_expectations() {
    let options = sa::Options::from_yaml_str("vars:\n  min: 2\n").unwrap();
    let t = Template::from_options(&options, Registry::with_assertions());
    let a = assertion::must_build(&t, &yaml("count: '{{$ >= vars.min}}'")).await;
    assert!(a.assert(&yaml("count: 2")).await.is_ok());
    assert!(a.assert(&yaml("count: 1")).await.is_err());
}
