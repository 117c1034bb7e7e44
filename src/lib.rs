pub mod assertion;
pub mod comparison;
pub mod context;
pub mod errors;
pub mod functions;
pub mod lazy;
pub mod query;
pub mod source;
pub mod template;
pub mod value;
mod expression;
mod parser;

pub use assertion::{build, must_build, Assertion, Custom};
pub use context::{Context, Options};
pub use errors::{Error, MultiPathError, PathError, Result};
pub use functions::matchers::MatcherFn;
pub use functions::{FnFunction, FnLeftArrow, Function, LeftArrowFunc, Registry};
pub use lazy::Lazy;
pub use query::{KeyExtractor, Query, Segment};
pub use source::{SourceNode, YamlSource};
pub use template::Template;
pub use value::{from_yaml_str, Value};

/// Convenience: evaluate `template` eagerly over `data` with the built-in
/// helpers and matchers.
pub async fn execute(template: &Value, data: Value) -> Result<Value> {
    Template::new(Context::new(data, Registry::with_assertions()))
        .execute(template)
        .await
}
