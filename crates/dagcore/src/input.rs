use crate::{Context, Value};
use std::collections::HashMap;

/// Key that marks an object as a context reference in legacy input maps.
pub const CONTEXT_REF_KEY: &str = "$context";

/// A step input: either a literal or a reference into the context.
///
/// References are distinguished from literals by type. The `$name` string
/// sentinel and `{"$context": "path"}` objects are only recognised when
/// converting from an untyped [`Value`] via [`Input::from_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Literal(Value),
    Ref(String),
    List(Vec<Input>),
    Map(HashMap<String, Input>),
}

impl Input {
    pub fn literal(value: impl Into<Value>) -> Self {
        Input::Literal(value.into())
    }

    pub fn reference(path: impl Into<String>) -> Self {
        Input::Ref(path.into())
    }

    /// Parse an untyped value, turning sentinel strings and reference
    /// objects into [`Input::Ref`].
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) if s.starts_with('$') && s.len() > 1 => Input::Ref(s[1..].to_string()),
            Value::Object(map) => {
                if let Some(Value::String(path)) = map.get(CONTEXT_REF_KEY) {
                    return Input::Ref(path.clone());
                }
                Input::Map(
                    map.into_iter()
                        .map(|(k, v)| (k, Input::from_value(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Input::List(items.into_iter().map(Input::from_value).collect()),
            other => Input::Literal(other),
        }
    }

    /// Resolve every reference against `ctx`. Unresolved references become
    /// [`Value::Null`].
    pub fn resolve(&self, ctx: &Context) -> Value {
        match self {
            Input::Literal(value) => value.clone(),
            Input::Ref(path) => ctx.resolve_path(path).unwrap_or(Value::Null),
            Input::List(items) => Value::Array(items.iter().map(|i| i.resolve(ctx)).collect()),
            Input::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, i)| (k.clone(), i.resolve(ctx)))
                    .collect(),
            ),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Input::Ref(_))
    }
}

macro_rules! input_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Input {
                fn from(value: $t) -> Self {
                    Input::from_value(Value::from(value))
                }
            }
        )*
    };
}

input_from!(Value, String, &str, f64, i64, i32, bool, serde_json::Value);

/// Resolve a named input map in one pass.
pub fn resolve_inputs(inputs: &HashMap<String, Input>, ctx: &Context) -> HashMap<String, Value> {
    inputs
        .iter()
        .map(|(name, input)| (name.clone(), input.resolve(ctx)))
        .collect()
}
