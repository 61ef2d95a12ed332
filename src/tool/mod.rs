//! Tool surface (§6): exposes an `Action` as a self-describing capability
//! with a JSON-in/JSON-out `invoke`, for collaborators (agents, CLIs,
//! other services) that only speak JSON and a symbolic name.

use std::sync::Arc;

use serde_json::Value;

use crate::action::Action;
use crate::context::{Context, Params};
use crate::error::{normalize_run_outcome, ExecutionError, RunOutcome};
use crate::executor::{ExecuteOptions, Executor};

/// `{name, description, parameters_schema, invoke}` from §6. `invoke` is not
/// stored as a field (a trait object can't be cloned into one easily);
/// instead `ToolDescriptor` borrows nothing and `invoke` is a free function
/// taking the originating action.
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

impl ToolDescriptor {
    pub fn from_action<A: Action + ?Sized>(action: &A) -> Self {
        let meta = action.metadata();
        Self {
            name: meta.name,
            description: meta.description,
            parameters_schema: action.input_schema().describe(),
        }
    }
}

/// Drives an action through the Executor from a JSON args map, converting
/// the JSON result back to string-keyed output. String keys in `args` are
/// used as-is since `Params` is already a string-keyed map; there is no
/// separate symbolic-key representation in this engine.
pub async fn invoke(
    action: Arc<dyn Action>,
    args: Value,
    context: Context,
    opts: ExecuteOptions,
) -> Value {
    let params: Params = match args {
        Value::Object(map) => map,
        Value::Null => Params::new(),
        other => {
            let err = ExecutionError::invalid_input(format!(
                "tool arguments must be a JSON object, got {other}"
            ));
            return error_to_json(&err);
        }
    };

    let outcome = Executor::execute(action, params, context, opts).await;
    outcome_to_json(outcome)
}

fn outcome_to_json(outcome: RunOutcome) -> Value {
    match outcome {
        RunOutcome::Ok { data, directive } => {
            let mut obj = serde_json::Map::new();
            obj.insert("ok".into(), Value::Object(data));
            if let Some(d) = directive {
                obj.insert("directive".into(), d);
            }
            Value::Object(obj)
        }
        RunOutcome::Err { error, directive } => {
            let mut obj = error_to_json_obj(&error);
            if let Some(d) = directive {
                obj.insert("directive".into(), d);
            }
            Value::Object(obj)
        }
    }
}

fn error_to_json_obj(error: &ExecutionError) -> serde_json::Map<String, Value> {
    let mut obj = serde_json::Map::new();
    obj.insert(
        "err".into(),
        serde_json::to_value(error).unwrap_or(Value::Null),
    );
    obj
}

fn error_to_json(error: &ExecutionError) -> Value {
    Value::Object(error_to_json_obj(error))
}

/// Re-parses a `to_tool().invoke()` JSON result back into a `RunOutcome`,
/// for callers that received the JSON form and want the typed one back.
pub fn parse_invoke_result(value: Value) -> RunOutcome {
    normalize_run_outcome(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FlatSchema, TypeTag};
    use async_trait::async_trait;

    struct Echo {
        schema: FlatSchema,
    }

    #[async_trait]
    impl Action for Echo {
        fn metadata(&self) -> crate::action::ActionMetadata {
            crate::action::ActionMetadata::new("echo", "echoes its input")
        }

        fn input_schema(&self) -> &dyn crate::schema::SchemaValidator {
            &self.schema
        }

        async fn run(&self, params: Params, _context: Context) -> RunOutcome {
            RunOutcome::ok(params)
        }
    }

    #[tokio::test]
    async fn invoke_roundtrips_ok() {
        let action: Arc<dyn Action> = Arc::new(Echo {
            schema: FlatSchema::new().field("value", true, TypeTag::Number),
        });
        let args = serde_json::json!({"value": 5});
        let result = invoke(action, args, Context::new(), ExecuteOptions::default()).await;
        assert_eq!(result["ok"]["value"], 5);
    }

    #[tokio::test]
    async fn invoke_rejects_non_object_args() {
        let action: Arc<dyn Action> = Arc::new(Echo {
            schema: FlatSchema::new(),
        });
        let result = invoke(
            action,
            Value::from(42),
            Context::new(),
            ExecuteOptions::default(),
        )
        .await;
        assert!(result.get("err").is_some());
    }
}
