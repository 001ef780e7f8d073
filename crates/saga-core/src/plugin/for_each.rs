//! Itera una colección del contexto, un elemento por pasada del step.

use serde_json::{json, Value};

use super::{invalid_option, Next, Plugin};
use crate::constants::FOR_EACH_NAMESPACE;
use crate::errors::SagaError;
use crate::step::{StepContext, StepOutcome};

#[derive(Debug, Default, Clone, Copy)]
pub struct ForEachPlugin;

/// Clave de contexto con el cursor de `step`.
pub fn cursor_key(step: &str) -> String {
    format!("{FOR_EACH_NAMESPACE}/{step}/cursor")
}

/// Elementos de la colección; un objeto se itera como pares `[clave, valor]`.
fn items_of(step: &str, key: &str, collection: Value) -> Result<Vec<Value>, SagaError> {
    match collection {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(k, v)| json!([k, v])).collect()),
        _ => Err(SagaError::UniterableForEachCollection { step: step.to_string(),
                                                          key: key.to_string() }),
    }
}

impl Plugin for ForEachPlugin {
    fn keyword(&self) -> &str {
        FOR_EACH_NAMESPACE
    }

    fn validate(&self, value: &Value) -> Result<Value, SagaError> {
        match value {
            Value::String(key) if !key.trim().is_empty() => Ok(value.clone()),
            _ => Err(invalid_option(FOR_EACH_NAMESPACE, "expected the name of a context key")),
        }
    }

    fn around_step(&self, ctx: &mut StepContext<'_>, next: &mut Next<'_>) -> Result<StepOutcome, SagaError> {
        let step = ctx.step().to_string();
        let key = ctx.option(FOR_EACH_NAMESPACE)
                     .and_then(Value::as_str)
                     .unwrap_or_default()
                     .to_string();
        let context = ctx.context();

        let collection = context.read(&key)?
                                .ok_or_else(|| SagaError::UnknownForEachCollection { step: step.clone(),
                                                                                     key: key.clone() })?;
        let items = items_of(&step, &key, collection)?;
        let cursor_key = cursor_key(&step);
        let cursor = context.read(&cursor_key)?
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0) as usize;

        let Some(item) = items.get(cursor).cloned() else {
            ctx.record(FOR_EACH_NAMESPACE, "exhausted", Some(json!({ "processed": items.len() })))?;
            return Ok(StepOutcome::Continue);
        };

        ctx.set_item(Some(item));
        let outcome = next.call(ctx);
        ctx.set_item(None);

        match outcome? {
            StepOutcome::Continue => {
                context.write(&cursor_key, json!(cursor + 1))?;
                Ok(StepOutcome::Repeat)
            }
            other => Ok(other),
        }
    }
}
