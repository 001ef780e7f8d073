//! Fan-out / fan-in: el step espera a que terminen jobs hijos.
//!
//! La primera pasada encola los hijos dentro de `fetch_with`, de modo que la
//! lista de claves se fija una sola vez aunque el job se reintente. Cada hijo
//! lleva un `AwaitLink`; al terminar marca su clave en el contexto del padre
//! (`WorkflowEngine::signal_completion`) y el último re-encola al padre.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{invalid_option, Next, Plugin};
use crate::constants::AWAITS_NAMESPACE;
use crate::context::is_truthy;
use crate::errors::SagaError;
use crate::model::{AwaitLink, SerializedJob};
use crate::queue::EnqueueOptions;
use crate::step::{StepContext, StepOutcome};

#[derive(Debug, Default, Clone, Copy)]
pub struct AwaitsPlugin;

/// Clave de contexto con la lista de child keys de `step`.
pub fn children_key(step: &str) -> String {
    format!("{AWAITS_NAMESPACE}/{step}/children")
}

impl AwaitsPlugin {
    fn normalize_child(value: &Value) -> Result<Value, SagaError> {
        match value {
            Value::String(class) if !class.trim().is_empty() => {
                Ok(json!({ "job_class": class, "arguments": Value::Null, "queue": Value::Null }))
            }
            Value::Object(map) => {
                let class = map.get("job_class")
                               .and_then(Value::as_str)
                               .filter(|c| !c.trim().is_empty())
                               .ok_or_else(|| invalid_option(AWAITS_NAMESPACE, "child job requires a non-empty `job_class`"))?;
                if let Some(unknown) = map.keys().find(|k| !matches!(k.as_str(), "job_class" | "arguments" | "queue")) {
                    return Err(invalid_option(AWAITS_NAMESPACE, format!("unknown child job field `{unknown}`")));
                }
                let queue = match map.get("queue") {
                    None | Some(Value::Null) => Value::Null,
                    Some(Value::String(q)) => Value::String(q.clone()),
                    Some(_) => return Err(invalid_option(AWAITS_NAMESPACE, "child `queue` must be a string")),
                };
                let mut normalized = Map::new();
                normalized.insert("job_class".into(), Value::String(class.to_string()));
                normalized.insert("arguments".into(), map.get("arguments").cloned().unwrap_or(Value::Null));
                normalized.insert("queue".into(), queue);
                Ok(Value::Object(normalized))
            }
            other => Err(invalid_option(AWAITS_NAMESPACE, format!("unsupported child job {other}"))),
        }
    }

    fn enqueue_children(ctx: &StepContext<'_>, children: &[Value]) -> Result<Value, SagaError> {
        let mut keys = Vec::with_capacity(children.len());
        for child in children {
            let class = child["job_class"].as_str()
                                          .ok_or_else(|| invalid_option(AWAITS_NAMESPACE, "child job lost its `job_class`"))?;
            let child_key = Uuid::new_v4().to_string();
            let mut job = SerializedJob::new(class, child["arguments"].clone());
            if let Some(queue) = child["queue"].as_str() {
                job = job.with_queue(queue);
            }
            job = job.with_await_link(AwaitLink { parent_execution_id: ctx.execution_id(),
                                                  parent_step: ctx.step().to_string(),
                                                  child_key: child_key.clone() });
            let handle = ctx.enqueue(&job, EnqueueOptions::default())?;
            log::debug!("step `{}` enqueued child {class} ({}) as {child_key}", ctx.step(), handle.job_id);
            keys.push(Value::String(child_key));
        }
        ctx.record(AWAITS_NAMESPACE, "enqueued", Some(json!({ "children": keys })))?;
        Ok(Value::Array(keys))
    }
}

impl Plugin for AwaitsPlugin {
    fn keyword(&self) -> &str {
        AWAITS_NAMESPACE
    }

    /// Acepta `"Clase"`, `{job_class, arguments?, queue?}` o una lista de
    /// ambos; siempre devuelve una lista de objetos completos.
    fn validate(&self, value: &Value) -> Result<Value, SagaError> {
        let children = match value {
            Value::Array(items) => items.iter().map(Self::normalize_child).collect::<Result<Vec<_>, _>>()?,
            single => vec![Self::normalize_child(single)?],
        };
        Ok(Value::Array(children))
    }

    fn around_step(&self, ctx: &mut StepContext<'_>, next: &mut Next<'_>) -> Result<StepOutcome, SagaError> {
        let specs = match ctx.option(AWAITS_NAMESPACE) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let context = ctx.context();
        let stored = context.fetch_with(&children_key(ctx.step()), || Self::enqueue_children(ctx, &specs))?;

        let keys: Vec<&str> = stored.as_array()
                                    .map(|items| items.iter().filter_map(Value::as_str).collect())
                                    .unwrap_or_default();
        let done = context.get_pairs(&keys)?
                          .into_iter()
                          .filter(|(_, marker)| is_truthy(marker))
                          .count();

        if done < keys.len() {
            let outstanding = keys.len() - done;
            ctx.record(AWAITS_NAMESPACE,
                       "waiting",
                       Some(json!({ "outstanding": outstanding, "total": keys.len() })))?;
            log::debug!("step `{}` waiting on {outstanding} of {} children", ctx.step(), keys.len());
            return Ok(StepOutcome::Halt);
        }
        next.call(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_strings_objects_and_lists() {
        let p = AwaitsPlugin;
        assert_eq!(p.validate(&json!("Mailer")).unwrap(),
                   json!([{"job_class": "Mailer", "arguments": null, "queue": null}]));
        assert_eq!(p.validate(&json!([{"job_class": "Pick", "queue": "fast"}])).unwrap(),
                   json!([{"job_class": "Pick", "arguments": null, "queue": "fast"}]));
        assert_eq!(p.validate(&json!([])).unwrap(), json!([]));
    }

    #[test]
    fn validate_rejects_malformed_children() {
        let p = AwaitsPlugin;
        assert!(matches!(p.validate(&json!(42)), Err(SagaError::InvalidPluginOption { .. })));
        assert!(p.validate(&json!([{"arguments": []}])).is_err());
        assert!(p.validate(&json!([{"job_class": "A", "retries": 3}])).is_err());
        assert!(p.validate(&json!([""])).is_err());
    }

    #[test]
    fn children_key_is_namespaced_by_step() {
        assert_eq!(children_key("ship"), "awaits/ship/children");
    }
}
