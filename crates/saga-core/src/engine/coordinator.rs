//! Lado "fan-in" del plugin `awaits`.

use serde_json::{json, Value};

use super::WorkflowEngine;
use crate::constants::AWAITS_NAMESPACE;
use crate::context::{is_truthy, Context};
use crate::errors::{SagaError, StoreError};
use crate::model::{AwaitLink, EntryAction, NewEntry};
use crate::plugin::children_key;
use crate::queue::{EnqueueOptions, JobQueue};
use crate::store::DurableStore;

impl<S, Q> WorkflowEngine<S, Q>
    where S: DurableStore,
          Q: JobQueue
{
    /// Marca al hijo de `link` como terminado en el contexto del padre.
    ///
    /// Si ya no queda ningún hijo pendiente (o la lista de hijos aún no es
    /// visible) y el padre no terminó, re-encola el job del padre y devuelve
    /// `true`. Invocarlo varias veces para el mismo hijo es inocuo.
    pub fn signal_completion(&self, link: &AwaitLink) -> Result<bool, SagaError> {
        let parent = self.store
                         .load_execution(link.parent_execution_id)?
                         .ok_or_else(|| StoreError::NotFound(format!("parent execution {}", link.parent_execution_id)))?;
        let context = Context::new(parent.id, &self.store);
        context.write(&link.child_key, Value::Bool(true))?;
        self.store
            .append_entry(NewEntry::new(parent.id,
                                        link.parent_step.as_str(),
                                        EntryAction::plugin(AWAITS_NAMESPACE, "child_completed"))
                                   .with_data(json!({ "child_key": link.child_key })))?;

        let outstanding = match context.read(&children_key(&link.parent_step))? {
            Some(Value::Array(keys)) => {
                let keys: Vec<&str> = keys.iter().filter_map(Value::as_str).collect();
                let done = context.get_pairs(&keys)?
                                  .into_iter()
                                  .filter(|(_, marker)| is_truthy(marker))
                                  .count();
                keys.len().saturating_sub(done)
            }
            _ => 0,
        };

        if outstanding > 0 || parent.is_finished() {
            log::debug!("child {} of {} done; {outstanding} outstanding", link.child_key, parent.id);
            return Ok(false);
        }
        let job = &parent.serialized_job;
        self.queue.enqueue(job,
                           EnqueueOptions { wait: None,
                                            queue: job.queue.clone() })?;
        log::debug!("all children of `{}` done; re-enqueued {}", link.parent_step, job.job_class);
        Ok(true)
    }
}
