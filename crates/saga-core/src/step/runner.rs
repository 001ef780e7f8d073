//! Máquina de estados de un step.
//!
//! Flujo por step:
//! 1. Replay guard: si el log ya tiene `succeeded` para el step, no se
//!    ejecuta y se devuelve `Continue(then)`.
//! 2. `started`.
//! 3. Pipeline de plugins alrededor del handler.
//! 4. `succeeded` / `halted` / `repeated` según el outcome, o `errored`
//!    con el mensaje si algo falló. El error original se propaga siempre.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use super::{StepContext, StepHandler, StepOutcome, StepStatus, StepTransition};
use crate::errors::SagaError;
use crate::model::{Execution, NewEntry};
use crate::plugin::{run_pipeline, Plugin};
use crate::queue::JobQueue;
use crate::store::{EntryLog, ValueStore};

pub(crate) struct StepRunner<'r, 'h> {
    pub entries: &'r dyn EntryLog,
    pub values: &'r dyn ValueStore,
    pub queue: &'r dyn JobQueue,
    pub plugins: &'r [Arc<dyn Plugin>],
    pub handlers: &'r mut HashMap<String, StepHandler<'h>>,
}

impl StepRunner<'_, '_> {
    pub fn run_step(&mut self, execution: &Execution, step: &str) -> Result<StepTransition, SagaError> {
        let spec = execution.definition
                            .get(step)
                            .ok_or_else(|| SagaError::UndefinedStep { step: step.to_string() })?;

        if self.entries
               .has_entry(execution.id, step, &StepStatus::Succeeded.action())?
        {
            log::debug!("step `{step}` of {} already succeeded; skipping", execution.id);
            return Ok(StepTransition::Continue(spec.then.clone()));
        }

        self.log(execution, step, StepStatus::Started, None)?;

        let (entries, values, queue, plugins) = (self.entries, self.values, self.queue, self.plugins);
        let handler = self.handlers
                          .get_mut(&spec.does)
                          .ok_or_else(|| SagaError::UndefinedMethod { step: step.to_string(),
                                                                      does: spec.does.clone() })?;

        let mut ctx = StepContext::new(execution, step, spec, values, entries, queue);
        let mut base = |ctx: &mut StepContext<'_>| handler(ctx).map_err(SagaError::from);
        let result = run_pipeline(plugins, &mut ctx, &mut base);

        match result {
            Ok(StepOutcome::Continue) => {
                self.log(execution, step, StepStatus::Succeeded, None)?;
                Ok(StepTransition::Continue(spec.then.clone()))
            }
            Ok(StepOutcome::Halt) => {
                self.log(execution, step, StepStatus::Halted, None)?;
                log::info!("execution {} halted at step `{step}`", execution.id);
                Ok(StepTransition::Halt)
            }
            Ok(StepOutcome::Repeat) => {
                self.log(execution, step, StepStatus::Repeated, None)?;
                Ok(StepTransition::Repeat)
            }
            Err(err) => {
                if let Err(log_err) = self.log(execution,
                                               step,
                                               StepStatus::Errored,
                                               Some(json!({ "error": err.to_string() })))
                {
                    log::error!("could not record errored entry for step `{step}` of {}: {log_err}",
                                execution.id);
                }
                log::warn!("step `{step}` of {} errored: {err}", execution.id);
                Err(err)
            }
        }
    }

    fn log(&self,
           execution: &Execution,
           step: &str,
           status: StepStatus,
           data: Option<serde_json::Value>)
           -> Result<(), SagaError> {
        let mut entry = NewEntry::new(execution.id, step, status.action());
        entry.data = data;
        self.entries.append_entry(entry)?;
        Ok(())
    }
}
