//! `WorkflowEngine`: bootstrap + drive loop.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::bootstrap::Bootstrapped;
use super::EngineConfig;
use crate::context::Context;
use crate::definition::{BuiltWorkflow, WorkflowBuilder};
use crate::errors::{BoxError, SagaError, StoreError};
use crate::model::{Entry, Execution, Job};
use crate::queue::JobQueue;
use crate::step::runner::StepRunner;
use crate::step::StepTransition;
use crate::store::{DurableStore, IsolationLevel};

/// Resultado de un intento de `execute_workflow`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// `recover_to` llegó a `FINISHED`.
    Finished { execution_id: Uuid },
    /// Un step pidió suspender; la próxima invocación reanuda en `step`.
    Halted { execution_id: Uuid, step: String },
}

impl WorkflowOutcome {
    pub fn execution_id(&self) -> Uuid {
        match self {
            WorkflowOutcome::Finished { execution_id } | WorkflowOutcome::Halted { execution_id, .. } => *execution_id,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, WorkflowOutcome::Finished { .. })
    }
}

/// Motor de workflows tipo saga sobre un Durable Store y una cola de jobs.
///
/// No lanza hilos: cada llamada a `execute_workflow` corre dentro del
/// `perform` del job que la invoca.
pub struct WorkflowEngine<S, Q>
    where S: DurableStore,
          Q: JobQueue
{
    pub(super) store: S,
    pub(super) queue: Q,
    pub(super) config: EngineConfig,
    active: Mutex<HashSet<String>>,
}

/// Marca un `job_id` como en curso mientras vive.
struct ActiveAttempt<'e> {
    active: &'e Mutex<HashSet<String>>,
    job_id: String,
}

impl Drop for ActiveAttempt<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.active.lock() {
            set.remove(&self.job_id);
        }
    }
}

impl<S, Q> WorkflowEngine<S, Q>
    where S: DurableStore,
          Q: JobQueue
{
    pub fn new(store: S, queue: Q) -> Self {
        Self::with_config(store, queue, EngineConfig::default())
    }

    pub fn with_config(store: S, queue: Q, config: EngineConfig) -> Self {
        Self { store,
               queue,
               config,
               active: Mutex::new(HashSet::new()) }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Punto de entrada desde el `perform` de un job.
    ///
    /// Evalúa `block`, crea o recupera la ejecución para `unique_by` y corre
    /// steps desde `recover_to` hasta terminar, suspender o fallar. Los
    /// errores de un step se propagan sin modificar para que la cola decida
    /// el reintento.
    pub fn execute_workflow<'h, J, F>(&self, job: &J, unique_by: Value, block: F) -> Result<WorkflowOutcome, SagaError>
        where J: Job + ?Sized,
              F: FnOnce(&mut WorkflowBuilder<'h>) -> Result<(), BoxError>
    {
        let _attempt = self.enter(job.job_id())?;
        let bootstrapped = self.bootstrap_unguarded(job, unique_by, Some(block))?;
        self.drive(job, bootstrapped)
    }

    fn drive<J>(&self, job: &J, bootstrapped: Bootstrapped<'_>) -> Result<WorkflowOutcome, SagaError>
        where J: Job + ?Sized
    {
        let Bootstrapped { mut execution, workflow } = bootstrapped;
        let BuiltWorkflow { mut handlers, plugins, .. } = workflow;
        let mut runner = StepRunner { entries: &self.store,
                                      values: &self.store,
                                      queue: &self.queue,
                                      plugins: &plugins,
                                      handlers: &mut handlers };

        while !execution.is_finished() {
            let step = execution.recover_to.clone();
            match runner.run_step(&execution, &step)? {
                StepTransition::Continue(next) => {
                    execution = self.advance(execution.id, &step, &next)?;
                }
                StepTransition::Repeat => {}
                StepTransition::Halt => {
                    return Ok(WorkflowOutcome::Halted { execution_id: execution.id,
                                                        step });
                }
            }
        }

        let link = job.await_link()
                      .cloned()
                      .or_else(|| execution.serialized_job.awaiting.clone());
        if let Some(link) = link {
            self.signal_completion(&link)?;
        }
        log::debug!("execution {} finished", execution.id);
        Ok(WorkflowOutcome::Finished { execution_id: execution.id })
    }

    /// Mueve `recover_to` de `from` a `to`. Si otro intento ya lo movió, se
    /// respeta el valor grabado.
    fn advance(&self, id: Uuid, from: &str, to: &str) -> Result<Execution, SagaError> {
        self.store.transaction(IsolationLevel::ReadCommitted, |tx| {
                      let mut execution = tx.find(id)?
                                            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))?;
                      if execution.recover_to != from {
                          log::debug!("execution {id} already moved past `{from}` to `{}`", execution.recover_to);
                          return Ok(execution);
                      }
                      execution.recover_to = to.to_string();
                      execution.updated_at = Utc::now();
                      tx.update(&execution)?;
                      Ok(execution)
                  })
    }

    pub(super) fn is_active(&self, job_id: &str) -> Result<bool, SagaError> {
        Ok(self.lock_active()?.contains(job_id))
    }

    fn enter(&self, job_id: &str) -> Result<ActiveAttempt<'_>, SagaError> {
        let mut set = self.lock_active()?;
        if !set.insert(job_id.to_string()) {
            return Err(SagaError::RedefiningWorkflow { job_id: job_id.to_string() });
        }
        Ok(ActiveAttempt { active: &self.active,
                           job_id: job_id.to_string() })
    }

    fn lock_active(&self) -> Result<MutexGuard<'_, HashSet<String>>, SagaError> {
        self.active
            .lock()
            .map_err(|_| SagaError::Store(StoreError::Backend("active attempt registry poisoned".into())))
    }

    pub fn load_execution(&self, id: Uuid) -> Result<Option<Execution>, SagaError> {
        Ok(self.store.load_execution(id)?)
    }

    pub fn find_execution(&self, idempotency_key: &str) -> Result<Option<Execution>, SagaError> {
        Ok(self.store.find_execution_by_key(idempotency_key)?)
    }

    /// Log de entries de una ejecución, en orden de append.
    pub fn entries(&self, execution_id: Uuid) -> Result<Vec<Entry>, SagaError> {
        Ok(self.store.entries(execution_id)?)
    }

    pub fn context(&self, execution_id: Uuid) -> Context<'_> {
        Context::new(execution_id, &self.store)
    }
}
