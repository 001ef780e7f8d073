//! Bootstrap idempotente de una ejecución.
//!
//! La clave de idempotencia es el hash blake3 del JSON canónico de
//! `{engine_version, job_class, unique_by}`. La creación o verificación de
//! la fila ocurre en una sola transacción al nivel de aislamiento configurado.

use chrono::Utc;
use serde_json::{json, Value};

use super::WorkflowEngine;
use crate::constants::ENGINE_VERSION;
use crate::definition::{BuiltWorkflow, WorkflowBuilder};
use crate::errors::{BoxError, SagaError, StoreError};
use crate::hashing::{canonical_eq, hash_value};
use crate::model::{Execution, Job, SerializedJob};
use crate::queue::JobQueue;
use crate::store::{DurableStore, ExecutionStore};

/// Reintentos del bootstrap ante un creador concurrente que ganó el insert.
const CREATE_ATTEMPTS: usize = 2;

/// Clave de idempotencia para `job_class` + `unique_by`.
pub fn idempotency_key(job_class: &str, unique_by: &Value) -> String {
    hash_value(&json!({
        "engine_version": ENGINE_VERSION,
        "job_class": job_class,
        "unique_by": unique_by,
    }))
}

/// Ejecución lista para correr junto a sus handlers.
pub struct Bootstrapped<'h> {
    pub execution: Execution,
    pub workflow: BuiltWorkflow<'h>,
}

impl<S, Q> WorkflowEngine<S, Q>
    where S: DurableStore,
          Q: JobQueue
{
    /// Evalúa el bloque y crea o recupera la `Execution` sin correr steps.
    ///
    /// Sin bloque falla con `UndefinedWorkflowBlock`.
    pub fn bootstrap<'h, J, F>(&self, job: &J, unique_by: Value, block: Option<F>) -> Result<Bootstrapped<'h>, SagaError>
        where J: Job + ?Sized,
              F: FnOnce(&mut WorkflowBuilder<'h>) -> Result<(), BoxError>
    {
        if self.is_active(job.job_id())? {
            return Err(SagaError::RedefiningWorkflow { job_id: job.job_id().to_string() });
        }
        self.bootstrap_unguarded(job, unique_by, block)
    }

    pub(super) fn bootstrap_unguarded<'h, J, F>(&self,
                                                job: &J,
                                                unique_by: Value,
                                                block: Option<F>)
                                                -> Result<Bootstrapped<'h>, SagaError>
        where J: Job + ?Sized,
              F: FnOnce(&mut WorkflowBuilder<'h>) -> Result<(), BoxError>
    {
        let block = block.ok_or(SagaError::UndefinedWorkflowBlock)?;
        let mut builder = WorkflowBuilder::new();
        block(&mut builder).map_err(SagaError::Job)?;
        let workflow = builder.finish(&self.config.plugins)?;

        let serialized = job.serialize();
        let key = idempotency_key(&serialized.job_class, &unique_by);
        let execution = self.create_or_verify(&key, &serialized, &workflow)?;
        Ok(Bootstrapped { execution, workflow })
    }

    fn create_or_verify(&self, key: &str, job: &SerializedJob, workflow: &BuiltWorkflow<'_>) -> Result<Execution, SagaError> {
        let isolation = self.config
                            .isolation
                            .unwrap_or_else(|| self.store.strongest_isolation());

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.store.transaction(isolation, |tx| match tx.find_by_key(key)? {
                                                   Some(mut existing) => {
                                                       verify(key, &existing, job, workflow)?;
                                                       let now = Utc::now();
                                                       existing.last_run_at = Some(now);
                                                       existing.updated_at = now;
                                                       tx.update(&existing)?;
                                                       Ok(existing)
                                                   }
                                                   None => {
                                                       let created = Execution::new(key.to_string(),
                                                                                    job.clone(),
                                                                                    workflow.definition.clone());
                                                       tx.insert(&created)?;
                                                       Ok(created)
                                                   }
                                               });
            match result {
                Err(SagaError::Store(StoreError::UniqueViolation(detail))) if attempt < CREATE_ATTEMPTS => {
                    log::warn!("concurrent bootstrap for key {key} ({detail}); loading existing execution");
                }
                Ok(execution) => {
                    log::debug!("bootstrapped execution {} at `{}`", execution.id, execution.recover_to);
                    return Ok(execution);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn verify(key: &str, existing: &Execution, job: &SerializedJob, workflow: &BuiltWorkflow<'_>) -> Result<(), SagaError> {
    if existing.serialized_job.job_class != job.job_class
       || !canonical_eq(&existing.serialized_job.arguments, &job.arguments)
    {
        return Err(SagaError::ArgumentMismatch { key: key.to_string() });
    }
    if !existing.definition.matches(&workflow.definition) {
        return Err(SagaError::DefinitionMismatch { key: key.to_string() });
    }
    Ok(())
}
