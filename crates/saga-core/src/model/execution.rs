//! Registro durable de una corrida lógica del workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SerializedJob;
use crate::constants::FINISHED;
use crate::definition::WorkflowDefinition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    /// Único por store.
    pub idempotency_key: String,
    pub serialized_job: SerializedJob,
    pub definition: WorkflowDefinition,
    /// Step en el que se reanuda la próxima invocación, o `FINISHED`.
    pub recover_to: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// Ejecución nueva apuntando al primer step de `definition`.
    pub fn new(idempotency_key: String, serialized_job: SerializedJob, definition: WorkflowDefinition) -> Self {
        let now = Utc::now();
        let recover_to = definition.first_step().unwrap_or(FINISHED).to_string();
        Self { id: Uuid::new_v4(),
               idempotency_key,
               serialized_job,
               definition,
               recover_to,
               last_run_at: Some(now),
               created_at: now,
               updated_at: now }
    }

    pub fn is_finished(&self) -> bool {
        self.recover_to == FINISHED
    }

    /// `recover_to` es el centinela o un step de la definición.
    pub fn recover_to_is_valid(&self) -> bool {
        self.is_finished() || self.definition.contains(&self.recover_to)
    }
}
