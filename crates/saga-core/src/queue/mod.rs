//! Contrato de la cola de jobs externa.
//!
//! La cola entrega `perform` al menos una vez, decide reintentos ante los
//! errores que el motor propaga y asigna una identidad por invocación. El
//! motor sólo la usa para encolar: hijos de un `awaits`, re-encolar al padre
//! y re-encolados diferidos pedidos por un step.

mod memory;

pub use memory::{EnqueuedJob, InMemoryJobQueue};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SagaError;
use crate::model::SerializedJob;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Demora antes de que el job sea visible.
    pub wait: Option<Duration>,
    /// Cola destino; `None` usa la del job.
    pub queue: Option<String>,
}

/// Identidad del job encolado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub queue: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

pub trait JobQueue {
    fn enqueue(&self, job: &SerializedJob, options: EnqueueOptions) -> Result<JobHandle, SagaError>;
}
