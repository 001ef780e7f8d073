use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{EnqueueOptions, JobHandle, JobQueue};
use crate::errors::SagaError;
use crate::model::SerializedJob;

/// Job visible en la cola en memoria.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueuedJob {
    pub job: SerializedJob,
    pub scheduled_at: DateTime<Utc>,
}

/// Cola FIFO en memoria para tests y demos. Cada `enqueue` asigna un
/// `job_id` nuevo. Los clones comparten la cola.
#[derive(Debug, Default, Clone)]
pub struct InMemoryJobQueue {
    inner: Arc<Mutex<VecDeque<EnqueuedJob>>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saca el siguiente job ignorando `scheduled_at`.
    pub fn pop(&self) -> Option<SerializedJob> {
        self.lock().pop_front().map(|e| e.job)
    }

    pub fn drain(&self) -> Vec<SerializedJob> {
        self.lock().drain(..).map(|e| e.job).collect()
    }

    /// Copia del contenido actual, en orden.
    pub fn snapshot(&self) -> Vec<EnqueuedJob> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EnqueuedJob>> {
        // la cola no mantiene invariantes entre operaciones: un lock
        // envenenado sigue siendo utilizable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: &SerializedJob, options: EnqueueOptions) -> Result<JobHandle, SagaError> {
        let scheduled_at = Utc::now() + options.wait.unwrap_or_else(chrono::Duration::zero);
        let mut job = job.clone();
        job.job_id = Uuid::new_v4().to_string();
        if options.queue.is_some() {
            job.queue = options.queue;
        }
        let handle = JobHandle { job_id: job.job_id.clone(),
                                 queue: job.queue.clone(),
                                 scheduled_at };
        self.lock().push_back(EnqueuedJob { job, scheduled_at });
        Ok(handle)
    }
}
