use chrono::Duration;
use serde_json::Value;
use uuid::Uuid;

use crate::context::Context;
use crate::definition::StepSpec;
use crate::errors::SagaError;
use crate::model::{Entry, EntryAction, Execution, NewEntry, SerializedJob};
use crate::queue::{EnqueueOptions, JobHandle, JobQueue};
use crate::store::{EntryLog, ValueStore};

/// Lo que handlers y plugins ven de la ejecución durante un step.
pub struct StepContext<'a> {
    execution: &'a Execution,
    step: &'a str,
    spec: &'a StepSpec,
    values: &'a dyn ValueStore,
    entries: &'a dyn EntryLog,
    queue: &'a dyn JobQueue,
    item: Option<Value>,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(execution: &'a Execution,
                      step: &'a str,
                      spec: &'a StepSpec,
                      values: &'a dyn ValueStore,
                      entries: &'a dyn EntryLog,
                      queue: &'a dyn JobQueue)
                      -> Self {
        Self { execution,
               step,
               spec,
               values,
               entries,
               queue,
               item: None }
    }

    pub fn execution(&self) -> &Execution {
        self.execution
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution.id
    }

    /// Argumentos con los que se grabó la ejecución.
    pub fn arguments(&self) -> &Value {
        &self.execution.serialized_job.arguments
    }

    pub fn step(&self) -> &str {
        self.step
    }

    pub fn spec(&self) -> &StepSpec {
        self.spec
    }

    pub fn option(&self, keyword: &str) -> Option<&Value> {
        self.spec.option(keyword)
    }

    /// Contexto persistido de la ejecución.
    pub fn context(&self) -> Context<'a> {
        Context::new(self.execution.id, self.values)
    }

    /// Elemento actual cuando el step corre bajo `for_each`.
    pub fn item(&self) -> Option<&Value> {
        self.item.as_ref()
    }

    pub fn set_item(&mut self, item: Option<Value>) {
        self.item = item;
    }

    /// Registra una entry de plugin (`<keyword>/<action>`) para este step.
    pub fn record(&self, keyword: &str, action: &str, data: Option<Value>) -> Result<Entry, SagaError> {
        let mut entry = NewEntry::new(self.execution.id, self.step, EntryAction::plugin(keyword, action));
        entry.data = data;
        Ok(self.entries.append_entry(entry)?)
    }

    pub fn enqueue(&self, job: &SerializedJob, options: EnqueueOptions) -> Result<JobHandle, SagaError> {
        self.queue.enqueue(job, options)
    }

    /// Re-encola el job de esta ejecución, p. ej. para sondear más tarde.
    pub fn enqueue_self(&self, wait: Option<Duration>) -> Result<JobHandle, SagaError> {
        let job = &self.execution.serialized_job;
        self.queue.enqueue(job,
                           EnqueueOptions { wait,
                                            queue: job.queue.clone() })
    }

    pub fn queue(&self) -> &dyn JobQueue {
        self.queue
    }
}
