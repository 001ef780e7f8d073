//! Adaptador mínimo hacia la cola de jobs.
//!
//! El motor no conoce la clase concreta del job: sólo necesita su clase,
//! identidad por invocación y argumentos serializables para re-encolarlo y
//! validar que las re-invocaciones son consistentes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Vínculo de un job hijo con el step que lo espera (fan-out/fan-in).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitLink {
    pub parent_execution_id: Uuid,
    pub parent_step: String,
    /// Clave bajo la que el hijo marca su finalización en el contexto del padre.
    pub child_key: String,
}

/// Captura opaca de tipo de job + argumentos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedJob {
    pub job_class: String,
    pub job_id: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting: Option<AwaitLink>,
}

impl SerializedJob {
    /// Job nuevo con identidad aleatoria.
    pub fn new(job_class: impl Into<String>, arguments: Value) -> Self {
        Self { job_class: job_class.into(),
               job_id: Uuid::new_v4().to_string(),
               arguments,
               queue: None,
               awaiting: None }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_await_link(mut self, link: AwaitLink) -> Self {
        self.awaiting = Some(link);
        self
    }
}

/// Lo que el motor necesita de un job de la cola.
pub trait Job {
    fn job_class(&self) -> &str;

    /// Identidad estable de esta invocación.
    fn job_id(&self) -> &str;

    fn arguments(&self) -> Value;

    fn queue_name(&self) -> Option<&str> {
        None
    }

    /// Presente si el job fue encolado por un step con `awaits`.
    fn await_link(&self) -> Option<&AwaitLink> {
        None
    }

    fn serialize(&self) -> SerializedJob {
        SerializedJob { job_class: self.job_class().to_string(),
                        job_id: self.job_id().to_string(),
                        arguments: self.arguments(),
                        queue: self.queue_name().map(str::to_string),
                        awaiting: self.await_link().cloned() }
    }
}

impl Job for SerializedJob {
    fn job_class(&self) -> &str {
        &self.job_class
    }

    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn arguments(&self) -> Value {
        self.arguments.clone()
    }

    fn queue_name(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    fn await_link(&self) -> Option<&AwaitLink> {
        self.awaiting.as_ref()
    }

    fn serialize(&self) -> SerializedJob {
        self.clone()
    }
}
