//! Errores del core.
//!
//! `SagaError` agrupa tres familias:
//! - definición: el bloque del workflow es inválido (nunca se reintenta);
//! - consistencia: el estado grabado no coincide con la invocación actual;
//! - cuerpo de step: cualquier error devuelto por un handler o plugin, que se
//!   registra como `errored` y se propaga sin modificar a la cola de jobs.

use thiserror::Error;

/// Error opaco devuelto por handlers de steps y bloques de definición.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errores de la capa de almacenamiento, independientes del backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("workflow already being executed for job {job_id} in this attempt")]
    RedefiningWorkflow { job_id: String },
    #[error("execute_workflow requires a workflow definition block")]
    UndefinedWorkflowBlock,
    #[error("invalid workflow block: {0}")]
    InvalidWorkflowBlock(String),
    #[error("workflow defines no steps")]
    MissingSteps,
    #[error("no handler registered for `{does}` (step `{step}`)")]
    UndefinedMethod { step: String, does: String },
    #[error("invalid value for step option `{keyword}`: {reason}")]
    InvalidPluginOption { keyword: String, reason: String },
    #[error("for_each collection `{key}` not found in context (step `{step}`)")]
    UnknownForEachCollection { step: String, key: String },
    #[error("for_each collection `{key}` is not iterable (step `{step}`)")]
    UniterableForEachCollection { step: String, key: String },
    #[error("plugin `{plugin}` called next more than once")]
    DoublePluginCall { plugin: String },
    #[error("arguments for idempotency key {key} do not match the stored execution")]
    ArgumentMismatch { key: String },
    #[error("workflow definition for idempotency key {key} does not match the stored execution")]
    DefinitionMismatch { key: String },
    #[error("step `{step}` is not defined in the workflow")]
    UndefinedStep { step: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("job queue error: {0}")]
    Queue(String),
    #[error(transparent)]
    Job(BoxError),
}

impl From<BoxError> for SagaError {
    fn from(err: BoxError) -> Self {
        Self::Job(err)
    }
}

/// Clasificación gruesa para auditoría y para decidir reintentos en
/// adaptadores externos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bloque de workflow inválido: reintentar no cambia nada.
    Definition,
    /// Estado persistido incompatible con la invocación actual.
    Consistency,
    /// Fallo de infraestructura reintentable.
    Transient,
    /// Error del cuerpo de un step; el reintento lo decide la cola.
    Runtime,
}

pub fn classify_error(err: &SagaError) -> ErrorClass {
    match err {
        SagaError::RedefiningWorkflow { .. }
        | SagaError::UndefinedWorkflowBlock
        | SagaError::InvalidWorkflowBlock(_)
        | SagaError::MissingSteps
        | SagaError::UndefinedMethod { .. }
        | SagaError::InvalidPluginOption { .. }
        | SagaError::UnknownForEachCollection { .. }
        | SagaError::UniterableForEachCollection { .. }
        | SagaError::DoublePluginCall { .. } => ErrorClass::Definition,
        SagaError::ArgumentMismatch { .. } | SagaError::DefinitionMismatch { .. } | SagaError::UndefinedStep { .. } => {
            ErrorClass::Consistency
        }
        SagaError::Store(StoreError::SerializationConflict) | SagaError::Store(StoreError::Backend(_)) | SagaError::Queue(_) => {
            ErrorClass::Transient
        }
        SagaError::Store(_) | SagaError::Job(_) => ErrorClass::Runtime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_groups_error_families() {
        assert_eq!(classify_error(&SagaError::MissingSteps), ErrorClass::Definition);
        assert_eq!(classify_error(&SagaError::DoublePluginCall { plugin: "awaits".into() }),
                   ErrorClass::Definition);
        assert_eq!(classify_error(&SagaError::UndefinedStep { step: "x".into() }),
                   ErrorClass::Consistency);
        assert_eq!(classify_error(&SagaError::Store(StoreError::SerializationConflict)),
                   ErrorClass::Transient);
        assert_eq!(classify_error(&SagaError::Job("boom".into())), ErrorClass::Runtime);
    }

    #[test]
    fn job_errors_are_transparent() {
        let err: SagaError = BoxError::from("card declined").into();
        assert_eq!(err.to_string(), "card declined");
    }
}
