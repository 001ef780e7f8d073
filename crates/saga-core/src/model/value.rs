use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Fila del contexto persistido; única por (execution_id, key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextValue {
    pub execution_id: Uuid,
    pub key: String,
    pub value: Value,
}
