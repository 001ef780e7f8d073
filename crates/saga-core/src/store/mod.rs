//! Contratos del Durable Store.
//!
//! El motor sólo depende de estos traits; `InMemoryStore` es el backend de
//! referencia y `saga-persistence` provee la implementación Postgres.
//!
//! - `ExecutionStore`: filas `Execution`, mutadas sólo dentro de
//!   transacciones explícitas (`transaction`).
//! - `EntryLog`: log append-only.
//! - `ValueStore`: contexto clave-valor por ejecución con upsert atómico.

mod memory;

pub use memory::InMemoryStore;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{SagaError, StoreError};
use crate::model::{ContextValue, Entry, EntryAction, Execution, NewEntry};

/// Niveles de aislamiento, ordenados de más débil a más fuerte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Operaciones disponibles dentro de una transacción sobre executions.
pub trait ExecutionTx {
    fn find(&mut self, id: Uuid) -> Result<Option<Execution>, StoreError>;
    fn find_by_key(&mut self, idempotency_key: &str) -> Result<Option<Execution>, StoreError>;
    /// Falla con `UniqueViolation` si la clave ya existe.
    fn insert(&mut self, execution: &Execution) -> Result<(), StoreError>;
    fn update(&mut self, execution: &Execution) -> Result<(), StoreError>;
}

pub trait ExecutionStore {
    /// Nivel más fuerte que soporta el backend.
    fn strongest_isolation(&self) -> IsolationLevel;

    /// Ejecuta `f` en una transacción; se confirma sólo si `f` devuelve `Ok`.
    ///
    /// `f` puede invocarse más de una vez si el backend reintenta conflictos
    /// de serialización, por eso es `FnMut` y debe ser libre de efectos
    /// externos.
    fn transaction<T, F>(&self, isolation: IsolationLevel, f: F) -> Result<T, SagaError>
        where F: FnMut(&mut dyn ExecutionTx) -> Result<T, SagaError>;

    fn load_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError>;

    fn find_execution_by_key(&self, idempotency_key: &str) -> Result<Option<Execution>, StoreError>;
}

pub trait EntryLog {
    /// Agrega una entry y devuelve la fila completa (con seq y timestamp).
    fn append_entry(&self, entry: NewEntry) -> Result<Entry, StoreError>;

    /// Entries de una ejecución en orden de append.
    fn entries(&self, execution_id: Uuid) -> Result<Vec<Entry>, StoreError>;

    fn has_entry(&self, execution_id: Uuid, step: &str, action: &EntryAction) -> Result<bool, StoreError> {
        Ok(self.entries(execution_id)?
               .iter()
               .any(|e| e.step == step && &e.action == action))
    }
}

pub trait ValueStore {
    /// Upsert de varias claves como una sola unidad atómica.
    fn upsert_values(&self, execution_id: Uuid, values: &[(String, Value)]) -> Result<(), StoreError>;

    /// Inserta `value` si la clave no existe y devuelve el valor almacenado
    /// (el propio o el de un escritor concurrente que ganó).
    fn insert_value_if_absent(&self, execution_id: Uuid, key: &str, value: Value) -> Result<Value, StoreError>;

    /// Pares presentes; las claves ausentes se omiten.
    fn get_values(&self, execution_id: Uuid, keys: &[&str]) -> Result<Vec<(String, Value)>, StoreError>;

    fn list_values(&self, execution_id: Uuid) -> Result<Vec<ContextValue>, StoreError>;
}

/// Unión de los tres contratos; implementada automáticamente.
pub trait DurableStore: ExecutionStore + EntryLog + ValueStore {}

impl<T> DurableStore for T where T: ExecutionStore + EntryLog + ValueStore {}
