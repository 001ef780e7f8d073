use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::{EntryLog, ExecutionStore, ExecutionTx, IsolationLevel, ValueStore};
use crate::errors::{SagaError, StoreError};
use crate::model::{ContextValue, Entry, Execution, NewEntry};

#[derive(Debug, Default, Clone)]
struct Executions {
    by_id: HashMap<Uuid, Execution>,
    by_key: HashMap<String, Uuid>,
}

#[derive(Debug, Default)]
struct MemoryState {
    executions: Executions,
    entries: HashMap<Uuid, Vec<Entry>>,
    values: HashMap<Uuid, BTreeMap<String, Value>>,
    next_seq: u64,
}

/// Durable Store en memoria.
///
/// Clonar el store comparte el estado, lo que permite simular varios
/// workers sobre el mismo backend. Las transacciones trabajan sobre una copia
/// de las executions y la publican sólo al confirmar; el lock global las
/// serializa, por eso el nivel soportado es `Serializable`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cantidad de executions almacenadas.
    pub fn execution_count(&self) -> usize {
        self.lock().map(|s| s.executions.by_id.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }
}

struct MemoryTx<'a> {
    staged: &'a mut Executions,
}

impl ExecutionTx for MemoryTx<'_> {
    fn find(&mut self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        Ok(self.staged.by_id.get(&id).cloned())
    }

    fn find_by_key(&mut self, idempotency_key: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self.staged
               .by_key
               .get(idempotency_key)
               .and_then(|id| self.staged.by_id.get(id))
               .cloned())
    }

    fn insert(&mut self, execution: &Execution) -> Result<(), StoreError> {
        if self.staged.by_key.contains_key(&execution.idempotency_key) {
            return Err(StoreError::UniqueViolation(format!("idempotency_key {}", execution.idempotency_key)));
        }
        self.staged
            .by_key
            .insert(execution.idempotency_key.clone(), execution.id);
        self.staged.by_id.insert(execution.id, execution.clone());
        Ok(())
    }

    fn update(&mut self, execution: &Execution) -> Result<(), StoreError> {
        match self.staged.by_id.get_mut(&execution.id) {
            Some(slot) => {
                *slot = execution.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("execution {}", execution.id))),
        }
    }
}

impl ExecutionStore for InMemoryStore {
    fn strongest_isolation(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn transaction<T, F>(&self, _isolation: IsolationLevel, mut f: F) -> Result<T, SagaError>
        where F: FnMut(&mut dyn ExecutionTx) -> Result<T, SagaError>
    {
        let mut state = self.lock()?;
        let mut staged = state.executions.clone();
        let out = f(&mut MemoryTx { staged: &mut staged })?;
        state.executions = staged;
        Ok(out)
    }

    fn load_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        Ok(self.lock()?.executions.by_id.get(&id).cloned())
    }

    fn find_execution_by_key(&self, idempotency_key: &str) -> Result<Option<Execution>, StoreError> {
        let state = self.lock()?;
        Ok(state.executions
                .by_key
                .get(idempotency_key)
                .and_then(|id| state.executions.by_id.get(id))
                .cloned())
    }
}

impl EntryLog for InMemoryStore {
    fn append_entry(&self, entry: NewEntry) -> Result<Entry, StoreError> {
        let mut state = self.lock()?;
        let seq = state.next_seq;
        state.next_seq += 1;
        let row = Entry { seq,
                          execution_id: entry.execution_id,
                          step: entry.step,
                          action: entry.action,
                          timestamp: Utc::now(),
                          data: entry.data };
        state.entries
             .entry(row.execution_id)
             .or_default()
             .push(row.clone());
        Ok(row)
    }

    fn entries(&self, execution_id: Uuid) -> Result<Vec<Entry>, StoreError> {
        Ok(self.lock()?
               .entries
               .get(&execution_id)
               .cloned()
               .unwrap_or_default())
    }
}

impl ValueStore for InMemoryStore {
    fn upsert_values(&self, execution_id: Uuid, values: &[(String, Value)]) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let map = state.values.entry(execution_id).or_default();
        for (k, v) in values {
            map.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    fn insert_value_if_absent(&self, execution_id: Uuid, key: &str, value: Value) -> Result<Value, StoreError> {
        let mut state = self.lock()?;
        let map = state.values.entry(execution_id).or_default();
        Ok(map.entry(key.to_string()).or_insert(value).clone())
    }

    fn get_values(&self, execution_id: Uuid, keys: &[&str]) -> Result<Vec<(String, Value)>, StoreError> {
        let state = self.lock()?;
        let Some(map) = state.values.get(&execution_id) else {
            return Ok(Vec::new());
        };
        Ok(keys.iter()
               .filter_map(|k| map.get(*k).map(|v| (k.to_string(), v.clone())))
               .collect())
    }

    fn list_values(&self, execution_id: Uuid) -> Result<Vec<ContextValue>, StoreError> {
        let state = self.lock()?;
        Ok(state.values
                .get(&execution_id)
                .map(|map| {
                    map.iter()
                       .map(|(k, v)| ContextValue { execution_id,
                                                    key: k.clone(),
                                                    value: v.clone() })
                       .collect()
                })
                .unwrap_or_default())
    }
}
