//! Contexto persistido por ejecución.
//!
//! Guarda el estado que un job en memoria no conserva entre reintentos. `fetch`
//! convierte una inicialización con efectos (p. ej. encolar un hijo) en
//! idempotente: el fallback sólo corre si la clave no existe.

use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::SagaError;
use crate::store::ValueStore;

/// Vista del contexto de una ejecución. Es `Copy`: sólo referencia al store.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    execution_id: Uuid,
    values: &'a dyn ValueStore,
}

impl<'a> Context<'a> {
    pub fn new(execution_id: Uuid, values: &'a dyn ValueStore) -> Self {
        Self { execution_id, values }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Upsert de todos los pares en una sola operación atómica.
    pub fn set<I, K>(&self, pairs: I) -> Result<(), SagaError>
        where I: IntoIterator<Item = (K, Value)>,
              K: Into<String>
    {
        let values: Vec<(String, Value)> = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if values.is_empty() {
            return Ok(());
        }
        self.values.upsert_values(self.execution_id, &values)?;
        Ok(())
    }

    /// Valores presentes para `keys`; las claves ausentes se omiten y el
    /// orden no está garantizado.
    pub fn get(&self, keys: &[&str]) -> Result<Vec<Value>, SagaError> {
        Ok(self.values
               .get_values(self.execution_id, keys)?
               .into_iter()
               .map(|(_, v)| v)
               .collect())
    }

    /// Igual que `get` pero conservando la clave de cada valor.
    pub fn get_pairs(&self, keys: &[&str]) -> Result<Vec<(String, Value)>, SagaError> {
        Ok(self.values.get_values(self.execution_id, keys)?)
    }

    /// Valor existente o `default`, persistido si no existía.
    pub fn fetch(&self, key: &str, default: Value) -> Result<Value, SagaError> {
        self.fetch_with(key, || Ok::<_, SagaError>(default))
    }

    /// Valor existente o el calculado por `fallback`, persistido si no
    /// existía. Si otro escritor insertó antes, se devuelve su valor.
    pub fn fetch_with<F, E>(&self, key: &str, fallback: F) -> Result<Value, SagaError>
        where F: FnOnce() -> Result<Value, E>,
              E: Into<SagaError>
    {
        if let Some(existing) = self.read(key)? {
            return Ok(existing);
        }
        let computed = fallback().map_err(Into::into)?;
        Ok(self.values.insert_value_if_absent(self.execution_id, key, computed)?)
    }

    /// `context[key]`
    pub fn read(&self, key: &str) -> Result<Option<Value>, SagaError> {
        Ok(self.values
               .get_values(self.execution_id, &[key])?
               .into_iter()
               .next()
               .map(|(_, v)| v))
    }

    /// `context[key] = value`
    pub fn write(&self, key: &str, value: Value) -> Result<(), SagaError> {
        self.set([(key, value)])
    }

    /// Lectura tipada; un valor que no deserializa se reporta como error del job.
    pub fn read_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SagaError> {
        match self.read(key)? {
            Some(v) => serde_json::from_value(v).map(Some)
                                                .map_err(|e| SagaError::Job(Box::new(e))),
            None => Ok(None),
        }
    }
}

/// Semántica de "marca verdadera": todo salvo `null` y `false`.
pub(crate) fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn set_then_get_round_trips_and_omits_missing_keys() {
        let store = InMemoryStore::new();
        let ctx = Context::new(Uuid::new_v4(), &store);
        ctx.set([("a", json!(1)), ("b", json!({"x": true}))]).unwrap();
        let mut got = ctx.get(&["a", "b", "zzz"]).unwrap();
        got.sort_by_key(|v| v.is_object());
        assert_eq!(got, vec![json!(1), json!({"x": true})]);
        assert_eq!(ctx.read("zzz").unwrap(), None);
    }

    #[test]
    fn set_is_upsert() {
        let store = InMemoryStore::new();
        let ctx = Context::new(Uuid::new_v4(), &store);
        ctx.write("k", json!("old")).unwrap();
        ctx.write("k", json!("new")).unwrap();
        assert_eq!(ctx.read("k").unwrap(), Some(json!("new")));
        assert_eq!(store.list_values(ctx.execution_id()).unwrap().len(), 1);
    }

    #[test]
    fn fetch_never_calls_fallback_for_existing_key() {
        let store = InMemoryStore::new();
        let ctx = Context::new(Uuid::new_v4(), &store);
        let calls = Cell::new(0);
        let first = ctx.fetch_with("child", || {
                           calls.set(calls.get() + 1);
                           Ok::<_, SagaError>(json!("job-1"))
                       })
                       .unwrap();
        let second = ctx.fetch_with("child", || {
                            calls.set(calls.get() + 1);
                            Ok::<_, SagaError>(json!("job-2"))
                        })
                        .unwrap();
        assert_eq!(first, json!("job-1"));
        assert_eq!(second, json!("job-1"));
        assert_eq!(calls.get(), 1);
        assert_eq!(ctx.fetch("other", json!(7)).unwrap(), json!(7));
        assert_eq!(ctx.read("other").unwrap(), Some(json!(7)));
    }

    #[test]
    fn contexts_are_isolated_per_execution() {
        let store = InMemoryStore::new();
        let a = Context::new(Uuid::new_v4(), &store);
        let b = Context::new(Uuid::new_v4(), &store);
        a.write("k", json!(1)).unwrap();
        assert_eq!(b.read("k").unwrap(), None);
    }

    #[test]
    fn typed_reads() {
        let store = InMemoryStore::new();
        let ctx = Context::new(Uuid::new_v4(), &store);
        ctx.write("n", json!(3)).unwrap();
        assert_eq!(ctx.read_as::<u32>("n").unwrap(), Some(3));
        assert!(ctx.read_as::<String>("n").is_err());
        assert!(is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
    }
}
