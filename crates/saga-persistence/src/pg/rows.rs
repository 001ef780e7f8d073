//! Filas Diesel y su conversión a los modelos del core.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use saga_core::{Entry, EntryAction, Execution};

use crate::error::PersistenceError;
use crate::schema::{saga_entries, saga_executions, saga_values};

/// Fila de `saga_executions` (mismo orden de columnas que el esquema).
#[derive(Queryable, Debug)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub idempotency_key: String,
    pub serialized_job: Value,
    pub definition: Value,
    pub recover_to: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = PersistenceError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let serialized_job =
            serde_json::from_value(row.serialized_job).map_err(|e| PersistenceError::InvalidRow(format!("execution {} job: {e}", row.id)))?;
        let definition =
            serde_json::from_value(row.definition).map_err(|e| PersistenceError::InvalidRow(format!("execution {} definition: {e}", row.id)))?;
        Ok(Execution { id: row.id,
                       idempotency_key: row.idempotency_key,
                       serialized_job,
                       definition,
                       recover_to: row.recover_to,
                       last_run_at: row.last_run_at,
                       created_at: row.created_at,
                       updated_at: row.updated_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = saga_executions)]
pub struct NewExecutionRow<'a> {
    pub id: Uuid,
    pub idempotency_key: &'a str,
    pub serialized_job: Value,
    pub definition: Value,
    pub recover_to: &'a str,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> NewExecutionRow<'a> {
    pub fn from_execution(execution: &'a Execution) -> Result<Self, PersistenceError> {
        Ok(Self { id: execution.id,
                  idempotency_key: &execution.idempotency_key,
                  serialized_job: to_json(&execution.serialized_job)?,
                  definition: to_json(&execution.definition)?,
                  recover_to: &execution.recover_to,
                  last_run_at: execution.last_run_at,
                  created_at: execution.created_at,
                  updated_at: execution.updated_at })
    }
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, PersistenceError> {
    serde_json::to_value(value).map_err(|e| PersistenceError::Unknown(format!("ser: {e}")))
}

/// Fila de `saga_entries`.
#[derive(Queryable, Debug)]
pub struct EntryRow {
    pub seq: i64,
    pub execution_id: Uuid,
    pub step: String,
    pub action: String,
    pub ts: DateTime<Utc>,
    pub data: Option<Value>,
}

impl TryFrom<EntryRow> for Entry {
    type Error = PersistenceError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let action: EntryAction = row.action
                                     .parse()
                                     .map_err(|e: String| PersistenceError::InvalidRow(format!("entry {}: {e}", row.seq)))?;
        Ok(Entry { seq: row.seq as u64,
                   execution_id: row.execution_id,
                   step: row.step,
                   action,
                   timestamp: row.ts,
                   data: row.data })
    }
}

/// Inserción en `saga_entries`; `seq` y `ts` vuelven por `RETURNING`.
#[derive(Insertable, Debug)]
#[diesel(table_name = saga_entries)]
pub struct NewEntryRow<'a> {
    pub execution_id: Uuid,
    pub step: &'a str,
    pub action: String,
    pub data: Option<&'a Value>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = saga_values)]
pub struct NewValueRow<'a> {
    pub execution_id: Uuid,
    pub key: &'a str,
    pub value: &'a Value,
    pub updated_at: DateTime<Utc>,
}
