//! Implementación Postgres (Diesel) del Durable Store del core.
//!
//! - `saga_executions`: una fila por clave de idempotencia; se muta sólo
//!   dentro de `transaction` con el aislamiento pedido.
//! - `saga_entries`: append-only, orden total por `seq` (BIGSERIAL).
//! - `saga_values`: contexto por ejecución; upsert en una sola sentencia
//!   `INSERT .. ON CONFLICT DO UPDATE`.
//!
//! Los errores transitorios de pool/conexión se reintentan con backoff corto;
//! los conflictos de serialización reintentan la transacción completa.

mod rows;

use std::collections::BTreeMap;

use chrono::Utc;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::upsert::excluded;
use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use saga_core::{ContextValue, Entry, EntryAction, EntryLog, Execution, ExecutionStore, ExecutionTx, IsolationLevel,
                NewEntry, SagaError, StoreError, ValueStore};

use crate::error::{is_retryable, PersistenceError};
use crate::migrations::run_pending_migrations;
use crate::schema::{saga_entries, saga_executions, saga_values};
pub use rows::{EntryRow, ExecutionRow};
use rows::{to_json, NewEntryRow, NewExecutionRow, NewValueRow};

/// Pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

const MAX_ATTEMPTS: u32 = 3;

/// Proveedor abstracto de conexiones.
///
/// Debe devolver una conexión válida o `PersistenceError::TransientIo`.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// `ConnectionProvider` respaldado por un `PgPool`.
#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

fn backoff(attempt: u32) {
    std::thread::sleep(std::time::Duration::from_millis(15 * u64::from(attempt + 1)));
}

/// Reintenta `f` ante errores transitorios (hasta 3 reintentos, 15ms·n).
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < MAX_ATTEMPTS => {
                warn!("retryable error (attempt {}): {:?}", attempts + 1, e);
                backoff(attempts);
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Error interno de `run`: o falló Diesel o falló el closure del motor.
enum TxFailure {
    Diesel(diesel::result::Error),
    Saga(SagaError),
}

impl From<diesel::result::Error> for TxFailure {
    fn from(err: diesel::result::Error) -> Self {
        Self::Diesel(err)
    }
}

fn store_err(err: PersistenceError) -> StoreError {
    StoreError::from(err)
}

fn decode_execution(row: Option<ExecutionRow>) -> Result<Option<Execution>, PersistenceError> {
    row.map(Execution::try_from).transpose()
}

fn find_row(conn: &mut PgConnection, id: Uuid) -> Result<Option<Execution>, PersistenceError> {
    let row = saga_executions::table.find(id)
                                    .first::<ExecutionRow>(conn)
                                    .optional()?;
    decode_execution(row)
}

fn find_row_by_key(conn: &mut PgConnection, key: &str) -> Result<Option<Execution>, PersistenceError> {
    let row = saga_executions::table.filter(saga_executions::idempotency_key.eq(key))
                                    .first::<ExecutionRow>(conn)
                                    .optional()?;
    decode_execution(row)
}

/// Vista transaccional sobre `saga_executions`.
struct PgTx<'c> {
    conn: &'c mut PgConnection,
}

impl ExecutionTx for PgTx<'_> {
    fn find(&mut self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        find_row(self.conn, id).map_err(store_err)
    }

    fn find_by_key(&mut self, idempotency_key: &str) -> Result<Option<Execution>, StoreError> {
        find_row_by_key(self.conn, idempotency_key).map_err(store_err)
    }

    fn insert(&mut self, execution: &Execution) -> Result<(), StoreError> {
        let row = NewExecutionRow::from_execution(execution).map_err(store_err)?;
        diesel::insert_into(saga_executions::table).values(&row)
                                                   .execute(self.conn)
                                                   .map_err(|e| store_err(e.into()))?;
        debug!("insert execution id={} key={}", execution.id, execution.idempotency_key);
        Ok(())
    }

    fn update(&mut self, execution: &Execution) -> Result<(), StoreError> {
        let serialized_job = to_json(&execution.serialized_job).map_err(store_err)?;
        let definition = to_json(&execution.definition).map_err(store_err)?;
        let updated = diesel::update(saga_executions::table.find(execution.id))
            .set((saga_executions::recover_to.eq(execution.recover_to.as_str()),
                  saga_executions::serialized_job.eq(serialized_job),
                  saga_executions::definition.eq(definition),
                  saga_executions::last_run_at.eq(execution.last_run_at),
                  saga_executions::updated_at.eq(execution.updated_at)))
            .execute(self.conn)
            .map_err(|e| store_err(e.into()))?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("execution {}", execution.id)));
        }
        Ok(())
    }
}

/// Durable Store sobre Postgres.
#[derive(Clone)]
pub struct PgStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn run_transaction<T, F>(&self, isolation: IsolationLevel, f: &mut F) -> Result<T, SagaError>
        where F: FnMut(&mut dyn ExecutionTx) -> Result<T, SagaError>
    {
        let mut conn = with_retry(|| self.provider.connection()).map_err(store_err)?;
        let builder = conn.build_transaction();
        let mut builder = match isolation {
            IsolationLevel::Serializable => builder.serializable(),
            IsolationLevel::RepeatableRead => builder.repeatable_read(),
            IsolationLevel::ReadCommitted => builder.read_committed(),
        };
        builder.run(|c| {
                   let mut tx = PgTx { conn: c };
                   f(&mut tx).map_err(TxFailure::Saga)
               })
               .map_err(|failure| match failure {
                   TxFailure::Saga(e) => e,
                   TxFailure::Diesel(e) => SagaError::Store(store_err(e.into())),
               })
    }

    /// Ejecuciones más recientes (por `updated_at`), para diagnóstico.
    pub fn recent_executions(&self, limit: i64) -> Result<Vec<Execution>, PersistenceError> {
        let rows: Vec<ExecutionRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            saga_executions::table.order(saga_executions::updated_at.desc())
                                  .limit(limit)
                                  .load(&mut conn)
                                  .map_err(PersistenceError::from)
        })?;
        rows.into_iter().map(Execution::try_from).collect()
    }
}

impl<P: ConnectionProvider> ExecutionStore for PgStore<P> {
    fn strongest_isolation(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }

    fn transaction<T, F>(&self, isolation: IsolationLevel, mut f: F) -> Result<T, SagaError>
        where F: FnMut(&mut dyn ExecutionTx) -> Result<T, SagaError>
    {
        let mut attempts = 0;
        loop {
            match self.run_transaction(isolation, &mut f) {
                Err(SagaError::Store(StoreError::SerializationConflict)) if attempts < MAX_ATTEMPTS => {
                    warn!("serialization conflict (attempt {}), retrying transaction", attempts + 1);
                    backoff(attempts);
                    attempts += 1;
                }
                r => return r,
            }
        }
    }

    fn load_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            find_row(&mut conn, id)
        }).map_err(store_err)
    }

    fn find_execution_by_key(&self, idempotency_key: &str) -> Result<Option<Execution>, StoreError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            find_row_by_key(&mut conn, idempotency_key)
        }).map_err(store_err)
    }
}

impl<P: ConnectionProvider> EntryLog for PgStore<P> {
    fn append_entry(&self, entry: NewEntry) -> Result<Entry, StoreError> {
        let row = NewEntryRow { execution_id: entry.execution_id,
                                step: &entry.step,
                                action: entry.action.to_string(),
                                data: entry.data.as_ref() };
        let (seq, ts) = with_retry(|| {
                            let mut conn = self.provider.connection()?;
                            diesel::insert_into(saga_entries::table).values(&row)
                                                                    .returning((saga_entries::seq, saga_entries::ts))
                                                                    .get_result::<(i64, chrono::DateTime<Utc>)>(&mut conn)
                                                                    .map_err(PersistenceError::from)
                        }).map_err(store_err)?;
        debug!("append_entry execution={} step={} action={} seq={seq}",
               entry.execution_id, entry.step, entry.action);
        Ok(Entry { seq: seq as u64,
                   execution_id: entry.execution_id,
                   step: entry.step,
                   action: entry.action,
                   timestamp: ts,
                   data: entry.data })
    }

    fn entries(&self, execution_id: Uuid) -> Result<Vec<Entry>, StoreError> {
        let rows: Vec<EntryRow> = with_retry(|| {
                                      let mut conn = self.provider.connection()?;
                                      saga_entries::table.filter(saga_entries::execution_id.eq(execution_id))
                                                         .order(saga_entries::seq.asc())
                                                         .load(&mut conn)
                                                         .map_err(PersistenceError::from)
                                  }).map_err(store_err)?;
        rows.into_iter()
            .map(|r| Entry::try_from(r).map_err(store_err))
            .collect()
    }

    fn has_entry(&self, execution_id: Uuid, step: &str, action: &EntryAction) -> Result<bool, StoreError> {
        let action = action.to_string();
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::select(exists(saga_entries::table.filter(saga_entries::execution_id.eq(execution_id))
                                                     .filter(saga_entries::step.eq(step))
                                                     .filter(saga_entries::action.eq(action.as_str()))))
                .get_result::<bool>(&mut conn)
                .map_err(PersistenceError::from)
        }).map_err(store_err)
    }
}

impl<P: ConnectionProvider> ValueStore for PgStore<P> {
    fn upsert_values(&self, execution_id: Uuid, values: &[(String, Value)]) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        // ON CONFLICT no admite la misma clave dos veces en una sentencia: gana la última
        let latest: BTreeMap<&str, &Value> = values.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let now = Utc::now();
        let rows: Vec<NewValueRow<'_>> = latest.into_iter()
                                               .map(|(key, value)| NewValueRow { execution_id,
                                                                                 key,
                                                                                 value,
                                                                                 updated_at: now })
                                               .collect();
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(saga_values::table).values(&rows)
                                                   .on_conflict((saga_values::execution_id, saga_values::key))
                                                   .do_update()
                                                   .set((saga_values::value.eq(excluded(saga_values::value)),
                                                         saga_values::updated_at.eq(excluded(saga_values::updated_at))))
                                                   .execute(&mut conn)
                                                   .map_err(PersistenceError::from)
        }).map_err(store_err)?;
        debug!("upsert_values execution={execution_id} count={}", rows.len());
        Ok(())
    }

    fn insert_value_if_absent(&self, execution_id: Uuid, key: &str, value: Value) -> Result<Value, StoreError> {
        let row = NewValueRow { execution_id,
                                key,
                                value: &value,
                                updated_at: Utc::now() };
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|c| {
                    diesel::insert_into(saga_values::table).values(&row)
                                                           .on_conflict_do_nothing()
                                                           .execute(c)?;
                    saga_values::table.filter(saga_values::execution_id.eq(execution_id))
                                      .filter(saga_values::key.eq(key))
                                      .select(saga_values::value)
                                      .first::<Value>(c)
                })
                .map_err(PersistenceError::from)
        }).map_err(store_err)
    }

    fn get_values(&self, execution_id: Uuid, keys: &[&str]) -> Result<Vec<(String, Value)>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let found: Vec<(String, Value)> = with_retry(|| {
                                              let mut conn = self.provider.connection()?;
                                              saga_values::table.filter(saga_values::execution_id.eq(execution_id))
                                                                .filter(saga_values::key.eq_any(keys.to_vec()))
                                                                .select((saga_values::key, saga_values::value))
                                                                .load(&mut conn)
                                                                .map_err(PersistenceError::from)
                                          }).map_err(store_err)?;
        // mismo orden que las claves pedidas
        let mut by_key: BTreeMap<String, Value> = found.into_iter().collect();
        Ok(keys.iter()
               .filter_map(|k| by_key.remove(*k).map(|v| ((*k).to_string(), v)))
               .collect())
    }

    fn list_values(&self, execution_id: Uuid) -> Result<Vec<ContextValue>, StoreError> {
        let rows: Vec<(String, Value)> = with_retry(|| {
                                             let mut conn = self.provider.connection()?;
                                             saga_values::table.filter(saga_values::execution_id.eq(execution_id))
                                                               .order(saga_values::key.asc())
                                                               .select((saga_values::key, saga_values::value))
                                                               .load(&mut conn)
                                                               .map_err(PersistenceError::from)
                                         }).map_err(store_err)?;
        Ok(rows.into_iter()
               .map(|(key, value)| ContextValue { execution_id, key, value })
               .collect())
    }
}

/// Construye un pool r2d2 y corre las migraciones pendientes.
///
/// Si `min_size > max_size` se usa `min_size = max_size`.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(validated_min.min(validated_max)))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Carga `.env`, lee `DbConfig` y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

/// Atajo: `PgStore` sobre un pool construido desde el entorno.
pub fn store_from_env() -> Result<PgStore<PoolProvider>, PersistenceError> {
    Ok(PgStore::new(PoolProvider { pool: build_dev_pool_from_env()? }))
}
