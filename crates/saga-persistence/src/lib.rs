//! saga-persistence
//!
//! Durable Store de `saga-core` sobre Postgres (Diesel + r2d2).
//!
//! Módulos:
//! - `pg`: `PgStore` (executions, entries, values) y construcción del pool.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: configuración de conexión desde el entorno / `.env`.
//! - `schema`: tablas Diesel.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, store_from_env, ConnectionProvider, PgPool, PgStore, PoolProvider};
