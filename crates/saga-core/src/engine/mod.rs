//! Motor de workflows.
//!
//! - `core`: `WorkflowEngine`, drive loop y consultas.
//! - `bootstrap`: clave de idempotencia y creación/verificación de la
//!   `Execution`.
//! - `coordinator`: notificación de hijos terminados (`awaits`).
//! - `config`: `EngineConfig`.

mod bootstrap;
mod config;
mod coordinator;
mod core;

pub use bootstrap::{idempotency_key, Bootstrapped};
pub use config::EngineConfig;
pub use self::core::{WorkflowEngine, WorkflowOutcome};
