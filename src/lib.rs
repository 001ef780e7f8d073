//! sagaflow
//!
//! Fachada del workspace:
//! - `core`: motor de workflows durables (`saga-core`).
//! - `persistence`: Durable Store sobre Postgres (`saga-persistence`).

pub use saga_core as core;
pub use saga_persistence as persistence;

pub use saga_core::{default_plugins, AwaitLink, Context, DurableStore, EngineConfig, InMemoryJobQueue, InMemoryStore,
                    IsolationLevel, Job, JobQueue, Plugin, SagaError, SerializedJob, StepContext, StepOutcome,
                    WorkflowBuilder, WorkflowEngine, WorkflowOutcome, FINISHED};
