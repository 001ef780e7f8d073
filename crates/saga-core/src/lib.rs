//! saga-core: workflows tipo saga, reanudables e idempotentes, para jobs en
//! segundo plano.
pub mod constants;
pub mod context;
pub mod definition;
pub mod engine;
pub mod errors;
pub mod hashing;
pub mod model;
pub mod plugin;
pub mod queue;
pub mod step;
pub mod store;

pub use constants::{ENGINE_VERSION, FINISHED};
pub use context::Context;
pub use definition::{StepBuilder, StepSpec, WorkflowBuilder, WorkflowDefinition};
pub use engine::{idempotency_key, EngineConfig, WorkflowEngine, WorkflowOutcome};
pub use errors::{classify_error, BoxError, ErrorClass, SagaError, StoreError};
pub use model::{AwaitLink, ContextValue, Entry, EntryAction, Execution, Job, NewEntry, SerializedJob};
pub use plugin::{default_plugins, AwaitsPlugin, ForEachPlugin, Next, Plugin};
pub use queue::{EnqueueOptions, InMemoryJobQueue, JobHandle, JobQueue};
pub use step::{StepContext, StepOutcome, StepStatus};
pub use store::{DurableStore, EntryLog, ExecutionStore, ExecutionTx, InMemoryStore, IsolationLevel, ValueStore};
