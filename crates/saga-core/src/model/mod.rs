//! Modelos persistidos (Execution, Entry, Value) y la representación
//! serializada de un job.

pub mod entry;
pub mod execution;
pub mod job;
pub mod value;

pub use entry::{Entry, EntryAction, NewEntry};
pub use execution::Execution;
pub use job::{AwaitLink, Job, SerializedJob};
pub use value::ContextValue;
