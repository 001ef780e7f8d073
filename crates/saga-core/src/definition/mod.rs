//! Definición de workflows: el grafo serializado (`WorkflowDefinition`) y el
//! builder que lo produce junto con el mapa de handlers.

pub mod builder;
pub mod step;

pub use builder::{BuiltWorkflow, StepBuilder, WorkflowBuilder};
pub use step::{StepSpec, WorkflowDefinition};
