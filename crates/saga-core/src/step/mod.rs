//! Steps en tiempo de ejecución.
//!
//! - `StepOutcome`: resultado explícito de un handler o plugin (continuar,
//!   suspender o repetir).
//! - `StepStatus`: estados por intento registrados en el log.
//! - `StepContext`: lo que ven handlers y plugins.
//! - `StepRunner`: máquina de estados de un step con replay guard.

mod context;
mod outcome;
pub(crate) mod runner;
mod status;

pub use context::StepContext;
pub use outcome::{StepOutcome, StepTransition};
pub use status::StepStatus;

use crate::errors::BoxError;

/// Handler de un step. Puede capturar estado del job por referencia.
pub type StepHandler<'h> = Box<dyn FnMut(&mut StepContext<'_>) -> Result<StepOutcome, BoxError> + 'h>;
