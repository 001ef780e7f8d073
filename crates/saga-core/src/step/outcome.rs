use serde::{Deserialize, Serialize};

/// Lo que un handler (o plugin) pide al runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// El step terminó; avanzar a `then`.
    Continue,
    /// Suspender el intento sin error; se reanuda en este mismo step.
    Halt,
    /// Volver a ejecutar el step dentro del mismo intento.
    Repeat,
}

/// Transición resultante de correr un step, ya resuelta contra la definición.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTransition {
    Continue(String),
    Halt,
    Repeat,
}
