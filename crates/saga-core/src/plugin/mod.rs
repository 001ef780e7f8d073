//! Plugins alrededor de un step.
//!
//! Un plugin se identifica por un keyword que los steps usan como opción
//! (`awaits: [...]`, `for_each: "items"`). En la definición el plugin
//! normaliza el valor (`validate`); en ejecución envuelve al handler
//! (`around_step`) y decide si delega con `Next::call` o devuelve su propio
//! outcome. Los steps que no usan el keyword ven el plugin como passthrough.

mod awaits;
mod for_each;
mod pipeline;

pub use awaits::{children_key, AwaitsPlugin};
pub use for_each::{cursor_key, ForEachPlugin};
pub use pipeline::Next;
pub(crate) use pipeline::run_pipeline;

use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use crate::definition::StepSpec;
use crate::errors::SagaError;
use crate::step::{StepContext, StepOutcome};

pub trait Plugin: Debug + Send + Sync {
    /// Nombre de la opción de step que activa el plugin. También es el
    /// prefijo de sus entries (`<keyword>/<accion>`) y claves de contexto.
    fn keyword(&self) -> &str;

    /// Valida y normaliza el valor de la opción al construir la definición.
    fn validate(&self, value: &Value) -> Result<Value, SagaError>;

    fn around_step(&self, ctx: &mut StepContext<'_>, next: &mut Next<'_>) -> Result<StepOutcome, SagaError>;

    fn is_active(&self, spec: &StepSpec) -> bool {
        spec.option(self.keyword()).is_some()
    }
}

/// `[AwaitsPlugin, ForEachPlugin]`: `awaits` queda por fuera.
pub fn default_plugins() -> Vec<Arc<dyn Plugin>> {
    let awaits: Arc<dyn Plugin> = Arc::new(AwaitsPlugin);
    let for_each: Arc<dyn Plugin> = Arc::new(ForEachPlugin);
    vec![awaits, for_each]
}

pub(crate) fn invalid_option(keyword: &str, reason: impl Into<String>) -> SagaError {
    SagaError::InvalidPluginOption { keyword: keyword.to_string(),
                                     reason: reason.into() }
}
