use std::sync::Arc;

use crate::plugin::{default_plugins, Plugin};
use crate::store::IsolationLevel;

/// Configuración del motor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Plugins en orden; el primero es el más externo.
    pub plugins: Vec<Arc<dyn Plugin>>,
    /// Aislamiento del bootstrap; `None` usa el más fuerte del store.
    pub isolation: Option<IsolationLevel>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { plugins: default_plugins(),
               isolation: None }
    }
}

impl EngineConfig {
    pub fn with_plugins(mut self, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }
}
