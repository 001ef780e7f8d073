//! Builder del workflow.
//!
//! El bloque pasado a `execute_workflow` recibe un `WorkflowBuilder` y
//! declara steps en orden. Cada step nombra un handler (`does`, por defecto el
//! propio nombre) y, salvo `then` explícito, continúa en el siguiente step
//! declarado; el último apunta a `FINISHED`.
//!
//! ```ignore
//! engine.execute_workflow(&job, json!({"order": 42}), |w| {
//!     w.step("reserve", |ctx| { /* ... */ Ok(StepOutcome::Continue) });
//!     w.step("charge", |ctx| { /* ... */ Ok(StepOutcome::Continue) });
//!     w.step("notify_warehouses", |_| Ok(StepOutcome::Continue))
//!      .awaits(json!(["PickJob", "PackJob"]));
//!     Ok(())
//! })?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::step::RESERVED_OPTION_KEYS;
use super::{StepSpec, WorkflowDefinition};
use crate::constants::{AWAITS_NAMESPACE, FINISHED, FOR_EACH_NAMESPACE};
use crate::errors::{BoxError, SagaError};
use crate::plugin::Plugin;
use crate::step::{StepContext, StepHandler, StepOutcome};

struct DeclaredStep {
    name: String,
    does: String,
    then: Option<String>,
    options: BTreeMap<String, Value>,
}

/// Acumula steps y handlers durante la evaluación del bloque.
pub struct WorkflowBuilder<'h> {
    steps: Vec<DeclaredStep>,
    handlers: HashMap<String, StepHandler<'h>>,
    plugins: Option<Vec<Arc<dyn Plugin>>>,
}

/// Resultado validado de un builder.
pub struct BuiltWorkflow<'h> {
    pub definition: WorkflowDefinition,
    pub handlers: HashMap<String, StepHandler<'h>>,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl<'h> Default for WorkflowBuilder<'h> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h> WorkflowBuilder<'h> {
    pub fn new() -> Self {
        Self { steps: Vec::new(),
               handlers: HashMap::new(),
               plugins: None }
    }

    /// Declara un step cuyo handler se registra con el mismo nombre.
    pub fn step<F>(&mut self, name: impl Into<String>, handler: F) -> StepBuilder<'_, 'h>
        where F: FnMut(&mut StepContext<'_>) -> Result<StepOutcome, BoxError> + 'h
    {
        let name = name.into();
        self.handlers.insert(name.clone(), Box::new(handler));
        self.push(name.clone(), name)
    }

    /// Declara un step que usa un handler registrado con `handler`.
    pub fn step_does(&mut self, name: impl Into<String>, does: impl Into<String>) -> StepBuilder<'_, 'h> {
        self.push(name.into(), does.into())
    }

    /// Registra un handler reutilizable por varios steps.
    pub fn handler<F>(&mut self, does: impl Into<String>, handler: F) -> &mut Self
        where F: FnMut(&mut StepContext<'_>) -> Result<StepOutcome, BoxError> + 'h
    {
        self.handlers.insert(does.into(), Box::new(handler));
        self
    }

    /// Reemplaza los plugins configurados en el engine sólo para esta llamada.
    pub fn plugins(&mut self, plugins: Vec<Arc<dyn Plugin>>) -> &mut Self {
        self.plugins = Some(plugins);
        self
    }

    fn push(&mut self, name: String, does: String) -> StepBuilder<'_, 'h> {
        self.steps.push(DeclaredStep { name,
                                       does,
                                       then: None,
                                       options: BTreeMap::new() });
        let index = self.steps.len() - 1;
        StepBuilder { builder: self, index }
    }

    /// Valida lo declarado y produce la definición serializable.
    pub(crate) fn finish(self, default_plugins: &[Arc<dyn Plugin>]) -> Result<BuiltWorkflow<'h>, SagaError> {
        if self.steps.is_empty() {
            return Err(SagaError::MissingSteps);
        }
        let plugins = self.plugins.unwrap_or_else(|| default_plugins.to_vec());
        if let Some(p) = plugins.iter().find(|p| RESERVED_OPTION_KEYS.contains(&p.keyword())) {
            return Err(SagaError::InvalidWorkflowBlock(format!("plugin keyword `{}` collides with a step field",
                                                               p.keyword())));
        }
        let names: Vec<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();

        let mut steps: IndexMap<String, StepSpec> = IndexMap::with_capacity(self.steps.len());
        for (i, declared) in self.steps.iter().enumerate() {
            if declared.name.trim().is_empty() {
                return Err(SagaError::InvalidWorkflowBlock(format!("step #{i} has an empty name")));
            }
            if declared.name == FINISHED {
                return Err(SagaError::InvalidWorkflowBlock(format!("`{FINISHED}` is reserved and cannot name a step")));
            }
            let then = match &declared.then {
                Some(next) if next == FINISHED || names.contains(&next.as_str()) => next.clone(),
                Some(next) => {
                    return Err(SagaError::InvalidWorkflowBlock(format!("step `{}` continues to undeclared step `{next}`",
                                                                       declared.name)))
                }
                None => names.get(i + 1).map(|s| s.to_string()).unwrap_or_else(|| FINISHED.to_string()),
            };
            if !self.handlers.contains_key(&declared.does) {
                return Err(SagaError::UndefinedMethod { step: declared.name.clone(),
                                                        does: declared.does.clone() });
            }

            let mut options = BTreeMap::new();
            for (keyword, value) in &declared.options {
                if RESERVED_OPTION_KEYS.contains(&keyword.as_str()) {
                    return Err(SagaError::InvalidPluginOption { keyword: keyword.clone(),
                                                                reason: format!("`{keyword}` is a step field, not a plugin option") });
                }
                let plugin = plugins.iter().find(|p| p.keyword() == keyword).ok_or_else(|| {
                                                 SagaError::InvalidWorkflowBlock(format!("step `{}` uses option `{keyword}` but no plugin recognises it",
                                                                                         declared.name))
                                             })?;
                options.insert(keyword.clone(), plugin.validate(value)?);
            }

            // nombres duplicados: la última declaración reemplaza a la anterior
            steps.insert(declared.name.clone(),
                         StepSpec { does: declared.does.clone(),
                                    then,
                                    options });
        }

        Ok(BuiltWorkflow { definition: WorkflowDefinition::new(steps),
                           handlers: self.handlers,
                           plugins })
    }
}

/// Ajustes encadenables del último step declarado.
pub struct StepBuilder<'b, 'h> {
    builder: &'b mut WorkflowBuilder<'h>,
    index: usize,
}

impl StepBuilder<'_, '_> {
    /// Salto explícito a otro step (o a `FINISHED`).
    pub fn then(self, next: impl Into<String>) -> Self {
        self.builder.steps[self.index].then = Some(next.into());
        self
    }

    /// Espera a que terminen los jobs hijos listados.
    pub fn awaits(self, children: Value) -> Self {
        self.option(AWAITS_NAMESPACE, children)
    }

    /// Itera la colección guardada en el contexto bajo `context_key`.
    pub fn for_each(self, context_key: impl Into<String>) -> Self {
        self.option(FOR_EACH_NAMESPACE, Value::String(context_key.into()))
    }

    /// Opción arbitraria para un plugin.
    pub fn option(self, keyword: impl Into<String>, value: Value) -> Self {
        self.builder.steps[self.index]
            .options
            .insert(keyword.into(), value);
        self
    }
}
