//! Composición de plugins alrededor del handler base.
//!
//! El primer plugin de la lista es el más externo. Cada plugin recibe un
//! `Next` que ejecuta el resto de la cadena; llamarlo dos veces en la misma
//! pasada es un error.

use std::sync::Arc;

use super::Plugin;
use crate::errors::SagaError;
use crate::step::{StepContext, StepOutcome};

type Inner<'n> = dyn FnMut(&mut StepContext<'_>) -> Result<StepOutcome, SagaError> + 'n;

/// Continuación del pipeline entregada a `Plugin::around_step`.
pub struct Next<'n> {
    keyword: &'n str,
    inner: &'n mut Inner<'n>,
    called: bool,
}

impl<'n> Next<'n> {
    pub(crate) fn new(keyword: &'n str, inner: &'n mut Inner<'n>) -> Self {
        Self { keyword,
               inner,
               called: false }
    }

    /// Ejecuta el resto de la cadena (plugins internos y handler).
    pub fn call(&mut self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, SagaError> {
        if self.called {
            return Err(SagaError::DoublePluginCall { plugin: self.keyword.to_string() });
        }
        self.called = true;
        (self.inner)(ctx)
    }
}

pub(crate) fn run_pipeline(plugins: &[Arc<dyn Plugin>],
                           ctx: &mut StepContext<'_>,
                           base: &mut Inner<'_>)
                           -> Result<StepOutcome, SagaError> {
    let Some((first, rest)) = plugins.split_first() else {
        return base(ctx);
    };
    if !first.is_active(ctx.spec()) {
        return run_pipeline(rest, ctx, base);
    }
    let mut inner = |c: &mut StepContext<'_>| run_pipeline(rest, c, &mut *base);
    let mut next = Next::new(first.keyword(), &mut inner);
    first.around_step(ctx, &mut next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::StepSpec;
    use crate::model::{Execution, SerializedJob};
    use crate::queue::InMemoryJobQueue;
    use crate::store::InMemoryStore;
    use indexmap::IndexMap;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Plugin de prueba que registra el orden en que envuelve al handler.
    #[derive(Debug)]
    struct Tracing {
        keyword: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
        calls: usize,
    }

    impl Plugin for Tracing {
        fn keyword(&self) -> &str {
            self.keyword
        }

        fn validate(&self, value: &Value) -> Result<Value, SagaError> {
            Ok(value.clone())
        }

        fn around_step(&self, ctx: &mut StepContext<'_>, next: &mut Next<'_>) -> Result<StepOutcome, SagaError> {
            self.trace.lock().unwrap().push(format!("{}:before", self.keyword));
            let mut out = Ok(StepOutcome::Halt);
            for _ in 0..self.calls {
                out = next.call(ctx);
            }
            self.trace.lock().unwrap().push(format!("{}:after", self.keyword));
            out
        }
    }

    fn step_with(options: &[&str]) -> (Execution, StepSpec) {
        let mut spec = StepSpec::new("work", "FINISHED");
        for kw in options {
            spec.options.insert(kw.to_string(), json!(true));
        }
        let mut steps = IndexMap::new();
        steps.insert("work".to_string(), spec.clone());
        let exec = Execution::new("k".into(),
                                  SerializedJob::new("Job", json!([])),
                                  crate::definition::WorkflowDefinition::new(steps));
        (exec, spec)
    }

    fn tracing(keyword: &'static str, trace: &Arc<Mutex<Vec<String>>>, calls: usize) -> Arc<dyn Plugin> {
        Arc::new(Tracing { keyword,
                           trace: trace.clone(),
                           calls })
    }

    #[test]
    fn first_plugin_is_outermost_and_inactive_plugins_are_skipped() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let plugins = vec![tracing("outer", &trace, 1),
                           tracing("unused", &trace, 1),
                           tracing("inner", &trace, 1)];
        let (exec, spec) = step_with(&["outer", "inner"]);
        let store = InMemoryStore::new();
        let queue = InMemoryJobQueue::new();
        let mut ctx = StepContext::new(&exec, "work", &spec, &store, &store, &queue);

        let t = trace.clone();
        let mut base = move |_: &mut StepContext<'_>| {
            t.lock().unwrap().push("handler".into());
            Ok::<_, SagaError>(StepOutcome::Continue)
        };
        let out = run_pipeline(&plugins, &mut ctx, &mut base).unwrap();
        assert_eq!(out, StepOutcome::Continue);
        assert_eq!(*trace.lock().unwrap(),
                   vec!["outer:before", "inner:before", "handler", "inner:after", "outer:after"]);
    }

    #[test]
    fn calling_next_twice_is_rejected() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let plugins = vec![tracing("greedy", &trace, 2)];
        let (exec, spec) = step_with(&["greedy"]);
        let store = InMemoryStore::new();
        let queue = InMemoryJobQueue::new();
        let mut ctx = StepContext::new(&exec, "work", &spec, &store, &store, &queue);
        let mut base = |_: &mut StepContext<'_>| Ok::<_, SagaError>(StepOutcome::Continue);
        let err = run_pipeline(&plugins, &mut ctx, &mut base).unwrap_err();
        assert!(matches!(err, SagaError::DoublePluginCall { ref plugin } if plugin == "greedy"));
    }

    #[test]
    fn plugin_that_never_calls_next_replaces_the_result() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let plugins = vec![tracing("gate", &trace, 0)];
        let (exec, spec) = step_with(&["gate"]);
        let store = InMemoryStore::new();
        let queue = InMemoryJobQueue::new();
        let mut ctx = StepContext::new(&exec, "work", &spec, &store, &store, &queue);
        let mut ran = false;
        let mut base = |_: &mut StepContext<'_>| {
            ran = true;
            Ok::<_, SagaError>(StepOutcome::Continue)
        };
        assert_eq!(run_pipeline(&plugins, &mut ctx, &mut base).unwrap(), StepOutcome::Halt);
        drop(base);
        assert!(!ran);
    }
}
