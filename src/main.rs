//! Demo: un pedido que reparte trabajo en tres hijos y espera a todos.
//!
//! Por defecto corre en memoria; con `--features pg_demo` usa `DATABASE_URL`.

use sagaflow::{DurableStore, InMemoryJobQueue, SagaError, SerializedJob, StepContext, StepOutcome, WorkflowEngine,
               WorkflowOutcome};
use serde_json::{json, Value};

const PARENT: &str = "ShipOrder";

/// `perform` de un worker: despacha el job por clase.
fn perform<S: DurableStore>(engine: &WorkflowEngine<S, InMemoryJobQueue>,
                            job: &SerializedJob)
                            -> Result<WorkflowOutcome, SagaError> {
    if job.job_class == PARENT {
        let order = job.arguments["order"].clone();
        return engine.execute_workflow(job, json!({ "order": order }), |w| {
                         w.step("reserve", |ctx| {
                              ctx.context().write("parcels", json!(["box-1", "box-2", "box-3"]))?;
                              Ok(StepOutcome::Continue)
                          });
                         w.step("label", |ctx| {
                              let parcel = ctx.item().cloned().unwrap_or(Value::Null);
                              println!("  label {parcel}");
                              Ok(StepOutcome::Continue)
                          })
                          .for_each("parcels");
                         w.step("pick_up", |_| Ok(StepOutcome::Continue))
                          .awaits(json!(["NotifyCarrier",
                                         "NotifyCustomer",
                                         { "job_class": "ChargeCard", "arguments": { "order": order } }]));
                         w.step("close", close_order);
                         Ok(())
                     });
    }
    let child_key = job.awaiting.as_ref().map(|l| l.child_key.clone()).unwrap_or_default();
    engine.execute_workflow(job, json!({ "child": child_key }), |w| {
              w.step("work", |ctx| {
                   println!("  child {} running", ctx.execution().serialized_job.job_class);
                   Ok(StepOutcome::Continue)
               });
              Ok(())
          })
}

fn close_order(ctx: &mut StepContext<'_>) -> Result<StepOutcome, sagaflow::core::BoxError> {
    let done = ctx.context().read("for_each/label/cursor")?;
    println!("  closing order after labelling {}", done.unwrap_or(Value::Null));
    Ok(StepOutcome::Continue)
}

fn drive<S: DurableStore>(engine: &WorkflowEngine<S, InMemoryJobQueue>) -> Result<(), SagaError> {
    let order = SerializedJob::new(PARENT, json!({ "order": 1042 }));
    let mut outcome = perform(engine, &order)?;
    println!("{PARENT}: {outcome:?}");
    while let Some(job) = engine.queue().pop() {
        outcome = perform(engine, &job)?;
        println!("{}: {outcome:?}", job.job_class);
    }
    let id = outcome.execution_id();
    for entry in engine.entries(id)? {
        println!("  #{} {} {}", entry.seq, entry.step, entry.action);
    }
    Ok(())
}

#[cfg(not(feature = "pg_demo"))]
fn main() {
    let engine = WorkflowEngine::new(sagaflow::InMemoryStore::new(), InMemoryJobQueue::new());
    if let Err(e) = drive(&engine) {
        eprintln!("demo failed: {e}");
        std::process::exit(1);
    }
}

#[cfg(feature = "pg_demo")]
fn main() {
    let store = match sagaflow::persistence::store_from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("pg_demo requires DATABASE_URL: {e}");
            std::process::exit(2);
        }
    };
    let engine = WorkflowEngine::new(store, InMemoryJobQueue::new());
    if let Err(e) = drive(&engine) {
        eprintln!("demo failed: {e}");
        std::process::exit(1);
    }
}
