use saga_core::{EntryAction, InMemoryJobQueue, InMemoryStore, SagaError, SerializedJob, StepOutcome, WorkflowEngine,
                WorkflowOutcome, FINISHED};
use serde_json::{json, Value};

type Engine = WorkflowEngine<InMemoryStore, InMemoryJobQueue>;

fn engine() -> Engine {
    WorkflowEngine::new(InMemoryStore::new(), InMemoryJobQueue::new())
}

/// `perform` de un worker: despacha por clase de job.
fn perform(engine: &Engine, job: &SerializedJob, children: &Value) -> Result<WorkflowOutcome, SagaError> {
    match job.job_class.as_str() {
        "Fulfilment" => engine.execute_workflow(job, json!({"order": job.arguments["order"]}), |w| {
                                  w.step("prepare", |_| Ok(StepOutcome::Continue));
                                  w.step("dispatch", |_| Ok(StepOutcome::Continue))
                                   .awaits(children.clone());
                                  w.step("close", |_| Ok(StepOutcome::Continue));
                                  Ok(())
                              }),
        _ => {
            let link = job.awaiting.clone().expect("children carry an await link");
            engine.execute_workflow(job, json!({"child": link.child_key}), |w| {
                      w.step("work", |_| Ok(StepOutcome::Continue));
                      Ok(())
                  })
        }
    }
}

fn parent_job() -> SerializedJob {
    SerializedJob::new("Fulfilment", json!({"order": 77}))
}

#[test]
fn parent_resumes_only_after_every_child_completes() {
    let engine = engine();
    let children = json!(["ChildA", "ChildB"]);

    let first = perform(&engine, &parent_job(), &children).unwrap();
    let parent_id = first.execution_id();
    assert!(matches!(first, WorkflowOutcome::Halted { ref step, .. } if step == "dispatch"));
    let queued: Vec<String> = engine.queue()
                                    .snapshot()
                                    .into_iter()
                                    .map(|e| e.job.job_class)
                                    .collect();
    assert_eq!(queued, vec!["ChildA", "ChildB"]);

    let child_a = engine.queue().pop().unwrap();
    assert_eq!(child_a.awaiting.as_ref().unwrap().parent_execution_id, parent_id);
    assert_eq!(child_a.awaiting.as_ref().unwrap().parent_step, "dispatch");
    assert!(perform(&engine, &child_a, &children).unwrap().is_finished());

    // sólo ChildB sigue en la cola; el padre continúa suspendido
    assert_eq!(engine.queue().len(), 1);
    assert_eq!(engine.load_execution(parent_id).unwrap().unwrap().recover_to, "dispatch");

    let child_b = engine.queue().pop().unwrap();
    assert!(perform(&engine, &child_b, &children).unwrap().is_finished());
    let resumed = engine.queue().pop().expect("parent re-enqueued by last child");
    assert_eq!(resumed.job_class, "Fulfilment");
    assert!(engine.queue().is_empty());

    let outcome = perform(&engine, &resumed, &children).unwrap();
    assert_eq!(outcome, WorkflowOutcome::Finished { execution_id: parent_id });
    assert_eq!(engine.load_execution(parent_id).unwrap().unwrap().recover_to, FINISHED);

    let dispatch: Vec<String> = engine.entries(parent_id)
                                      .unwrap()
                                      .into_iter()
                                      .filter(|e| e.step == "dispatch")
                                      .map(|e| e.action.to_string())
                                      .collect();
    assert_eq!(dispatch,
               vec!["started",
                    "awaits/enqueued",
                    "awaits/waiting",
                    "halted",
                    "awaits/child_completed",
                    "awaits/child_completed",
                    "started",
                    "succeeded"]);
}

#[test]
fn children_complete_in_any_order() {
    let engine = engine();
    let children = json!(["A", "B", "C", "D", {"job_class": "E", "arguments": {"priority": 1}}]);
    let parent_id = perform(&engine, &parent_job(), &children).unwrap().execution_id();

    let mut pending = engine.queue().drain();
    assert_eq!(pending.len(), 5);
    assert_eq!(pending[4].arguments, json!({"priority": 1}));
    pending.reverse();
    for child in &pending {
        perform(&engine, child, &children).unwrap();
    }

    let jobs = engine.queue().drain();
    assert_eq!(jobs.len(), 1, "parent is re-enqueued exactly once");
    assert!(perform(&engine, &jobs[0], &children).unwrap().is_finished());
    assert_eq!(engine.context(parent_id)
                     .read("awaits/dispatch/children")
                     .unwrap()
                     .and_then(|v| v.as_array().map(Vec::len)),
               Some(5));
}

#[test]
fn retried_parent_does_not_enqueue_children_twice() {
    let engine = engine();
    let children = json!(["A", "B"]);
    let job = parent_job();
    perform(&engine, &job, &children).unwrap();
    perform(&engine, &job, &children).unwrap();
    assert_eq!(engine.queue().len(), 2);
}

#[test]
fn redundant_child_completion_is_harmless() {
    let engine = engine();
    let children = json!(["OnlyChild"]);
    let parent_id = perform(&engine, &parent_job(), &children).unwrap().execution_id();
    let child = engine.queue().pop().unwrap();
    let link = child.awaiting.clone().unwrap();

    perform(&engine, &child, &children).unwrap();
    let parent = engine.queue().pop().unwrap();
    perform(&engine, &parent, &children).unwrap();

    // el padre ya terminó: ni la señal manual ni otra corrida del hijo lo re-encolan
    assert!(!engine.signal_completion(&link).unwrap());
    perform(&engine, &child, &children).unwrap();
    assert!(engine.queue().is_empty());
    assert!(engine.entries(parent_id)
                  .unwrap()
                  .iter()
                  .filter(|e| e.action == EntryAction::plugin("awaits", "child_completed"))
                  .count()
            >= 3);
}

#[test]
fn plain_jobs_can_signal_completion_manually() {
    let engine = engine();
    let children = json!(["Mailer"]);
    let parent_id = perform(&engine, &parent_job(), &children).unwrap().execution_id();
    let mailer = engine.queue().pop().unwrap();

    assert!(engine.signal_completion(mailer.awaiting.as_ref().unwrap()).unwrap());
    let parent = engine.queue().pop().unwrap();
    assert!(perform(&engine, &parent, &children).unwrap().is_finished());
    assert_eq!(engine.load_execution(parent_id).unwrap().unwrap().recover_to, FINISHED);
}

#[test]
fn empty_awaits_list_does_not_halt() {
    let engine = engine();
    let outcome = perform(&engine, &parent_job(), &json!([])).unwrap();
    assert!(outcome.is_finished());
    assert!(engine.queue().is_empty());
}
