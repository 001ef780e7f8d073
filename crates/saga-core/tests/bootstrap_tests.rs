use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use saga_core::{classify_error, idempotency_key, BoxError, ContextValue, Entry, EntryLog, ErrorClass, Execution,
                ExecutionStore, ExecutionTx, InMemoryJobQueue, InMemoryStore, IsolationLevel, NewEntry, SagaError,
                SerializedJob, StepOutcome, StoreError, ValueStore, WorkflowBuilder, WorkflowEngine};
use serde_json::{json, Value};
use uuid::Uuid;

type Engine = WorkflowEngine<InMemoryStore, InMemoryJobQueue>;

fn engine() -> Engine {
    WorkflowEngine::new(InMemoryStore::new(), InMemoryJobQueue::new())
}

fn two_steps(w: &mut WorkflowBuilder<'_>) -> Result<(), BoxError> {
    w.step("a", |_| Ok(StepOutcome::Continue));
    w.step("b", |_| Ok(StepOutcome::Continue));
    Ok(())
}

#[test]
fn same_unique_by_and_arguments_reuse_one_execution() {
    let engine = engine();
    let first = SerializedJob::new("Invoice", json!({"customer": 5, "lines": [1, 2]}));
    // otra invocación del mismo pedido: job_id distinto, mismos argumentos
    let second = SerializedJob::new("Invoice", json!({"lines": [1, 2], "customer": 5}));

    let a = engine.execute_workflow(&first, json!({"customer": 5}), two_steps).unwrap();
    let b = engine.execute_workflow(&second, json!({"customer": 5}), two_steps).unwrap();
    assert_eq!(a.execution_id(), b.execution_id());
    assert_eq!(engine.store().execution_count(), 1);

    let key = idempotency_key("Invoice", &json!({"customer": 5}));
    let stored = engine.find_execution(&key).unwrap().unwrap();
    assert_eq!(stored.serialized_job.job_id, first.job_id);
    assert!(stored.last_run_at.unwrap() >= stored.created_at);
}

#[test]
fn different_arguments_for_same_key_are_rejected() {
    let engine = engine();
    let original = SerializedJob::new("Invoice", json!({"amount": 10}));
    let changed = SerializedJob::new("Invoice", json!({"amount": 20}));
    engine.execute_workflow(&original, json!({"order": 7}), two_steps)
          .unwrap();

    let err = engine.execute_workflow(&changed, json!({"order": 7}), two_steps)
                    .unwrap_err();
    assert!(matches!(err, SagaError::ArgumentMismatch { .. }));
    assert_eq!(classify_error(&err), ErrorClass::Consistency);
    assert_eq!(engine.store().execution_count(), 1);
}

#[test]
fn different_step_graph_for_same_key_is_rejected() {
    let engine = engine();
    let job = SerializedJob::new("Invoice", json!({}));
    engine.execute_workflow(&job, json!(1), two_steps).unwrap();

    let err = engine.execute_workflow(&job, json!(1), |w| {
                        w.step("a", |_| Ok(StepOutcome::Continue));
                        w.step("c", |_| Ok(StepOutcome::Continue));
                        Ok(())
                    })
                    .unwrap_err();
    assert!(matches!(err, SagaError::DefinitionMismatch { .. }));
}

#[test]
fn bootstrap_without_block_is_undefined() {
    let engine = engine();
    let job = SerializedJob::new("Invoice", json!({}));
    let res = engine.bootstrap(&job, json!(1), None::<fn(&mut WorkflowBuilder<'static>) -> Result<(), BoxError>>);
    assert!(matches!(res, Err(SagaError::UndefinedWorkflowBlock)));
    assert_eq!(engine.store().execution_count(), 0);
}

#[test]
fn bootstrap_creates_execution_without_running_steps() {
    let engine = engine();
    let job = SerializedJob::new("Invoice", json!({}));
    let booted = engine.bootstrap(&job, json!(1), Some(two_steps)).unwrap();
    assert_eq!(booted.execution.recover_to, "a");
    assert!(booted.execution.recover_to_is_valid());
    assert!(engine.entries(booted.execution.id).unwrap().is_empty());
}

#[test]
fn empty_or_failing_blocks_create_nothing() {
    let engine = engine();
    let job = SerializedJob::new("Invoice", json!({}));
    let err = engine.execute_workflow(&job, json!(1), |_| Ok(())).unwrap_err();
    assert!(matches!(err, SagaError::MissingSteps));

    let err = engine.execute_workflow(&job, json!(1), |_| Err("feature flag store down".into()))
                    .unwrap_err();
    assert_eq!(err.to_string(), "feature flag store down");

    let err = engine.execute_workflow(&job, json!(1), |w| {
                        w.step_does("a", "missing_handler");
                        Ok(())
                    })
                    .unwrap_err();
    assert!(matches!(err, SagaError::UndefinedMethod { .. }));
    assert_eq!(classify_error(&err), ErrorClass::Definition);
    assert_eq!(engine.store().execution_count(), 0);
}

#[test]
fn reentrant_execution_of_the_same_job_is_rejected() {
    let engine = engine();
    let job = SerializedJob::new("Invoice", json!({}));
    let nested = RefCell::new(None);
    let (engine_ref, job_ref, nested_ref) = (&engine, &job, &nested);

    engine.execute_workflow(&job, json!(1), move |w| {
              w.step("a", move |_| {
                   let res = engine_ref.execute_workflow(job_ref, json!(1), two_steps);
                   *nested_ref.borrow_mut() = Some(res.map(|_| ()));
                   Ok(StepOutcome::Continue)
               });
              Ok(())
          })
          .unwrap();

    let nested = nested.into_inner().expect("handler ran");
    assert!(matches!(nested, Err(SagaError::RedefiningWorkflow { .. })));

    // el guard se libera al terminar el intento
    engine.execute_workflow(&job, json!(2), two_steps).unwrap();
}

#[test]
fn unknown_recover_to_is_undefined_step() {
    let engine = engine();
    let job = SerializedJob::new("Invoice", json!({}));
    let booted = engine.bootstrap(&job, json!(1), Some(two_steps)).unwrap();
    let id = booted.execution.id;
    engine.store()
          .transaction(IsolationLevel::ReadCommitted, |tx| {
              let mut e = tx.find(id)?.unwrap();
              e.recover_to = "renamed_step".into();
              Ok(tx.update(&e)?)
          })
          .unwrap();

    let err = engine.execute_workflow(&job, json!(1), two_steps).unwrap_err();
    assert!(matches!(err, SagaError::UndefinedStep { ref step } if step == "renamed_step"));
}

/// Store cuyo primer `insert` pierde contra otro worker: la fila rival se
/// confirma apenas la transacción propia hace rollback.
struct RacingStore {
    inner: InMemoryStore,
    raced: AtomicBool,
    rival: Mutex<Option<Execution>>,
}

impl RacingStore {
    fn new() -> Self {
        Self { inner: InMemoryStore::new(),
               raced: AtomicBool::new(false),
               rival: Mutex::new(None) }
    }

    fn rival_id(&self) -> Option<Uuid> {
        self.rival.lock().unwrap().as_ref().map(|e| e.id)
    }
}

struct RacingTx<'a> {
    inner: &'a mut dyn ExecutionTx,
    store: &'a RacingStore,
}

impl ExecutionTx for RacingTx<'_> {
    fn find(&mut self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        self.inner.find(id)
    }

    fn find_by_key(&mut self, idempotency_key: &str) -> Result<Option<Execution>, StoreError> {
        self.inner.find_by_key(idempotency_key)
    }

    fn insert(&mut self, execution: &Execution) -> Result<(), StoreError> {
        if self.store.raced.swap(true, Ordering::SeqCst) {
            return self.inner.insert(execution);
        }
        let mut rival = execution.clone();
        rival.id = Uuid::new_v4();
        *self.store.rival.lock().unwrap() = Some(rival);
        Err(StoreError::UniqueViolation(format!("idempotency_key {}", execution.idempotency_key)))
    }

    fn update(&mut self, execution: &Execution) -> Result<(), StoreError> {
        self.inner.update(execution)
    }
}

impl ExecutionStore for RacingStore {
    fn strongest_isolation(&self) -> IsolationLevel {
        self.inner.strongest_isolation()
    }

    fn transaction<T, F>(&self, isolation: IsolationLevel, mut f: F) -> Result<T, SagaError>
        where F: FnMut(&mut dyn ExecutionTx) -> Result<T, SagaError>
    {
        let result = self.inner.transaction(isolation, |tx| {
                                    let mut racing = RacingTx { inner: tx, store: self };
                                    f(&mut racing)
                                });
        let pending = self.rival.lock().unwrap().clone();
        if let (Err(_), Some(rival)) = (&result, pending) {
            // el otro worker confirma después de nuestro rollback
            if self.inner.find_execution_by_key(&rival.idempotency_key)?.is_none() {
                self.inner.transaction(isolation, |tx| Ok(tx.insert(&rival)?))?;
            }
        }
        result
    }

    fn load_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        self.inner.load_execution(id)
    }

    fn find_execution_by_key(&self, idempotency_key: &str) -> Result<Option<Execution>, StoreError> {
        self.inner.find_execution_by_key(idempotency_key)
    }
}

impl EntryLog for RacingStore {
    fn append_entry(&self, entry: NewEntry) -> Result<Entry, StoreError> {
        self.inner.append_entry(entry)
    }

    fn entries(&self, execution_id: Uuid) -> Result<Vec<Entry>, StoreError> {
        self.inner.entries(execution_id)
    }
}

impl ValueStore for RacingStore {
    fn upsert_values(&self, execution_id: Uuid, values: &[(String, Value)]) -> Result<(), StoreError> {
        self.inner.upsert_values(execution_id, values)
    }

    fn insert_value_if_absent(&self, execution_id: Uuid, key: &str, value: Value) -> Result<Value, StoreError> {
        self.inner.insert_value_if_absent(execution_id, key, value)
    }

    fn get_values(&self, execution_id: Uuid, keys: &[&str]) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.get_values(execution_id, keys)
    }

    fn list_values(&self, execution_id: Uuid) -> Result<Vec<ContextValue>, StoreError> {
        self.inner.list_values(execution_id)
    }
}

#[test]
fn losing_the_insert_race_adopts_the_winning_execution() {
    let engine = WorkflowEngine::new(RacingStore::new(), InMemoryJobQueue::new());
    let job = SerializedJob::new("Invoice", json!({"amount": 10}));

    let outcome = engine.execute_workflow(&job, json!({"order": 7}), two_steps).unwrap();

    let rival = engine.store().rival_id().expect("insert was raced");
    assert!(outcome.is_finished());
    assert_eq!(outcome.execution_id(), rival);
    assert_eq!(engine.store().inner.execution_count(), 1);

    let key = idempotency_key("Invoice", &json!({"order": 7}));
    let stored = engine.find_execution(&key).unwrap().unwrap();
    assert_eq!(stored.id, rival);
    assert_eq!(stored.recover_to, saga_core::FINISHED);
}
