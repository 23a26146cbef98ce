//! Isolated, time-bounded execution of test cases
//!
//! ## Architecture
//!
//! Each `ExecutionContext` owns a dedicated worker thread fed through a
//! channel. The worker runs one test case at a time with a fresh `Scope` and
//! a fresh `ExecutionTracer`, stopping at the first failure. The supervising
//! `TestCaseExecutor` waits for the result with a deadline:
//!
//! 1. the worker answers in time: the result is returned as is;
//! 2. the deadline passes: the execution is cancelled through its token and
//!    the executor waits a grace period (`shutdown_timeout`) for the worker to
//!    notice at its next tracer hook or statement boundary;
//! 3. the worker still does not answer: the context is *disposed*. Its thread
//!    is abandoned, never fed again, and a new context is created for the next
//!    execution. The partial trace recorded up to that point is returned,
//!    marked with a timeout at the statement that was running.
//!
//! Failures of the code under test (exceptions, panics, timeouts) are part of
//! the `ExecutionResult`; only failures of the execution machinery itself are
//! reported as `ExecutorError`.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::ExecutorConfig;
use crate::runtime::{Scope, Thrown};
use crate::testcase::TestCase;
use crate::trace::{ExecutionTrace, ExecutionTracer};
use crate::types::TypeRef;
use crate::variable::SlotId;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The sandbox could not be created. Not recoverable by retrying the test.
    #[error("execution infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("execution context {0} has been disposed")]
    ContextDisposed(u64),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Outcome of executing one test case.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub trace: ExecutionTrace,

    /// Failure raised by the statement at each position. Execution stops at
    /// the first failure, so this holds at most one entry.
    pub failures: BTreeMap<usize, Thrown>,

    /// Number of statements that ran to completion
    pub executed_statements: usize,

    /// Dynamic classes observed for slots whose declared type is wider
    pub observed_types: HashMap<SlotId, TypeRef>,

    pub timed_out: bool,

    pub duration: Duration,
}

impl ExecutionResult {
    pub fn first_failure(&self) -> Option<(usize, &Thrown)> {
        self.failures.iter().next().map(|(position, thrown)| (*position, thrown))
    }

    pub fn failure_at(&self, position: usize) -> Option<&Thrown> {
        self.failures.get(&position)
    }

    pub fn has_failure(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn has_timeout(&self) -> bool {
        self.timed_out
    }

    /// Narrow the declared types of `test` to the dynamic types observed in
    /// this execution. Slots that are not in `test` are skipped.
    pub fn narrow_types(&self, test: &mut TestCase) -> usize {
        let mut narrowed = 0;
        for (slot, ty) in &self.observed_types {
            match test.narrow_type(*slot, ty.clone()) {
                Ok(()) => narrowed += 1,
                Err(err) => debug!("not narrowing {}: {}", slot, err),
            }
        }
        narrowed
    }
}

/// Something that can run a test case in isolation under a time budget.
pub trait ExecutionSandbox: Send {
    fn run_isolated(&mut self, test: &TestCase, timeout: Duration) -> ExecutorResult<ExecutionResult>;

    /// Budget used by [`execute`](Self::execute).
    fn default_timeout(&self) -> Duration;

    fn execute(&mut self, test: &TestCase) -> ExecutorResult<ExecutionResult> {
        let timeout = self.default_timeout();
        self.run_isolated(test, timeout)
    }
}

struct Job {
    test: TestCase,
    tracer: ExecutionTracer,
    reply: mpsc::Sender<RunOutcome>,
}

struct RunOutcome {
    failures: BTreeMap<usize, Thrown>,
    executed_statements: usize,
    observed_types: HashMap<SlotId, TypeRef>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run all statements of `test` until the first failure.
fn run_statements(test: &TestCase, tracer: &ExecutionTracer) -> RunOutcome {
    let mut scope = Scope::new();
    let mut failures = BTreeMap::new();
    let mut observed_types = HashMap::new();
    let mut executed_statements = 0;

    for (position, statement) in test.iter().enumerate() {
        tracer.set_position(position);
        if tracer.is_cancelled() {
            tracer.failure_at(position, Thrown::Timeout);
            failures.insert(position, Thrown::Timeout);
            break;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| statement.execute(&mut scope, tracer)));
        let thrown = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(thrown)) => Some(thrown),
            Err(payload) => Some(Thrown::Panic(panic_message(payload.as_ref()))),
        };
        if let Some(thrown) = thrown {
            tracer.failure_at(position, thrown.clone());
            failures.insert(position, thrown);
            break;
        }
        executed_statements += 1;
        if let Some(dynamic) = scope.get(statement.slot()).and_then(|value| value.dynamic_type()) {
            if dynamic.narrows(statement.return_type()) {
                observed_types.insert(statement.slot(), dynamic);
            }
        }
    }

    RunOutcome {
        failures,
        executed_statements,
        observed_types,
    }
}

fn worker_loop(jobs: mpsc::Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        let outcome = run_statements(&job.test, &job.tracer);
        // The supervisor may have given up on this job already.
        let _ = job.reply.send(outcome);
    }
}

/// A worker thread that executes test cases one at a time.
pub struct ExecutionContext {
    id: u64,
    jobs: mpsc::Sender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl ExecutionContext {
    pub fn spawn(id: u64) -> ExecutorResult<Self> {
        let (jobs, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(format!("suitegen-exec-{}", id))
            .spawn(move || worker_loop(receiver))
            .map_err(|err| ExecutorError::Infrastructure(format!("cannot spawn execution thread: {}", err)))?;
        debug!("spawned execution context {}", id);
        Ok(ExecutionContext {
            id,
            jobs,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Hand a job to the worker. A dead worker gives the job back.
    fn submit(&self, job: Job) -> Result<(), Job> {
        self.jobs.send(job).map_err(|mpsc::SendError(job)| job)
    }

    /// Abandon the worker thread. It exits on its own once its current job
    /// returns, since no further job can reach it.
    fn dispose(mut self) {
        warn!("disposing execution context {}", self.id);
        drop(self.handle.take());
    }
}

/// Executes test cases on a private execution context.
pub struct TestCaseExecutor {
    config: ExecutorConfig,
    context: Option<ExecutionContext>,
    next_context_id: u64,
    disposed_contexts: usize,
}

impl TestCaseExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        TestCaseExecutor {
            config,
            context: None,
            next_context_id: 0,
            disposed_contexts: 0,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// How many contexts had to be thrown away after unresponsive executions.
    pub fn disposed_contexts(&self) -> usize {
        self.disposed_contexts
    }

    /// Identifier of the context the next execution will use, if one exists.
    pub fn current_context_id(&self) -> Option<u64> {
        self.context.as_ref().map(ExecutionContext::id)
    }

    fn ensure_context(&mut self) -> ExecutorResult<&ExecutionContext> {
        if self.context.is_none() {
            let id = self.next_context_id;
            self.next_context_id += 1;
            self.context = Some(ExecutionContext::spawn(id)?);
        }
        self.context
            .as_ref()
            .ok_or_else(|| ExecutorError::Infrastructure("no execution context".to_string()))
    }

    fn dispose_context(&mut self) {
        if let Some(context) = self.context.take() {
            context.dispose();
            self.disposed_contexts += 1;
        }
    }

    fn finish(
        outcome: RunOutcome,
        tracer: &ExecutionTracer,
        started: Instant,
        timed_out: bool,
    ) -> ExecutionResult {
        let mut failures = outcome.failures;
        if timed_out && !failures.values().any(Thrown::is_timeout) {
            failures.insert(tracer.position(), Thrown::Timeout);
        }
        ExecutionResult {
            trace: tracer.snapshot(),
            failures,
            executed_statements: outcome.executed_statements,
            observed_types: outcome.observed_types,
            timed_out,
            duration: started.elapsed(),
        }
    }

    /// Result for an execution whose worker never answered.
    fn abandoned(tracer: &ExecutionTracer, started: Instant, thrown: Thrown) -> ExecutionResult {
        let position = tracer.position();
        let mut trace = tracer.snapshot();
        trace.failure_at(position, thrown.clone());
        let timed_out = thrown.is_timeout();
        let mut failures = BTreeMap::new();
        failures.insert(position, thrown);
        ExecutionResult {
            trace,
            failures,
            executed_statements: position,
            observed_types: HashMap::new(),
            timed_out,
            duration: started.elapsed(),
        }
    }
}

impl ExecutionSandbox for TestCaseExecutor {
    fn run_isolated(&mut self, test: &TestCase, timeout: Duration) -> ExecutorResult<ExecutionResult> {
        let started = Instant::now();
        let tracer = ExecutionTracer::new();
        let (reply, results) = mpsc::channel();
        let job = Job {
            test: test.clone(),
            tracer: tracer.clone(),
            reply,
        };
        if let Err(job) = self.ensure_context()?.submit(job) {
            warn!("execution context is gone, replacing it");
            self.dispose_context();
            let context = self.ensure_context()?;
            let id = context.id();
            context.submit(job).map_err(|_| ExecutorError::ContextDisposed(id))?;
        }

        match results.recv_timeout(timeout) {
            Ok(outcome) => Ok(Self::finish(outcome, &tracer, started, false)),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "test case of {} statements exceeded {:?} at statement {}",
                    test.len(),
                    timeout,
                    tracer.position()
                );
                tracer.cancel();
                match results.recv_timeout(self.config.shutdown_timeout()) {
                    Ok(outcome) => Ok(Self::finish(outcome, &tracer, started, true)),
                    Err(_) => {
                        self.dispose_context();
                        Ok(Self::abandoned(&tracer, started, Thrown::Timeout))
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("execution context died while running a test case");
                self.dispose_context();
                Ok(Self::abandoned(
                    &tracer,
                    started,
                    Thrown::Panic("execution context terminated".to_string()),
                ))
            }
        }
    }

    fn default_timeout(&self) -> Duration {
        self.config.timeout()
    }
}

/// A fixed set of executors evaluating independent test cases in parallel.
pub struct ExecutorPool {
    executors: Vec<TestCaseExecutor>,
}

impl ExecutorPool {
    pub fn new(size: usize, config: ExecutorConfig) -> Self {
        ExecutorPool {
            executors: (0..size.max(1)).map(|_| TestCaseExecutor::new(config.clone())).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.executors.len()
    }

    /// Execute every test case, returning results in input order.
    pub fn execute_all(&mut self, tests: &[TestCase]) -> Vec<ExecutorResult<ExecutionResult>> {
        let workers = self.executors.len();
        let mut results: Vec<Option<ExecutorResult<ExecutionResult>>> = (0..tests.len()).map(|_| None).collect();

        thread::scope(|scope| {
            let handles: Vec<_> = self
                .executors
                .iter_mut()
                .enumerate()
                .map(|(worker, executor)| {
                    scope.spawn(move || {
                        tests
                            .iter()
                            .enumerate()
                            .skip(worker)
                            .step_by(workers)
                            .map(|(index, test)| (index, executor.execute(test)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(batch) => {
                        for (index, result) in batch {
                            results[index] = Some(result);
                        }
                    }
                    Err(payload) => warn!("executor pool worker panicked: {}", panic_message(payload.as_ref())),
                }
            }
        });

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| Err(ExecutorError::Infrastructure("pool worker panicked".to_string())))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{site_fn, CallableSite};
    use crate::runtime::{ObjectHandle, Value};
    use crate::statement::{LiteralValue, StatementKind};
    use crate::types::ClassType;
    use std::sync::Arc;

    fn failing(_: Option<&Value>, _: &[Value], _: &ExecutionTracer) -> Result<Value, Thrown> {
        Err(Thrown::exception("IllegalArgument", "nope"))
    }

    fn panicking(_: Option<&Value>, _: &[Value], _: &ExecutionTracer) -> Result<Value, Thrown> {
        panic!("boom")
    }

    fn static_call(body: fn(Option<&Value>, &[Value], &ExecutionTracer) -> Result<Value, Thrown>) -> StatementKind {
        StatementKind::Call {
            method: CallableSite::static_method(
                TypeRef::class(ClassType::new("Util")),
                "run",
                vec![],
                TypeRef::Void,
                body,
            ),
            receiver: None,
            args: vec![],
        }
    }

    fn executor() -> TestCaseExecutor {
        TestCaseExecutor::new(ExecutorConfig {
            timeout_ms: 2000,
            shutdown_timeout_ms: 100,
        })
    }

    #[test]
    fn test_execution_stops_at_first_failure() {
        let mut test = TestCase::new();
        test.add(StatementKind::Literal(LiteralValue::Int(1))).unwrap();
        test.add(static_call(failing)).unwrap();
        test.add(StatementKind::Literal(LiteralValue::Int(2))).unwrap();
        let result = executor().execute(&test).unwrap();
        assert_eq!(result.executed_statements, 1);
        let (position, thrown) = result.first_failure().unwrap();
        assert_eq!(position, 1);
        assert_eq!(thrown.type_name(), "IllegalArgument");
        assert_eq!(result.trace.first_failure().map(|(p, _)| p), Some(1));
        assert!(!result.has_timeout());
    }

    #[test]
    fn test_panics_are_captured() {
        let mut test = TestCase::new();
        test.add(static_call(panicking)).unwrap();
        let mut executor = executor();
        let result = executor.execute(&test).unwrap();
        assert_eq!(result.failure_at(0), Some(&Thrown::Panic("boom".to_string())));
        assert_eq!(executor.disposed_contexts(), 0);
    }

    #[test]
    fn test_observed_subtypes_narrow_declared_types() {
        let animal = Arc::new(ClassType::new("Animal"));
        let dog = Arc::new(ClassType::new("Dog").with_supertype("Animal"));
        let dog_for_body = dog.clone();
        let adopt = CallableSite::static_method(
            TypeRef::class(ClassType::new("Shelter")),
            "adopt",
            vec![],
            TypeRef::Class(animal),
            site_fn(move |_, _, _| Ok(Value::Object(ObjectHandle::new(dog_for_body.clone(), ())))),
        );
        let mut test = TestCase::new();
        test.add(StatementKind::Call {
            method: adopt,
            receiver: None,
            args: vec![],
        })
        .unwrap();
        let result = executor().execute(&test).unwrap();
        assert_eq!(result.narrow_types(&mut test), 1);
        assert_eq!(test.statement(0).unwrap().return_type(), &TypeRef::Class(dog));
    }

    #[test]
    fn test_pool_preserves_order() {
        let tests: Vec<TestCase> = (0..5)
            .map(|n| {
                let mut test = TestCase::new();
                for _ in 0..n {
                    test.add(StatementKind::Literal(LiteralValue::Int(n as i32))).unwrap();
                }
                test
            })
            .collect();
        let mut pool = ExecutorPool::new(2, ExecutorConfig::default());
        let results = pool.execute_all(&tests);
        for (n, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap().executed_statements, n);
        }
    }
}
