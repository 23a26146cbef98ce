use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;

use super::distance::{self, BranchDistance, Comparison};
use super::{ExecutionTrace, MutantId, PredicateId};
use crate::runtime::Thrown;

/// Cooperative cancellation flag shared between an execution and its
/// supervisor.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Hooks through which instrumented code reports coverage events.
///
/// One tracer belongs to one execution. Clones share the same trace, the same
/// cancellation token and the same position counter, so the supervising
/// executor can snapshot a partial trace of an execution that never returns.
/// Every hook fails with [`Thrown::Timeout`] once the execution is cancelled.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTracer {
    trace: Arc<Mutex<ExecutionTrace>>,
    cancel: CancellationToken,
    position: Arc<AtomicUsize>,
}

impl ExecutionTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn trace(&self) -> MutexGuard<'_, ExecutionTrace> {
        self.trace.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `Thrown::Timeout` if the execution has been cancelled.
    pub fn check_timeout(&self) -> Result<(), Thrown> {
        if self.cancel.is_cancelled() {
            Err(Thrown::Timeout)
        } else {
            Ok(())
        }
    }

    /// Index of the statement currently executing.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::SeqCst)
    }

    pub(crate) fn set_position(&self, position: usize) {
        self.position.store(position, Ordering::SeqCst);
    }

    /// Copy of the trace recorded so far.
    pub fn snapshot(&self) -> ExecutionTrace {
        self.trace().lazy_clone()
    }

    pub fn branch_passed(&self, predicate: PredicateId, distance: BranchDistance) -> Result<(), Thrown> {
        self.check_timeout()?;
        trace!(
            "predicate {} true={} false={}",
            predicate,
            distance.true_distance,
            distance.false_distance
        );
        self.trace().branch_passed(predicate, distance);
        Ok(())
    }

    /// Evaluate `a op b` as instrumented integer predicate and return its outcome.
    pub fn compare_ints(&self, predicate: PredicateId, a: i64, op: Comparison, b: i64) -> Result<bool, Thrown> {
        let distance = distance::compare_ints(a, op, b);
        self.branch_passed(predicate, distance)?;
        Ok(distance.outcome())
    }

    pub fn compare_floats(&self, predicate: PredicateId, a: f64, op: Comparison, b: f64) -> Result<bool, Thrown> {
        let distance = distance::compare(a, op, b);
        self.branch_passed(predicate, distance)?;
        Ok(distance.outcome())
    }

    /// Instrumented `value == null` (or `!= null` when `expect_null` is false).
    pub fn null_check(&self, predicate: PredicateId, is_null: bool, expect_null: bool) -> Result<bool, Thrown> {
        let distance = distance::null_check(is_null, expect_null);
        self.branch_passed(predicate, distance)?;
        Ok(distance.outcome())
    }

    pub fn reference_check(&self, predicate: PredicateId, same: bool, op: Comparison) -> Result<bool, Thrown> {
        let distance = distance::reference_equality(same, op);
        self.branch_passed(predicate, distance)?;
        Ok(distance.outcome())
    }

    pub fn method_entered(&self, method: &str) -> Result<(), Thrown> {
        self.check_timeout()?;
        self.trace().method_entered(method);
        Ok(())
    }

    pub fn method_exited(&self, method: &str) -> Result<(), Thrown> {
        self.check_timeout()?;
        self.trace().method_exited(method);
        Ok(())
    }

    pub fn line_covered(&self, method: &str, line: u32) -> Result<(), Thrown> {
        self.check_timeout()?;
        self.trace().line_covered(method, line);
        Ok(())
    }

    pub fn mutant_touched(&self, mutant: MutantId, infection_distance: f64) -> Result<(), Thrown> {
        self.check_timeout()?;
        self.trace().mutant_touched(mutant, infection_distance);
        Ok(())
    }

    pub(crate) fn failure_at(&self, position: usize, thrown: Thrown) {
        self.trace().failure_at(position, thrown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hooks_write_shared_trace() {
        let tracer = ExecutionTracer::new();
        let clone = tracer.clone();
        assert!(clone.compare_ints(1, 5, Comparison::Lt, 10).unwrap());
        clone.method_entered("Foo.bar").unwrap();
        let snapshot = tracer.snapshot();
        assert!(snapshot.is_covered_true(1));
        assert_eq!(snapshot.false_distance(1), Some(6.0));
        assert_eq!(snapshot.method_call_count("Foo.bar"), 1);
    }

    #[test]
    fn test_cancelled_hooks_raise_timeout() {
        let tracer = ExecutionTracer::new();
        tracer.cancellation_token().cancel();
        assert_eq!(tracer.line_covered("Foo.bar", 3), Err(Thrown::Timeout));
        assert_eq!(tracer.compare_ints(1, 0, Comparison::Eq, 0), Err(Thrown::Timeout));
        assert!(tracer.snapshot().covered_predicates().is_empty());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_events() {
        let tracer = ExecutionTracer::new();
        tracer.method_entered("a").unwrap();
        let snapshot = tracer.snapshot();
        tracer.method_entered("a").unwrap();
        assert_eq!(snapshot.method_call_count("a"), 1);
        assert_eq!(tracer.snapshot().method_call_count("a"), 2);
    }
}
