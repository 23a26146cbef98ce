mod common;

use std::time::Duration;

use suitegen::catalog::CallableSite;
use suitegen::executor::{ExecutionSandbox, ExecutorPool, TestCaseExecutor};
use suitegen::runtime::Thrown;
use suitegen::statement::{LiteralValue, StatementKind};
use suitegen::testcase::TestCase;

use common::{executor_config, util_hang, util_spin};

fn call_static(site: CallableSite) -> StatementKind {
    StatementKind::Call {
        method: site,
        receiver: None,
        args: vec![],
    }
}

/// `int x = 1; <site>(); int y = 2;`
fn sandwich(site: CallableSite) -> TestCase {
    let mut test = TestCase::new();
    test.add(StatementKind::Literal(LiteralValue::Int(1))).unwrap();
    test.add(call_static(site)).unwrap();
    test.add(StatementKind::Literal(LiteralValue::Int(2))).unwrap();
    test
}

fn quick_test() -> TestCase {
    let mut test = TestCase::new();
    test.add(StatementKind::Literal(LiteralValue::Int(3))).unwrap();
    test
}

#[test]
fn test_cooperative_loop_stops_on_cancellation() {
    let mut executor = TestCaseExecutor::new(executor_config(100, 2000));
    let result = executor.execute(&sandwich(util_spin())).unwrap();

    assert!(result.has_timeout());
    assert_eq!(result.failure_at(1), Some(&Thrown::Timeout));
    assert_eq!(result.executed_statements, 1);
    assert_eq!(executor.disposed_contexts(), 0);

    let context = executor.current_context_id();
    let next = executor.execute(&quick_test()).unwrap();
    assert!(!next.has_failure());
    assert_eq!(executor.current_context_id(), context);
}

#[test]
fn test_unresponsive_context_is_replaced() {
    let mut executor = TestCaseExecutor::new(executor_config(100, 50));
    let result = executor.execute(&sandwich(util_hang())).unwrap();

    assert!(result.has_timeout());
    assert_eq!(result.failure_at(1), Some(&Thrown::Timeout));
    assert_eq!(result.trace.first_failure().map(|(position, _)| position), Some(1));
    assert_eq!(executor.disposed_contexts(), 1);
    assert_eq!(executor.current_context_id(), None);

    let next = executor.execute(&quick_test()).unwrap();
    assert!(!next.has_failure());
    assert_eq!(next.executed_statements, 1);
    assert_eq!(executor.current_context_id(), Some(1));
}

#[test]
fn test_timeout_is_per_call() {
    let mut executor = TestCaseExecutor::new(executor_config(60_000, 2000));
    let result = executor
        .run_isolated(&sandwich(util_spin()), Duration::from_millis(50))
        .unwrap();
    assert!(result.has_timeout());
    assert!(result.duration < Duration::from_secs(30));
}

#[test]
fn test_pool_isolates_executions() {
    let mut pool = ExecutorPool::new(3, executor_config(200, 2000));
    let tests = vec![quick_test(), sandwich(util_spin()), quick_test(), quick_test()];
    let results: Vec<_> = pool.execute_all(&tests).into_iter().map(Result::unwrap).collect();
    assert_eq!(pool.size(), 3);
    assert_eq!(results.len(), 4);
    assert!(results[1].has_timeout());
    for index in [0, 2, 3] {
        assert!(!results[index].has_failure());
        assert_eq!(results[index].executed_statements, 1);
    }
}
