//! Coverage goals as fitness functions
//!
//! A goal reduces one execution result to a number in `[0, 1]`, where 0
//! means the goal is covered. Smaller is better, and goals that are not yet
//! covered report how close the execution came where that is measurable.

use std::fmt;

use crate::chromosome::TestChromosome;
use crate::executor::{ExecutionResult, ExecutionSandbox, ExecutorResult};
use crate::trace::{distance, MutantId, PredicateId};

/// Fitness of goals an execution never got near.
pub const UNREACHED: f64 = 1.0;

pub trait TestFitnessFunction: Send + Sync {
    /// Fitness of a single execution result.
    fn fitness_of(&self, result: &ExecutionResult) -> f64;

    /// Short description used in logs.
    fn label(&self) -> String;

    fn is_covered(&self, result: &ExecutionResult) -> bool {
        self.fitness_of(result) == 0.0
    }

    /// Execute `chromosome` if needed and store its fitness for this goal.
    fn fitness(&self, chromosome: &mut TestChromosome, sandbox: &mut dyn ExecutionSandbox) -> ExecutorResult<f64> {
        let result = chromosome.ensure_executed(sandbox)?;
        let fitness = self.fitness_of(&result);
        chromosome.set_fitness(fitness);
        Ok(fitness)
    }
}

/// Take one outcome of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchCoverageGoal {
    pub predicate: PredicateId,
    pub outcome: bool,
}

impl BranchCoverageGoal {
    pub fn new(predicate: PredicateId, outcome: bool) -> Self {
        BranchCoverageGoal { predicate, outcome }
    }

    /// Both goals of a predicate.
    pub fn both(predicate: PredicateId) -> [Self; 2] {
        [Self::new(predicate, true), Self::new(predicate, false)]
    }
}

impl TestFitnessFunction for BranchCoverageGoal {
    fn fitness_of(&self, result: &ExecutionResult) -> f64 {
        let distance = if self.outcome {
            result.trace.true_distance(self.predicate)
        } else {
            result.trace.false_distance(self.predicate)
        };
        match distance {
            Some(d) if d <= 0.0 => 0.0,
            Some(d) => distance::normalize(d),
            None => UNREACHED,
        }
    }

    fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BranchCoverageGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch {} - {}", self.predicate, self.outcome)
    }
}

/// Call a method at least once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodCoverageGoal {
    pub method: String,
}

impl MethodCoverageGoal {
    pub fn new(method: impl Into<String>) -> Self {
        MethodCoverageGoal { method: method.into() }
    }
}

impl TestFitnessFunction for MethodCoverageGoal {
    fn fitness_of(&self, result: &ExecutionResult) -> f64 {
        if result.trace.method_call_count(&self.method) > 0 {
            0.0
        } else {
            UNREACHED
        }
    }

    fn label(&self) -> String {
        format!("method {}", self.method)
    }
}

/// Execute a line. Entering the enclosing method without reaching the line
/// scores halfway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineCoverageGoal {
    pub method: String,
    pub line: u32,
}

impl LineCoverageGoal {
    pub fn new(method: impl Into<String>, line: u32) -> Self {
        LineCoverageGoal {
            method: method.into(),
            line,
        }
    }
}

impl TestFitnessFunction for LineCoverageGoal {
    fn fitness_of(&self, result: &ExecutionResult) -> f64 {
        if result.trace.is_line_covered(&self.method, self.line) {
            0.0
        } else if result.trace.method_call_count(&self.method) > 0 {
            0.5
        } else {
            UNREACHED
        }
    }

    fn label(&self) -> String {
        format!("line {}:{}", self.method, self.line)
    }
}

/// Infect a mutant: reach it with an infection distance of 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakMutationGoal {
    pub mutant: MutantId,
}

impl WeakMutationGoal {
    pub fn new(mutant: MutantId) -> Self {
        WeakMutationGoal { mutant }
    }
}

impl TestFitnessFunction for WeakMutationGoal {
    fn fitness_of(&self, result: &ExecutionResult) -> f64 {
        match result.trace.mutant_distance(self.mutant) {
            Some(d) if d <= 0.0 => 0.0,
            Some(d) => distance::normalize(d),
            None => UNREACHED,
        }
    }

    fn label(&self) -> String {
        format!("mutant {}", self.mutant)
    }
}

/// Make the code under test raise a given exception type. Timeouts never
/// count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExceptionCoverageGoal {
    pub type_name: String,
}

impl ExceptionCoverageGoal {
    pub fn new(type_name: impl Into<String>) -> Self {
        ExceptionCoverageGoal {
            type_name: type_name.into(),
        }
    }
}

impl TestFitnessFunction for ExceptionCoverageGoal {
    fn fitness_of(&self, result: &ExecutionResult) -> f64 {
        let raised = result
            .failures
            .values()
            .any(|thrown| !thrown.is_timeout() && thrown.type_name() == self.type_name);
        if raised {
            0.0
        } else {
            UNREACHED
        }
    }

    fn label(&self) -> String {
        format!("exception {}", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    use super::*;
    use crate::runtime::Thrown;
    use crate::trace::distance::{compare_ints, BranchDistance, Comparison};
    use crate::trace::ExecutionTrace;

    fn result(trace: ExecutionTrace) -> ExecutionResult {
        ExecutionResult {
            trace,
            failures: BTreeMap::new(),
            executed_statements: 0,
            observed_types: HashMap::new(),
            timed_out: false,
            duration: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_branch_fitness_levels() {
        let mut trace = ExecutionTrace::new();
        trace.branch_passed(1, compare_ints(3, Comparison::Lt, 10));
        let result = result(trace);

        assert_eq!(BranchCoverageGoal::new(1, true).fitness_of(&result), 0.0);
        let false_goal = BranchCoverageGoal::new(1, false).fitness_of(&result);
        assert!(false_goal > 0.0 && false_goal < 1.0);
        assert_eq!(false_goal, distance::normalize(8.0));
        assert_eq!(BranchCoverageGoal::new(2, true).fitness_of(&result), UNREACHED);
    }

    #[test]
    fn test_branch_fitness_improves_with_distance() {
        let goal = BranchCoverageGoal::new(7, true);
        let mut previous = UNREACHED;
        for a in (0..20).rev() {
            let mut trace = ExecutionTrace::new();
            trace.branch_passed(7, compare_ints(a, Comparison::Eq, 0));
            let fitness = goal.fitness_of(&result(trace));
            assert!(fitness < previous);
            previous = fitness;
        }
        assert_eq!(previous, 0.0);
    }

    #[test]
    fn test_line_goal_rewards_entering_the_method() {
        let mut trace = ExecutionTrace::new();
        trace.method_entered("Foo.bar");
        trace.line_covered("Foo.bar", 3);
        let result = result(trace);
        assert_eq!(LineCoverageGoal::new("Foo.bar", 3).fitness_of(&result), 0.0);
        assert_eq!(LineCoverageGoal::new("Foo.bar", 4).fitness_of(&result), 0.5);
        assert_eq!(LineCoverageGoal::new("Foo.baz", 1).fitness_of(&result), UNREACHED);
        assert!(MethodCoverageGoal::new("Foo.bar").is_covered(&result));
    }

    #[test]
    fn test_mutation_and_exception_goals() {
        let mut trace = ExecutionTrace::new();
        trace.mutant_touched(4, 0.0);
        trace.mutant_touched(5, 2.0);
        trace.branch_passed(9, BranchDistance::new(0.0, 1.0));
        let mut result = result(trace);
        result.failures.insert(2, Thrown::exception("IllegalStateException", "boom"));

        assert!(WeakMutationGoal::new(4).is_covered(&result));
        assert_eq!(WeakMutationGoal::new(5).fitness_of(&result), distance::normalize(2.0));
        assert!(ExceptionCoverageGoal::new("IllegalStateException").is_covered(&result));
        assert!(!ExceptionCoverageGoal::new("NullPointerException").is_covered(&result));
    }
}
