//! The unit of evolution: a test case with its cached execution and fitness.

use std::fmt;
use std::sync::Arc;

use log::{debug, trace};
use rand::Rng;

use crate::config::MutationConfig;
use crate::executor::{ExecutionResult, ExecutionSandbox, ExecutorResult};
use crate::factory::TestFactory;
use crate::randomness;
use crate::testcase::TestCase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Deletion,
    Change,
    Insertion,
}

/// One structural edit applied by [`TestChromosome::mutate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestMutation {
    pub kind: MutationKind,
    pub position: usize,
}

/// A test case together with the result of its last execution.
///
/// Clones share the cached execution result until one of them is mutated;
/// the test case itself is always copied.
#[derive(Debug, Clone)]
pub struct TestChromosome {
    test: TestCase,
    fitness: Option<f64>,
    last_result: Option<Arc<ExecutionResult>>,
    changed: bool,
    mutation_history: Vec<TestMutation>,
    number_of_mutations: usize,
    local_search_applied: bool,
}

impl TestChromosome {
    pub fn new(test: TestCase) -> Self {
        TestChromosome {
            test,
            fitness: None,
            last_result: None,
            changed: true,
            mutation_history: Vec::new(),
            number_of_mutations: 0,
            local_search_applied: false,
        }
    }

    pub fn test(&self) -> &TestCase {
        &self.test
    }

    /// Mutable access to the test case. Marks the chromosome as changed.
    pub fn test_mut(&mut self) -> &mut TestCase {
        self.set_changed(true);
        &mut self.test
    }

    pub fn into_test(self) -> TestCase {
        self.test
    }

    pub fn len(&self) -> usize {
        self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.test.is_empty()
    }

    /// Fitness computed for the current test case, if any.
    pub fn fitness(&self) -> Option<f64> {
        if self.changed {
            None
        } else {
            self.fitness
        }
    }

    pub fn set_fitness(&mut self, fitness: f64) {
        self.fitness = Some(fitness);
    }

    pub fn last_result(&self) -> Option<&Arc<ExecutionResult>> {
        self.last_result.as_ref()
    }

    pub fn set_last_result(&mut self, result: ExecutionResult) {
        self.last_result = Some(Arc::new(result));
        self.changed = false;
    }

    /// Whether the test case changed since it was last executed.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
        if changed {
            self.fitness = None;
            self.last_result = None;
            self.local_search_applied = false;
        }
    }

    pub fn mutation_history(&self) -> &[TestMutation] {
        &self.mutation_history
    }

    pub fn number_of_mutations(&self) -> usize {
        self.number_of_mutations
    }

    pub fn has_local_search_been_applied(&self) -> bool {
        self.local_search_applied
    }

    pub fn set_local_search_applied(&mut self, applied: bool) {
        self.local_search_applied = applied;
    }

    /// Execute the test case unless an up-to-date result is cached.
    ///
    /// Dynamic types observed during execution narrow the declared types of
    /// the test case.
    pub fn ensure_executed(&mut self, sandbox: &mut dyn ExecutionSandbox) -> ExecutorResult<Arc<ExecutionResult>> {
        if !self.changed {
            if let Some(result) = &self.last_result {
                return Ok(Arc::clone(result));
            }
        }
        let result = sandbox.execute(&self.test)?;
        let narrowed = result.narrow_types(&mut self.test);
        if narrowed > 0 {
            trace!("narrowed {} declared type(s)", narrowed);
        }
        let result = Arc::new(result);
        self.last_result = Some(Arc::clone(&result));
        self.changed = false;
        Ok(result)
    }

    /// Apply one round of mutation: deletion, change and insertion passes,
    /// each taken with its configured probability. Returns whether the test
    /// case changed.
    pub fn mutate<R: Rng + ?Sized>(&mut self, factory: &TestFactory, config: &MutationConfig, rng: &mut R) -> bool {
        self.mutation_history.clear();
        let mut changed = false;

        if self.test.len() > config.chromosome_length {
            self.test.chop(config.chromosome_length);
            changed = true;
        }
        if randomness::chance(rng, config.p_test_delete) {
            changed |= self.mutation_delete(factory, rng);
        }
        if randomness::chance(rng, config.p_test_change) {
            changed |= self.mutation_change(factory, rng);
        }
        if randomness::chance(rng, config.p_test_insert) {
            changed |= self.mutation_insert(factory, config, rng);
        }
        if self.test.len() > config.chromosome_length {
            self.test.chop(config.chromosome_length);
            changed = true;
        }

        if changed {
            self.number_of_mutations += 1;
            self.set_changed(true);
        }
        debug_assert!(self.test.is_valid(), "mutation broke the test case:\n{}", self.test);
        changed
    }

    fn mutation_delete<R: Rng + ?Sized>(&mut self, factory: &TestFactory, rng: &mut R) -> bool {
        if self.test.is_empty() {
            return false;
        }
        let p = 1.0 / self.test.len() as f64;
        let mut changed = false;
        for position in (0..self.test.len()).rev() {
            if position >= self.test.len() || !randomness::chance(rng, p) {
                continue;
            }
            match factory.delete_statement_gracefully(&mut self.test, position, rng) {
                Ok(()) => {
                    changed = true;
                    self.record(MutationKind::Deletion, position);
                }
                Err(err) => debug!("deleting statement {} failed: {}", position, err),
            }
        }
        changed
    }

    fn mutation_change<R: Rng + ?Sized>(&mut self, factory: &TestFactory, rng: &mut R) -> bool {
        if self.test.is_empty() {
            return false;
        }
        let p = 1.0 / self.test.len() as f64;
        let mut changed = false;
        let mut position = 0;
        while position < self.test.len() {
            if randomness::chance(rng, p) {
                let before = self.test.len();
                let mutated = match factory.mutate_statement(&mut self.test, position, rng) {
                    Ok(true) => true,
                    Ok(false) => {
                        let is_assignment = self.test.statement(position).map_or(true, |s| s.is_assignment());
                        !is_assignment && factory.change_random_call(&mut self.test, position, rng).unwrap_or(false)
                    }
                    Err(err) => {
                        debug!("changing statement {} failed: {}", position, err);
                        false
                    }
                };
                if mutated {
                    changed = true;
                    self.record(MutationKind::Change, position);
                }
                // Skip over statements inserted in front of this one.
                position += self.test.len().saturating_sub(before);
            }
            position += 1;
        }
        changed
    }

    fn mutation_insert<R: Rng + ?Sized>(&mut self, factory: &TestFactory, config: &MutationConfig, rng: &mut R) -> bool {
        let mut changed = false;
        let mut count = 0;
        while randomness::chance(rng, config.p_statement_insertion.powi(count)) && self.test.len() < config.chromosome_length {
            count += 1;
            let before = self.test.clone();
            match factory.insert_random_statement(&mut self.test, rng) {
                Ok(_) if self.test.len() > config.chromosome_length => {
                    trace!("insertion exceeds {} statements", config.chromosome_length);
                    self.test = before;
                    break;
                }
                Ok(position) => {
                    changed = true;
                    self.record(MutationKind::Insertion, position);
                }
                Err(err) => debug!("random insertion failed: {}", err),
            }
        }
        changed
    }

    fn record(&mut self, kind: MutationKind, position: usize) {
        trace!("{:?} at {}", kind, position);
        self.mutation_history.push(TestMutation { kind, position });
    }

    /// Single point crossover: keep this test's statements before
    /// `position1` and append `other`'s statements from `position2` on,
    /// re-satisfying their dependencies. The result replaces this test only
    /// if it stays within `chromosome_length`. Returns whether it did.
    pub fn crossover<R: Rng + ?Sized>(
        &mut self,
        other: &TestChromosome,
        position1: usize,
        position2: usize,
        factory: &TestFactory,
        config: &MutationConfig,
        rng: &mut R,
    ) -> bool {
        let mut offspring = self.test.clone();
        offspring.chop(position1);
        for position in position2..other.test.len() {
            if let Err(err) = factory.append_statement(&mut offspring, &other.test, position, rng) {
                debug!("crossover skips statement {}: {}", position, err);
            }
        }
        if offspring.len() > config.chromosome_length {
            debug!(
                "crossover offspring has {} statements, limit is {}",
                offspring.len(),
                config.chromosome_length
            );
            return false;
        }
        self.test = offspring;
        self.set_changed(true);
        true
    }
}

impl fmt::Display for TestChromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fitness() {
            Some(fitness) => writeln!(f, "// fitness {}", fitness)?,
            None => writeln!(f, "// not evaluated")?,
        }
        write!(f, "{}", self.test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{site_fn, CallableSite, StaticCatalog};
    use crate::config::FactoryConfig;
    use crate::randomness::seeded;
    use crate::runtime::Value;
    use crate::statement::{LiteralValue, StatementKind};
    use crate::types::{ClassType, TypeRef};

    fn factory() -> TestFactory {
        let class = Arc::new(ClassType::new("Counter"));
        let counter = TypeRef::Class(class.clone());
        let catalog = StaticCatalog::new()
            .with_target(CallableSite::constructor(class, vec![], site_fn(|_, _, _| Ok(Value::Null))))
            .with_target(CallableSite::method(
                counter,
                "add",
                vec![TypeRef::int()],
                TypeRef::int(),
                site_fn(|_, _, _| Ok(Value::Int(0))),
            ));
        TestFactory::new(Arc::new(catalog), FactoryConfig::default())
    }

    fn literals(values: &[i32]) -> TestCase {
        let mut test = TestCase::new();
        for value in values {
            test.add(StatementKind::Literal(LiteralValue::Int(*value))).unwrap();
        }
        test
    }

    #[test]
    fn test_mutation_preserves_validity_and_length() {
        let factory = factory();
        let config = MutationConfig::default();
        let mut rng = seeded(31);
        let mut chromosome = TestChromosome::new(TestCase::new());
        for _ in 0..100 {
            chromosome.mutate(&factory, &config, &mut rng);
            assert!(chromosome.test().is_valid());
            assert!(chromosome.len() <= config.chromosome_length);
        }
    }

    #[test]
    fn test_mutation_chops_long_tests() {
        let factory = factory();
        let config = MutationConfig {
            chromosome_length: 3,
            p_test_delete: 0.0,
            p_test_change: 0.0,
            p_test_insert: 0.0,
            ..MutationConfig::default()
        };
        let mut chromosome = TestChromosome::new(literals(&[1, 2, 3, 4, 5]));
        assert!(chromosome.mutate(&factory, &config, &mut seeded(32)));
        assert_eq!(chromosome.len(), 3);
        assert!(chromosome.is_changed());
    }

    #[test]
    fn test_crossover_joins_prefix_and_suffix() {
        let factory = factory();
        let config = MutationConfig::default();
        let mut first = TestChromosome::new(literals(&[1, 2, 3]));
        let second = TestChromosome::new(literals(&[7, 8, 9]));
        assert!(first.crossover(&second, 2, 1, &factory, &config, &mut seeded(33)));
        let values: Vec<_> = first.test().iter().filter_map(|s| s.literal().cloned()).collect();
        assert_eq!(
            values,
            vec![LiteralValue::Int(1), LiteralValue::Int(2), LiteralValue::Int(8), LiteralValue::Int(9)]
        );
    }

    #[test]
    fn test_crossover_rejects_oversized_offspring() {
        let factory = factory();
        let config = MutationConfig {
            chromosome_length: 4,
            ..MutationConfig::default()
        };
        let mut first = TestChromosome::new(literals(&[1, 2, 3]));
        let original = first.test().clone();
        let second = TestChromosome::new(literals(&[7, 8, 9]));
        assert!(!first.crossover(&second, 3, 0, &factory, &config, &mut seeded(34)));
        assert_eq!(first.test(), &original);
    }

    #[test]
    fn test_clones_are_independent() {
        let factory = factory();
        let config = MutationConfig::default();
        let original = TestChromosome::new(literals(&[1, 2, 3]));
        let mut copy = original.clone();
        let mut rng = seeded(35);
        while !copy.mutate(&factory, &config, &mut rng) {}
        assert_eq!(original.test(), &literals(&[1, 2, 3]));
    }
}
