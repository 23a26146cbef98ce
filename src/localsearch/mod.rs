//! Local search on individual statements
//!
//! Local search refines one value of a test case at a time, guided by a
//! [`LocalSearchObjective`] that only answers two questions about a
//! tentative edit: did fitness improve, and did it at least not get worse.
//! Every search keeps a copy of the last accepted chromosome and restores it
//! whenever an edit is rejected, so a search never leaves the chromosome worse
//! than it found it.
//!
//! | statement        | search                                               |
//! |------------------|------------------------------------------------------|
//! | integral literal | [`IntegerLocalSearch`]: exponential steps            |
//! | floating literal | [`FloatLocalSearch`]: steps per precision, rounding  |
//! | string literal   | [`StringLocalSearch`]: delete, replace, insert       |
//! | boolean literal  | [`BooleanLocalSearch`]: flip                         |
//! | call             | [`ReferenceLocalSearch`]: random probes              |

mod numeric;
mod reference;
mod string;

pub use numeric::{BooleanLocalSearch, FloatLocalSearch, IntegerLocalSearch};
pub use reference::ReferenceLocalSearch;
pub use string::StringLocalSearch;

use log::{debug, trace};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::chromosome::TestChromosome;
use crate::config::LocalSearchConfig;
use crate::executor::{ExecutionSandbox, ExecutorResult};
use crate::factory::TestFactory;
use crate::fitness::TestFitnessFunction;
use crate::randomness;
use crate::statement::{LiteralValue, StatementKind};

/// Oracle deciding whether a tentative edit is kept.
pub trait LocalSearchObjective {
    /// Whether fitness is strictly better than the best seen so far. An
    /// improvement becomes the new best.
    fn has_improved(&mut self, chromosome: &mut TestChromosome) -> ExecutorResult<bool>;

    /// Whether fitness is no worse than the best seen so far. The first call
    /// establishes the baseline and always succeeds.
    fn has_not_worsened(&mut self, chromosome: &mut TestChromosome) -> ExecutorResult<bool>;

    /// Number of fitness evaluations performed.
    fn evaluations(&self) -> usize;
}

/// Objective minimizing one fitness function, executing through a sandbox.
pub struct DefaultLocalSearchObjective<'a> {
    fitness: &'a dyn TestFitnessFunction,
    sandbox: &'a mut dyn ExecutionSandbox,
    best: Option<f64>,
    evaluations: usize,
}

impl<'a> DefaultLocalSearchObjective<'a> {
    pub fn new(fitness: &'a dyn TestFitnessFunction, sandbox: &'a mut dyn ExecutionSandbox) -> Self {
        DefaultLocalSearchObjective {
            fitness,
            sandbox,
            best: None,
            evaluations: 0,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    fn evaluate(&mut self, chromosome: &mut TestChromosome) -> ExecutorResult<f64> {
        self.evaluations += 1;
        self.fitness.fitness(chromosome, &mut *self.sandbox)
    }
}

impl<'a> LocalSearchObjective for DefaultLocalSearchObjective<'a> {
    fn has_improved(&mut self, chromosome: &mut TestChromosome) -> ExecutorResult<bool> {
        let fitness = self.evaluate(chromosome)?;
        let improved = self.best.map_or(false, |best| fitness < best);
        if improved || self.best.is_none() {
            self.best = Some(fitness);
        }
        trace!("{} -> {} (improved: {})", self.fitness.label(), fitness, improved);
        Ok(improved)
    }

    fn has_not_worsened(&mut self, chromosome: &mut TestChromosome) -> ExecutorResult<bool> {
        let fitness = self.evaluate(chromosome)?;
        let kept = self.best.map_or(true, |best| fitness <= best);
        if kept {
            self.best = Some(fitness);
        }
        Ok(kept)
    }

    fn evaluations(&self) -> usize {
        self.evaluations
    }
}

/// A search on the statement at one position.
pub trait LocalSearch {
    /// Search from the current value of the statement at `position`.
    /// Returns whether an improvement was kept.
    fn run(
        &mut self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
    ) -> ExecutorResult<bool>;
}

/// The search suited to the statement at `position`, if any.
pub fn for_statement<'a>(
    chromosome: &TestChromosome,
    position: usize,
    config: &LocalSearchConfig,
    factory: &'a TestFactory,
    rng: ChaCha8Rng,
) -> Option<Box<dyn LocalSearch + 'a>> {
    let statement = chromosome.test().statement(position)?;
    let max_evaluations = config.max_evaluations;
    let search: Box<dyn LocalSearch + 'a> = match statement.kind() {
        StatementKind::Literal(LiteralValue::Boolean(_)) => Box::new(BooleanLocalSearch::new(max_evaluations)),
        StatementKind::Literal(LiteralValue::String(_)) => Box::new(StringLocalSearch::new(config.clone())),
        StatementKind::Literal(literal) if literal.floating_value().is_some() => {
            Box::new(FloatLocalSearch::new(config.clone()))
        }
        StatementKind::Literal(literal) if literal.integral_value().is_some() => {
            Box::new(IntegerLocalSearch::new(max_evaluations))
        }
        StatementKind::Literal(_) => return None,
        StatementKind::NewInstance { .. } | StatementKind::Call { .. } | StatementKind::ReadField { .. } => {
            Box::new(ReferenceLocalSearch::new(factory, config.local_search_probes, max_evaluations, rng))
        }
        _ => return None,
    };
    Some(search)
}

/// Run local search on every statement of `chromosome`, last to first.
/// Returns whether anything improved.
pub fn search_test(
    chromosome: &mut TestChromosome,
    objective: &mut dyn LocalSearchObjective,
    config: &LocalSearchConfig,
    factory: &TestFactory,
    rng: &mut ChaCha8Rng,
) -> ExecutorResult<bool> {
    let mut improved = false;
    objective.has_not_worsened(chromosome)?;
    let mut position = chromosome.len();
    while position > 0 {
        position -= 1;
        if objective.evaluations() >= config.max_evaluations {
            debug!("local search budget of {} evaluations exhausted", config.max_evaluations);
            break;
        }
        if position >= chromosome.len() {
            continue;
        }
        let probes = randomness::seeded(rng.gen());
        if let Some(mut search) = for_statement(chromosome, position, config, factory, probes) {
            improved |= search.run(chromosome, position, objective)?;
        }
    }
    chromosome.set_local_search_applied(true);
    Ok(improved)
}

/// Check the remaining budget.
fn exhausted(objective: &dyn LocalSearchObjective, max_evaluations: usize) -> bool {
    objective.evaluations() >= max_evaluations
}

/// Edit the literal at `position`. Returns whether the value changed.
fn edit_literal(
    chromosome: &mut TestChromosome,
    position: usize,
    edit: impl FnOnce(&mut LiteralValue) -> bool,
) -> bool {
    match chromosome.test_mut().literal_mut(position) {
        Some(literal) => edit(literal),
        None => false,
    }
}

fn literal_at(chromosome: &TestChromosome, position: usize) -> Option<&LiteralValue> {
    chromosome.test().statement(position).and_then(|statement| statement.literal())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::statement::StatementKind;
    use crate::testcase::TestCase;

    /// Objective minimizing `|value - target|` of the integral or floating
    /// literal at position 0, without executing anything.
    pub(crate) struct DistanceObjective {
        pub target: f64,
        pub best: Option<f64>,
        pub evaluations: usize,
    }

    impl DistanceObjective {
        pub(crate) fn new(target: f64) -> Self {
            DistanceObjective {
                target,
                best: None,
                evaluations: 0,
            }
        }

        fn distance(&mut self, chromosome: &TestChromosome) -> f64 {
            self.evaluations += 1;
            let literal = literal_at(chromosome, 0);
            let value = literal
                .and_then(|l| l.floating_value().or_else(|| l.integral_value().map(|v| v as f64)))
                .unwrap_or(f64::INFINITY);
            (value - self.target).abs()
        }
    }

    impl LocalSearchObjective for DistanceObjective {
        fn has_improved(&mut self, chromosome: &mut TestChromosome) -> ExecutorResult<bool> {
            let d = self.distance(chromosome);
            let improved = self.best.map_or(false, |best| d < best);
            if improved || self.best.is_none() {
                self.best = Some(d);
            }
            Ok(improved)
        }

        fn has_not_worsened(&mut self, chromosome: &mut TestChromosome) -> ExecutorResult<bool> {
            let d = self.distance(chromosome);
            let kept = self.best.map_or(true, |best| d <= best);
            if kept {
                self.best = Some(d);
            }
            Ok(kept)
        }

        fn evaluations(&self) -> usize {
            self.evaluations
        }
    }

    pub(crate) fn single_literal(literal: LiteralValue) -> TestChromosome {
        let mut test = TestCase::new();
        test.add(StatementKind::Literal(literal)).unwrap();
        TestChromosome::new(test)
    }

    #[test]
    fn test_search_test_marks_chromosome() {
        let factory = TestFactory::new(
            std::sync::Arc::new(crate::catalog::StaticCatalog::new()),
            crate::config::FactoryConfig::default(),
        );
        let mut chromosome = single_literal(LiteralValue::Int(7));
        let mut objective = DistanceObjective::new(100.0);
        let mut rng = crate::randomness::seeded(41);
        let improved = search_test(&mut chromosome, &mut objective, &LocalSearchConfig::default(), &factory, &mut rng)
            .unwrap();
        assert!(improved);
        assert!(chromosome.has_local_search_been_applied());
        assert_eq!(literal_at(&chromosome, 0), Some(&LiteralValue::Int(100)));
    }
}
