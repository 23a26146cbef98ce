use log::debug;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use super::{exhausted, LocalSearch, LocalSearchObjective};
use crate::chromosome::TestChromosome;
use crate::executor::ExecutorResult;
use crate::factory::TestFactory;

/// Random probing on a call, constructor or field read: each probe either
/// swaps the operation for another one producing the same type or changes
/// its operands. The first improving probe is kept.
pub struct ReferenceLocalSearch<'a> {
    factory: &'a TestFactory,
    probes: usize,
    max_evaluations: usize,
    rng: ChaCha8Rng,
}

impl<'a> ReferenceLocalSearch<'a> {
    pub fn new(factory: &'a TestFactory, probes: usize, max_evaluations: usize, rng: ChaCha8Rng) -> Self {
        ReferenceLocalSearch {
            factory,
            probes,
            max_evaluations,
            rng,
        }
    }

    fn probe(&mut self, chromosome: &mut TestChromosome, position: usize) -> bool {
        let test = chromosome.test_mut();
        let outcome = if self.rng.gen_bool(0.5) {
            self.factory.change_random_call(test, position, &mut self.rng)
        } else {
            self.factory.mutate_statement(test, position, &mut self.rng)
        };
        match outcome {
            Ok(changed) => changed,
            Err(err) => {
                debug!("probe at {} failed: {}", position, err);
                false
            }
        }
    }
}

impl<'a> LocalSearch for ReferenceLocalSearch<'a> {
    fn run(
        &mut self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
    ) -> ExecutorResult<bool> {
        let is_reference = chromosome
            .test()
            .statement(position)
            .map_or(false, |statement| statement.callable_site().is_some() && !statement.is_assignment());
        if !is_reference {
            return Ok(false);
        }
        objective.has_not_worsened(chromosome)?;
        let backup = chromosome.clone();
        for _ in 0..self.probes {
            if exhausted(objective, self.max_evaluations) {
                break;
            }
            if self.probe(chromosome, position) && objective.has_improved(chromosome)? {
                debug!("reference search improved statement {}", position);
                return Ok(true);
            }
            *chromosome = backup.clone();
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{site_fn, CallableSite, StaticCatalog};
    use crate::config::FactoryConfig;
    use crate::randomness::seeded;
    use crate::runtime::Value;
    use crate::statement::StatementKind;
    use crate::testcase::TestCase;
    use crate::types::{ClassType, TypeRef};

    /// Prefers tests whose last statement calls `wanted`.
    struct PreferSite {
        wanted: CallableSite,
        best: Option<u8>,
        evaluations: usize,
    }

    impl PreferSite {
        fn score(&mut self, chromosome: &TestChromosome) -> u8 {
            self.evaluations += 1;
            let test = chromosome.test();
            let last = test.statement(test.len() - 1).and_then(|s| s.callable_site().cloned());
            u8::from(last.as_ref() != Some(&self.wanted))
        }
    }

    impl LocalSearchObjective for PreferSite {
        fn has_improved(&mut self, chromosome: &mut TestChromosome) -> ExecutorResult<bool> {
            let score = self.score(chromosome);
            let improved = self.best.map_or(false, |best| score < best);
            if improved || self.best.is_none() {
                self.best = Some(score);
            }
            Ok(improved)
        }

        fn has_not_worsened(&mut self, chromosome: &mut TestChromosome) -> ExecutorResult<bool> {
            let score = self.score(chromosome);
            let kept = self.best.map_or(true, |best| score <= best);
            if kept {
                self.best = Some(score);
            }
            Ok(kept)
        }

        fn evaluations(&self) -> usize {
            self.evaluations
        }
    }

    #[test]
    fn test_probes_find_alternative_generator() {
        let class = Arc::new(ClassType::new("Widget"));
        let widget = TypeRef::Class(class.clone());
        let constructor = CallableSite::constructor(class, vec![], site_fn(|_, _, _| Ok(Value::Null)));
        let make = CallableSite::static_method(
            widget.clone(),
            "make",
            vec![],
            widget,
            site_fn(|_, _, _| Ok(Value::Null)),
        );
        let catalog = StaticCatalog::new().with_target(constructor.clone()).with_site(make.clone());
        let factory = TestFactory::new(Arc::new(catalog), FactoryConfig::default());

        let mut test = TestCase::new();
        test.add(StatementKind::NewInstance { constructor, args: vec![] }).unwrap();
        let mut chromosome = TestChromosome::new(test);
        let mut objective = PreferSite {
            wanted: make.clone(),
            best: None,
            evaluations: 0,
        };
        let mut search = ReferenceLocalSearch::new(&factory, 50, 1000, seeded(51));
        assert!(search.run(&mut chromosome, 0, &mut objective).unwrap());
        assert_eq!(chromosome.test().statement(0).unwrap().callable_site(), Some(&make));
    }
}
