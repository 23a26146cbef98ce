use log::debug;

use super::{edit_literal, exhausted, literal_at, LocalSearch, LocalSearchObjective};
use crate::chromosome::TestChromosome;
use crate::config::LocalSearchConfig;
use crate::executor::ExecutorResult;
use crate::statement::LiteralValue;

/// Hill climbing on an integral literal with exponentially growing steps.
pub struct IntegerLocalSearch {
    max_evaluations: usize,
}

impl IntegerLocalSearch {
    pub fn new(max_evaluations: usize) -> Self {
        IntegerLocalSearch { max_evaluations }
    }

    /// Step by `delta`, doubling it after every improving step. Leaves the
    /// chromosome at the last improving value.
    fn climb(
        &self,
        chromosome: &mut TestChromosome,
        position: usize,
        mut delta: i64,
        objective: &mut dyn LocalSearchObjective,
        backup: &mut TestChromosome,
    ) -> ExecutorResult<bool> {
        let mut improved = false;
        while !exhausted(objective, self.max_evaluations) {
            let changed = edit_literal(chromosome, position, |literal| match literal.integral_value() {
                Some(value) => literal.set_integral(value.saturating_add(delta)),
                None => false,
            });
            if changed && objective.has_improved(chromosome)? {
                *backup = chromosome.clone();
                improved = true;
                delta = delta.saturating_mul(2);
            } else {
                *chromosome = backup.clone();
                break;
            }
        }
        Ok(improved)
    }
}

impl LocalSearch for IntegerLocalSearch {
    fn run(
        &mut self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
    ) -> ExecutorResult<bool> {
        if literal_at(chromosome, position).and_then(LiteralValue::integral_value).is_none() {
            return Ok(false);
        }
        objective.has_not_worsened(chromosome)?;
        let mut backup = chromosome.clone();
        let mut improved = false;
        let mut done = false;
        while !done && !exhausted(objective, self.max_evaluations) {
            done = true;
            for direction in [1, -1] {
                if self.climb(chromosome, position, direction, objective, &mut backup)? {
                    improved = true;
                    done = false;
                    break;
                }
            }
        }
        debug!(
            "integer search at {} ended at {:?}",
            position,
            literal_at(chromosome, position)
        );
        Ok(improved)
    }
}

/// Hill climbing on a floating point literal: whole steps first, then
/// steps of `10^-p` for each decimal precision `p`, finally rounding the
/// value to the coarsest precision that does not worsen fitness.
pub struct FloatLocalSearch {
    config: LocalSearchConfig,
}

impl FloatLocalSearch {
    pub fn new(config: LocalSearchConfig) -> Self {
        FloatLocalSearch { config }
    }

    fn climb(
        &self,
        chromosome: &mut TestChromosome,
        position: usize,
        mut delta: f64,
        objective: &mut dyn LocalSearchObjective,
        backup: &mut TestChromosome,
    ) -> ExecutorResult<bool> {
        let mut improved = false;
        while !exhausted(objective, self.config.max_evaluations) {
            let changed = edit_literal(chromosome, position, |literal| match literal.floating_value() {
                Some(value) if (value + delta).is_finite() => literal.set_floating(value + delta),
                _ => false,
            });
            if changed && objective.has_improved(chromosome)? {
                *backup = chromosome.clone();
                improved = true;
                delta *= 2.0;
            } else {
                *chromosome = backup.clone();
                break;
            }
        }
        Ok(improved)
    }

    fn search_precision(
        &self,
        chromosome: &mut TestChromosome,
        position: usize,
        step: f64,
        objective: &mut dyn LocalSearchObjective,
        backup: &mut TestChromosome,
    ) -> ExecutorResult<bool> {
        let mut improved = false;
        let mut done = false;
        while !done && !exhausted(objective, self.config.max_evaluations) {
            done = true;
            for direction in [1.0, -1.0] {
                if self.climb(chromosome, position, direction * step, objective, backup)? {
                    improved = true;
                    done = false;
                    break;
                }
            }
        }
        Ok(improved)
    }

    /// Round to the coarsest precision that keeps fitness.
    fn reduce_precision(
        &self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
        backup: &mut TestChromosome,
    ) -> ExecutorResult<()> {
        for precision in 0..=self.config.float_precision_digits {
            if exhausted(objective, self.config.max_evaluations) {
                break;
            }
            let value = match literal_at(chromosome, position).and_then(LiteralValue::floating_value) {
                Some(value) => value,
                None => break,
            };
            let rounded = round_to(value, precision);
            if rounded == value {
                break;
            }
            let changed = edit_literal(chromosome, position, |literal| literal.set_floating(rounded));
            if changed && objective.has_not_worsened(chromosome)? {
                *backup = chromosome.clone();
                break;
            }
            *chromosome = backup.clone();
        }
        Ok(())
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    let rounded = (value * scale).round() / scale;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}

impl LocalSearch for FloatLocalSearch {
    fn run(
        &mut self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
    ) -> ExecutorResult<bool> {
        if literal_at(chromosome, position).and_then(LiteralValue::floating_value).is_none() {
            return Ok(false);
        }
        objective.has_not_worsened(chromosome)?;
        let mut backup = chromosome.clone();
        let mut improved = false;
        for precision in 0..=self.config.float_precision_digits {
            let step = 10f64.powi(-(precision as i32));
            improved |= self.search_precision(chromosome, position, step, objective, &mut backup)?;
        }
        self.reduce_precision(chromosome, position, objective, &mut backup)?;
        Ok(improved)
    }
}

/// Flip a boolean literal and keep it if that helps.
pub struct BooleanLocalSearch {
    max_evaluations: usize,
}

impl BooleanLocalSearch {
    pub fn new(max_evaluations: usize) -> Self {
        BooleanLocalSearch { max_evaluations }
    }
}

impl LocalSearch for BooleanLocalSearch {
    fn run(
        &mut self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
    ) -> ExecutorResult<bool> {
        if !matches!(literal_at(chromosome, position), Some(LiteralValue::Boolean(_))) {
            return Ok(false);
        }
        objective.has_not_worsened(chromosome)?;
        if exhausted(objective, self.max_evaluations) {
            return Ok(false);
        }
        let backup = chromosome.clone();
        edit_literal(chromosome, position, |literal| match literal {
            LiteralValue::Boolean(value) => {
                *value = !*value;
                true
            }
            _ => false,
        });
        if objective.has_improved(chromosome)? {
            Ok(true)
        } else {
            *chromosome = backup;
            Ok(false)
        }
    }
}
