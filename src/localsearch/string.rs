use log::debug;

use super::{edit_literal, exhausted, literal_at, LocalSearch, LocalSearchObjective};
use crate::chromosome::TestChromosome;
use crate::config::LocalSearchConfig;
use crate::executor::ExecutorResult;
use crate::statement::LiteralValue;

/// Character-wise search on a string literal: delete characters right to
/// left while fitness does not get worse, then try every character of the
/// configured range at every position, then grow the string at both ends
/// while that improves fitness.
pub struct StringLocalSearch {
    config: LocalSearchConfig,
}

impl StringLocalSearch {
    pub fn new(config: LocalSearchConfig) -> Self {
        StringLocalSearch { config }
    }

    fn characters(&self) -> impl Iterator<Item = char> {
        let (low, high) = self.config.char_range;
        (low..=high).filter_map(char::from_u32)
    }

    fn current(chromosome: &TestChromosome, position: usize) -> Vec<char> {
        literal_at(chromosome, position)
            .and_then(LiteralValue::as_str)
            .map(|s| s.chars().collect())
            .unwrap_or_default()
    }

    fn set(chromosome: &mut TestChromosome, position: usize, chars: &[char]) -> bool {
        let value: String = chars.iter().collect();
        edit_literal(chromosome, position, |literal| literal.set_string(value))
    }

    fn exhausted(&self, objective: &dyn LocalSearchObjective) -> bool {
        exhausted(objective, self.config.max_evaluations)
    }

    fn remove_characters(
        &self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
        backup: &mut TestChromosome,
    ) -> ExecutorResult<bool> {
        let mut kept = false;
        let length = Self::current(chromosome, position).len();
        for index in (0..length).rev() {
            if self.exhausted(objective) {
                break;
            }
            let mut chars = Self::current(chromosome, position);
            chars.remove(index);
            if Self::set(chromosome, position, &chars) && objective.has_not_worsened(chromosome)? {
                *backup = chromosome.clone();
                kept = true;
            } else {
                *chromosome = backup.clone();
            }
        }
        Ok(kept)
    }

    fn replace_characters(
        &self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
        backup: &mut TestChromosome,
    ) -> ExecutorResult<bool> {
        let mut kept = false;
        let length = Self::current(chromosome, position).len();
        for index in 0..length {
            for c in self.characters() {
                if self.exhausted(objective) {
                    return Ok(kept);
                }
                let mut chars = Self::current(chromosome, position);
                if chars[index] == c {
                    continue;
                }
                chars[index] = c;
                if Self::set(chromosome, position, &chars) && objective.has_improved(chromosome)? {
                    *backup = chromosome.clone();
                    kept = true;
                } else {
                    *chromosome = backup.clone();
                }
            }
        }
        Ok(kept)
    }

    /// Insert characters at the end, then at the front, as long as one of
    /// them improves fitness.
    fn add_characters(
        &self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
        backup: &mut TestChromosome,
    ) -> ExecutorResult<bool> {
        let mut kept = false;
        for at_front in [false, true] {
            let mut added = true;
            while added {
                added = false;
                for c in self.characters() {
                    if self.exhausted(objective) {
                        return Ok(kept);
                    }
                    let mut chars = Self::current(chromosome, position);
                    if at_front {
                        chars.insert(0, c);
                    } else {
                        chars.push(c);
                    }
                    if Self::set(chromosome, position, &chars) && objective.has_improved(chromosome)? {
                        *backup = chromosome.clone();
                        kept = true;
                        added = true;
                        break;
                    }
                    *chromosome = backup.clone();
                }
            }
        }
        Ok(kept)
    }
}

impl LocalSearch for StringLocalSearch {
    fn run(
        &mut self,
        chromosome: &mut TestChromosome,
        position: usize,
        objective: &mut dyn LocalSearchObjective,
    ) -> ExecutorResult<bool> {
        if literal_at(chromosome, position).and_then(LiteralValue::as_str).is_none() {
            return Ok(false);
        }
        objective.has_not_worsened(chromosome)?;
        let mut backup = chromosome.clone();
        let removed = self.remove_characters(chromosome, position, objective, &mut backup)?;
        let replaced = self.replace_characters(chromosome, position, objective, &mut backup)?;
        let added = self.add_characters(chromosome, position, objective, &mut backup)?;
        debug!(
            "string search at {}: removed {}, replaced {}, added {}",
            position, removed, replaced, added
        );
        Ok(removed || replaced || added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localsearch::tests::single_literal;

    /// Minimizes the edit distance of the string at position 0 to a target.
    struct EditDistance {
        target: Vec<char>,
        best: Option<usize>,
        evaluations: usize,
    }

    impl EditDistance {
        fn new(target: &str) -> Self {
            EditDistance {
                target: target.chars().collect(),
                best: None,
                evaluations: 0,
            }
        }

        fn distance(&mut self, chromosome: &TestChromosome) -> usize {
            self.evaluations += 1;
            let value = StringLocalSearch::current(chromosome, 0);
            let mut row: Vec<usize> = (0..=self.target.len()).collect();
            for (i, a) in value.iter().enumerate() {
                let mut previous = row[0];
                row[0] = i + 1;
                for (j, b) in self.target.iter().enumerate() {
                    let substitution = previous + usize::from(a != b);
                    previous = row[j + 1];
                    row[j + 1] = substitution.min(row[j] + 1).min(row[j + 1] + 1);
                }
            }
            row[self.target.len()]
        }
    }

    impl LocalSearchObjective for EditDistance {
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

    #[test]
    fn test_string_search_reaches_target() {
        let mut chromosome = single_literal(LiteralValue::String("xyzzy".to_string()));
        let mut objective = EditDistance::new("ab");
        let changed = StringLocalSearch::new(LocalSearchConfig::default())
            .run(&mut chromosome, 0, &mut objective)
            .unwrap();
        assert!(changed);
        assert_eq!(literal_at(&chromosome, 0).and_then(LiteralValue::as_str), Some("ab"));
        assert_eq!(objective.best, Some(0));
    }

    #[test]
    fn test_string_search_grows_empty_string() {
        let mut chromosome = single_literal(LiteralValue::String(String::new()));
        let mut objective = EditDistance::new("ok");
        StringLocalSearch::new(LocalSearchConfig::default())
            .run(&mut chromosome, 0, &mut objective)
            .unwrap();
        assert_eq!(objective.best, Some(0));
    }
}
