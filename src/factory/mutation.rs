//! Statement-level mutation.
//!
//! Each statement kind has its own notion of a small change: literals are
//! perturbed or re-drawn, arrays change length, calls swap one of their
//! operands for another visible variable, assignments change their value or
//! their target.

use log::{debug, trace};
use rand::Rng;

use super::{atomically, construction_failed, FactoryResult, TestFactory};
use crate::randomness;
use crate::statement::StatementKind;
use crate::testcase::TestCase;
use crate::types::TypeRef;
use crate::variable::{ArrayIndexRef, FieldRef, VariableReference};

impl TestFactory {
    /// Apply a small random change to the statement at `position`. Returns
    /// whether the test case changed.
    pub fn mutate_statement<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        position: usize,
        rng: &mut R,
    ) -> FactoryResult<bool> {
        let kind = test
            .statement(position)
            .map(|statement| statement.kind().clone())
            .ok_or_else(|| construction_failed(format!("no statement at {}", position)))?;
        trace!("mutating {} at {}", kind.name(), position);
        match kind {
            StatementKind::Literal(_) => match test.literal_mut(position) {
                Some(literal) => Ok(literal.mutate(rng, self.config())),
                None => Ok(false),
            },
            StatementKind::NullLiteral(_) => Ok(false),
            StatementKind::NewArray { length, .. } => {
                let var = test.return_value(position)?;
                let min = test.max_index_used(&var).map_or(0, |max| max + 1);
                let max = self.config().max_array.max(min);
                if min == max && length == min {
                    return Ok(false);
                }
                let mut new_length = length;
                while new_length == length {
                    new_length = rng.gen_range(min..=max);
                }
                self.resize_array(test, position, new_length)
            }
            StatementKind::NewInstance { .. } | StatementKind::Call { .. } | StatementKind::ReadField { .. } => {
                if !randomness::chance(rng, self.config().p_change_parameter) {
                    return Ok(false);
                }
                atomically(test, |test| self.mutate_operands(test, position, kind, rng))
            }
            StatementKind::AssignIndex { .. } | StatementKind::AssignField { .. } => {
                atomically(test, |test| self.mutate_assignment(test, position, kind, rng))
            }
        }
    }

    /// Change the length of the array defined at `position`. Statements
    /// touching indices that no longer exist are removed.
    pub fn resize_array(&self, test: &mut TestCase, position: usize, new_length: usize) -> FactoryResult<bool> {
        let (element_type, length) = match test.statement(position).map(|s| s.kind()) {
            Some(StatementKind::NewArray { element_type, length }) => (element_type.clone(), *length),
            _ => return Err(construction_failed(format!("no array at {}", position))),
        };
        if new_length == length {
            return Ok(false);
        }
        atomically(test, |test| {
            let array = test.return_value(position)?;
            if new_length < length {
                while let Some(doomed) = (position + 1..test.len()).find(|&p| touches_index(test, p, &array, new_length)) {
                    debug!("removing statement {} using an index beyond {}", doomed, new_length);
                    test.remove(doomed)?;
                }
            }
            test.set_statement(
                position,
                StatementKind::NewArray {
                    element_type,
                    length: new_length,
                },
            )?;
            Ok(true)
        })
    }

    fn mutate_operands<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        position: usize,
        kind: StatementKind,
        rng: &mut R,
    ) -> FactoryResult<bool> {
        let (site, receiver, args) = match kind {
            StatementKind::NewInstance { constructor, args } => (constructor, None, args),
            StatementKind::Call { method, receiver, args } => (method, receiver, args),
            StatementKind::ReadField { field, source } => (field, source, Vec::new()),
            _ => return Ok(false),
        };
        let operands = args.len() + usize::from(receiver.is_some());
        let p_operand = 1.0 / (operands as f64 + 1.0);
        let mut position = position;
        let mut changed = false;

        let receiver = match receiver {
            Some(current) if randomness::chance(rng, p_operand) => {
                match self.replacement(test, site.declaring_type(), &current, &mut position, false, rng)? {
                    Some(replacement) => {
                        changed = true;
                        Some(replacement)
                    }
                    None => Some(current),
                }
            }
            other => other,
        };

        let mut new_args = Vec::with_capacity(args.len());
        for (current, ty) in args.into_iter().zip(site.parameter_types()) {
            if randomness::chance(rng, p_operand) {
                if let Some(replacement) = self.replacement(test, ty, &current, &mut position, true, rng)? {
                    changed = true;
                    new_args.push(replacement);
                    continue;
                }
            }
            new_args.push(current);
        }
        if !changed {
            return Ok(false);
        }

        let kind = if site.is_constructor() {
            StatementKind::NewInstance {
                constructor: site,
                args: new_args,
            }
        } else if site.is_field() {
            StatementKind::ReadField { field: site, source: receiver }
        } else {
            StatementKind::Call {
                method: site,
                receiver,
                args: new_args,
            }
        };
        test.set_statement(position, kind)?;
        Ok(true)
    }

    fn mutate_assignment<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        position: usize,
        kind: StatementKind,
        rng: &mut R,
    ) -> FactoryResult<bool> {
        let mut position = position;
        let change_value = rng.gen_bool(0.5);
        let kind = match kind {
            StatementKind::AssignIndex { target, value } => {
                if change_value {
                    let ty = test.type_of(&VariableReference::ArrayIndex(target.clone()))?;
                    match self.replacement(test, &ty, &value, &mut position, true, rng)? {
                        Some(value) => StatementKind::AssignIndex { target, value },
                        None => return Ok(false),
                    }
                } else {
                    let length = test.array_length(&target.array).unwrap_or(0);
                    if length < 2 {
                        return Ok(false);
                    }
                    let mut index = target.index;
                    while index == target.index {
                        index = rng.gen_range(0..length);
                    }
                    StatementKind::AssignIndex {
                        target: ArrayIndexRef {
                            array: target.array,
                            index,
                        },
                        value,
                    }
                }
            }
            StatementKind::AssignField { target, value } => {
                if change_value || target.source.is_none() {
                    let ty = target.field.return_type().clone();
                    match self.replacement(test, &ty, &value, &mut position, true, rng)? {
                        Some(value) => StatementKind::AssignField { target, value },
                        None => return Ok(false),
                    }
                } else {
                    let current = target.source.as_deref().cloned();
                    let owner = target.field.declaring_type().clone();
                    let replacement = match current {
                        Some(current) => self.replacement(test, &owner, &current, &mut position, false, rng)?,
                        None => None,
                    };
                    match replacement {
                        Some(source) => StatementKind::AssignField {
                            target: FieldRef {
                                field: target.field,
                                source: Some(Box::new(source)),
                            },
                            value,
                        },
                        None => return Ok(false),
                    }
                }
            }
            _ => return Ok(false),
        };
        test.set_statement(position, kind)?;
        Ok(true)
    }

    /// Another variable to use in place of `current` in the statement at
    /// `position`: an explicit null (inserted right before the statement,
    /// which shifts `position`) or a visible variable of type `ty`.
    fn replacement<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        ty: &TypeRef,
        current: &VariableReference,
        position: &mut usize,
        allow_null: bool,
        rng: &mut R,
    ) -> FactoryResult<Option<VariableReference>> {
        if allow_null
            && ty.is_nullable()
            && !test.is_null_reference(current)
            && randomness::chance(rng, self.config().null_probability)
        {
            let null = test.insert(StatementKind::NullLiteral(ty.clone()), *position)?;
            *position += 1;
            return Ok(Some(null));
        }
        let candidates: Vec<VariableReference> = test
            .objects_of_type(ty, *position)
            .into_iter()
            .filter(|candidate| candidate != current)
            .filter(|candidate| allow_null || !test.is_null_reference(candidate))
            .collect();
        Ok(randomness::choice(rng, &candidates).cloned())
    }
}

/// Whether the statement at `position` reads or writes `array[k]` for some
/// `k >= bound`.
fn touches_index(test: &TestCase, position: usize, array: &VariableReference, bound: usize) -> bool {
    let statement = match test.statement(position) {
        Some(statement) => statement,
        None => return false,
    };
    let target = statement.target();
    let mut vars = statement.variables_read();
    vars.push(&target);
    vars.into_iter().any(|var| {
        let mut link = Some(var);
        while let Some(current) = link {
            if let VariableReference::ArrayIndex(index_ref) = current {
                if index_ref.array.as_ref() == array && index_ref.index >= bound {
                    return true;
                }
            }
            link = current.additional_reference();
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::config::FactoryConfig;
    use crate::randomness::seeded;
    use crate::statement::LiteralValue;

    fn factory() -> TestFactory {
        TestFactory::new(Arc::new(StaticCatalog::new()), FactoryConfig::default())
    }

    fn array_with_writes(length: usize, writes: &[usize]) -> (TestCase, VariableReference) {
        let mut test = TestCase::new();
        let value = test.add(StatementKind::Literal(LiteralValue::Int(1))).unwrap();
        let array = test
            .add(StatementKind::NewArray {
                element_type: TypeRef::int(),
                length,
            })
            .unwrap();
        for &index in writes {
            test.add(StatementKind::AssignIndex {
                target: ArrayIndexRef {
                    array: Box::new(array.clone()),
                    index,
                },
                value: value.clone(),
            })
            .unwrap();
        }
        (test, array)
    }

    #[test]
    fn test_shrinking_drops_out_of_range_writers() {
        let (mut test, array) = array_with_writes(5, &[0, 3, 4]);
        assert!(factory().resize_array(&mut test, 1, 2).unwrap());
        assert_eq!(test.array_length(&array), Some(2));
        assert_eq!(test.len(), 3);
        assert_eq!(test.max_index_used(&array), Some(0));
        assert!(test.is_valid());
    }

    #[test]
    fn test_growing_keeps_writers() {
        let (mut test, array) = array_with_writes(2, &[0, 1]);
        assert!(factory().resize_array(&mut test, 1, 6).unwrap());
        assert_eq!(test.array_length(&array), Some(6));
        assert_eq!(test.len(), 4);
    }

    #[test]
    fn test_array_mutation_keeps_used_indices() {
        let (mut test, array) = array_with_writes(6, &[4]);
        let factory = factory();
        let mut rng = seeded(21);
        for _ in 0..20 {
            factory.mutate_statement(&mut test, 1, &mut rng).unwrap();
            assert!(test.array_length(&array).unwrap() >= 5);
            assert_eq!(test.len(), 3);
        }
    }

    #[test]
    fn test_null_literals_do_not_mutate() {
        let mut test = TestCase::new();
        test.add(StatementKind::NullLiteral(TypeRef::String)).unwrap();
        let before = test.clone();
        assert!(!factory().mutate_statement(&mut test, 0, &mut seeded(22)).unwrap());
        assert_eq!(test, before);
    }

    #[test]
    fn test_literal_mutation_changes_value() {
        let mut test = TestCase::new();
        test.add(StatementKind::Literal(LiteralValue::Int(10))).unwrap();
        assert!(factory().mutate_statement(&mut test, 0, &mut seeded(23)).unwrap());
        assert_ne!(test.statement(0).unwrap().literal(), Some(&LiteralValue::Int(10)));
    }
}
