//! Deleting statements and swapping the operation a statement performs.

use log::debug;
use rand::Rng;

use super::{atomically, construction_failed, FactoryResult, TestFactory};
use crate::catalog::{CallableSite, SiteKind};
use crate::randomness;
use crate::statement::StatementKind;
use crate::testcase::TestCase;
use crate::types::TypeRef;
use crate::variable::VariableReference;

impl TestFactory {
    /// Remove the statement at `position` and everything that depends on it.
    /// Returns the removed positions.
    pub fn delete_statement(&self, test: &mut TestCase, position: usize) -> FactoryResult<Vec<usize>> {
        Ok(test.remove(position)?)
    }

    /// Remove the statement at `position`, first pointing every later reader
    /// of its value at another visible variable of a compatible type. Readers
    /// that cannot be repaired are removed along with it.
    pub fn delete_statement_gracefully<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        position: usize,
        rng: &mut R,
    ) -> FactoryResult<()> {
        atomically(test, |test| {
            let statement = test
                .statement(position)
                .ok_or_else(|| construction_failed(format!("no statement at {}", position)))?;
            if statement.is_assignment() || statement.is_void() {
                test.remove(position)?;
                return Ok(());
            }
            let var = statement.return_value();
            let declared = statement.return_type().clone();
            let replacing_literal = statement.is_literal();

            let max_index = test.max_index_used(&var);
            let alternatives: Vec<VariableReference> = test
                .objects_of_type(&declared, position)
                .into_iter()
                .filter(|alternative| !alternative.contains(&var))
                .filter(|alternative| match (max_index, test.array_length(alternative)) {
                    (Some(max), Some(length)) => max < length,
                    _ => true,
                })
                .filter(|alternative| {
                    replacing_literal
                        || test
                            .position(alternative)
                            .ok()
                            .and_then(|p| test.statement(p))
                            .map_or(true, |s| !s.is_literal())
                })
                .collect();
            if !alternatives.is_empty() {
                for reader in test.statements_referencing(&var) {
                    if let Some(replacement) = randomness::choice(rng, &alternatives) {
                        rewrite(test, reader, &var, replacement);
                    }
                }
            }

            if let Some(component) = declared.component_type() {
                let elements: Vec<VariableReference> = test
                    .objects_of_type(component, position)
                    .into_iter()
                    .filter(|alternative| !alternative.contains(&var))
                    .collect();
                if !elements.is_empty() {
                    for reader in position + 1..test.len() {
                        let reads: Vec<VariableReference> = match test.statement(reader) {
                            Some(s) => s
                                .variables_read()
                                .into_iter()
                                .filter(|read| matches!(read, VariableReference::ArrayIndex(index) if index.array.as_ref() == &var))
                                .cloned()
                                .collect(),
                            None => Vec::new(),
                        };
                        for read in reads {
                            if let Some(replacement) = randomness::choice(rng, &elements) {
                                rewrite(test, reader, &read, replacement);
                            }
                        }
                    }
                }
            }

            let removed = test.remove(position)?;
            debug!("graceful delete at {} removed {} statement(s)", position, removed.len());
            Ok(())
        })
    }

    /// Replace the statement at `position` by a call to a different site
    /// whose return type is assignable to the declared type and whose
    /// dependencies are all available before `position`. Sites declaring a
    /// wider type are never candidates, even when the declaration was
    /// narrowed by execution. Returns whether a replacement was made.
    pub fn change_random_call<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        position: usize,
        rng: &mut R,
    ) -> FactoryResult<bool> {
        let statement = test
            .statement(position)
            .ok_or_else(|| construction_failed(format!("no statement at {}", position)))?;
        if statement.is_assignment() || statement.is_literal() || statement.is_null() {
            return Ok(false);
        }
        let return_type = statement.return_type().clone();
        let current = statement.callable_site().cloned();

        let sites = if return_type.is_void() {
            self.catalog()
                .test_calls()
                .into_iter()
                .filter(|site| site.return_type().is_void())
                .collect::<Vec<_>>()
        } else {
            self.catalog()
                .generators_for(&return_type)
                .into_iter()
                .filter(|site| return_type.is_assignable_from(site.return_type()))
                .collect()
        };
        let candidates: Vec<CallableSite> = sites
            .into_iter()
            .filter(|site| Some(site) != current.as_ref())
            .filter(|site| {
                site.dependencies()
                    .iter()
                    .all(|dependency| test.has_object(dependency, position))
            })
            .collect();

        let site = match randomness::choice(rng, &candidates) {
            Some(site) => site.clone(),
            None => return Ok(false),
        };
        match self.change_call(test, position, &site, rng) {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!("changing call at {} to {} failed: {}", position, site, err);
                Ok(false)
            }
        }
    }

    /// Make the statement at `position` perform `site`, drawing the receiver
    /// and arguments from variables defined before it.
    pub fn change_call<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        position: usize,
        site: &CallableSite,
        rng: &mut R,
    ) -> FactoryResult<()> {
        atomically(test, |test| {
            let receiver = if site.needs_receiver() {
                Some(
                    test.random_non_null_object(site.declaring_type(), position, rng)
                        .ok_or_else(|| construction_failed(format!("no receiver for {}", site)))?,
                )
            } else {
                None
            };
            let args = pick_existing(test, site.parameter_types(), position, rng)?;
            let kind = match site.kind() {
                SiteKind::Constructor => StatementKind::NewInstance {
                    constructor: site.clone(),
                    args,
                },
                SiteKind::Method => StatementKind::Call {
                    method: site.clone(),
                    receiver,
                    args,
                },
                SiteKind::Field => StatementKind::ReadField {
                    field: site.clone(),
                    source: receiver,
                },
            };
            test.set_statement(position, kind)?;
            Ok(())
        })
    }
}

/// Replace `old` by `new` in the statement at `position`, leaving it
/// untouched if the result would not be valid there.
fn rewrite(test: &mut TestCase, position: usize, old: &VariableReference, new: &VariableReference) {
    let mut kind = match test.statement(position) {
        Some(statement) => statement.kind().clone(),
        None => return,
    };
    if kind.replace(old, new) {
        // An unrepaired reader still reads `old` and goes with the cascade.
        if let Err(err) = test.set_statement(position, kind) {
            debug!("cannot repair statement {}: {}", position, err);
        }
    }
}

fn pick_existing<R: Rng + ?Sized>(
    test: &TestCase,
    types: &[TypeRef],
    position: usize,
    rng: &mut R,
) -> FactoryResult<Vec<VariableReference>> {
    types
        .iter()
        .map(|ty| {
            test.random_object(ty, position, rng)
                .ok_or_else(|| construction_failed(format!("no {} before {}", ty, position)))
        })
        .collect()
}
