//! Execution traces
//!
//! An `ExecutionTrace` is the coverage record of one test case execution:
//! per-predicate minimal branch distances, how often each predicate went each
//! way, method call counts, covered lines, weak-mutation infection distances
//! and the first failure raised.
//!
//! ## Copy on write
//!
//! Traces are handed around a lot: every chromosome clone, every local search
//! backup and every fitness function reads one. The data lives behind an `Arc`
//! and [`ExecutionTrace::lazy_clone`] only bumps the reference count. The first
//! mutation through a shared handle copies the data (`Arc::make_mut`), so
//! writes are never visible through another handle.

pub mod distance;
mod tracer;

pub use distance::{BranchDistance, Comparison};
pub use tracer::{CancellationToken, ExecutionTracer};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::runtime::Thrown;

/// Identifier of an instrumented predicate.
pub type PredicateId = u32;

/// Identifier of a mutant for weak mutation.
pub type MutantId = u32;

#[derive(Debug, Clone, Default, PartialEq)]
struct TraceData {
    true_distances: HashMap<PredicateId, f64>,
    false_distances: HashMap<PredicateId, f64>,
    covered_true: HashMap<PredicateId, u32>,
    covered_false: HashMap<PredicateId, u32>,
    predicate_executions: HashMap<PredicateId, u32>,
    method_calls: HashMap<String, u32>,
    method_exits: HashMap<String, u32>,
    covered_lines: HashMap<String, BTreeSet<u32>>,
    mutant_distances: HashMap<MutantId, f64>,
    first_failure: Option<(usize, Thrown)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionTrace {
    data: Arc<TraceData>,
}

fn keep_min<K: std::hash::Hash + Eq>(map: &mut HashMap<K, f64>, key: K, value: f64) {
    map.entry(key)
        .and_modify(|current| {
            if value < *current {
                *current = value;
            }
        })
        .or_insert(value);
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the trace data with a new handle without copying it.
    pub fn lazy_clone(&self) -> Self {
        ExecutionTrace {
            data: Arc::clone(&self.data),
        }
    }

    /// Whether another handle currently shares this trace's data.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    fn data_mut(&mut self) -> &mut TraceData {
        Arc::make_mut(&mut self.data)
    }

    /// Record one evaluation of `predicate`.
    pub fn branch_passed(&mut self, predicate: PredicateId, distance: BranchDistance) {
        let data = self.data_mut();
        *data.predicate_executions.entry(predicate).or_insert(0) += 1;
        if distance.true_distance == 0.0 {
            *data.covered_true.entry(predicate).or_insert(0) += 1;
        }
        if distance.false_distance == 0.0 {
            *data.covered_false.entry(predicate).or_insert(0) += 1;
        }
        keep_min(&mut data.true_distances, predicate, distance.true_distance);
        keep_min(&mut data.false_distances, predicate, distance.false_distance);
    }

    pub fn method_entered(&mut self, method: &str) {
        *self.data_mut().method_calls.entry(method.to_string()).or_insert(0) += 1;
    }

    pub fn method_exited(&mut self, method: &str) {
        *self.data_mut().method_exits.entry(method.to_string()).or_insert(0) += 1;
    }

    pub fn line_covered(&mut self, method: &str, line: u32) {
        self.data_mut()
            .covered_lines
            .entry(method.to_string())
            .or_default()
            .insert(line);
    }

    /// Record that `mutant` was reached with the given infection distance
    /// (zero means the mutant's state infection condition held).
    pub fn mutant_touched(&mut self, mutant: MutantId, infection_distance: f64) {
        keep_min(&mut self.data_mut().mutant_distances, mutant, infection_distance);
    }

    /// Keep the failure if it is the first one seen.
    pub fn failure_at(&mut self, position: usize, thrown: Thrown) {
        let data = self.data_mut();
        if data.first_failure.is_none() {
            data.first_failure = Some((position, thrown));
        }
    }

    pub fn true_distance(&self, predicate: PredicateId) -> Option<f64> {
        self.data.true_distances.get(&predicate).copied()
    }

    pub fn false_distance(&self, predicate: PredicateId) -> Option<f64> {
        self.data.false_distances.get(&predicate).copied()
    }

    pub fn true_count(&self, predicate: PredicateId) -> u32 {
        self.data.covered_true.get(&predicate).copied().unwrap_or(0)
    }

    pub fn false_count(&self, predicate: PredicateId) -> u32 {
        self.data.covered_false.get(&predicate).copied().unwrap_or(0)
    }

    pub fn predicate_execution_count(&self, predicate: PredicateId) -> u32 {
        self.data.predicate_executions.get(&predicate).copied().unwrap_or(0)
    }

    pub fn covered_predicates(&self) -> BTreeSet<PredicateId> {
        self.data.predicate_executions.keys().copied().collect()
    }

    pub fn is_covered_true(&self, predicate: PredicateId) -> bool {
        self.true_count(predicate) > 0
    }

    pub fn is_covered_false(&self, predicate: PredicateId) -> bool {
        self.false_count(predicate) > 0
    }

    pub fn method_call_count(&self, method: &str) -> u32 {
        self.data.method_calls.get(method).copied().unwrap_or(0)
    }

    pub fn method_exit_count(&self, method: &str) -> u32 {
        self.data.method_exits.get(method).copied().unwrap_or(0)
    }

    pub fn covered_methods(&self) -> BTreeSet<String> {
        self.data.method_calls.keys().cloned().collect()
    }

    pub fn covered_lines(&self, method: &str) -> BTreeSet<u32> {
        self.data.covered_lines.get(method).cloned().unwrap_or_default()
    }

    pub fn is_line_covered(&self, method: &str, line: u32) -> bool {
        self.data
            .covered_lines
            .get(method)
            .map_or(false, |lines| lines.contains(&line))
    }

    pub fn mutant_distance(&self, mutant: MutantId) -> Option<f64> {
        self.data.mutant_distances.get(&mutant).copied()
    }

    pub fn touched_mutants(&self) -> BTreeSet<MutantId> {
        self.data.mutant_distances.keys().copied().collect()
    }

    pub fn first_failure(&self) -> Option<(usize, &Thrown)> {
        self.data.first_failure.as_ref().map(|(pos, thrown)| (*pos, thrown))
    }

    /// Combine with another trace (e.g. of a second test of a suite).
    pub fn merge(&mut self, other: &ExecutionTrace) {
        if Arc::ptr_eq(&self.data, &other.data) {
            return;
        }
        let other = other.data.as_ref();
        let data = self.data_mut();
        for (&p, &d) in &other.true_distances {
            keep_min(&mut data.true_distances, p, d);
        }
        for (&p, &d) in &other.false_distances {
            keep_min(&mut data.false_distances, p, d);
        }
        for (&p, &n) in &other.covered_true {
            *data.covered_true.entry(p).or_insert(0) += n;
        }
        for (&p, &n) in &other.covered_false {
            *data.covered_false.entry(p).or_insert(0) += n;
        }
        for (&p, &n) in &other.predicate_executions {
            *data.predicate_executions.entry(p).or_insert(0) += n;
        }
        for (m, &n) in &other.method_calls {
            *data.method_calls.entry(m.clone()).or_insert(0) += n;
        }
        for (m, &n) in &other.method_exits {
            *data.method_exits.entry(m.clone()).or_insert(0) += n;
        }
        for (m, lines) in &other.covered_lines {
            data.covered_lines.entry(m.clone()).or_default().extend(lines.iter().copied());
        }
        for (&m, &d) in &other.mutant_distances {
            keep_min(&mut data.mutant_distances, m, d);
        }
        if data.first_failure.is_none() {
            data.first_failure = other.first_failure.clone();
        }
    }
}
