//! # suitegen
//!
//! Test-case representation, mutation and search operators for search-based
//! test generation.
//!
//! A test case is an ordered sequence of statements (constructor calls,
//! method calls, field accesses, literals and array operations) that exercise
//! a program under test. The search evolves test cases with mutation,
//! crossover and local search, guided by branch distances and other feedback
//! recorded while executing them.
//!
//! The program under test is only known through a [`GeneratorCatalog`] of
//! callable sites; executing a site is delegated to the [`SiteBody`] the
//! catalog supplies, which reports coverage through an [`ExecutionTracer`].

pub mod catalog;
pub mod chromosome;
pub mod config;
pub mod executor;
pub mod factory;
pub mod fitness;
pub mod localsearch;
pub mod randomness;
pub mod runtime;
pub mod statement;
pub mod testcase;
pub mod trace;
pub mod types;
pub mod variable;

pub use catalog::{site_fn, CallableSite, GeneratorCatalog, SiteBody, SiteKind, StaticCatalog};
pub use chromosome::{MutationKind, TestChromosome, TestMutation};
pub use config::{ConfigError, ExecutorConfig, FactoryConfig, LocalSearchConfig, MutationConfig, SearchConfig};
pub use executor::{
    ExecutionContext, ExecutionResult, ExecutionSandbox, ExecutorError, ExecutorPool, ExecutorResult, TestCaseExecutor,
};
pub use factory::{FactoryError, FactoryResult, TestFactory};
pub use fitness::{
    BranchCoverageGoal, ExceptionCoverageGoal, LineCoverageGoal, MethodCoverageGoal, TestFitnessFunction,
    WeakMutationGoal,
};
pub use localsearch::{DefaultLocalSearchObjective, LocalSearch, LocalSearchObjective};
pub use runtime::{ArrayHandle, ObjectHandle, Scope, Thrown, Value};
pub use statement::{Assertion, LiteralValue, Statement, StatementKind};
pub use testcase::{TestCase, TestCaseError, TestCaseResult};
pub use trace::{BranchDistance, CancellationToken, Comparison, ExecutionTrace, ExecutionTracer};
pub use types::{ClassType, PrimitiveKind, TypeRef};
pub use variable::{ArrayIndexRef, FieldRef, SlotId, VariableReference};
