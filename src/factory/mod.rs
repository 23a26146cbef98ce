//! Test synthesis and structural edits
//!
//! The `TestFactory` builds statements into a test case, satisfying every
//! dependency (receivers and parameters) either by reusing a variable that is
//! already visible at the insertion point or by recursively generating one.
//! It is also the only place that performs structural edits on behalf of the
//! search: deletion (cascading or graceful), call replacement, random
//! insertion and statement-level mutation.
//!
//! ## Atomicity
//!
//! Every public operation either completes or leaves the test case exactly as
//! it was. Operations snapshot the test case before editing and restore the
//! snapshot on failure, so callers can treat [`FactoryError`] as "try
//! something else" without any cleanup.
//!
//! ## Recursion
//!
//! Generating a value may require generating the values its generator needs,
//! and so on. Each top-level operation tracks the generators currently being
//! expanded and never picks one of them again further down, and gives up with
//! [`FactoryError::ConstructionFailed`] beyond `max_recursion` levels.

mod deletion;
mod insertion;
mod mutation;

use std::sync::Arc;

use log::debug;
use rand::Rng;

use crate::catalog::{CallableSite, GeneratorCatalog, SiteKind};
use crate::config::FactoryConfig;
use crate::randomness;
use crate::statement::{LiteralValue, StatementKind};
use crate::testcase::{TestCase, TestCaseError};
use crate::types::TypeRef;
use crate::variable::{ArrayIndexRef, FieldRef, VariableReference};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FactoryError {
    /// The requested statement could not be built. Expected during search.
    #[error("construction failed: {0}")]
    ConstructionFailed(String),

    #[error(transparent)]
    InvalidEdit(#[from] TestCaseError),
}

pub type FactoryResult<T> = Result<T, FactoryError>;

fn construction_failed(message: impl Into<String>) -> FactoryError {
    FactoryError::ConstructionFailed(message.into())
}

/// Run `edit` on `test`, restoring the original on failure.
fn atomically<T>(test: &mut TestCase, edit: impl FnOnce(&mut TestCase) -> FactoryResult<T>) -> FactoryResult<T> {
    let snapshot = test.clone();
    let result = edit(test);
    if let Err(err) = &result {
        debug!("edit failed, restoring test case: {}", err);
        *test = snapshot;
    }
    result
}

pub struct TestFactory {
    catalog: Arc<dyn GeneratorCatalog>,
    config: FactoryConfig,
}

impl TestFactory {
    pub fn new(catalog: Arc<dyn GeneratorCatalog>, config: FactoryConfig) -> Self {
        TestFactory { catalog, config }
    }

    pub fn catalog(&self) -> &dyn GeneratorCatalog {
        self.catalog.as_ref()
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// An empty test case with reference chains bounded by
    /// `max_reference_chain`.
    pub fn new_test(&self) -> TestCase {
        TestCase::with_reference_chain_limit(self.config.max_reference_chain)
    }

    fn builder<'a, R: Rng + ?Sized>(&'a self, rng: &'a mut R) -> Builder<'a, R> {
        Builder {
            factory: self,
            rng,
            recursion: Vec::new(),
        }
    }

    /// Insert a constructor call at `position`, generating its arguments.
    pub fn add_constructor<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        constructor: &CallableSite,
        position: usize,
        depth: usize,
        rng: &mut R,
    ) -> FactoryResult<VariableReference> {
        atomically(test, |test| self.builder(rng).add_constructor(test, constructor, position, depth))
    }

    /// Insert a method call at `position`, generating (or reusing) a receiver
    /// for instance methods and all arguments.
    pub fn add_method<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        method: &CallableSite,
        position: usize,
        depth: usize,
        rng: &mut R,
    ) -> FactoryResult<VariableReference> {
        atomically(test, |test| self.builder(rng).add_method(test, method, position, depth))
    }

    /// Insert a call of `method` on `callee` at `position`.
    pub fn add_method_for<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        callee: &VariableReference,
        method: &CallableSite,
        position: usize,
        rng: &mut R,
    ) -> FactoryResult<VariableReference> {
        atomically(test, |test| self.builder(rng).add_method_for(test, callee, method, position, 0))
    }

    /// Insert a field read at `position`.
    pub fn add_field<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        field: &CallableSite,
        position: usize,
        depth: usize,
        rng: &mut R,
    ) -> FactoryResult<VariableReference> {
        atomically(test, |test| self.builder(rng).add_field(test, field, position, depth))
    }

    /// Insert an assignment to `field` at `position`.
    pub fn add_field_assignment<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        field: &CallableSite,
        position: usize,
        depth: usize,
        rng: &mut R,
    ) -> FactoryResult<VariableReference> {
        atomically(test, |test| self.builder(rng).add_field_assignment(test, field, position, depth))
    }

    /// Insert a literal at `position`.
    pub fn add_primitive(
        &self,
        test: &mut TestCase,
        literal: LiteralValue,
        position: usize,
    ) -> FactoryResult<VariableReference> {
        Ok(test.insert(StatementKind::Literal(literal), position)?)
    }

    /// Insert statements at `position` that produce a fresh value of `ty`.
    pub fn attempt_generation<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        ty: &TypeRef,
        position: usize,
        depth: usize,
        allow_null: bool,
        rng: &mut R,
    ) -> FactoryResult<VariableReference> {
        atomically(test, |test| {
            self.builder(rng).attempt_generation(test, ty, position, depth, allow_null)
        })
    }

    /// Reuse a visible variable of type `ty` or generate a new one at
    /// `position`. `exclude` (and references built on it) is never reused.
    pub fn create_or_reuse_variable<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        ty: &TypeRef,
        position: usize,
        depth: usize,
        exclude: Option<&VariableReference>,
        allow_null: bool,
        rng: &mut R,
    ) -> FactoryResult<VariableReference> {
        atomically(test, |test| {
            self.builder(rng)
                .create_or_reuse_variable(test, ty, position, depth, exclude, allow_null)
        })
    }

    /// Produce one variable per parameter type, all visible before the
    /// returned insertion point. Returns the variables and the position where
    /// the statement that consumes them must go.
    pub fn satisfy_parameters<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        callee: Option<&VariableReference>,
        parameter_types: &[TypeRef],
        position: usize,
        depth: usize,
        rng: &mut R,
    ) -> FactoryResult<(Vec<VariableReference>, usize)> {
        atomically(test, |test| {
            let before = test.len();
            let args = self
                .builder(rng)
                .satisfy_parameters(test, callee, parameter_types, position, depth, true)?;
            Ok((args, position + test.len() - before))
        })
    }

    /// Assign a value to `array[index]` at `position`.
    pub fn assign_array<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        array: &VariableReference,
        index: usize,
        position: usize,
        rng: &mut R,
    ) -> FactoryResult<VariableReference> {
        atomically(test, |test| {
            let element = element_type(test, array)?;
            let candidates = array_candidates(test, &element, array, position);
            self.builder(rng)
                .assign_array_element(test, array, index, position, &candidates, 0)
        })
    }

    /// Append to `test` a statement performing the same operation as the
    /// statement at `source_position` of `source`, with dependencies satisfied
    /// from `test`'s own variables. Used by crossover.
    pub fn append_statement<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        source: &TestCase,
        source_position: usize,
        rng: &mut R,
    ) -> FactoryResult<()> {
        let statement = source
            .statement(source_position)
            .ok_or_else(|| construction_failed(format!("no statement at {}", source_position)))?;
        let end = test.len();
        atomically(test, |test| {
            let mut builder = self.builder(rng);
            match statement.kind() {
                StatementKind::NewInstance { constructor, .. } => {
                    builder.add_constructor(test, constructor, end, 0)?;
                }
                StatementKind::Call { method, .. } => {
                    builder.add_method(test, method, end, 0)?;
                }
                StatementKind::ReadField { field, .. } => {
                    builder.add_field(test, field, end, 0)?;
                }
                StatementKind::AssignField { target, .. } => {
                    builder.add_field_assignment(test, &target.field, end, 0)?;
                }
                StatementKind::Literal(literal) => {
                    test.insert(StatementKind::Literal(literal.clone()), end)?;
                }
                StatementKind::NullLiteral(ty) => {
                    test.insert(StatementKind::NullLiteral(ty.clone()), end)?;
                }
                StatementKind::NewArray { element_type, length } => {
                    test.insert(
                        StatementKind::NewArray {
                            element_type: element_type.clone(),
                            length: *length,
                        },
                        end,
                    )?;
                }
                StatementKind::AssignIndex { target, .. } => {
                    let array_type = source.type_of(&target.array)?;
                    let arrays: Vec<_> = test
                        .objects_of_type(&array_type, end)
                        .into_iter()
                        .filter(|array| test.array_length(array).map_or(false, |len| len > target.index))
                        .collect();
                    let array = randomness::choice(builder.rng, &arrays)
                        .cloned()
                        .ok_or_else(|| construction_failed(format!("no {} with index {}", array_type, target.index)))?;
                    let element = element_type(test, &array)?;
                    let candidates = array_candidates(test, &element, &array, end);
                    builder.assign_array_element(test, &array, target.index, end, &candidates, 0)?;
                }
            }
            Ok(())
        })
    }
}

fn element_type(test: &TestCase, array: &VariableReference) -> FactoryResult<TypeRef> {
    let ty = test.type_of(array)?;
    ty.component_type()
        .cloned()
        .ok_or_else(|| FactoryError::InvalidEdit(TestCaseError::NotAnArray(array.to_string())))
}

/// Variables that may be stored into `array`: visible before `position`,
/// of the element type, and not themselves elements of `array`.
fn array_candidates(
    test: &TestCase,
    element: &TypeRef,
    array: &VariableReference,
    position: usize,
) -> Vec<VariableReference> {
    test.objects_of_type(element, position)
        .into_iter()
        .filter(|candidate| !candidate.contains(array) && candidate != array)
        .collect()
}

/// State of one synthesis operation: the random source and the generators
/// currently being expanded.
struct Builder<'a, R: Rng + ?Sized> {
    factory: &'a TestFactory,
    rng: &'a mut R,
    recursion: Vec<CallableSite>,
}

impl<'a, R: Rng + ?Sized> Builder<'a, R> {
    fn config(&self) -> &FactoryConfig {
        &self.factory.config
    }

    fn check_depth(&self, depth: usize) -> FactoryResult<()> {
        if depth > self.config().max_recursion {
            Err(construction_failed(format!(
                "recursion depth {} exceeds {}",
                depth,
                self.config().max_recursion
            )))
        } else {
            Ok(())
        }
    }

    /// Run `generate` and undo whatever it inserted if it fails.
    fn attempt<T>(
        &mut self,
        test: &mut TestCase,
        generate: impl FnOnce(&mut Self, &mut TestCase) -> FactoryResult<T>,
    ) -> FactoryResult<T> {
        let snapshot = test.clone();
        let result = generate(self, test);
        if result.is_err() {
            *test = snapshot;
        }
        result
    }

    fn attempt_generation(
        &mut self,
        test: &mut TestCase,
        ty: &TypeRef,
        position: usize,
        depth: usize,
        allow_null: bool,
    ) -> FactoryResult<VariableReference> {
        if ty.is_void() {
            return Err(construction_failed("cannot generate a value of type void"));
        }
        let null_probability = self.config().null_probability;
        if allow_null && ty.is_nullable() && randomness::chance(self.rng, null_probability) {
            return self.create_null(test, ty, position);
        }
        match ty {
            TypeRef::Primitive(_) | TypeRef::String => self.create_primitive(test, ty, position),
            TypeRef::Array(_) => self.create_array(test, ty, position, depth),
            TypeRef::Class(_) => self.create_object(test, ty, position, depth, allow_null),
            TypeRef::Void => Err(construction_failed("cannot generate a value of type void")),
        }
    }

    fn create_primitive(&mut self, test: &mut TestCase, ty: &TypeRef, position: usize) -> FactoryResult<VariableReference> {
        let literal = LiteralValue::random(ty, self.rng, &self.factory.config)
            .ok_or_else(|| construction_failed(format!("{} has no literals", ty)))?;
        Ok(test.insert(StatementKind::Literal(literal), position)?)
    }

    fn create_null(&mut self, test: &mut TestCase, ty: &TypeRef, position: usize) -> FactoryResult<VariableReference> {
        debug!("using null for {}", ty);
        Ok(test.insert(StatementKind::NullLiteral(ty.clone()), position)?)
    }

    fn create_array(
        &mut self,
        test: &mut TestCase,
        ty: &TypeRef,
        position: usize,
        depth: usize,
    ) -> FactoryResult<VariableReference> {
        let element = ty
            .component_type()
            .cloned()
            .ok_or_else(|| construction_failed(format!("{} is not an array type", ty)))?;
        let length = self.rng.gen_range(1..=self.config().max_array.max(1));
        let array = test.insert(
            StatementKind::NewArray {
                element_type: element.clone(),
                length,
            },
            position,
        )?;
        if depth + 1 > self.config().max_recursion {
            return Ok(array);
        }

        let mut next = position + 1;
        for index in 0..length {
            let candidates = array_candidates(test, &element, &array, next);
            let before = test.len();
            let assigned = self.attempt(test, |builder, test| {
                builder.assign_array_element(test, &array, index, next, &candidates, depth + 1)
            });
            if let Err(err) = assigned {
                debug!("leaving {}[{}] at its default: {}", array, index, err);
            }
            next += test.len() - before;
        }
        Ok(array)
    }

    fn assign_array_element(
        &mut self,
        test: &mut TestCase,
        array: &VariableReference,
        index: usize,
        position: usize,
        candidates: &[VariableReference],
        depth: usize,
    ) -> FactoryResult<VariableReference> {
        let element = element_type(test, array)?;
        let reuse = self.config().object_reuse_probability;
        let before = test.len();
        let value = match randomness::choice(self.rng, candidates) {
            Some(candidate) if randomness::chance(self.rng, reuse) => candidate.clone(),
            _ => self.attempt_generation(test, &element, position, depth, true)?,
        };
        let at = position + test.len() - before;
        let target = ArrayIndexRef {
            array: Box::new(array.clone()),
            index,
        };
        Ok(test.insert(StatementKind::AssignIndex { target, value }, at)?)
    }

    /// A generator for `ty` that is not already being expanded.
    fn random_generator(&mut self, ty: &TypeRef, depth: usize) -> Option<CallableSite> {
        let mut generators: Vec<CallableSite> = self
            .factory
            .catalog
            .generators_for(ty)
            .into_iter()
            .filter(|site| !self.recursion.contains(site))
            .collect();
        if depth >= self.config().max_recursion / 2 {
            // Deep in the recursion, prefer generators with the fewest dependencies.
            if let Some(fewest) = generators.iter().map(|site| site.dependencies().len()).min() {
                generators.retain(|site| site.dependencies().len() == fewest);
            }
        }
        randomness::choice(self.rng, &generators).cloned()
    }

    fn create_object(
        &mut self,
        test: &mut TestCase,
        ty: &TypeRef,
        position: usize,
        depth: usize,
        allow_null: bool,
    ) -> FactoryResult<VariableReference> {
        self.check_depth(depth)?;
        let site = match self.random_generator(ty, depth) {
            Some(site) => site,
            None => {
                let existing = self.reuse_candidates(test, ty, position, None, allow_null);
                return randomness::choice(self.rng, &existing)
                    .cloned()
                    .ok_or_else(|| construction_failed(format!("no generator for {}", ty)));
            }
        };
        debug!("generating {} with {}", ty, site);
        self.recursion.push(site.clone());
        let result = match site.kind() {
            SiteKind::Constructor => self.add_constructor(test, &site, position, depth + 1),
            SiteKind::Method => self.add_method(test, &site, position, depth + 1),
            SiteKind::Field => self.add_field(test, &site, position, depth + 1),
        };
        self.recursion.pop();
        result
    }

    fn add_constructor(
        &mut self,
        test: &mut TestCase,
        constructor: &CallableSite,
        position: usize,
        depth: usize,
    ) -> FactoryResult<VariableReference> {
        self.check_depth(depth)?;
        if !constructor.is_constructor() {
            return Err(construction_failed(format!("{} is not a constructor", constructor)));
        }
        let before = test.len();
        let args = self.satisfy_parameters(test, None, constructor.parameter_types(), position, depth + 1, true)?;
        let at = position + test.len() - before;
        Ok(test.insert(
            StatementKind::NewInstance {
                constructor: constructor.clone(),
                args,
            },
            at,
        )?)
    }

    fn add_method(
        &mut self,
        test: &mut TestCase,
        method: &CallableSite,
        position: usize,
        depth: usize,
    ) -> FactoryResult<VariableReference> {
        self.check_depth(depth)?;
        if !method.is_method() {
            return Err(construction_failed(format!("{} is not a method", method)));
        }
        let before = test.len();
        let receiver = if method.needs_receiver() {
            Some(self.create_or_reuse_variable(test, method.declaring_type(), position, depth + 1, None, false)?)
        } else {
            None
        };
        let next = position + test.len() - before;
        let mid = test.len();
        let args =
            self.satisfy_parameters(test, receiver.as_ref(), method.parameter_types(), next, depth + 1, true)?;
        let at = next + test.len() - mid;
        Ok(test.insert(
            StatementKind::Call {
                method: method.clone(),
                receiver,
                args,
            },
            at,
        )?)
    }

    fn add_method_for(
        &mut self,
        test: &mut TestCase,
        callee: &VariableReference,
        method: &CallableSite,
        position: usize,
        depth: usize,
    ) -> FactoryResult<VariableReference> {
        if !method.needs_receiver() {
            return Err(construction_failed(format!("{} does not take a receiver", method)));
        }
        let before = test.len();
        let args = self.satisfy_parameters(test, Some(callee), method.parameter_types(), position, depth + 1, true)?;
        let at = position + test.len() - before;
        Ok(test.insert(
            StatementKind::Call {
                method: method.clone(),
                receiver: Some(callee.clone()),
                args,
            },
            at,
        )?)
    }

    fn field_source(
        &mut self,
        test: &mut TestCase,
        field: &CallableSite,
        position: usize,
        depth: usize,
    ) -> FactoryResult<Option<VariableReference>> {
        if field.needs_receiver() {
            Ok(Some(self.create_or_reuse_variable(test, field.declaring_type(), position, depth + 1, None, false)?))
        } else {
            Ok(None)
        }
    }

    fn add_field(
        &mut self,
        test: &mut TestCase,
        field: &CallableSite,
        position: usize,
        depth: usize,
    ) -> FactoryResult<VariableReference> {
        self.check_depth(depth)?;
        if !field.is_field() {
            return Err(construction_failed(format!("{} is not a field", field)));
        }
        let before = test.len();
        let source = self.field_source(test, field, position, depth)?;
        let at = position + test.len() - before;
        Ok(test.insert(
            StatementKind::ReadField {
                field: field.clone(),
                source,
            },
            at,
        )?)
    }

    fn add_field_assignment(
        &mut self,
        test: &mut TestCase,
        field: &CallableSite,
        position: usize,
        depth: usize,
    ) -> FactoryResult<VariableReference> {
        self.check_depth(depth)?;
        if !field.is_field() || field.is_final() {
            return Err(construction_failed(format!("{} cannot be assigned", field)));
        }
        let before = test.len();
        let source = self.field_source(test, field, position, depth)?;
        let next = position + test.len() - before;
        let mid = test.len();
        let value = self.create_or_reuse_variable(test, field.return_type(), next, depth + 1, source.as_ref(), true)?;
        let at = next + test.len() - mid;
        let target = FieldRef {
            field: field.clone(),
            source: source.map(Box::new),
        };
        Ok(test.insert(StatementKind::AssignField { target, value }, at)?)
    }

    /// Variables visible before `position` that may be passed where `ty` is
    /// expected.
    fn reuse_candidates(
        &self,
        test: &TestCase,
        ty: &TypeRef,
        position: usize,
        exclude: Option<&VariableReference>,
        allow_null: bool,
    ) -> Vec<VariableReference> {
        test.objects_of_type(ty, position)
            .into_iter()
            .filter(|var| match exclude {
                Some(excluded) => var != excluded && !var.contains(excluded),
                None => true,
            })
            .filter(|var| allow_null || !test.is_null_reference(var))
            .filter(|var| {
                // chars widen to numbers but make poor numeric inputs
                let numeric = ty.primitive_kind().map_or(false, |kind| kind.is_numeric());
                !(numeric && test.type_of(var).map_or(false, |t| t == TypeRef::char()))
            })
            .collect()
    }

    fn create_or_reuse_variable(
        &mut self,
        test: &mut TestCase,
        ty: &TypeRef,
        position: usize,
        depth: usize,
        exclude: Option<&VariableReference>,
        allow_null: bool,
    ) -> FactoryResult<VariableReference> {
        let candidates = self.reuse_candidates(test, ty, position, exclude, allow_null);
        let reuse_probability = if ty.is_primitive_like() {
            self.config().primitive_reuse_probability
        } else {
            self.config().object_reuse_probability
        };
        if !candidates.is_empty() && randomness::chance(self.rng, reuse_probability) {
            if let Some(var) = randomness::choice(self.rng, &candidates) {
                debug!("reusing {} for {}", var, ty);
                return Ok(var.clone());
            }
        }

        let generated = self.attempt(test, |builder, test| {
            builder.attempt_generation(test, ty, position, depth, allow_null)
        });
        match generated {
            Ok(var) => Ok(var),
            Err(err) => match randomness::choice(self.rng, &candidates) {
                Some(var) => Ok(var.clone()),
                None if allow_null && ty.is_nullable() => self.create_null(test, ty, position),
                None => Err(err),
            },
        }
    }

    fn satisfy_parameters(
        &mut self,
        test: &mut TestCase,
        callee: Option<&VariableReference>,
        parameter_types: &[TypeRef],
        position: usize,
        depth: usize,
        allow_null: bool,
    ) -> FactoryResult<Vec<VariableReference>> {
        let mut next = position;
        let mut args = Vec::with_capacity(parameter_types.len());
        for ty in parameter_types {
            let before = test.len();
            let var = self.create_or_reuse_variable(test, ty, next, depth, callee, allow_null)?;
            let actual = test.type_of(&var)?;
            if !ty.is_assignable_from(&actual) && !(test.is_null_reference(&var) && ty.is_nullable()) {
                return Err(construction_failed(format!("{} of type {} does not fit {}", var, actual, ty)));
            }
            next += test.len() - before;
            args.push(var);
        }
        Ok(args)
    }
}
