//! Random statement insertion.

use log::debug;
use rand::Rng;

use super::{atomically, construction_failed, FactoryResult, TestFactory};
use crate::catalog::SiteKind;
use crate::randomness;
use crate::testcase::TestCase;
use crate::variable::VariableReference;

impl TestFactory {
    /// Insert a random statement at a random position: a call on the unit
    /// under test with probability `insertion_uut`, otherwise a call on an
    /// object the test already holds. Returns the insertion position.
    pub fn insert_random_statement<R: Rng + ?Sized>(&self, test: &mut TestCase, rng: &mut R) -> FactoryResult<usize> {
        let position = rng.gen_range(0..=test.len());
        if randomness::chance(rng, self.config().insertion_uut) {
            self.insert_random_call(test, position, rng)?;
        } else {
            self.insert_random_call_on_object(test, position, rng)?;
        }
        Ok(position)
    }

    /// Insert a call of a random site of the unit under test at `position`.
    pub fn insert_random_call<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        position: usize,
        rng: &mut R,
    ) -> FactoryResult<()> {
        let calls = self.catalog().test_calls();
        let site = randomness::choice(rng, &calls)
            .cloned()
            .ok_or_else(|| construction_failed("no calls to test"))?;
        debug!("inserting call to {} at {}", site, position);

        atomically(test, |test| {
            let mut builder = self.builder(rng);
            match site.kind() {
                SiteKind::Constructor => {
                    builder.add_constructor(test, &site, position, 0)?;
                }
                SiteKind::Method if site.needs_receiver() => {
                    let owner = site.declaring_type();
                    let before = test.len();
                    let callee = match test.random_non_null_object(owner, position, builder.rng) {
                        Some(callee) => callee,
                        None => builder.create_object(test, owner, position, 0, false)?,
                    };
                    let at = position + test.len() - before;
                    builder.add_method_for(test, &callee, &site, at, 0)?;
                }
                SiteKind::Method => {
                    builder.add_method(test, &site, position, 0)?;
                }
                SiteKind::Field => {
                    if !site.is_final() && builder.rng.gen_bool(0.5) {
                        builder.add_field_assignment(test, &site, position, 0)?;
                    } else {
                        builder.add_field(test, &site, position, 0)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Insert a call on a random non-null object defined before `position`,
    /// falling back to a call on the unit under test when there is none.
    pub fn insert_random_call_on_object<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        position: usize,
        rng: &mut R,
    ) -> FactoryResult<()> {
        match select_variable_for_call(test, position, rng) {
            Some(var) => self.insert_random_call_on_object_at(test, &var, position, rng),
            None => self.insert_random_call(test, position, rng),
        }
    }

    /// Insert a modifier call on `var` at `position`. For arrays, assign
    /// every index instead.
    pub fn insert_random_call_on_object_at<R: Rng + ?Sized>(
        &self,
        test: &mut TestCase,
        var: &VariableReference,
        position: usize,
        rng: &mut R,
    ) -> FactoryResult<()> {
        if let Some(length) = test.array_length(var) {
            if length == 0 {
                return Err(construction_failed(format!("{} has no elements", var)));
            }
            let mut next = position;
            for index in 0..length {
                let before = test.len();
                if let Err(err) = self.assign_array(test, var, index, next, rng) {
                    debug!("leaving {}[{}] as it is: {}", var, index, err);
                }
                next += test.len() - before;
            }
            return Ok(());
        }

        let ty = test.type_of(var)?;
        let modifiers = self.catalog().modifiers_for(&ty);
        let method = randomness::choice(rng, &modifiers)
            .cloned()
            .ok_or_else(|| construction_failed(format!("no calls for {}", ty)))?;
        self.add_method_for(test, var, &method, position, rng)?;
        Ok(())
    }
}

/// A random object before `position` that calls can be made on.
fn select_variable_for_call<R: Rng + ?Sized>(
    test: &TestCase,
    position: usize,
    rng: &mut R,
) -> Option<VariableReference> {
    let candidates: Vec<VariableReference> = test
        .all_objects(position)
        .into_iter()
        .filter(|var| !test.is_null_reference(var))
        .filter(|var| test.type_of(var).map_or(false, |ty| !ty.is_primitive_like()))
        .collect();
    randomness::choice(rng, &candidates).cloned()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{site_fn, CallableSite, StaticCatalog};
    use crate::config::FactoryConfig;
    use crate::randomness::seeded;
    use crate::runtime::Value;
    use crate::statement::{LiteralValue, StatementKind};
    use crate::types::{ClassType, TypeRef};

    fn catalog() -> (StaticCatalog, CallableSite, CallableSite) {
        let class = Arc::new(ClassType::new("Stack"));
        let stack = TypeRef::Class(class.clone());
        let constructor = CallableSite::constructor(class, vec![], site_fn(|_, _, _| Ok(Value::Null)));
        let push = CallableSite::method(
            stack,
            "push",
            vec![TypeRef::int()],
            TypeRef::Void,
            site_fn(|_, _, _| Ok(Value::Null)),
        );
        let catalog = StaticCatalog::new()
            .with_target(constructor.clone())
            .with_target(push.clone());
        (catalog, constructor, push)
    }

    #[test]
    fn test_random_insertion_keeps_test_valid() {
        let (catalog, _, _) = catalog();
        let factory = TestFactory::new(Arc::new(catalog), FactoryConfig::default());
        let mut rng = seeded(11);
        let mut test = TestCase::new();
        for _ in 0..50 {
            let before = test.len();
            match factory.insert_random_statement(&mut test, &mut rng) {
                Ok(position) => {
                    assert!(position <= before);
                    assert!(test.len() > before);
                }
                Err(_) => assert_eq!(test.len(), before),
            }
            assert!(test.is_valid(), "{}", test);
        }
    }

    #[test]
    fn test_call_on_object_uses_a_modifier() {
        let (catalog, constructor, push) = catalog();
        let factory = TestFactory::new(Arc::new(catalog), FactoryConfig::default());
        let mut rng = seeded(12);
        let mut test = TestCase::new();
        let stack = test.add(StatementKind::NewInstance { constructor, args: vec![] }).unwrap();
        factory.insert_random_call_on_object_at(&mut test, &stack, 1, &mut rng).unwrap();
        let last = test.statement(test.len() - 1).unwrap();
        assert_eq!(last.callable_site(), Some(&push));
        assert!(last.references(&stack));
    }

    #[test]
    fn test_call_on_array_assigns_every_index() {
        let factory = TestFactory::new(Arc::new(StaticCatalog::new()), FactoryConfig::default());
        let mut rng = seeded(13);
        let mut test = TestCase::new();
        test.add(StatementKind::Literal(LiteralValue::Int(4))).unwrap();
        let array = test
            .add(StatementKind::NewArray {
                element_type: TypeRef::int(),
                length: 3,
            })
            .unwrap();
        factory.insert_random_call_on_object_at(&mut test, &array, 2, &mut rng).unwrap();
        assert_eq!(test.array_assignments(&array).len(), 3);
        assert!(test.is_valid());
    }
}
