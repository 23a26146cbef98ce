//! A small fake program under test shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use suitegen::catalog::{site_fn, CallableSite, SiteBody, StaticCatalog};
use suitegen::config::{ExecutorConfig, FactoryConfig};
use suitegen::factory::TestFactory;
use suitegen::runtime::{ObjectHandle, Thrown, Value};
use suitegen::trace::{Comparison, ExecutionTracer};
use suitegen::types::{ClassType, TypeRef};

/// Predicate `x == 42` inside `Foo.bar(int)`.
pub const BAR_EQUALS: u32 = 1;

/// Predicate `x < 0` inside `Foo.bar(int)`.
pub const BAR_NEGATIVE: u32 = 2;

/// Mutant replacing `42` by `43` inside `Foo.bar(int)`.
pub const BAR_MUTANT: u32 = 7;

/// How long the non-cooperative `Util.hang()` blocks.
pub const HANG: Duration = Duration::from_millis(1500);

pub struct FooState {
    pub count: i64,
}

pub fn foo_class() -> Arc<ClassType> {
    Arc::new(ClassType::new("shop.Foo"))
}

pub fn foo() -> TypeRef {
    TypeRef::Class(foo_class())
}

pub fn animal_class() -> Arc<ClassType> {
    Arc::new(ClassType::new("zoo.Animal").with_abstract(true))
}

pub fn dog_class() -> Arc<ClassType> {
    Arc::new(ClassType::new("zoo.Dog").with_supertype("zoo.Animal"))
}

fn util() -> TypeRef {
    TypeRef::class(ClassType::new("shop.Util"))
}

fn int_arg(args: &[Value]) -> Result<i64, Thrown> {
    args.first()
        .and_then(Value::as_int)
        .ok_or_else(|| Thrown::exception("IllegalArgument", "expected an int"))
}

fn new_foo() -> Value {
    Value::Object(ObjectHandle::new(foo_class(), FooState { count: 0 }))
}

pub fn foo_constructor() -> CallableSite {
    CallableSite::constructor(foo_class(), vec![], site_fn(|_, _, _| Ok(new_foo())))
}

/// `boolean Foo.bar(int x)`: true for 42, throws for negative numbers.
pub fn foo_bar() -> CallableSite {
    CallableSite::method(
        foo(),
        "bar",
        vec![TypeRef::int()],
        TypeRef::boolean(),
        site_fn(|receiver, args, tracer| {
            tracer.method_entered("Foo.bar")?;
            tracer.line_covered("Foo.bar", 10)?;
            let x = int_arg(args)?;
            tracer.mutant_touched(BAR_MUTANT, ((x - 43).abs() as f64).min(1.0))?;
            if tracer.compare_ints(BAR_NEGATIVE, x, Comparison::Lt, 0)? {
                tracer.line_covered("Foo.bar", 11)?;
                return Err(Thrown::exception("IllegalArgument", "negative"));
            }
            let hit = tracer.compare_ints(BAR_EQUALS, x, Comparison::Eq, 42)?;
            if hit {
                tracer.line_covered("Foo.bar", 13)?;
                if let Some(object) = receiver.and_then(Value::as_object) {
                    object.with_state(|state: &mut FooState| state.count += 1);
                }
            }
            tracer.method_exited("Foo.bar")?;
            Ok(Value::Bool(hit))
        }),
    )
}

struct CountField;

impl SiteBody for CountField {
    fn invoke(&self, receiver: Option<&Value>, _: &[Value], _: &ExecutionTracer) -> Result<Value, Thrown> {
        receiver
            .and_then(Value::as_object)
            .and_then(|object| object.with_state(|state: &mut FooState| state.count))
            .map(Value::Int)
            .ok_or_else(|| Thrown::NullDereference("Foo.count".to_string()))
    }

    fn write_field(&self, receiver: Option<&Value>, value: Value, _: &ExecutionTracer) -> Result<(), Thrown> {
        let count = value.as_int().unwrap_or_default();
        receiver
            .and_then(Value::as_object)
            .and_then(|object| object.with_state(|state: &mut FooState| state.count = count))
            .ok_or_else(|| Thrown::NullDereference("Foo.count".to_string()))
    }
}

/// `int Foo.count`
pub fn foo_count() -> CallableSite {
    CallableSite::field(foo(), "count", TypeRef::int(), CountField)
}

/// `static Foo Util.make()`
pub fn util_make() -> CallableSite {
    CallableSite::static_method(util(), "make", vec![], foo(), site_fn(|_, _, _| Ok(new_foo())))
}

pub fn dog_constructor() -> CallableSite {
    CallableSite::constructor(
        dog_class(),
        vec![],
        site_fn(|_, _, _| Ok(Value::Object(ObjectHandle::new(dog_class(), ())))),
    )
}

/// `static Animal Shelter.adopt()`, which always hands out a dog.
pub fn shelter_adopt() -> CallableSite {
    CallableSite::static_method(
        TypeRef::class(ClassType::new("zoo.Shelter")),
        "adopt",
        vec![],
        TypeRef::Class(animal_class()),
        site_fn(|_, _, _| Ok(Value::Object(ObjectHandle::new(dog_class(), ())))),
    )
}

/// `static void Util.spin()`: loops until cancelled.
pub fn util_spin() -> CallableSite {
    CallableSite::static_method(
        util(),
        "spin",
        vec![],
        TypeRef::Void,
        site_fn(|_, _, tracer| loop {
            tracer.check_timeout()?;
            thread::sleep(Duration::from_millis(1));
        }),
    )
}

/// `static void Util.hang()`: blocks without ever polling the tracer.
pub fn util_hang() -> CallableSite {
    CallableSite::static_method(
        util(),
        "hang",
        vec![],
        TypeRef::Void,
        site_fn(|_, _, _| {
            thread::sleep(HANG);
            Ok(Value::Null)
        }),
    )
}

/// `Foo` as unit under test, with a few dependency sites.
pub fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_target(foo_constructor())
        .with_target(foo_bar())
        .with_target(foo_count())
        .with_site(util_make())
        .with_site(dog_constructor())
        .with_site(shelter_adopt())
}

pub fn factory() -> TestFactory {
    TestFactory::new(Arc::new(catalog()), FactoryConfig::default())
}

pub fn executor_config(timeout_ms: u64, shutdown_timeout_ms: u64) -> ExecutorConfig {
    ExecutorConfig {
        timeout_ms,
        shutdown_timeout_ms,
    }
}
