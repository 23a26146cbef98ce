mod common;

use rand::Rng;

use suitegen::randomness::seeded;
use suitegen::statement::{LiteralValue, StatementKind};
use suitegen::testcase::TestCase;
use suitegen::types::TypeRef;
use suitegen::variable::VariableReference;

use common::{foo_bar, foo_constructor};

/// `Foo foo = new Foo(); int x = 5; foo.bar(x);`
fn foo_bar_five() -> TestCase {
    let mut test = TestCase::new();
    let foo = test
        .add(StatementKind::NewInstance {
            constructor: foo_constructor(),
            args: vec![],
        })
        .unwrap();
    let five = test.add(StatementKind::Literal(LiteralValue::Int(5))).unwrap();
    test.add(StatementKind::Call {
        method: foo_bar(),
        receiver: Some(foo),
        args: vec![five],
    })
    .unwrap();
    test
}

fn assert_no_dangling_references(test: &TestCase) {
    for (position, statement) in test.iter().enumerate() {
        for slot in statement.variables_read().iter().flat_map(|read| read.slots()) {
            let defined = test
                .slot_position(slot)
                .unwrap_or_else(|err| panic!("statement {}: {}", position, err));
            assert!(defined < position, "statement {} reads {} defined at {}", position, slot, defined);
        }
    }
}

#[test]
fn test_deleting_receiver_cascades_to_its_call() {
    let mut test = foo_bar_five();
    let removed = test.remove(0).unwrap();
    assert_eq!(removed, vec![0, 2]);
    assert_eq!(test.len(), 1);
    assert_eq!(test.statement(0).unwrap().literal(), Some(&LiteralValue::Int(5)));
    assert!(test.is_valid());
    assert_no_dangling_references(&test);
}

#[test]
fn test_graceful_delete_keeps_call_alive() {
    let factory = common::factory();
    let mut test = foo_bar_five();
    let other = test.insert(StatementKind::Literal(LiteralValue::Int(9)), 1).unwrap();
    let mut rng = seeded(3);

    factory.delete_statement_gracefully(&mut test, 2, &mut rng).unwrap();

    assert_eq!(test.len(), 3);
    assert!(test.is_valid());
    match test.statement(2).unwrap().kind() {
        StatementKind::Call { args, .. } => assert_eq!(args, &vec![other]),
        kind => panic!("expected a call, found {}", kind.name()),
    }
}

#[test]
fn test_clone_is_independent() {
    let test = foo_bar_five();
    let mut copy = test.clone();
    assert_eq!(copy, test);
    assert_eq!(copy.to_code(), test.to_code());

    *copy.literal_mut(1).unwrap() = LiteralValue::Int(6);
    copy.remove(0).unwrap();

    assert_eq!(test.len(), 3);
    assert_eq!(test.statement(1).unwrap().literal(), Some(&LiteralValue::Int(5)));
    assert_ne!(copy.fingerprint(), test.fingerprint());
    assert!(test.is_valid());
}

#[test]
fn test_rendering_names_variables_by_type() {
    let code = foo_bar_five().to_code();
    assert_eq!(code, "Foo foo0 = new Foo();\nint int0 = 5;\nboolean boolean0 = foo0.bar(int0);");
}

#[test]
fn test_rejects_forward_references() {
    let mut test = foo_bar_five();
    let call = test.return_value(2).unwrap();
    let err = test.insert(
        StatementKind::Call {
            method: foo_bar(),
            receiver: Some(test.return_value(0).unwrap()),
            args: vec![call],
        },
        1,
    );
    assert!(err.is_err());
    assert_eq!(test.len(), 3);
    assert!(test.is_valid());
}

/// Random factory edits never break a test case.
#[test]
fn test_random_edits_preserve_invariants() {
    let factory = common::factory();
    for seed in 0..40 {
        let mut rng = seeded(seed);
        let mut test = factory.new_test();
        for step in 0..30 {
            match rng.gen_range(0..4) {
                0 | 1 => {
                    let _ = factory.insert_random_statement(&mut test, &mut rng);
                }
                2 if !test.is_empty() => {
                    let position = rng.gen_range(0..test.len());
                    let _ = factory.delete_statement_gracefully(&mut test, position, &mut rng);
                }
                3 if !test.is_empty() => {
                    let position = rng.gen_range(0..test.len());
                    let _ = factory.mutate_statement(&mut test, position, &mut rng);
                }
                _ => {}
            }
            if let Err(err) = test.validate() {
                panic!("seed {} step {}: {}\n{}", seed, step, err, test.to_code());
            }
            assert_no_dangling_references(&test);
        }
    }
}

/// After a cascading delete nothing reads the removed values.
#[test]
fn test_cascading_delete_leaves_no_readers() {
    let factory = common::factory();
    for seed in 0..20 {
        let mut rng = seeded(100 + seed);
        let mut test = factory.new_test();
        for _ in 0..15 {
            let _ = factory.insert_random_statement(&mut test, &mut rng);
        }
        if test.is_empty() {
            continue;
        }
        let position = rng.gen_range(0..test.len());
        let removed_slot = test.statement(position).unwrap().slot();
        factory.delete_statement(&mut test, position).unwrap();
        assert!(test.is_valid());
        assert!(test.iter().all(|statement| !statement.mentions_slot(removed_slot)));
    }
}

#[test]
fn test_null_definitions_are_candidates() {
    let mut test = TestCase::new();
    test.add(StatementKind::NullLiteral(common::foo())).unwrap();
    test.add(StatementKind::Literal(LiteralValue::Int(1))).unwrap();
    let objects = test.objects_of_type(&common::foo(), 2);
    assert_eq!(objects, vec![VariableReference::Local(test.statement(0).unwrap().slot())]);
    assert!(test.is_null_reference(&objects[0]));
    assert!(test.objects_of_type(&TypeRef::int(), 1).is_empty());
}
