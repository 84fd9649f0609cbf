//! This module is an integration test that checks the labeling of writes
//! that initialise flat, nested and dynamic struct fields.
#![cfg(test)]

use storage_access_tracer::{trace_storage_access, value::Value, value::Word};

mod common;

#[tokio::test]
async fn labels_struct_initialisation_writes() -> anyhow::Result<()> {
    let account = common::contract_address();
    let oracle = common::ScenarioBuilder::new(account)
        .write(Word::from(2u64), Word::ZERO, Word::from(1u64))
        .write(Word::from(3u64), Word::ZERO, common::short_string_word("Named Init"))
        .write(Word::from(4u64), Word::ZERO, Word::from(2u64))
        .write(Word::from(5u64), Word::ZERO, Word::from(3u64))
        .write(Word::from(6u64), Word::ZERO, common::short_string_word("Nested"))
        .write(Word::from(7u64), Word::ZERO, Word::from(4u64))
        .build();
    let source = common::source_with(common::storage_test_layout());

    let result = trace_storage_access(
        oracle,
        source,
        common::test_config(),
        common::replay_request(),
    )
    .await?;

    let trace = result.get(&account).expect("account traced");
    assert!(trace.reads.is_empty());
    assert_eq!(trace.writes.len(), 6);

    let expected = [
        (Word::from(2u64), "basicStruct.id", Value::Uint(1u64.into())),
        (
            Word::from(3u64),
            "basicStruct.name",
            Value::String("Named Init".to_string()),
        ),
        (Word::from(4u64), "nestedStruct.id", Value::Uint(2u64.into())),
        (
            Word::from(5u64),
            "nestedStruct.basic.id",
            Value::Uint(3u64.into()),
        ),
        (
            Word::from(6u64),
            "nestedStruct.basic.name",
            Value::String("Nested".to_string()),
        ),
        (Word::from(7u64), "dynamicStruct.id", Value::Uint(4u64.into())),
    ];

    for (slot, expression, next_value) in expected {
        let accesses = trace.writes.get(&slot).expect("write labeled");
        assert_eq!(accesses.len(), 1, "one access at {slot}");

        let access = &accesses[0];
        assert_eq!(access.full_expression, expression);
        assert!(access.modified);
        assert!(!access.path.is_empty());

        // Everything starts zeroed.
        match &access.current.decoded {
            Value::Uint(zero) => assert_eq!(*zero, ethnum::U256::from(0u64)),
            Value::String(empty) => assert!(empty.is_empty()),
            other => panic!("unexpected current value {other:?}"),
        }
        assert_eq!(access.next.as_ref().expect("next present").decoded, next_value);
    }

    Ok(())
}
