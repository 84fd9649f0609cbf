//! This module is an integration test that checks the reconstruction of a
//! mapping entry nested inside a struct from a harvested candidate key.
#![cfg(test)]

use storage_access_tracer::{
    codec,
    resolver::PathSegment,
    trace_storage_access,
    value::{Value, Word},
};

mod common;

#[tokio::test]
async fn reconstructs_the_struct_mapping_entry() -> anyhow::Result<()> {
    // dynamicStruct.flags[123] = true; the mapping's base slot is 9.
    let key = Word::from(123u64);
    let entry_slot = codec::mapping_slot(Word::from(9u64), key);

    let account = common::contract_address();
    let oracle = common::ScenarioBuilder::new(account)
        .stack_word(key)
        .write(entry_slot, Word::ZERO, Word::from(1u64))
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

    let accesses = trace.writes.get(&entry_slot).expect("entry labeled");
    assert_eq!(accesses.len(), 1);

    let access = &accesses[0];
    assert_eq!(access.full_expression, "dynamicStruct.flags[123]");
    assert_eq!(access.current.decoded, Value::Bool(false));
    assert_eq!(access.next.as_ref().expect("next present").decoded, Value::Bool(true));

    // The path names the field and carries the reconstructed key, re-typed
    // with the mapping's declared uint256 key type.
    assert_eq!(access.path.len(), 2);
    assert!(
        matches!(&access.path[0], PathSegment::Field { name } if name == "flags"),
        "unexpected path {:?}",
        access.path
    );
    let PathSegment::Key { key: reconstructed } = &access.path[1] else {
        panic!("expected a key segment");
    };
    assert_eq!(reconstructed.word, key);
    assert_eq!(reconstructed.value, Value::Uint(123u64.into()));
    assert!(reconstructed.ty.is_some());

    Ok(())
}
