//! This module contains common testing utilities for testing this library.
#![cfg(test)]
#![allow(unused)] // Not every test file uses every helper.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use async_trait::async_trait;
use storage_access_tracer::{
    error::oracle::Result,
    layout::parse::LayoutDocument,
    oracle::{
        ExecutionOracle,
        IntrinsicSnapshot,
        LayoutSource,
        Simulation,
        SnapshotSide,
        TraceStep,
        TransactionRequest,
    },
    value::{Address, Word},
};

/// The account every scenario runs against.
#[must_use]
pub fn contract_address() -> Address {
    Address::from_hex("0x00000000000000000000000000000000000c0ffe").unwrap()
}

/// A scripted execution oracle replaying fixed pre/post snapshots.
#[derive(Clone, Debug, Default)]
pub struct MockOracle {
    pub simulation: Simulation,
    pub pre:  BTreeMap<(Address, Word), Word>,
    pub post: BTreeMap<(Address, Word), Word>,
}

#[async_trait]
impl ExecutionOracle for MockOracle {
    async fn simulate(&self, _tx: &TransactionRequest) -> Result<Simulation> {
        Ok(self.simulation.clone())
    }

    async fn storage_at(
        &self,
        account: Address,
        slot: Word,
        at: SnapshotSide,
    ) -> Result<Option<Word>> {
        let side = match at {
            SnapshotSide::Pre => &self.pre,
            SnapshotSide::Post => &self.post,
        };
        Ok(side.get(&(account, slot)).copied())
    }

    async fn intrinsics(&self, _account: Address, _at: SnapshotSide) -> Result<IntrinsicSnapshot> {
        Ok(IntrinsicSnapshot::default())
    }

    async fn latest_block(&self) -> Result<u64> {
        Ok(0)
    }

    async fn transactions_touching(&self, _address: Address, _block: u64) -> Result<Vec<Word>> {
        Ok(Vec::new())
    }
}

/// A layout source serving fixed documents per address.
#[derive(Clone, Debug, Default)]
pub struct MockLayoutSource {
    pub documents: BTreeMap<Address, LayoutDocument>,
}

#[async_trait]
impl LayoutSource for MockLayoutSource {
    async fn layout_for(&self, address: Address) -> Result<Option<LayoutDocument>> {
        Ok(self.documents.get(&address).cloned())
    }
}

/// Builds one scenario: an account with scripted slot words and a trace.
#[derive(Clone, Debug, Default)]
pub struct ScenarioBuilder {
    account: Address,
    slots:   BTreeSet<Word>,
    pre:     BTreeMap<(Address, Word), Word>,
    post:    BTreeMap<(Address, Word), Word>,
    stack:   Vec<Word>,
}

impl ScenarioBuilder {
    #[must_use]
    pub fn new(account: Address) -> Self {
        Self {
            account,
            ..Self::default()
        }
    }

    /// Scripts a slot that changed across execution.
    #[must_use]
    pub fn write(mut self, slot: Word, pre: Word, post: Word) -> Self {
        self.slots.insert(slot);
        self.pre.insert((self.account, slot), pre);
        self.post.insert((self.account, slot), post);
        self
    }

    /// Scripts a slot that was touched without changing.
    #[must_use]
    pub fn read(mut self, slot: Word, value: Word) -> Self {
        self.write(slot, value, value)
    }

    /// Adds a 32-byte value to the execution trace's stack snapshots, from
    /// which the key oracle will harvest it.
    #[must_use]
    pub fn stack_word(mut self, word: Word) -> Self {
        self.stack.push(word);
        self
    }

    /// Finishes the scenario into a scripted oracle.
    #[must_use]
    pub fn build(self) -> Arc<MockOracle> {
        let mut access_list = BTreeMap::new();
        access_list.insert(self.account, self.slots);

        let mut touched = BTreeSet::new();
        touched.insert(self.account);

        let trace = if self.stack.is_empty() {
            Vec::new()
        } else {
            vec![TraceStep {
                op:    "SSTORE".to_string(),
                stack: self.stack,
            }]
        };

        Arc::new(MockOracle {
            simulation: Simulation {
                access_list,
                touched,
                trace,
                ..Simulation::default()
            },
            pre: self.pre,
            post: self.post,
        })
    }
}

/// Wraps a layout document into a source serving it for the scenario
/// account.
#[must_use]
pub fn source_with(document: LayoutDocument) -> Arc<MockLayoutSource> {
    let mut documents = BTreeMap::new();
    documents.insert(contract_address(), document);
    Arc::new(MockLayoutSource { documents })
}

/// A layout source that knows nothing, for fallback testing.
#[must_use]
pub fn empty_source() -> Arc<MockLayoutSource> {
    Arc::new(MockLayoutSource::default())
}

/// An analysis configuration with the layout cache disabled, for
/// deterministic tests.
#[must_use]
pub fn test_config() -> storage_access_tracer::Config {
    storage_access_tracer::Config {
        chain_id: 1,
        cache: Arc::new(storage_access_tracer::cache::LayoutCache::disabled()),
    }
}

/// The storage layout of the `StorageTest` fixture contract used by the
/// struct scenarios:
///
/// | slot | variable                                   |
/// |------|--------------------------------------------|
/// | 0    | `uint8 precedingValue`                     |
/// | 1    | `PackedStruct packedStruct` (a, b, c, d)   |
/// | 2-3  | `BasicStruct basicStruct` (id, name)       |
/// | 4-6  | `NestedStruct nestedStruct` (id, basic)    |
/// | 7-9  | `DynamicStruct dynamicStruct` (id, numbers, flags) |
#[must_use]
pub fn storage_test_layout() -> LayoutDocument {
    LayoutDocument::from_json(
        r#"{
            "storage": [
                {"label": "precedingValue", "offset": 0, "slot": "0", "type": "t_uint8"},
                {"label": "packedStruct", "offset": 0, "slot": "1", "type": "t_struct(PackedStruct)"},
                {"label": "basicStruct", "offset": 0, "slot": "2", "type": "t_struct(BasicStruct)"},
                {"label": "nestedStruct", "offset": 0, "slot": "4", "type": "t_struct(NestedStruct)"},
                {"label": "dynamicStruct", "offset": 0, "slot": "7", "type": "t_struct(DynamicStruct)"}
            ],
            "types": {
                "t_bool": {"encoding": "inplace", "label": "bool", "numberOfBytes": "1"},
                "t_uint8": {"encoding": "inplace", "label": "uint8", "numberOfBytes": "1"},
                "t_uint16": {"encoding": "inplace", "label": "uint16", "numberOfBytes": "2"},
                "t_uint32": {"encoding": "inplace", "label": "uint32", "numberOfBytes": "4"},
                "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"},
                "t_string_storage": {"encoding": "bytes", "label": "string", "numberOfBytes": "32"},
                "t_array(t_uint256)dyn_storage": {
                    "encoding": "dynamic_array",
                    "label": "uint256[]",
                    "numberOfBytes": "32",
                    "base": "t_uint256"
                },
                "t_mapping(t_uint256,t_bool)": {
                    "encoding": "mapping",
                    "label": "mapping(uint256 => bool)",
                    "numberOfBytes": "32",
                    "key": "t_uint256",
                    "value": "t_bool"
                },
                "t_struct(PackedStruct)": {
                    "encoding": "inplace",
                    "label": "struct StorageTest.PackedStruct",
                    "numberOfBytes": "32",
                    "members": [
                        {"label": "a", "offset": 0, "slot": "0", "type": "t_uint8"},
                        {"label": "b", "offset": 1, "slot": "0", "type": "t_uint16"},
                        {"label": "c", "offset": 3, "slot": "0", "type": "t_uint32"},
                        {"label": "d", "offset": 7, "slot": "0", "type": "t_bool"}
                    ]
                },
                "t_struct(BasicStruct)": {
                    "encoding": "inplace",
                    "label": "struct StorageTest.BasicStruct",
                    "numberOfBytes": "64",
                    "members": [
                        {"label": "id", "offset": 0, "slot": "0", "type": "t_uint256"},
                        {"label": "name", "offset": 0, "slot": "1", "type": "t_string_storage"}
                    ]
                },
                "t_struct(NestedStruct)": {
                    "encoding": "inplace",
                    "label": "struct StorageTest.NestedStruct",
                    "numberOfBytes": "96",
                    "members": [
                        {"label": "id", "offset": 0, "slot": "0", "type": "t_uint256"},
                        {"label": "basic", "offset": 0, "slot": "1", "type": "t_struct(BasicStruct)"}
                    ]
                },
                "t_struct(DynamicStruct)": {
                    "encoding": "inplace",
                    "label": "struct StorageTest.DynamicStruct",
                    "numberOfBytes": "96",
                    "members": [
                        {"label": "id", "offset": 0, "slot": "0", "type": "t_uint256"},
                        {"label": "numbers", "offset": 0, "slot": "1", "type": "t_array(t_uint256)dyn_storage"},
                        {"label": "flags", "offset": 0, "slot": "2", "type": "t_mapping(t_uint256,t_bool)"}
                    ]
                }
            }
        }"#,
    )
    .unwrap()
}

/// Encodes a short (< 32 byte) string the way Solidity stores it: data
/// left-aligned, `length * 2` in the last byte.
#[must_use]
pub fn short_string_word(text: &str) -> Word {
    assert!(text.len() < 32, "fixture strings must be short");
    let mut bytes = [0u8; 32];
    bytes[..text.len()].copy_from_slice(text.as_bytes());
    bytes[31] = (text.len() * 2) as u8;
    Word::new(bytes)
}

/// A replay request; the scripted oracle ignores the hash.
#[must_use]
pub fn replay_request() -> TransactionRequest {
    TransactionRequest::Replay {
        tx_hash: Word::from(0xfeedu64),
    }
}
