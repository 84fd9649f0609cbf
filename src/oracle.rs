//! This module contains the boundary traits through which the tracer talks
//! to the outside world: the execution oracle (an EVM with RPC access behind
//! it) and the layout source (contract metadata acquisition).
//!
//! Everything behind these traits is out of scope for the analysis itself.
//! The tracer only ever awaits at these boundaries, which is also where
//! cooperative cancellation is observed.

use std::collections::{BTreeMap, BTreeSet};

use alloy_json_abi::JsonAbi;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::oracle::Result,
    layout::parse::LayoutDocument,
    value::{Address, Word},
};

/// The side of a transaction's execution a snapshot query refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotSide {
    /// The state before the transaction executed.
    Pre,

    /// The state after the transaction committed.
    Post,
}

/// One step of an execution trace: an opcode together with the operand
/// stack as it stood when the opcode ran.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TraceStep {
    /// The opcode mnemonic.
    pub op: String,

    /// The operand stack snapshot, bottom first.
    pub stack: Vec<Word>,
}

/// An account's intrinsic state on one side of execution.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrinsicSnapshot {
    /// The account nonce.
    pub nonce: u64,

    /// The account balance in wei, as a word.
    pub balance: Word,

    /// The hash of the account's code.
    pub code_hash: Word,
}

/// The outcome of simulating (or replaying) one transaction.
#[derive(Clone, Debug, Default)]
pub struct Simulation {
    /// Every slot the execution touched, per account, in the oracle's
    /// enumeration order.
    pub access_list: BTreeMap<Address, BTreeSet<Word>>,

    /// Every account address the execution touched.
    pub touched: BTreeSet<Address>,

    /// The ordered opcode trace with stack snapshots.
    pub trace: Vec<TraceStep>,

    /// Intrinsic account state before execution.
    pub intrinsic_pre: BTreeMap<Address, IntrinsicSnapshot>,

    /// Intrinsic account state after execution.
    pub intrinsic_post: BTreeMap<Address, IntrinsicSnapshot>,

    /// The hash of the simulated transaction.
    pub tx_hash: Word,
}

/// The transaction input accepted by the tracer.
///
/// The first two shapes are simulated against the current head; the third is
/// replayed against the historical state of the block it belongs to.
#[derive(Clone, Debug)]
pub enum TransactionRequest {
    /// A raw call with pre-encoded calldata.
    Call {
        from:  Address,
        to:    Address,
        data:  Vec<u8>,
        value: Option<Word>,
    },

    /// A call described by an ABI, a function name and textual arguments;
    /// the oracle adapter encodes the calldata.
    FunctionCall {
        from:     Address,
        to:       Address,
        abi:      JsonAbi,
        function: String,
        args:     Vec<String>,
        value:    Option<Word>,
    },

    /// An already-mined transaction identified by its hash.
    Replay { tx_hash: Word },
}

impl TransactionRequest {
    /// Gets the pre-encoded calldata, when the request carries any.
    #[must_use]
    pub fn calldata(&self) -> Option<&[u8]> {
        match self {
            TransactionRequest::Call { data, .. } => Some(data.as_slice()),
            _ => None,
        }
    }

    /// Gets the caller-supplied ABI, when the request carries one.
    #[must_use]
    pub fn abi(&self) -> Option<&JsonAbi> {
        match self {
            TransactionRequest::FunctionCall { abi, .. } => Some(abi),
            _ => None,
        }
    }
}

/// The interface to the EVM and its RPC plumbing.
///
/// For a given transaction the oracle can simulate execution, returning the
/// access list and trace, and answer point queries about storage words and
/// intrinsic account state on either side of that execution.
#[async_trait]
pub trait ExecutionOracle
where
    Self: Send + Sync,
{
    /// Simulates (or replays) the provided transaction.
    async fn simulate(&self, tx: &TransactionRequest) -> Result<Simulation>;

    /// Reads the storage word at `slot` of `account` on the requested side
    /// of the simulated execution.
    ///
    /// Returns `None` when the oracle has no word for that side, which the
    /// differ treats as the zero word and flags.
    async fn storage_at(&self, account: Address, slot: Word, at: SnapshotSide)
        -> Result<Option<Word>>;

    /// Reads the intrinsic state of `account` on the requested side of the
    /// simulated execution.
    async fn intrinsics(&self, account: Address, at: SnapshotSide) -> Result<IntrinsicSnapshot>;

    /// Gets the number of the most recent block the oracle knows about.
    async fn latest_block(&self) -> Result<u64>;

    /// Lists the hashes of transactions in `block` that touched `address`.
    async fn transactions_touching(&self, address: Address, block: u64) -> Result<Vec<Word>>;
}

/// The interface to contract metadata acquisition.
#[async_trait]
pub trait LayoutSource
where
    Self: Send + Sync,
{
    /// Fetches the parsed layout document for `address`, or `None` when the
    /// source has nothing for it.
    async fn layout_for(&self, address: Address) -> Result<Option<LayoutDocument>>;
}
