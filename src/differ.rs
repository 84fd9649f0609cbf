//! This module contains the access differ: the part of the pipeline that
//! turns an account's access list into concrete pre/post word pairs and
//! classifies each touched slot as read or written.
//!
//! The differ is oblivious to layouts. Its output is joined with the slot
//! matches by the assembler.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::{
    error::oracle::Result,
    oracle::{ExecutionOracle, IntrinsicSnapshot, SnapshotSide},
    value::{Address, Word},
};

/// One touched slot with its words on both sides of execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotAccess {
    /// The slot that was touched.
    pub slot: Word,

    /// The word before execution.
    pub pre: Word,

    /// The word after execution.
    pub post: Word,

    /// Whether the oracle was missing one side of the snapshot, making the
    /// zero word on that side an assumption rather than an observation.
    pub gap: bool,
}

impl SlotAccess {
    /// Checks whether the slot's value changed across execution.
    #[must_use]
    pub fn modified(&self) -> bool {
        self.pre != self.post
    }
}

/// The pre/post intrinsic state of one account.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct IntrinsicDiff {
    /// The intrinsic state before execution.
    pub pre: IntrinsicSnapshot,

    /// The intrinsic state after execution.
    pub post: IntrinsicSnapshot,
}

/// The diffed storage view of one account.
#[derive(Clone, Debug, Default)]
pub struct AccountDiff {
    /// The account's touched slots, keyed by slot for deterministic
    /// iteration.
    pub slots: BTreeMap<Word, SlotAccess>,

    /// The account's intrinsic pre/post state.
    pub intrinsic: IntrinsicDiff,
}

impl AccountDiff {
    /// Iterates over the slots whose value did not change.
    pub fn reads(&self) -> impl Iterator<Item = &SlotAccess> {
        self.slots.values().filter(|access| !access.modified())
    }

    /// Iterates over the slots whose value changed.
    pub fn writes(&self) -> impl Iterator<Item = &SlotAccess> {
        self.slots.values().filter(|access| access.modified())
    }
}

/// Fetches the pre/post words for every slot in `slots` of `account` and
/// the account's intrinsic snapshots, producing its [`AccountDiff`].
///
/// A slot the oracle only knows on one side is zero-filled on the other and
/// flagged as a gap rather than failing the analysis.
pub async fn diff_account(
    oracle: &dyn ExecutionOracle,
    account: Address,
    slots: &BTreeSet<Word>,
) -> Result<AccountDiff> {
    let mut diffed = BTreeMap::new();

    for slot in slots {
        let pre = oracle.storage_at(account, *slot, SnapshotSide::Pre).await?;
        let post = oracle.storage_at(account, *slot, SnapshotSide::Post).await?;
        let gap = pre.is_none() != post.is_none();
        if gap {
            warn!(%account, %slot, "oracle returned a one-sided snapshot; zero-filling");
        }

        diffed.insert(
            *slot,
            SlotAccess {
                slot: *slot,
                pre: pre.unwrap_or(Word::ZERO),
                post: post.unwrap_or(Word::ZERO),
                gap,
            },
        );
    }

    let intrinsic = IntrinsicDiff {
        pre:  oracle.intrinsics(account, SnapshotSide::Pre).await?,
        post: oracle.intrinsics(account, SnapshotSide::Post).await?,
    };

    Ok(AccountDiff {
        slots: diffed,
        intrinsic,
    })
}
