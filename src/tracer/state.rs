//! This module contains the state tracking functionality for the tracer.

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use crate::{
    assembler::StorageAccessTrace,
    differ::AccountDiff,
    error,
    layout::LayoutIndex,
    oracle::{Simulation, TransactionRequest},
    resolver::SlotMatch,
    value::{Address, Word},
};

/// A marker trait that says that the type implementing it is a tracer
/// state.
pub trait State
where
    Self: Debug + Sized,
{
}

/// The initial state: the tracer holds the transaction to analyse.
#[derive(Clone, Debug)]
pub struct HasTransaction {
    /// The transaction to analyse.
    pub request: TransactionRequest,
}
impl State for HasTransaction {}

/// The tracer has successfully simulated the transaction.
#[derive(Clone, Debug)]
pub struct SimulationComplete {
    /// The transaction being analysed.
    pub request: TransactionRequest,

    /// The outcome of the simulation.
    pub simulation: Simulation,
}
impl State for SimulationComplete {}

/// The tracer has fetched and diffed the pre/post words of every touched
/// slot.
#[derive(Clone, Debug)]
pub struct DiffComplete {
    /// The transaction being analysed.
    pub request: TransactionRequest,

    /// The outcome of the simulation.
    pub simulation: Simulation,

    /// The diffed storage view per touched account.
    pub accounts: BTreeMap<Address, AccountDiff>,
}
impl State for DiffComplete {}

/// The tracer has obtained layouts, harvested candidate keys and resolved
/// every observed slot.
#[derive(Clone, Debug)]
pub struct ResolutionComplete {
    /// The diffed storage view per touched account.
    pub accounts: BTreeMap<Address, AccountDiff>,

    /// The layout index per account, absent where none could be obtained.
    pub layouts: BTreeMap<Address, Option<Arc<LayoutIndex>>>,

    /// The resolved matches per account and slot.
    pub matches: BTreeMap<Address, BTreeMap<Word, Vec<SlotMatch>>>,

    /// Per-account degradations gathered along the way.
    pub warnings: error::Errors,
}
impl State for ResolutionComplete {}

/// The tracer has assembled the final per-account traces.
#[derive(Clone, Debug)]
pub struct Assembled {
    /// The assembled trace per account.
    pub result: BTreeMap<Address, StorageAccessTrace>,

    /// Per-account degradations gathered along the way.
    pub warnings: error::Errors,

    /// How many matches were dropped because their derivation could not be
    /// reproduced.
    pub dropped_matches: usize,
}
impl State for Assembled {}
