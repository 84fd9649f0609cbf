//! This module contains errors pertaining to the external execution oracle
//! and layout source boundaries.

use thiserror::Error;

use crate::oracle::Simulation;

/// Errors surfaced by the external oracles.
///
/// These are the only user-visible failures of a healthy analysis; the
/// resolution pipeline itself degrades rather than failing.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The oracle could not be reached or answered unintelligibly. The
    /// caller should retry.
    #[error("the execution oracle is unavailable: {detail}")]
    Unavailable { detail: String },

    /// The EVM rejected the transaction. The access list gathered up to the
    /// revert is carried alongside so the caller can still inspect
    /// reverted-but-accessed slots.
    #[error("the simulation reverted: {reason}")]
    SimulationReverted {
        reason:  String,
        partial: Option<Box<Simulation>>,
    },
}

/// The result type for methods that talk to the oracles.
pub type Result<T> = std::result::Result<T, Error>;
