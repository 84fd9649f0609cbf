//! This library analyses the execution of an
//! [EVM](https://ethereum.org/en/developers/docs/evm/) transaction to
//! produce a human-readable map of contract storage accesses: for each
//! account touched by the transaction, which slots were read or written,
//! which declared variable (and sub-path into it) each slot belongs to,
//! and the decoded before/after values of those variables.
//!
//! # How it Works
//!
//! From a very high level, the analysis is performed as follows:
//!
//! 1. The transaction is simulated (or replayed) through an
//!    [`oracle::ExecutionOracle`], yielding the access list, an opcode
//!    trace with stack snapshots, and pre/post state handles.
//! 2. The pre- and post-execution word of every touched slot is fetched
//!    and diffed by the [`differ`], classifying each slot as read or
//!    written.
//! 3. Candidate mapping keys and array indices are harvested by the
//!    [`keys`] module from calldata, touched addresses, trace stack values
//!    and a handful of constants. Keys are not directly observable, so
//!    they must be guessed and then proven by slot-hash equality.
//! 4. The [`resolver`] reverses the EVM's slot-derivation algebra
//!    (implemented once, in the [`codec`]) to decide which declared
//!    variable produced each observed slot, probing the candidates against
//!    the mapping and array roots of the contract's [`layout::LayoutIndex`].
//! 5. The [`assembler`] joins the matches with the diffed words, decodes
//!    the affected byte ranges into typed values, and emits the final
//!    [`assembler::StorageAccessTrace`] per account.
//!
//! # Basic Usage
//!
//! For the most basic usage of the library, it is sufficient to call
//! [`trace_storage_access`] with implementations of the two oracle traits
//! and the transaction to analyse:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use storage_access_tracer as tracer;
//! use storage_access_tracer::{
//!     oracle::{ExecutionOracle, LayoutSource, TransactionRequest},
//!     value::Word,
//! };
//!
//! # async fn example(
//! #     oracle: Arc<dyn ExecutionOracle>,
//! #     source: Arc<dyn LayoutSource>,
//! # ) -> tracer::error::Result<()> {
//! let result = tracer::trace_storage_access(
//!     oracle,
//!     source,
//!     tracer::Config::default(),
//!     TransactionRequest::Replay {
//!         tx_hash: Word::from_hex("0xdeadbeef").unwrap(),
//!     },
//! )
//! .await?;
//!
//! for (address, trace) in &result {
//!     for (slot, accesses) in &trace.writes {
//!         for access in accesses {
//!             println!("{address}: {} @ {slot}", access.full_expression);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod assembler;
pub mod cache;
pub mod codec;
pub mod constant;
pub mod differ;
pub mod error;
pub mod keys;
pub mod layout;
pub mod oracle;
pub mod resolver;
pub mod tracer;
pub mod value;
pub mod watch;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use assembler::{LabeledAccess, StorageAccessTrace};
pub use tracer::{new, trace_storage_access, Config, Tracer};
pub use watch::{watch_storage, Unsubscribe};
