//! This module contains the primary error type for the tracer's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.
//!
//! # Anyhow
//!
//! All of the errors implement [`std::error::Error`], and hence can be used
//! with [`anyhow::Error`] internally. It is _not_ recommended to use that
//! error type in the interface of the library, as this forces clients to
//! also use `anyhow`.

pub mod container;
pub mod layout;
pub mod oracle;

use std::sync::Arc;

use thiserror::Error;

use crate::value::Word;

/// The interface result type for the library.
///
/// Any function considered to be part of the public interface of the library
/// should return this result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by
/// the clients of the library) should be members of this enum.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors from the storage layout subsystem.
    #[error(transparent)]
    Layout(#[from] layout::Error),

    /// Errors from the external oracle boundary.
    #[error(transparent)]
    Oracle(#[from] oracle::Error),

    /// A recorded slot match whose derivation could not be reproduced. The
    /// match is dropped rather than surfaced, so this kind only ever appears
    /// in diagnostics.
    #[error("the derivation for a match on slot {slot} could not be reproduced")]
    DecodeMismatch { slot: Word },

    /// The analysis was cancelled through its watchdog. No partial result
    /// exists.
    #[error("the analysis was cancelled")]
    Cancelled,

    /// Unknown errors, usually from the dependencies of the library.
    ///
    /// It is wrapped in an [`Arc`] to ensure that it can be cloned like the
    /// other error types in this interface error.
    #[error(transparent)]
    Other(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(Arc::new(value))
    }
}

/// A library error with the account it belongs to attached.
pub type LocatedError = container::Located<Error>;

/// A container of located library errors, used to report per-account
/// degradation without aborting the analysis of other accounts.
pub type Errors = container::Errors<LocatedError>;

/// Allow simple conversions from located layout errors by re-wrapping the
/// located error around the more general payload.
impl From<layout::LocatedError> for LocatedError {
    fn from(value: layout::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}
