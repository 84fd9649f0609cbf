//! This module contains errors pertaining to the ingestion and validation of
//! compiler-emitted storage layouts.

use thiserror::Error;

use crate::{
    error::container,
    value::{Address, Word},
};

/// Errors that occur while parsing or indexing a storage layout document.
///
/// A malformed layout is fatal to the labeling of the account it belongs to,
/// but never to the analysis as a whole: the offending account degrades to
/// fallback labels while other accounts proceed.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("the layout document could not be parsed: {detail}")]
    Document { detail: String },

    #[error("storage variable `{variable}` references unknown type `{type_id}`")]
    DanglingTypeReference { variable: String, type_id: String },

    #[error(
        "storage variable `{variable}` overflows its slot (offset {offset} + size {size} > 32)"
    )]
    SlotOverflow {
        variable: String,
        offset:   usize,
        size:     usize,
    },

    #[error("storage variables `{first}` and `{second}` overlap in slot {slot}")]
    PackedOverlap {
        first:  String,
        second: String,
        slot:   Word,
    },

    #[error("the type graph under variable `{variable}` exceeds the supported nesting depth")]
    NestingTooDeep { variable: String },

    #[error("no storage layout is available for {address}")]
    Unavailable { address: Address },
}

/// A layout error with the account it belongs to attached.
pub type LocatedError = container::Located<Error>;

/// A container of layout errors used for aggregation across accounts.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may produce layout errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Make it possible to attach accounts to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, account: Address) -> Self::Located {
        container::Located {
            location: account,
            payload:  self,
        }
    }
}
