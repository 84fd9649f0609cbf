//! This module contains the value vocabulary for the tracer: the raw 32-byte
//! storage [`Word`], the 20-byte account [`Address`], and the decoded typed
//! [`Value`]s that labeled accesses carry.
//!
//! All byte sequences are big-endian (network) ordered, matching the EVM
//! convention, and all canonical textual representations are lower-case hex
//! with a `0x` prefix.

use std::{
    cmp::Ordering,
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};

use ethnum::{I256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constant::{ADDRESS_SIZE_BYTES, WORD_SIZE_BYTES};

/// An immutable 32-byte storage word.
///
/// Equality, ordering and hashing are byte-wise. The canonical textual form
/// is the full 64-character lower-case hex string with a `0x` prefix, which
/// is also the serialised representation.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct Word([u8; WORD_SIZE_BYTES]);

impl Word {
    /// The all-zeroes word.
    pub const ZERO: Word = Word([0; WORD_SIZE_BYTES]);

    /// Constructs a word from its big-endian bytes.
    #[must_use]
    pub fn new(bytes: [u8; WORD_SIZE_BYTES]) -> Self {
        Self(bytes)
    }

    /// Gets the big-endian bytes of the word.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; WORD_SIZE_BYTES] {
        &self.0
    }

    /// Checks whether every byte of the word is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Interprets the word as an unsigned 256-bit integer.
    #[must_use]
    pub fn as_u256(&self) -> U256 {
        U256::from_be_bytes(self.0)
    }

    /// Parses a word from a hex string, with or without the `0x` prefix.
    ///
    /// Inputs shorter than 64 hex characters are left-padded with zeroes, as
    /// is conventional for slot identifiers.
    pub fn from_hex(input: impl AsRef<str>) -> Result<Self, hex::FromHexError> {
        let stripped = input.as_ref().trim_start_matches("0x");
        let mut padded = String::new();
        for _ in 0..(WORD_SIZE_BYTES * 2).saturating_sub(stripped.len()) {
            padded.push('0');
        }
        padded.push_str(stripped);

        let bytes = hex::decode(padded)?;
        let bytes: [u8; WORD_SIZE_BYTES] =
            bytes.as_slice().try_into().map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(bytes))
    }

    /// Formats the word as its canonical `0x`-prefixed hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<U256> for Word {
    fn from(value: U256) -> Self {
        Self(value.to_be_bytes())
    }
}

impl From<Word> for U256 {
    fn from(value: Word) -> Self {
        value.as_u256()
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Self::from(U256::from(value))
    }
}

impl From<Address> for Word {
    /// Left-pads the address to a full word, which is the 32-byte encoding
    /// used for address-typed mapping keys.
    fn from(value: Address) -> Self {
        let mut bytes = [0u8; WORD_SIZE_BYTES];
        bytes[WORD_SIZE_BYTES - ADDRESS_SIZE_BYTES..].copy_from_slice(&value.0);
        Self(bytes)
    }
}

impl PartialOrd for Word {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Word {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Display for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Word {
    /// The debug representation is the canonical hex form, as the wrapper
    /// itself has no semantic content.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Word {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Word::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A 20-byte account identifier.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Address([u8; ADDRESS_SIZE_BYTES]);

impl Address {
    /// The all-zeroes address.
    pub const ZERO: Address = Address([0; ADDRESS_SIZE_BYTES]);

    /// Constructs an address from its big-endian bytes.
    #[must_use]
    pub fn new(bytes: [u8; ADDRESS_SIZE_BYTES]) -> Self {
        Self(bytes)
    }

    /// Gets the bytes of the address.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE_BYTES] {
        &self.0
    }

    /// Parses an address from a hex string, with or without the `0x` prefix.
    pub fn from_hex(input: impl AsRef<str>) -> Result<Self, hex::FromHexError> {
        let stripped = input.as_ref().trim_start_matches("0x");
        let bytes = hex::decode(stripped)?;
        let bytes: [u8; ADDRESS_SIZE_BYTES] =
            bytes.as_slice().try_into().map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(bytes))
    }

    /// Formats the address as its canonical `0x`-prefixed hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl TryFrom<Word> for Address {
    type Error = hex::FromHexError;

    /// Takes the low 20 bytes of the word; fails if the high 12 bytes are
    /// not zero.
    fn try_from(value: Word) -> Result<Self, Self::Error> {
        let bytes = value.as_bytes();
        if bytes[..WORD_SIZE_BYTES - ADDRESS_SIZE_BYTES].iter().any(|b| *b != 0) {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut address = [0u8; ADDRESS_SIZE_BYTES];
        address.copy_from_slice(&bytes[WORD_SIZE_BYTES - ADDRESS_SIZE_BYTES..]);
        Ok(Self(address))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A decoded, typed storage value.
///
/// This is the human-facing form of the bytes a labeled access covers. The
/// serialised representation is chosen for readability: numerics are decimal
/// strings, addresses and byte sequences are hex, and strings are literal.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Value {
    /// An unsigned integer of up to 256 bits.
    Uint(U256),

    /// A signed (two's complement) integer of up to 256 bits.
    Int(I256),

    /// A boolean.
    Bool(bool),

    /// An account address.
    Address(Address),

    /// A fixed-length byte sequence (`bytesN`).
    FixedBytes(Vec<u8>),

    /// A dynamically-sized byte sequence.
    Bytes(Vec<u8>),

    /// A UTF-8 string. Invalid UTF-8 degrades to a lossy conversion.
    String(String),

    /// A value whose backing layout is absent, carried as the raw word.
    Unknown(Word),
}

impl Value {
    /// Interprets the value as an array index if it is numeric and small
    /// enough to be one.
    #[must_use]
    pub fn as_index(&self) -> Option<u64> {
        match self {
            Value::Uint(value) if *value <= U256::from(u64::MAX) => Some(value.as_u64()),
            _ => None,
        }
    }

    /// Formats the value the way it appears inside a `full_expression` key
    /// bracket: addresses as hex, numerics as decimal, strings quoted.
    #[must_use]
    pub fn to_expression_string(&self) -> String {
        match self {
            Value::Uint(value) => format!("{value}"),
            Value::Int(value) => format!("{value}"),
            Value::Bool(value) => format!("{value}"),
            Value::Address(address) => address.to_hex(),
            Value::FixedBytes(bytes) | Value::Bytes(bytes) => {
                format!("0x{}", hex::encode(bytes))
            }
            Value::String(string) => format!("{string:?}"),
            Value::Unknown(word) => word.to_hex(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_expression_string())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::String(string) => serializer.serialize_str(string),
            other => serializer.serialize_str(&other.to_expression_string()),
        }
    }
}
