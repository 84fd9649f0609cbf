//! This module contains the key oracle: the harvesting of candidate mapping
//! keys and array indices from everything observable about a transaction.
//!
//! Mapping keys are not directly observable in an execution trace; only the
//! keccak-derived slots are. The resolver therefore needs a population of
//! plausible keys to try, and this module gathers them from four places:
//! touched account addresses, ABI-decoded calldata arguments, operand stack
//! values seen in the trace, and a small set of integer constants that make
//! likely array indices.
//!
//! Harvesting never fails. A missing ABI or undecodable calldata just means
//! fewer candidates, which degrades resolution rather than aborting it.

use std::collections::BTreeMap;

use alloy_dyn_abi::{DynSolValue, JsonAbiExt, Specifier};
use alloy_json_abi::JsonAbi;
use ethnum::{I256, U256};
use tracing::debug;

use crate::{
    constant::{SELECTOR_SIZE_BYTES, SMALL_CONSTANT_KEYS, WORD_SIZE_BYTES},
    layout::types::Primitive,
    oracle::{Simulation, TransactionRequest},
    value::{Address, Value, Word},
};

/// Where a candidate key was observed.
///
/// The source doubles as the candidate's confidence rank: calldata arguments
/// and touched addresses outrank raw stack values, which outrank the
/// guessed constants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// An ABI-decoded calldata argument at the given position.
    Argument {
        /// The zero-based argument position within the call.
        position: usize,
    },

    /// An account address touched by the transaction.
    TouchedAddress,

    /// A 32-byte value seen on the operand stack during execution.
    Stack,

    /// One of the small integer constants tried as probable array indices.
    Constant,
}

impl KeySource {
    /// Gets the sortable confidence rank of the source. Lower ranks are more
    /// trustworthy.
    #[must_use]
    pub fn rank(&self) -> (u8, usize) {
        match self {
            KeySource::Argument { position } => (0, *position),
            KeySource::TouchedAddress => (1, 0),
            KeySource::Stack => (2, 0),
            KeySource::Constant => (3, 0),
        }
    }
}

/// A candidate mapping key or array index.
///
/// The 32-byte form is the identity of the candidate: it is the only
/// universally comparable representation, and it is what gets hashed when
/// the resolver probes a mapping root.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct MappingKey {
    /// The 32-byte encoding of the key, as it enters the slot hash.
    pub word: Word,

    /// The decoded form of the key, for display.
    pub value: Value,

    /// The declared type of the key, when one is known.
    pub ty: Option<Primitive>,

    /// Where the candidate was observed.
    pub source: KeySource,
}

impl MappingKey {
    /// Constructs an untyped candidate carrying only its raw word.
    #[must_use]
    pub fn untyped(word: Word, source: KeySource) -> Self {
        Self {
            word,
            value: Value::Uint(word.as_u256()),
            ty: None,
            source,
        }
    }
}

/// The deduplicated candidate population for one analysis.
///
/// Uniqueness is by the 32-byte form. When the same word arrives twice, a
/// typed candidate replaces an untyped one, and a better-ranked source
/// replaces a worse one.
#[derive(Clone, Debug, Default)]
pub struct CandidateKeys {
    keys: BTreeMap<Word, MappingKey>,
}

impl CandidateKeys {
    /// Creates an empty candidate population.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a candidate, keeping the better of the two on collision.
    pub fn insert(&mut self, candidate: MappingKey) {
        match self.keys.get_mut(&candidate.word) {
            None => {
                self.keys.insert(candidate.word, candidate);
            }
            Some(existing) => {
                let upgrade_type = candidate.ty.is_some() && existing.ty.is_none();
                let upgrade_rank = candidate.ty.is_some() == existing.ty.is_some()
                    && candidate.source.rank() < existing.source.rank();
                if upgrade_type || upgrade_rank {
                    *existing = candidate;
                }
            }
        }
    }

    /// Iterates over the candidates in deterministic (word) order.
    pub fn iter(&self) -> impl Iterator<Item = &MappingKey> {
        self.keys.values()
    }

    /// Gets the number of distinct candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Checks whether the population is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Harvests the full candidate population for one simulated transaction.
///
/// `abis` should hold the ABIs of every touched contract for which one is
/// known; the caller-supplied ABI inside a
/// [`TransactionRequest::FunctionCall`] is consulted as well.
#[must_use]
pub fn harvest(
    simulation: &Simulation,
    request: &TransactionRequest,
    abis: &[&JsonAbi],
) -> CandidateKeys {
    let mut candidates = CandidateKeys::new();

    harvest_constants(&mut candidates);

    for step in &simulation.trace {
        for word in &step.stack {
            candidates.insert(MappingKey::untyped(*word, KeySource::Stack));
        }
    }

    for address in &simulation.touched {
        candidates.insert(MappingKey {
            word: Word::from(*address),
            value: Value::Address(*address),
            ty: Some(Primitive::address()),
            source: KeySource::TouchedAddress,
        });
    }

    harvest_arguments(&mut candidates, request, abis);

    candidates
}

/// Adds the small integer constants that make probable array indices.
fn harvest_constants(candidates: &mut CandidateKeys) {
    for index in 0..SMALL_CONSTANT_KEYS {
        candidates.insert(MappingKey {
            word: Word::from(index),
            value: Value::Uint(U256::from(index)),
            ty: None,
            source: KeySource::Constant,
        });
    }
}

/// Adds the ABI-decoded calldata arguments of the transaction, when both
/// calldata and a matching ABI function are available.
fn harvest_arguments(
    candidates: &mut CandidateKeys,
    request: &TransactionRequest,
    abis: &[&JsonAbi],
) {
    let decoded = match request {
        TransactionRequest::Call { data, .. } => decode_calldata(data, abis),
        TransactionRequest::FunctionCall { abi, function, args, .. } => {
            coerce_arguments(abi, function, args)
        }
        TransactionRequest::Replay { .. } => None,
    };

    let Some(values) = decoded else {
        debug!("no ABI match for calldata; skipping argument harvesting");
        return;
    };

    let mut position = 0;
    for value in values {
        insert_argument(candidates, &value, &mut position);
    }
}

/// Decodes raw calldata by looking its selector up across the known ABIs.
fn decode_calldata(data: &[u8], abis: &[&JsonAbi]) -> Option<Vec<DynSolValue>> {
    if data.len() < SELECTOR_SIZE_BYTES {
        return None;
    }
    let (selector, payload) = data.split_at(SELECTOR_SIZE_BYTES);

    for abi in abis {
        for function in abi.functions() {
            if function.selector().as_slice() != selector {
                continue;
            }
            match function.abi_decode_input(payload) {
                Ok(values) => return Some(values),
                Err(error) => {
                    debug!(function = %function.name, %error, "calldata did not decode");
                }
            }
        }
    }

    None
}

/// Coerces the textual arguments of a function-call request using the
/// declared input types.
fn coerce_arguments(abi: &JsonAbi, function: &str, args: &[String]) -> Option<Vec<DynSolValue>> {
    let overloads = abi.function(function)?;
    let function = overloads.iter().find(|f| f.inputs.len() == args.len())?;

    let mut values = Vec::with_capacity(args.len());
    for (param, arg) in function.inputs.iter().zip(args) {
        let ty = param.resolve().ok()?;
        values.push(ty.coerce_str(arg).ok()?);
    }
    Some(values)
}

/// Converts one decoded argument into candidates, recursing into composite
/// values so that every element of an array argument contributes.
fn insert_argument(candidates: &mut CandidateKeys, value: &DynSolValue, position: &mut usize) {
    match value {
        DynSolValue::Array(elements)
        | DynSolValue::FixedArray(elements)
        | DynSolValue::Tuple(elements) => {
            for element in elements {
                insert_argument(candidates, element, position);
            }
        }
        scalar => {
            if let Some(candidate) = scalar_candidate(scalar, *position) {
                candidates.insert(candidate);
            }
            *position += 1;
        }
    }
}

/// Converts a scalar argument into a candidate key, or `None` for the
/// dynamic types whose mapping keys are not expressible as a single word.
fn scalar_candidate(value: &DynSolValue, position: usize) -> Option<MappingKey> {
    let source = KeySource::Argument { position };

    match value {
        DynSolValue::Address(address) => {
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(address.as_slice());
            let address = Address::new(bytes);
            Some(MappingKey {
                word: Word::from(address),
                value: Value::Address(address),
                ty: Some(Primitive::address()),
                source,
            })
        }
        DynSolValue::Uint(value, bits) => {
            let word = Word::new(value.to_be_bytes::<{ WORD_SIZE_BYTES }>());
            Some(MappingKey {
                word,
                value: Value::Uint(word.as_u256()),
                ty: Some(Primitive::uint(*bits as u16)),
                source,
            })
        }
        DynSolValue::Int(value, bits) => {
            let word = Word::new(value.to_be_bytes::<{ WORD_SIZE_BYTES }>());
            Some(MappingKey {
                word,
                value: Value::Int(I256::from_be_bytes(*word.as_bytes())),
                ty: Some(Primitive::int(*bits as u16)),
                source,
            })
        }
        DynSolValue::Bool(value) => Some(MappingKey {
            word: Word::from(u64::from(*value)),
            value: Value::Bool(*value),
            ty: Some(Primitive::bool()),
            source,
        }),
        DynSolValue::FixedBytes(bytes, size) => {
            let word = Word::new(bytes.0);
            Some(MappingKey {
                word,
                value: Value::FixedBytes(bytes.0[..*size].to_vec()),
                ty: Some(Primitive::fixed_bytes(*size as u16)),
                source,
            })
        }
        // Dynamic bytes and strings key mappings through a hash of their
        // raw bytes, not through a single word, so they cannot take part in
        // the fixed-width slot algebra.
        _ => None,
    }
}
