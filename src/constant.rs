//! This module contains constants that are needed throughout the codebase.

/// The width of a storage word on the EVM in bytes.
pub const WORD_SIZE_BYTES: usize = 32;

/// The width of an account address on the EVM in bytes.
pub const ADDRESS_SIZE_BYTES: usize = 20;

/// The number of bytes in an ABI function selector.
pub const SELECTOR_SIZE_BYTES: usize = 4;

/// The largest array index that the resolver will try when probing dynamic
/// array element slots with a numeric candidate.
///
/// Candidates above this bound are overwhelmingly likely to be hashes or
/// other non-index data, and trying them would only waste work.
pub const MAX_ARRAY_INDEX: u64 = 1_000_000;

/// The number of small integer constants (`0..SMALL_CONSTANT_KEYS`) that are
/// always included as candidate keys, as they are probable array indices.
pub const SMALL_CONSTANT_KEYS: u64 = 10;

/// The maximum number of data slots that will be walked when aggregating a
/// long `bytes` or `string` value.
pub const MAX_BYTES_DATA_SLOTS: usize = 256;

/// The maximum depth to which struct and mapping value types will be
/// recursively expanded during slot resolution.
///
/// Layouts deeper than this are pathological; recursion is cut off rather
/// than allowed to run away on a cyclic type table.
pub const MAX_TYPE_RECURSION_DEPTH: usize = 16;

/// The number of leading bytes of a slot used to build the label for slots
/// that match no declared variable.
pub const FALLBACK_SLOT_PREFIX_BYTES: usize = 4;

/// The label prefix used for slots that match no declared variable.
pub const FALLBACK_LABEL_PREFIX: &str = "var_";

/// The default number of layout entries retained by the process-wide layout
/// cache before least-recently-used eviction begins.
pub const DEFAULT_LAYOUT_CACHE_CAPACITY: usize = 128;

/// The default interval, in milliseconds, at which the storage watcher polls
/// for new blocks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
