//! This module contains the type descriptors used to represent the declared
//! types of storage variables.
//!
//! Composite descriptors never own their component types. They refer to them
//! through [`TypeId`] handles into the layout's [`TypeTable`], mirroring the
//! compiler's own type dictionary. This keeps cyclic types (a struct holding
//! a mapping back to itself, for example) representable, with traversal
//! bounded by slot concreteness rather than by the type graph.

use std::collections::HashMap;

use serde::Serialize;

use crate::constant::WORD_SIZE_BYTES;

/// A handle into a layout's type dictionary.
///
/// These are the compiler's own type identifiers, such as `t_uint256` or
/// `t_mapping(t_address,t_uint256)`.
pub type TypeId = String;

/// The kinds of single-word scalar types.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    /// Unsigned integers of 8 to 256 bits.
    Uint,

    /// Signed (two's complement) integers of 8 to 256 bits.
    Int,

    /// Booleans, occupying a single byte.
    Bool,

    /// Account addresses, occupying 20 bytes.
    Address,

    /// Fixed-length byte sequences (`bytes1` through `bytes32`).
    FixedBytes,

    /// Enumerations, stored as their unsigned discriminant.
    Enum,
}

/// A scalar type that fits within a single storage word.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct Primitive {
    /// The kind of the scalar.
    pub kind: PrimitiveKind,

    /// The declared width of the scalar in bits.
    pub bits: u16,
}

impl Primitive {
    /// Constructs an unsigned integer primitive of the provided width.
    #[must_use]
    pub fn uint(bits: u16) -> Self {
        Self {
            kind: PrimitiveKind::Uint,
            bits,
        }
    }

    /// Constructs a signed integer primitive of the provided width.
    #[must_use]
    pub fn int(bits: u16) -> Self {
        Self {
            kind: PrimitiveKind::Int,
            bits,
        }
    }

    /// Constructs the boolean primitive.
    #[must_use]
    pub fn bool() -> Self {
        Self {
            kind: PrimitiveKind::Bool,
            bits: 8,
        }
    }

    /// Constructs the address primitive.
    #[must_use]
    pub fn address() -> Self {
        Self {
            kind: PrimitiveKind::Address,
            bits: 160,
        }
    }

    /// Constructs a fixed-bytes primitive of `length` bytes.
    #[must_use]
    pub fn fixed_bytes(length: u16) -> Self {
        Self {
            kind: PrimitiveKind::FixedBytes,
            bits: length * 8,
        }
    }

    /// Gets the number of bytes the primitive occupies in storage.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        usize::from(self.bits.div_ceil(8))
    }

    /// Checks whether a candidate key of this primitive type could plausibly
    /// be a key of the `declared` key type.
    ///
    /// Untyped candidates are handled by the caller; this only answers the
    /// question for the case where both sides are typed. Unsigned integers
    /// and enums are interchangeable, and a narrower candidate can key a
    /// wider declared type, but kinds never cross (an address candidate is
    /// never tried against a `uint256` mapping).
    #[must_use]
    pub fn can_key(&self, declared: &Primitive) -> bool {
        let kinds_match = match (self.kind, declared.kind) {
            (PrimitiveKind::Uint | PrimitiveKind::Enum, PrimitiveKind::Uint | PrimitiveKind::Enum) => true,
            (left, right) => left == right,
        };

        kinds_match && self.bits <= declared.bits
    }
}

/// The declared type of a storage variable or of one of its components.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TypeDescriptor {
    /// A single-word scalar.
    Primitive(Primitive),

    /// A dynamically-sized `bytes` or `string` value.
    BytesOrString {
        /// Whether the value should decode as UTF-8 text.
        is_string: bool,
    },

    /// A fixed-length array, laid out contiguously from its base slot.
    FixedArray {
        /// The element type handle.
        element: TypeId,

        /// The declared element count.
        length: u64,
    },

    /// A dynamically-sized array: length at the base slot, elements from
    /// `keccak256(base)`.
    DynamicArray {
        /// The element type handle.
        element: TypeId,
    },

    /// A mapping: entries at `keccak256(key ++ base)`.
    Mapping {
        /// The key type handle.
        key: TypeId,

        /// The value type handle.
        value: TypeId,
    },

    /// A struct with its fields at fixed slot and byte offsets from the
    /// struct's base slot.
    Struct {
        /// The fields, in declaration order.
        fields: Vec<FieldDescriptor>,
    },
}

/// A single field of a struct type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldDescriptor {
    /// The declared field name.
    pub label: String,

    /// The field's type handle.
    pub ty: TypeId,

    /// The field's slot offset from the struct's base slot.
    pub slot_offset: u64,

    /// The field's byte offset within its slot.
    pub byte_offset: usize,

    /// The field's width in bytes.
    pub size: usize,
}

/// A fully resolved entry in a layout's type dictionary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeEntry {
    /// The human-readable type label, such as `uint256` or
    /// `mapping(address => uint256)`.
    pub label: String,

    /// The total number of bytes the type occupies in storage. For mappings
    /// and dynamic arrays this is the single handle slot.
    pub bytes: usize,

    /// The structural descriptor of the type.
    pub descriptor: TypeDescriptor,
}

impl TypeEntry {
    /// Gets the number of whole storage slots the type spans when laid out
    /// in place.
    #[must_use]
    pub fn slots(&self) -> u64 {
        (self.bytes as u64).div_ceil(WORD_SIZE_BYTES as u64).max(1)
    }
}

/// The resolved type dictionary of a layout.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TypeTable {
    entries: HashMap<TypeId, TypeEntry>,
}

impl TypeTable {
    /// Creates an empty type table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry under the provided handle.
    pub fn insert(&mut self, id: TypeId, entry: TypeEntry) {
        self.entries.insert(id, entry);
    }

    /// Looks up the entry for the provided handle.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TypeEntry> {
        self.entries.get(id)
    }

    /// Looks up the structural descriptor for the provided handle.
    #[must_use]
    pub fn descriptor(&self, id: &str) -> Option<&TypeDescriptor> {
        self.get(id).map(|entry| &entry.descriptor)
    }

    /// Gets the storage width in bytes of the type behind the handle,
    /// defaulting to a whole word for unknown handles.
    #[must_use]
    pub fn bytes(&self, id: &str) -> usize {
        self.get(id).map_or(WORD_SIZE_BYTES, |entry| entry.bytes)
    }

    /// Gets the human-readable label of the type behind the handle.
    #[must_use]
    pub fn label<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map_or(id, |entry| entry.label.as_str())
    }

    /// Checks whether the table contains the provided handle.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Iterates over all handles in the table.
    pub fn ids(&self) -> impl Iterator<Item = &TypeId> {
        self.entries.keys()
    }
}
