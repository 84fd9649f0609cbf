//! This module contains the serde representation of the compiler-emitted
//! storage layout document, and the classification of its type dictionary
//! into the crate's [`TypeDescriptor`]s.
//!
//! The document shape is the `storageLayout` output of the Solidity
//! compiler: a `storage` list of declared variables and a `types` dictionary
//! keyed by the compiler's type identifiers.

use std::collections::BTreeMap;

use alloy_json_abi::JsonAbi;
use ethnum::U256;
use serde::{Deserialize, Serialize};

use crate::{
    constant::WORD_SIZE_BYTES,
    error::layout::Error,
    layout::types::{
        FieldDescriptor,
        Primitive,
        PrimitiveKind,
        TypeDescriptor,
        TypeEntry,
        TypeTable,
    },
    value::Word,
};

/// The parsed metadata document for one contract: its storage layout and,
/// when the source provides one, its ABI.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct LayoutDocument {
    /// The declared storage variables, in declaration order.
    #[serde(default)]
    pub storage: Vec<RawStorageEntry>,

    /// The compiler's type dictionary.
    #[serde(default)]
    pub types: BTreeMap<String, RawTypeEntry>,

    /// The contract ABI, used for calldata argument harvesting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<JsonAbi>,
}

impl LayoutDocument {
    /// Parses a layout document from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Document { detail: e.to_string() })
    }
}

/// One declared variable (or struct member) as it appears in the document.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawStorageEntry {
    /// The declared name.
    pub label: String,

    /// The byte offset within the slot.
    #[serde(default)]
    pub offset: usize,

    /// The slot, as a decimal string.
    pub slot: String,

    /// The type identifier, resolved through the `types` dictionary.
    #[serde(rename = "type")]
    pub ty: String,
}

impl RawStorageEntry {
    /// Parses the entry's decimal slot string into a [`Word`].
    pub fn slot_word(&self) -> Result<Word, Error> {
        parse_decimal_slot(&self.slot).ok_or_else(|| Error::Document {
            detail: format!("variable `{}` has unparseable slot `{}`", self.label, self.slot),
        })
    }
}

/// One entry of the compiler's type dictionary.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTypeEntry {
    /// The storage encoding: `inplace`, `mapping`, `dynamic_array` or
    /// `bytes`.
    pub encoding: String,

    /// The human-readable type label.
    pub label: String,

    /// The total storage width in bytes, as a decimal string.
    pub number_of_bytes: String,

    /// The key type identifier, for mappings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// The value type identifier, for mappings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// The element type identifier, for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    /// The member list, for structs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<RawStorageEntry>>,
}

/// Parses a decimal slot string into a [`Word`].
#[must_use]
pub fn parse_decimal_slot(text: &str) -> Option<Word> {
    U256::from_str_radix(text, 10).ok().map(Word::from)
}

/// Builds the resolved [`TypeTable`] from a document's type dictionary.
///
/// Classification is driven by the entry's `encoding` field with the label
/// disambiguating the in-place scalars. Unknown scalar labels degrade to an
/// opaque fixed-bytes primitive of the declared width rather than failing,
/// as the slot algebra does not depend on the scalar interpretation.
pub fn build_type_table(doc: &LayoutDocument) -> Result<TypeTable, Error> {
    let mut table = TypeTable::new();

    for (id, raw) in &doc.types {
        let bytes = raw.number_of_bytes.parse::<usize>().map_err(|_| Error::Document {
            detail: format!("type `{id}` has unparseable width `{}`", raw.number_of_bytes),
        })?;

        let descriptor = match raw.encoding.as_str() {
            "mapping" => {
                let key = raw.key.clone().ok_or_else(|| missing_field(id, "key"))?;
                let value = raw.value.clone().ok_or_else(|| missing_field(id, "value"))?;
                TypeDescriptor::Mapping { key, value }
            }
            "dynamic_array" => {
                let element = raw.base.clone().ok_or_else(|| missing_field(id, "base"))?;
                TypeDescriptor::DynamicArray { element }
            }
            "bytes" => TypeDescriptor::BytesOrString {
                is_string: raw.label == "string",
            },
            "inplace" => classify_inplace(id, raw, bytes, doc)?,
            other => {
                return Err(Error::Document {
                    detail: format!("type `{id}` has unknown encoding `{other}`"),
                });
            }
        };

        table.insert(
            id.clone(),
            TypeEntry {
                label: raw.label.clone(),
                bytes,
                descriptor,
            },
        );
    }

    Ok(table)
}

/// Classifies an `inplace`-encoded type: a struct when members are present,
/// a fixed array when an element type is present, and a scalar otherwise.
fn classify_inplace(
    id: &str,
    raw: &RawTypeEntry,
    bytes: usize,
    doc: &LayoutDocument,
) -> Result<TypeDescriptor, Error> {
    if let Some(members) = &raw.members {
        let mut fields = Vec::with_capacity(members.len());
        for member in members {
            let slot_offset = member.slot.parse::<u64>().map_err(|_| Error::Document {
                detail: format!(
                    "struct `{id}` member `{}` has unparseable slot `{}`",
                    member.label, member.slot
                ),
            })?;
            let size = doc
                .types
                .get(&member.ty)
                .and_then(|t| t.number_of_bytes.parse::<usize>().ok())
                .unwrap_or(WORD_SIZE_BYTES);

            fields.push(FieldDescriptor {
                label: member.label.clone(),
                ty: member.ty.clone(),
                slot_offset,
                byte_offset: member.offset,
                size,
            });
        }
        return Ok(TypeDescriptor::Struct { fields });
    }

    if let Some(element) = &raw.base {
        let length = fixed_array_length(&raw.label).unwrap_or_else(|| {
            let element_bytes = doc
                .types
                .get(element)
                .and_then(|t| t.number_of_bytes.parse::<usize>().ok())
                .unwrap_or(WORD_SIZE_BYTES);
            (bytes / element_bytes.max(1)) as u64
        });
        return Ok(TypeDescriptor::FixedArray {
            element: element.clone(),
            length,
        });
    }

    Ok(TypeDescriptor::Primitive(classify_scalar(&raw.label, bytes)))
}

/// Parses the `N` out of a fixed-array label such as `uint256[3]`.
fn fixed_array_length(label: &str) -> Option<u64> {
    let open = label.rfind('[')?;
    let close = label.rfind(']')?;
    label.get(open + 1..close)?.parse().ok()
}

/// Classifies a scalar type label into a [`Primitive`].
fn classify_scalar(label: &str, bytes: usize) -> Primitive {
    let bits = (bytes * 8).min(256) as u16;

    if let Some(suffix) = label.strip_prefix("uint") {
        return Primitive::uint(suffix.parse().unwrap_or(256));
    }
    if let Some(suffix) = label.strip_prefix("int") {
        return Primitive::int(suffix.parse().unwrap_or(256));
    }
    if label == "bool" {
        return Primitive::bool();
    }
    if label == "address" || label == "address payable" || label.starts_with("contract ") {
        return Primitive::address();
    }
    if label.starts_with("enum ") {
        return Primitive {
            kind: PrimitiveKind::Enum,
            bits,
        };
    }
    if let Some(suffix) = label.strip_prefix("bytes") {
        if let Ok(length) = suffix.parse::<u16>() {
            return Primitive::fixed_bytes(length);
        }
    }

    // Function types, user-defined value types and anything newer than this
    // classifier degrade to opaque bytes of the declared width.
    Primitive::fixed_bytes(bits / 8)
}

fn missing_field(id: &str, field: &str) -> Error {
    Error::Document {
        detail: format!("type `{id}` is missing its `{field}` field"),
    }
}
