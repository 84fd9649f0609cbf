//! This module contains the layout index: the normalised, traversable form
//! of a compiler-emitted storage layout.
//!
//! Construction flattens every declared variable through its struct fields
//! down to the slot-concrete leaves, so that resolution can work from four
//! simple collections: a direct-slot map for in-place scalars, and root
//! lists for mappings, dynamic arrays and `bytes`/`string` variables
//! (including ones nested inside structs, whose base slots are still known
//! statically).
//!
//! The index is read-only after construction and is the unit that the
//! process-wide layout cache stores.

pub mod parse;
pub mod types;

use std::collections::HashMap;

use alloy_json_abi::JsonAbi;

use crate::{
    constant::{MAX_TYPE_RECURSION_DEPTH, WORD_SIZE_BYTES},
    error::layout::{Error, Result},
    layout::{
        parse::{build_type_table, LayoutDocument},
        types::{TypeDescriptor, TypeEntry, TypeId, TypeTable},
    },
    value::Word,
};

/// The storage encoding of a declared variable, as the compiler reports it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VariableEncoding {
    /// The variable occupies (part of) its base slot directly.
    Inplace,

    /// A `bytes` or `string` with the head word at the base slot.
    BytesOrString,

    /// A mapping; the base slot is the hashing handle and is never itself
    /// read or written.
    Mapping,

    /// A dynamic array; the base slot holds the length.
    DynamicArray,
}

/// A declared top-level storage variable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageVariable {
    /// The declared name.
    pub label: String,

    /// The type handle into the layout's type table.
    pub ty: TypeId,

    /// The statically assigned slot of the variable's root.
    pub base_slot: Word,

    /// The byte offset within the base slot, for packed scalars.
    pub offset: usize,

    /// The declared byte width.
    pub size: usize,

    /// The storage encoding of the variable's type.
    pub encoding: VariableEncoding,
}

/// A slot-concrete scalar leaf reached by flattening a variable through its
/// struct fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectLeaf {
    /// The index of the owning top-level variable.
    pub variable: usize,

    /// The chain of struct field names from the variable to this leaf.
    pub prefix: Vec<String>,

    /// The leaf's type handle.
    pub ty: TypeId,

    /// The byte offset within the slot.
    pub offset: usize,

    /// The leaf's width in bytes.
    pub size: usize,
}

/// A slot-concrete composite root (mapping, dynamic array, `bytes`/`string`
/// head, or fixed array) reached by flattening a variable through its
/// struct fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypedRoot {
    /// The index of the owning top-level variable.
    pub variable: usize,

    /// The chain of struct field names from the variable to this root.
    pub prefix: Vec<String>,

    /// The root's base slot.
    pub slot: Word,

    /// The root's type handle.
    pub ty: TypeId,
}

/// One chain of struct fields matching a target slot, produced by
/// [`LayoutIndex::expand_struct`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldPath {
    /// The field names walked, outermost first.
    pub fields: Vec<String>,

    /// The type handle of the innermost field.
    pub leaf: TypeId,

    /// The innermost field's byte offset within its slot.
    pub byte_offset: usize,

    /// The innermost field's width in bytes.
    pub size: usize,

    /// The remaining slot distance into the innermost field's own span.
    ///
    /// Zero for scalars; non-zero only when the innermost field is itself a
    /// contiguous composite (a fixed array) and the target lands inside it.
    pub slot_delta: u64,
}

/// The normalised, traversable form of one contract's storage layout.
#[derive(Clone, Debug)]
pub struct LayoutIndex {
    variables:    Vec<StorageVariable>,
    types:        TypeTable,
    abi:          Option<JsonAbi>,
    direct_slots: HashMap<Word, Vec<DirectLeaf>>,
    mapping_roots: Vec<TypedRoot>,
    array_roots:  Vec<TypedRoot>,
    bytes_roots:  Vec<TypedRoot>,
    fixed_array_roots: Vec<TypedRoot>,
}

impl LayoutIndex {
    /// Ingests a parsed layout document and builds the index.
    ///
    /// # Errors
    ///
    /// Fails with a [`Error`] naming the offending variable if a type
    /// reference is dangling, a packed scalar overflows its slot, two packed
    /// scalars overlap, or the type graph nests beyond the supported depth.
    pub fn from_document(doc: &LayoutDocument) -> Result<Self> {
        let types = build_type_table(doc)?;
        check_references(&types)?;

        let mut index = Self {
            variables: Vec::with_capacity(doc.storage.len()),
            types,
            abi: doc.abi.clone(),
            direct_slots: HashMap::new(),
            mapping_roots: Vec::new(),
            array_roots: Vec::new(),
            bytes_roots: Vec::new(),
            fixed_array_roots: Vec::new(),
        };

        for entry in &doc.storage {
            let ty_entry = index.types.get(&entry.ty).cloned().ok_or_else(|| {
                Error::DanglingTypeReference {
                    variable: entry.label.clone(),
                    type_id:  entry.ty.clone(),
                }
            })?;
            let base_slot = entry.slot_word()?;

            let variable = StorageVariable {
                label: entry.label.clone(),
                ty: entry.ty.clone(),
                base_slot,
                offset: entry.offset,
                size: ty_entry.bytes.min(WORD_SIZE_BYTES),
                encoding: encoding_of(&ty_entry.descriptor),
            };
            let variable_index = index.variables.len();
            index.variables.push(variable);

            index.register(
                variable_index,
                &entry.ty,
                base_slot,
                entry.offset,
                Vec::new(),
                0,
            )?;
        }

        index.check_packing()?;

        for leaves in index.direct_slots.values_mut() {
            leaves.sort_by_key(|leaf| leaf.offset);
        }

        Ok(index)
    }

    /// Gets the declared variables in declaration order.
    #[must_use]
    pub fn variables(&self) -> &[StorageVariable] {
        &self.variables
    }

    /// Gets the variable at the provided index.
    #[must_use]
    pub fn variable(&self, index: usize) -> Option<&StorageVariable> {
        self.variables.get(index)
    }

    /// Gets the resolved type table.
    #[must_use]
    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// Gets the contract ABI carried by the layout document, if any.
    #[must_use]
    pub fn abi(&self) -> Option<&JsonAbi> {
        self.abi.as_ref()
    }

    /// Looks up the scalar leaves packed into the provided slot, ordered by
    /// ascending byte offset.
    #[must_use]
    pub fn direct_slot(&self, slot: &Word) -> &[DirectLeaf] {
        self.direct_slots.get(slot).map_or(&[], Vec::as_slice)
    }

    /// Gets the mapping roots, including mappings nested inside structs.
    #[must_use]
    pub fn mapping_roots(&self) -> &[TypedRoot] {
        &self.mapping_roots
    }

    /// Gets the dynamic array roots, including arrays nested inside structs.
    #[must_use]
    pub fn array_roots(&self) -> &[TypedRoot] {
        &self.array_roots
    }

    /// Gets the `bytes`/`string` roots, including ones nested inside
    /// structs.
    #[must_use]
    pub fn bytes_roots(&self) -> &[TypedRoot] {
        &self.bytes_roots
    }

    /// Gets the fixed array roots, whose slots form contiguous in-place
    /// spans.
    #[must_use]
    pub fn fixed_array_roots(&self) -> &[TypedRoot] {
        &self.fixed_array_roots
    }

    /// Walks the field table of the struct type behind `ty` to find every
    /// chain of fields whose storage lands `delta` slots after the struct's
    /// base, descending into nested structs.
    ///
    /// Packed fields sharing the matching inner slot each produce their own
    /// chain. Returns an empty vector when `ty` is not a struct or nothing
    /// matches.
    #[must_use]
    pub fn expand_struct(&self, ty: &str, delta: u64) -> Vec<FieldPath> {
        let mut out = Vec::new();
        self.expand_struct_inner(ty, delta, &[], &mut out, 0);
        out
    }

    fn expand_struct_inner(
        &self,
        ty: &str,
        delta: u64,
        prefix: &[String],
        out: &mut Vec<FieldPath>,
        depth: usize,
    ) {
        if depth > MAX_TYPE_RECURSION_DEPTH {
            return;
        }
        let Some(TypeDescriptor::Struct { fields }) = self.types.descriptor(ty) else {
            return;
        };

        for field in fields {
            let span = self.types.get(&field.ty).map_or(1, TypeEntry::slots);
            let in_span = delta >= field.slot_offset && delta < field.slot_offset + span;

            match self.types.descriptor(&field.ty) {
                Some(TypeDescriptor::Struct { .. }) if in_span => {
                    let mut inner_prefix = prefix.to_vec();
                    inner_prefix.push(field.label.clone());
                    self.expand_struct_inner(
                        &field.ty,
                        delta - field.slot_offset,
                        &inner_prefix,
                        out,
                        depth + 1,
                    );
                }
                Some(TypeDescriptor::FixedArray { .. }) if in_span => {
                    let mut fields_chain = prefix.to_vec();
                    fields_chain.push(field.label.clone());
                    out.push(FieldPath {
                        fields: fields_chain,
                        leaf: field.ty.clone(),
                        byte_offset: field.byte_offset,
                        size: field.size,
                        slot_delta: delta - field.slot_offset,
                    });
                }
                Some(_) if field.slot_offset == delta => {
                    let mut fields_chain = prefix.to_vec();
                    fields_chain.push(field.label.clone());
                    out.push(FieldPath {
                        fields: fields_chain,
                        leaf: field.ty.clone(),
                        byte_offset: field.byte_offset,
                        size: field.size,
                        slot_delta: 0,
                    });
                }
                _ => {}
            }
        }
    }

    /// Flattens a variable's type into the slot-concrete collections.
    fn register(
        &mut self,
        variable: usize,
        ty: &TypeId,
        slot: Word,
        byte_offset: usize,
        prefix: Vec<String>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_TYPE_RECURSION_DEPTH {
            return Err(Error::NestingTooDeep {
                variable: self.variables[variable].label.clone(),
            });
        }

        let entry = self.types.get(ty).cloned().ok_or_else(|| Error::DanglingTypeReference {
            variable: self.leaf_name(variable, &prefix),
            type_id:  ty.clone(),
        })?;

        match &entry.descriptor {
            TypeDescriptor::Primitive(primitive) => {
                let size = primitive.size_bytes();
                if byte_offset + size > WORD_SIZE_BYTES {
                    return Err(Error::SlotOverflow {
                        variable: self.leaf_name(variable, &prefix),
                        offset:   byte_offset,
                        size,
                    });
                }
                self.direct_slots.entry(slot).or_default().push(DirectLeaf {
                    variable,
                    prefix,
                    ty: ty.clone(),
                    offset: byte_offset,
                    size,
                });
            }
            TypeDescriptor::BytesOrString { .. } => {
                self.bytes_roots.push(TypedRoot {
                    variable,
                    prefix,
                    slot,
                    ty: ty.clone(),
                });
            }
            TypeDescriptor::Mapping { .. } => {
                self.mapping_roots.push(TypedRoot {
                    variable,
                    prefix,
                    slot,
                    ty: ty.clone(),
                });
            }
            TypeDescriptor::DynamicArray { .. } => {
                self.array_roots.push(TypedRoot {
                    variable,
                    prefix,
                    slot,
                    ty: ty.clone(),
                });
            }
            TypeDescriptor::FixedArray { .. } => {
                self.fixed_array_roots.push(TypedRoot {
                    variable,
                    prefix,
                    slot,
                    ty: ty.clone(),
                });
            }
            TypeDescriptor::Struct { fields } => {
                for field in fields.clone() {
                    let mut field_prefix = prefix.clone();
                    field_prefix.push(field.label.clone());
                    let field_slot = Word::from(
                        slot.as_u256().wrapping_add(ethnum::U256::from(field.slot_offset)),
                    );
                    self.register(
                        variable,
                        &field.ty,
                        field_slot,
                        field.byte_offset,
                        field_prefix,
                        depth + 1,
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Checks that the packed leaves of every direct slot occupy disjoint
    /// byte ranges.
    fn check_packing(&self) -> Result<()> {
        for (slot, leaves) in &self.direct_slots {
            let mut sorted: Vec<&DirectLeaf> = leaves.iter().collect();
            sorted.sort_by_key(|leaf| leaf.offset);

            for pair in sorted.windows(2) {
                let (first, second) = (pair[0], pair[1]);
                if first.offset + first.size > second.offset {
                    return Err(Error::PackedOverlap {
                        first:  self.leaf_name(first.variable, &first.prefix),
                        second: self.leaf_name(second.variable, &second.prefix),
                        slot:   *slot,
                    });
                }
            }
        }

        Ok(())
    }

    /// Builds the dotted name of a flattened leaf for error reporting.
    fn leaf_name(&self, variable: usize, prefix: &[String]) -> String {
        let mut name = self
            .variables
            .get(variable)
            .map_or_else(String::new, |v| v.label.clone());
        for segment in prefix {
            name.push('.');
            name.push_str(segment);
        }
        name
    }
}

/// Determines the variable-level encoding from a type descriptor.
fn encoding_of(descriptor: &TypeDescriptor) -> VariableEncoding {
    match descriptor {
        TypeDescriptor::Mapping { .. } => VariableEncoding::Mapping,
        TypeDescriptor::DynamicArray { .. } => VariableEncoding::DynamicArray,
        TypeDescriptor::BytesOrString { .. } => VariableEncoding::BytesOrString,
        TypeDescriptor::Primitive(_)
        | TypeDescriptor::FixedArray { .. }
        | TypeDescriptor::Struct { .. } => VariableEncoding::Inplace,
    }
}

/// Checks that every type referenced by a composite descriptor exists in the
/// table.
fn check_references(types: &TypeTable) -> Result<()> {
    let mut referenced: Vec<(String, TypeId)> = Vec::new();
    for id in types.ids() {
        let Some(entry) = types.get(id) else { continue };
        let owner = entry.label.clone();
        match &entry.descriptor {
            TypeDescriptor::Mapping { key, value } => {
                referenced.push((owner.clone(), key.clone()));
                referenced.push((owner, value.clone()));
            }
            TypeDescriptor::DynamicArray { element }
            | TypeDescriptor::FixedArray { element, .. } => {
                referenced.push((owner, element.clone()));
            }
            TypeDescriptor::Struct { fields } => {
                for field in fields {
                    referenced.push((format!("{owner}.{}", field.label), field.ty.clone()));
                }
            }
            TypeDescriptor::Primitive(_) | TypeDescriptor::BytesOrString { .. } => {}
        }
    }

    for (owner, id) in referenced {
        if !types.contains(&id) {
            return Err(Error::DanglingTypeReference {
                variable: owner,
                type_id:  id,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::LayoutIndex;
    use crate::{
        error::layout::Error,
        layout::parse::LayoutDocument,
        value::Word,
    };

    fn doc(json: &str) -> LayoutDocument {
        LayoutDocument::from_json(json).unwrap()
    }

    #[test]
    fn indexes_packed_scalars_in_offset_order() {
        let index = LayoutIndex::from_document(&doc(
            r#"{
                "storage": [
                    {"label": "b", "offset": 1, "slot": "0", "type": "t_uint16"},
                    {"label": "a", "offset": 0, "slot": "0", "type": "t_uint8"}
                ],
                "types": {
                    "t_uint8": {"encoding": "inplace", "label": "uint8", "numberOfBytes": "1"},
                    "t_uint16": {"encoding": "inplace", "label": "uint16", "numberOfBytes": "2"}
                }
            }"#,
        ))
        .unwrap();

        let leaves = index.direct_slot(&Word::from(0u64));
        assert_eq!(leaves.len(), 2);
        assert_eq!(index.variable(leaves[0].variable).unwrap().label, "a");
        assert_eq!(index.variable(leaves[1].variable).unwrap().label, "b");
    }

    #[test]
    fn flattens_struct_members_to_their_slots() {
        let index = LayoutIndex::from_document(&doc(
            r#"{
                "storage": [
                    {"label": "basicStruct", "offset": 0, "slot": "2", "type": "t_struct(Basic)"}
                ],
                "types": {
                    "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"},
                    "t_string_storage": {"encoding": "bytes", "label": "string", "numberOfBytes": "32"},
                    "t_struct(Basic)": {
                        "encoding": "inplace",
                        "label": "struct StorageTest.BasicStruct",
                        "numberOfBytes": "64",
                        "members": [
                            {"label": "id", "offset": 0, "slot": "0", "type": "t_uint256"},
                            {"label": "name", "offset": 0, "slot": "1", "type": "t_string_storage"}
                        ]
                    }
                }
            }"#,
        ))
        .unwrap();

        let id_leaves = index.direct_slot(&Word::from(2u64));
        assert_eq!(id_leaves.len(), 1);
        assert_eq!(id_leaves[0].prefix, vec!["id".to_string()]);

        assert_eq!(index.bytes_roots().len(), 1);
        assert_eq!(index.bytes_roots()[0].slot, Word::from(3u64));
        assert_eq!(index.bytes_roots()[0].prefix, vec!["name".to_string()]);
    }

    #[test]
    fn registers_struct_internal_mappings_as_roots() {
        let index = LayoutIndex::from_document(&doc(
            r#"{
                "storage": [
                    {"label": "dynamicStruct", "offset": 0, "slot": "7", "type": "t_struct(Dyn)"}
                ],
                "types": {
                    "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"},
                    "t_bool": {"encoding": "inplace", "label": "bool", "numberOfBytes": "1"},
                    "t_array(t_uint256)dyn_storage": {
                        "encoding": "dynamic_array",
                        "label": "uint256[]",
                        "numberOfBytes": "32",
                        "base": "t_uint256"
                    },
                    "t_mapping(t_uint256,t_bool)": {
                        "encoding": "mapping",
                        "label": "mapping(uint256 => bool)",
                        "numberOfBytes": "32",
                        "key": "t_uint256",
                        "value": "t_bool"
                    },
                    "t_struct(Dyn)": {
                        "encoding": "inplace",
                        "label": "struct StorageTest.DynamicStruct",
                        "numberOfBytes": "96",
                        "members": [
                            {"label": "id", "offset": 0, "slot": "0", "type": "t_uint256"},
                            {"label": "numbers", "offset": 0, "slot": "1", "type": "t_array(t_uint256)dyn_storage"},
                            {"label": "flags", "offset": 0, "slot": "2", "type": "t_mapping(t_uint256,t_bool)"}
                        ]
                    }
                }
            }"#,
        ))
        .unwrap();

        assert_eq!(index.array_roots().len(), 1);
        assert_eq!(index.array_roots()[0].slot, Word::from(8u64));
        assert_eq!(index.mapping_roots().len(), 1);
        assert_eq!(index.mapping_roots()[0].slot, Word::from(9u64));
        assert_eq!(index.mapping_roots()[0].prefix, vec!["flags".to_string()]);
    }

    #[test]
    fn rejects_dangling_type_references() {
        let result = LayoutIndex::from_document(&doc(
            r#"{
                "storage": [
                    {"label": "ghost", "offset": 0, "slot": "0", "type": "t_missing"}
                ],
                "types": {}
            }"#,
        ));

        assert!(matches!(
            result,
            Err(Error::DanglingTypeReference { variable, .. }) if variable == "ghost"
        ));
    }

    #[test]
    fn rejects_overlapping_packed_variables() {
        let result = LayoutIndex::from_document(&doc(
            r#"{
                "storage": [
                    {"label": "a", "offset": 0, "slot": "0", "type": "t_uint16"},
                    {"label": "b", "offset": 1, "slot": "0", "type": "t_uint16"}
                ],
                "types": {
                    "t_uint16": {"encoding": "inplace", "label": "uint16", "numberOfBytes": "2"}
                }
            }"#,
        ));

        assert!(matches!(result, Err(Error::PackedOverlap { .. })));
    }

    #[test]
    fn rejects_scalars_overflowing_their_slot() {
        let result = LayoutIndex::from_document(&doc(
            r#"{
                "storage": [
                    {"label": "wide", "offset": 20, "slot": "0", "type": "t_uint256"}
                ],
                "types": {
                    "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"}
                }
            }"#,
        ));

        assert!(matches!(result, Err(Error::SlotOverflow { .. })));
    }

    #[test]
    fn expands_nested_struct_chains() {
        let index = LayoutIndex::from_document(&doc(
            r#"{
                "storage": [
                    {"label": "nestedStruct", "offset": 0, "slot": "4", "type": "t_struct(Nested)"}
                ],
                "types": {
                    "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"},
                    "t_string_storage": {"encoding": "bytes", "label": "string", "numberOfBytes": "32"},
                    "t_struct(Basic)": {
                        "encoding": "inplace",
                        "label": "struct StorageTest.BasicStruct",
                        "numberOfBytes": "64",
                        "members": [
                            {"label": "id", "offset": 0, "slot": "0", "type": "t_uint256"},
                            {"label": "name", "offset": 0, "slot": "1", "type": "t_string_storage"}
                        ]
                    },
                    "t_struct(Nested)": {
                        "encoding": "inplace",
                        "label": "struct StorageTest.NestedStruct",
                        "numberOfBytes": "96",
                        "members": [
                            {"label": "id", "offset": 0, "slot": "0", "type": "t_uint256"},
                            {"label": "basic", "offset": 0, "slot": "1", "type": "t_struct(Basic)"}
                        ]
                    }
                }
            }"#,
        ))
        .unwrap();

        let paths = index.expand_struct("t_struct(Nested)", 2);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].fields, vec!["basic".to_string(), "name".to_string()]);
        assert_eq!(paths[0].leaf, "t_string_storage");
    }
}
