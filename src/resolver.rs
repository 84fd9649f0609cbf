//! This module contains the slot resolver: the reverse application of the
//! EVM's slot-derivation algebra that decides which declared variable (and
//! which sub-path into it) produced each observed slot.
//!
//! Direct slots are a lookup. Everything keccak-derived is reconstructed by
//! probing: candidate keys are hashed against mapping roots and candidate
//! indices against array roots, with equality of the derived slot as the
//! proof of a match. Nested composites (struct in mapping in struct, and
//! mappings of any declared depth) are handled by one recursive descent
//! over the type descriptors rather than by per-shape passes.
//!
//! The resolver never fails: a slot that matches nothing yields a single
//! synthetic fallback match.

use std::collections::BTreeMap;

use ethnum::U256;
use tracing::trace;

use crate::{
    codec,
    constant::{FALLBACK_LABEL_PREFIX, FALLBACK_SLOT_PREFIX_BYTES, MAX_ARRAY_INDEX,
               MAX_BYTES_DATA_SLOTS, MAX_TYPE_RECURSION_DEPTH},
    differ::SlotAccess,
    keys::{CandidateKeys, MappingKey},
    layout::{
        types::{FieldDescriptor, TypeDescriptor, TypeEntry, TypeId},
        LayoutIndex,
        TypedRoot,
    },
    value::Word,
};

/// One step of the path from a declared variable down to the matched
/// location.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSegment {
    /// Descent into a named struct field.
    Field {
        /// The field name.
        name: String,
    },

    /// Descent through a mapping entry under the given key.
    Key {
        /// The reconstructed key.
        key: MappingKey,
    },

    /// Descent to an array element (or a `bytes`/`string` data slot).
    Index {
        /// The element index.
        index: u64,
    },

    /// The length word of a dynamic array.
    Length,
}

/// The byte range within a slot that a match covers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubRange {
    /// The byte offset from the low-order end of the word.
    pub offset: usize,

    /// The width in bytes.
    pub size: usize,
}

impl SubRange {
    /// The range covering a whole storage word.
    pub const WHOLE: SubRange = SubRange {
        offset: 0,
        size:   32,
    };
}

/// What a slot match points at.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchTarget {
    /// A declared variable, possibly through a path of keys, indices and
    /// fields.
    Variable {
        /// The index of the variable in the layout.
        index: usize,

        /// The path from the variable's root to the matched location.
        path: Vec<PathSegment>,

        /// The type handle of the innermost matched location.
        leaf: TypeId,
    },

    /// No declared variable: the synthetic fallback.
    Fallback,
}

/// One resolution of an observed slot.
///
/// A slot may carry several matches: packed neighbours in the same word, or
/// distinct key tuples hashing to the same slot.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotMatch {
    /// The observed slot.
    pub slot: Word,

    /// What the slot resolved to.
    pub target: MatchTarget,

    /// The byte range of the slot the match covers.
    pub sub_range: SubRange,
}

impl SlotMatch {
    /// Constructs the synthetic fallback match for a slot with no layout
    /// counterpart.
    #[must_use]
    pub fn fallback(slot: Word) -> Self {
        Self {
            slot,
            target: MatchTarget::Fallback,
            sub_range: SubRange::WHOLE,
        }
    }
}

/// Builds the fallback label for a slot: the label prefix followed by the
/// hex of the slot's leading bytes.
#[must_use]
pub fn fallback_label(slot: Word) -> String {
    let prefix = hex::encode(&slot.as_bytes()[..FALLBACK_SLOT_PREFIX_BYTES]);
    format!("{FALLBACK_LABEL_PREFIX}{prefix}")
}

/// The resolver for one account's observed slots.
///
/// It is read-only over the layout index, the candidate keys, and the
/// account's diffed slot view (which it consults for `bytes`/`string` head
/// words when classifying data slots).
pub struct SlotResolver<'a> {
    layout: &'a LayoutIndex,
    keys:   &'a CandidateKeys,
    words:  &'a BTreeMap<Word, SlotAccess>,
}

impl<'a> SlotResolver<'a> {
    /// Constructs a resolver over the provided layout, candidate keys and
    /// diffed slot view.
    #[must_use]
    pub fn new(
        layout: &'a LayoutIndex,
        keys: &'a CandidateKeys,
        words: &'a BTreeMap<Word, SlotAccess>,
    ) -> Self {
        Self { layout, keys, words }
    }

    /// Resolves one observed slot into its matches.
    ///
    /// Categories are tried in order (direct, mapping, dynamic array, then
    /// `bytes`/`string` data) and the first category that produces matches
    /// wins. A slot matching no category yields the fallback match.
    #[must_use]
    pub fn resolve(&self, slot: Word) -> Vec<SlotMatch> {
        let direct = self.resolve_direct(slot);
        if !direct.is_empty() {
            return direct;
        }

        let mapped = self.resolve_roots(slot, self.layout.mapping_roots());
        if !mapped.is_empty() {
            return mapped;
        }

        let arrays = self.resolve_roots(slot, self.layout.array_roots());
        if !arrays.is_empty() {
            return arrays;
        }

        let bytes = self.resolve_roots(slot, self.layout.bytes_roots());
        if !bytes.is_empty() {
            return bytes;
        }

        trace!(%slot, "no layout match; falling back");
        vec![SlotMatch::fallback(slot)]
    }

    /// Resolves the statically known slots: packed scalar leaves and the
    /// in-place spans of fixed arrays.
    fn resolve_direct(&self, slot: Word) -> Vec<SlotMatch> {
        let mut out = Vec::new();

        for leaf in self.layout.direct_slot(&slot) {
            out.push(SlotMatch {
                slot,
                target: MatchTarget::Variable {
                    index: leaf.variable,
                    path:  field_path(&leaf.prefix),
                    leaf:  leaf.ty.clone(),
                },
                sub_range: SubRange {
                    offset: leaf.offset,
                    size:   leaf.size,
                },
            });
        }

        for root in self.layout.fixed_array_roots() {
            self.descend(&root.ty, root.slot, slot, root, field_path(&root.prefix), 0, &mut out);
        }

        out
    }

    /// Resolves a slot against a collection of composite roots through the
    /// recursive descent.
    fn resolve_roots(&self, slot: Word, roots: &[TypedRoot]) -> Vec<SlotMatch> {
        let mut out = Vec::new();
        for root in roots {
            self.descend(&root.ty, root.slot, slot, root, field_path(&root.prefix), 0, &mut out);
        }
        out
    }

    /// The single recursive resolver over type descriptors.
    ///
    /// `root_slot` is where the type's own storage begins; matching decides
    /// per descriptor shape whether `target` can belong to it, descending
    /// into value types, elements and fields as the declared types dictate.
    #[allow(clippy::too_many_arguments)]
    fn descend(
        &self,
        ty: &TypeId,
        root_slot: Word,
        target: Word,
        root: &TypedRoot,
        path: Vec<PathSegment>,
        depth: usize,
        out: &mut Vec<SlotMatch>,
    ) {
        if depth > MAX_TYPE_RECURSION_DEPTH {
            return;
        }
        let Some(descriptor) = self.layout.types().descriptor(ty) else {
            return;
        };

        match descriptor {
            TypeDescriptor::Primitive(primitive) => {
                if root_slot == target {
                    out.push(self.matched(target, root, path, ty, SubRange {
                        offset: 0,
                        size:   primitive.size_bytes(),
                    }));
                }
            }

            TypeDescriptor::BytesOrString { .. } => {
                self.descend_bytes(ty, root_slot, target, root, path, out);
            }

            TypeDescriptor::Struct { fields } => {
                // Scalar members, at any nesting depth, land at concrete
                // slot deltas from the struct's base; the index's struct
                // expansion finds every packed chain at the target delta.
                let span = self.layout.types().get(ty).map_or(1, TypeEntry::slots);
                let delta = target.as_u256().wrapping_sub(root_slot.as_u256());
                if target.as_u256() >= root_slot.as_u256() && delta < U256::from(span) {
                    for found in self.layout.expand_struct(ty, delta.as_u64()) {
                        if !matches!(
                            self.layout.types().descriptor(&found.leaf),
                            Some(TypeDescriptor::Primitive(_))
                        ) {
                            continue;
                        }
                        let mut leaf_path = path.clone();
                        leaf_path.extend(field_path(&found.fields));
                        out.push(self.matched(target, root, leaf_path, &found.leaf, SubRange {
                            offset: found.byte_offset,
                            size:   found.size,
                        }));
                    }
                }

                // Members backed by derived or spanning slots need their
                // own descent.
                for (member_ty, member_slot, member_path) in
                    self.composite_members(fields, root_slot, &path, depth)
                {
                    self.descend(&member_ty, member_slot, target, root, member_path, depth + 1, out);
                }
            }

            TypeDescriptor::Mapping { key, value } => {
                for candidate in self.keys.iter() {
                    if !self.key_is_compatible(candidate, key) {
                        continue;
                    }
                    let derived = codec::mapping_slot(root_slot, candidate.word);
                    let mut entry_path = path.clone();
                    entry_path.push(PathSegment::Key {
                        key: self.refine_key(candidate, key),
                    });
                    self.descend(value, derived, target, root, entry_path, depth + 1, out);
                }
            }

            TypeDescriptor::DynamicArray { element } => {
                if root_slot == target {
                    let mut length_path = path;
                    length_path.push(PathSegment::Length);
                    out.push(self.matched(target, root, length_path, ty, SubRange::WHOLE));
                    return;
                }
                let data_base = codec::array_data_slot(root_slot);
                self.descend_elements(element, data_base, target, root, &path, depth, out);
            }

            TypeDescriptor::FixedArray { element, length } => {
                let span = self.layout.types().get(ty).map_or(1, TypeEntry::slots);
                let delta = target.as_u256().wrapping_sub(root_slot.as_u256());
                let within = target.as_u256() >= root_slot.as_u256() && delta < U256::from(span);

                let element_is_contained = matches!(
                    self.layout.types().descriptor(element),
                    Some(TypeDescriptor::Mapping { .. } | TypeDescriptor::DynamicArray { .. }
                        | TypeDescriptor::BytesOrString { .. } | TypeDescriptor::Struct { .. })
                );

                if within || element_is_contained {
                    self.descend_bounded_elements(
                        element,
                        *length,
                        root_slot,
                        target,
                        root,
                        &path,
                        depth,
                        out,
                    );
                }
            }
        }
    }

    /// Walks a struct's fields transitively, collecting every member whose
    /// storage is not a scalar at a concrete delta: mappings, dynamic
    /// arrays, `bytes`/`string` heads and fixed arrays, each with its base
    /// slot and path.
    fn composite_members(
        &self,
        fields: &[FieldDescriptor],
        root_slot: Word,
        path: &[PathSegment],
        depth: usize,
    ) -> Vec<(TypeId, Word, Vec<PathSegment>)> {
        let mut out = Vec::new();
        if depth > MAX_TYPE_RECURSION_DEPTH {
            return out;
        }

        for field in fields {
            let field_slot =
                Word::from(root_slot.as_u256().wrapping_add(U256::from(field.slot_offset)));
            let mut field_path = path.to_vec();
            field_path.push(PathSegment::Field {
                name: field.label.clone(),
            });

            match self.layout.types().descriptor(&field.ty) {
                Some(TypeDescriptor::Primitive(_)) | None => {}
                Some(TypeDescriptor::Struct { fields: inner }) => {
                    out.extend(self.composite_members(inner, field_slot, &field_path, depth + 1));
                }
                Some(_) => out.push((field.ty.clone(), field_slot, field_path)),
            }
        }

        out
    }

    /// Probes array element positions with the numeric candidates, and with
    /// the direct span computation for primitive elements.
    #[allow(clippy::too_many_arguments)]
    fn descend_elements(
        &self,
        element: &TypeId,
        data_base: Word,
        target: Word,
        root: &TypedRoot,
        path: &[PathSegment],
        depth: usize,
        out: &mut Vec<SlotMatch>,
    ) {
        let element_bytes = self.layout.types().bytes(element);

        for candidate in self.keys.iter() {
            let Some(index) = candidate.value.as_index() else {
                continue;
            };
            if index >= MAX_ARRAY_INDEX {
                continue;
            }

            let position = codec::packed_element_position(U256::from(index), element_bytes);
            let element_slot =
                Word::from(data_base.as_u256().wrapping_add(position.slot_offset));
            let mut element_path = path.to_vec();
            element_path.push(PathSegment::Index { index });

            match self.layout.types().descriptor(element) {
                Some(TypeDescriptor::Primitive(primitive)) => {
                    if element_slot == target {
                        out.push(self.matched(target, root, element_path, element, SubRange {
                            offset: position.byte_offset,
                            size:   primitive.size_bytes(),
                        }));
                    }
                }
                Some(_) => {
                    self.descend(element, element_slot, target, root, element_path, depth + 1, out);
                }
                None => {}
            }
        }
    }

    /// Probes the elements of a fixed array, whose slots are offsets from
    /// the array's own base rather than from a hash.
    #[allow(clippy::too_many_arguments)]
    fn descend_bounded_elements(
        &self,
        element: &TypeId,
        length: u64,
        array_base: Word,
        target: Word,
        root: &TypedRoot,
        path: &[PathSegment],
        depth: usize,
        out: &mut Vec<SlotMatch>,
    ) {
        let element_bytes = self.layout.types().bytes(element);

        for candidate in self.keys.iter() {
            let Some(index) = candidate.value.as_index() else {
                continue;
            };
            if index >= length {
                continue;
            }

            let position = codec::packed_element_position(U256::from(index), element_bytes);
            let element_slot =
                Word::from(array_base.as_u256().wrapping_add(position.slot_offset));
            let mut element_path = path.to_vec();
            element_path.push(PathSegment::Index { index });

            match self.layout.types().descriptor(element) {
                Some(TypeDescriptor::Primitive(primitive)) => {
                    if element_slot == target {
                        out.push(self.matched(target, root, element_path, element, SubRange {
                            offset: position.byte_offset,
                            size:   primitive.size_bytes(),
                        }));
                    }
                }
                Some(_) => {
                    self.descend(element, element_slot, target, root, element_path, depth + 1, out);
                }
                None => {}
            }
        }
    }

    /// Matches the head slot of a `bytes`/`string`, and its data slots when
    /// the head word in the account view says the value is long.
    fn descend_bytes(
        &self,
        ty: &TypeId,
        head_slot: Word,
        target: Word,
        root: &TypedRoot,
        path: Vec<PathSegment>,
        out: &mut Vec<SlotMatch>,
    ) {
        if head_slot == target {
            out.push(self.matched(target, root, path, ty, SubRange::WHOLE));
            return;
        }

        // The data slots only exist when either side of execution held a
        // long value, which the head word in the diffed view tells us.
        let Some(head_access) = self.words.get(&head_slot) else {
            return;
        };
        let longest = [head_access.pre, head_access.post]
            .into_iter()
            .map(|head| codec::bytes_or_string_layout(head_slot, head))
            .filter(|layout| !layout.inline)
            .map(|layout| layout.length)
            .max()
            .unwrap_or(0);
        if longest == 0 {
            return;
        }

        let data_base = codec::array_data_slot(head_slot);
        let slots = longest.div_ceil(32).min(MAX_BYTES_DATA_SLOTS);
        let delta = target.as_u256().wrapping_sub(data_base.as_u256());
        if target.as_u256() >= data_base.as_u256() && delta < U256::from(slots as u64) {
            let mut data_path = path;
            data_path.push(PathSegment::Index {
                index: delta.as_u64(),
            });
            out.push(self.matched(target, root, data_path, ty, SubRange::WHOLE));
        }
    }

    /// Builds a variable-targeted match.
    fn matched(
        &self,
        slot: Word,
        root: &TypedRoot,
        path: Vec<PathSegment>,
        leaf: &TypeId,
        sub_range: SubRange,
    ) -> SlotMatch {
        SlotMatch {
            slot,
            target: MatchTarget::Variable {
                index: root.variable,
                path,
                leaf: leaf.clone(),
            },
            sub_range,
        }
    }

    /// Checks whether a candidate may be tried against the declared key
    /// type. Untyped candidates always may.
    fn key_is_compatible(&self, candidate: &MappingKey, key_ty: &str) -> bool {
        let Some(candidate_ty) = &candidate.ty else {
            return true;
        };
        match self.layout.types().descriptor(key_ty) {
            Some(TypeDescriptor::Primitive(declared)) => candidate_ty.can_key(declared),
            _ => true,
        }
    }

    /// Re-types a candidate with the mapping's declared key type, so the
    /// recorded path displays the key the way the contract declares it.
    fn refine_key(&self, candidate: &MappingKey, key_ty: &str) -> MappingKey {
        let Some(TypeDescriptor::Primitive(declared)) = self.layout.types().descriptor(key_ty)
        else {
            return candidate.clone();
        };

        let bytes = codec::extract_sub_word(candidate.word, 0, declared.size_bytes());
        MappingKey {
            word: candidate.word,
            value: codec::decode_scalar(&bytes, declared),
            ty: Some(*declared),
            source: candidate.source,
        }
    }
}

/// Re-derives the slot a match claims to describe by applying the codec to
/// the recorded path, outermost segment first.
///
/// This is the verification side of resolution: a match whose re-derived
/// slot differs from its recorded slot is wrong and must be dropped.
#[must_use]
pub fn derive_slot(layout: &LayoutIndex, slot_match: &SlotMatch) -> Option<Word> {
    let MatchTarget::Variable { index, path, .. } = &slot_match.target else {
        return Some(slot_match.slot);
    };
    let variable = layout.variable(*index)?;

    let mut slot = variable.base_slot;
    let mut ty = variable.ty.clone();

    for segment in path {
        let descriptor = layout.types().descriptor(&ty)?.clone();
        match (segment, descriptor) {
            (PathSegment::Field { name }, TypeDescriptor::Struct { fields }) => {
                let field = fields.iter().find(|f| &f.label == name)?;
                slot = codec::struct_field_slot(slot, U256::from(field.slot_offset));
                ty = field.ty.clone();
            }
            (PathSegment::Key { key }, TypeDescriptor::Mapping { value, .. }) => {
                slot = codec::mapping_slot(slot, key.word);
                ty = value;
            }
            (PathSegment::Index { index }, TypeDescriptor::DynamicArray { element }) => {
                let position = codec::packed_element_position(
                    U256::from(*index),
                    layout.types().bytes(&element),
                );
                slot = codec::array_element_slot(slot, position.slot_offset);
                ty = element;
            }
            (PathSegment::Index { index }, TypeDescriptor::FixedArray { element, .. }) => {
                let position = codec::packed_element_position(
                    U256::from(*index),
                    layout.types().bytes(&element),
                );
                slot = codec::struct_field_slot(slot, position.slot_offset);
                ty = element;
            }
            (PathSegment::Index { index }, TypeDescriptor::BytesOrString { .. }) => {
                slot = codec::array_element_slot(slot, U256::from(*index));
            }
            (PathSegment::Length, TypeDescriptor::DynamicArray { .. }) => {}
            _ => return None,
        }
    }

    Some(slot)
}

/// Converts a flattened field-name prefix into path segments.
fn field_path(prefix: &[String]) -> Vec<PathSegment> {
    prefix
        .iter()
        .map(|name| PathSegment::Field { name: name.clone() })
        .collect()
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::{derive_slot, fallback_label, MatchTarget, PathSegment, SlotResolver};
    use crate::{
        codec,
        keys::{CandidateKeys, KeySource, MappingKey},
        layout::{parse::LayoutDocument, LayoutIndex},
        value::{Value, Word},
    };

    fn layout() -> LayoutIndex {
        LayoutIndex::from_document(
            &LayoutDocument::from_json(
                r#"{
                    "storage": [
                        {"label": "counter", "offset": 0, "slot": "0", "type": "t_uint256"},
                        {"label": "balances", "offset": 0, "slot": "1", "type": "t_mapping(t_address,t_uint256)"},
                        {"label": "numbers", "offset": 0, "slot": "2", "type": "t_array(t_uint256)dyn_storage"},
                        {"label": "allowances", "offset": 0, "slot": "3", "type": "t_mapping(t_address,t_mapping(t_address,t_uint256))"}
                    ],
                    "types": {
                        "t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"},
                        "t_address": {"encoding": "inplace", "label": "address", "numberOfBytes": "20"},
                        "t_array(t_uint256)dyn_storage": {
                            "encoding": "dynamic_array", "label": "uint256[]",
                            "numberOfBytes": "32", "base": "t_uint256"
                        },
                        "t_mapping(t_address,t_uint256)": {
                            "encoding": "mapping", "label": "mapping(address => uint256)",
                            "numberOfBytes": "32", "key": "t_address", "value": "t_uint256"
                        },
                        "t_mapping(t_address,t_mapping(t_address,t_uint256))": {
                            "encoding": "mapping",
                            "label": "mapping(address => mapping(address => uint256))",
                            "numberOfBytes": "32",
                            "key": "t_address",
                            "value": "t_mapping(t_address,t_uint256)"
                        }
                    }
                }"#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    fn address_key(byte: u8) -> MappingKey {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        MappingKey::untyped(Word::new(bytes), KeySource::Stack)
    }

    #[test]
    fn resolves_direct_slots_first() {
        let layout = layout();
        let keys = CandidateKeys::new();
        let words = BTreeMap::new();
        let resolver = SlotResolver::new(&layout, &keys, &words);

        let matches = resolver.resolve(Word::from(0u64));
        assert_eq!(matches.len(), 1);
        let MatchTarget::Variable { index, path, .. } = &matches[0].target else {
            panic!("expected a variable match");
        };
        assert_eq!(layout.variable(*index).unwrap().label, "counter");
        assert!(path.is_empty());
    }

    #[test]
    fn reconstructs_mapping_keys_by_hash_equality() {
        let layout = layout();
        let mut keys = CandidateKeys::new();
        keys.insert(address_key(0xaa));
        keys.insert(address_key(0xbb));
        let words = BTreeMap::new();
        let resolver = SlotResolver::new(&layout, &keys, &words);

        let target = codec::mapping_slot(Word::from(1u64), address_key(0xaa).word);
        let matches = resolver.resolve(target);

        assert_eq!(matches.len(), 1);
        let MatchTarget::Variable { index, path, .. } = &matches[0].target else {
            panic!("expected a variable match");
        };
        assert_eq!(layout.variable(*index).unwrap().label, "balances");
        assert_eq!(path.len(), 1);
        let PathSegment::Key { key } = &path[0] else {
            panic!("expected a key segment");
        };
        assert_eq!(key.word, address_key(0xaa).word);
        // The declared key type re-typed the raw stack value.
        assert!(matches!(key.value, Value::Address(_)));
    }

    #[test]
    fn reconstructs_nested_mapping_key_tuples() {
        let layout = layout();
        let mut keys = CandidateKeys::new();
        keys.insert(address_key(0xaa));
        keys.insert(address_key(0xbb));
        let words = BTreeMap::new();
        let resolver = SlotResolver::new(&layout, &keys, &words);

        let target = codec::nested_mapping_slot(
            Word::from(3u64),
            &[address_key(0xaa).word, address_key(0xbb).word],
        );
        let matches = resolver.resolve(target);

        assert_eq!(matches.len(), 1);
        let MatchTarget::Variable { path, .. } = &matches[0].target else {
            panic!("expected a variable match");
        };
        let keys_in_path: Vec<_> = path
            .iter()
            .map(|segment| match segment {
                PathSegment::Key { key } => key.word,
                other => panic!("unexpected segment {other:?}"),
            })
            .collect();
        assert_eq!(
            keys_in_path,
            vec![address_key(0xaa).word, address_key(0xbb).word]
        );
    }

    #[test]
    fn resolves_array_lengths_and_elements() {
        let layout = layout();
        let keys = CandidateKeys::new_with_constants();
        let words = BTreeMap::new();
        let resolver = SlotResolver::new(&layout, &keys, &words);

        let length_matches = resolver.resolve(Word::from(2u64));
        assert_eq!(length_matches.len(), 1);
        let MatchTarget::Variable { path, .. } = &length_matches[0].target else {
            panic!("expected a variable match");
        };
        assert_eq!(path.as_slice(), &[PathSegment::Length]);

        let element = codec::array_element_slot(Word::from(2u64), ethnum::U256::ZERO);
        let element_matches = resolver.resolve(element);
        assert_eq!(element_matches.len(), 1);
        let MatchTarget::Variable { path, .. } = &element_matches[0].target else {
            panic!("expected a variable match");
        };
        assert_eq!(path.as_slice(), &[PathSegment::Index { index: 0 }]);
    }

    #[test]
    fn incompatible_typed_keys_are_skipped() {
        let layout = layout();
        let mut keys = CandidateKeys::new();

        // A uint256-typed candidate must not be tried against the
        // address-keyed mapping.
        let mut key = address_key(0xaa);
        key.ty = Some(crate::layout::types::Primitive::uint(256));
        let word = key.word;
        keys.insert(key);

        let words = BTreeMap::new();
        let resolver = SlotResolver::new(&layout, &keys, &words);
        let target = codec::mapping_slot(Word::from(1u64), word);
        let matches = resolver.resolve(target);

        assert!(matches!(matches[0].target, MatchTarget::Fallback));
    }

    #[test]
    fn every_emitted_match_re_derives_to_its_slot() {
        let layout = layout();
        let mut keys = CandidateKeys::new_with_constants();
        keys.insert(address_key(0xaa));
        keys.insert(address_key(0xbb));
        let words = BTreeMap::new();
        let resolver = SlotResolver::new(&layout, &keys, &words);

        let targets = [
            Word::from(0u64),
            Word::from(2u64),
            codec::mapping_slot(Word::from(1u64), address_key(0xaa).word),
            codec::nested_mapping_slot(
                Word::from(3u64),
                &[address_key(0xbb).word, address_key(0xaa).word],
            ),
            codec::array_element_slot(Word::from(2u64), ethnum::U256::from(3u64)),
        ];

        for target in targets {
            for slot_match in resolver.resolve(target) {
                assert_eq!(derive_slot(&layout, &slot_match), Some(target));
            }
        }
    }

    #[test]
    fn fallback_labels_use_the_slot_prefix() {
        let slot = Word::from_hex(
            "c2575a0e9e593c00f959f8c92f12db2869c3395a3b0502d05e2516446f71f85b",
        )
        .unwrap();
        assert_eq!(fallback_label(slot), "var_c2575a0e");
    }

    impl CandidateKeys {
        /// Builds a population holding only the small integer constants, as
        /// the harvesting step would.
        fn new_with_constants() -> Self {
            let mut keys = CandidateKeys::new();
            for index in 0..10u64 {
                keys.insert(MappingKey {
                    word: Word::from(index),
                    value: Value::Uint(ethnum::U256::from(index)),
                    ty: None,
                    source: KeySource::Constant,
                });
            }
            keys
        }
    }
}
