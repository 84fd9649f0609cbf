//! This module contains the trace assembler: the final pipeline stage that
//! joins slot matches with diffed slot values, decodes the affected bytes
//! into typed values, and emits the per-account storage access trace.
//!
//! Every match is re-verified here before use: re-applying the codec to the
//! recorded path must reproduce the observed slot bit-for-bit. A match that
//! fails re-derivation is dropped with a warning rather than surfaced, so a
//! resolver bug can never mislabel a slot silently.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::Serialize;
use tracing::warn;

use crate::{
    codec,
    constant::MAX_BYTES_DATA_SLOTS,
    differ::{AccountDiff, IntrinsicDiff, SlotAccess},
    resolver::{self, MatchTarget, PathSegment, SlotMatch, SubRange},
    layout::{types::TypeDescriptor, LayoutIndex},
    value::{Value, Word},
};

/// A raw word (or aggregate) together with its decoded form.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecodedWord {
    /// The raw hex form of the covered bytes.
    pub hex: Word,

    /// The decoded, typed form.
    pub decoded: Value,
}

/// One labeled access: a declared variable (or sub-path into one) observed
/// at a slot, with its decoded before/after values.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabeledAccess {
    /// The value before execution.
    pub current: DecodedWord,

    /// The value after execution. Present exactly when the covered byte
    /// range changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<DecodedWord>,

    /// Whether the covered byte range changed. Judged per sub-range, so a
    /// write to a packed neighbour does not flag this access.
    pub modified: bool,

    /// The slots backing the access: one for scalars, the head and data
    /// slots for long `bytes`/`string` values.
    pub slots: Vec<Word>,

    /// The path from the variable's root to the accessed location.
    pub path: Vec<PathSegment>,

    /// The canonical string identifier, such as `balances[0x…]` or
    /// `packedStruct.c`.
    pub full_expression: String,

    /// Whether some backing data slots were absent and the decoded value is
    /// a best-effort truncation.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial_decode: bool,

    /// Whether the oracle was missing one side of the backing snapshot.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub oracle_gap: bool,
}

/// The assembled storage access trace of one account.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StorageAccessTrace {
    /// Labeled accesses for slots whose value did not change.
    pub reads: BTreeMap<Word, Vec<LabeledAccess>>,

    /// Labeled accesses for slots whose value changed.
    pub writes: BTreeMap<Word, Vec<LabeledAccess>>,

    /// The account's intrinsic pre/post diff.
    pub intrinsic: IntrinsicDiff,
}

/// The output of assembling one account, with its diagnostics.
#[derive(Clone, Debug, Default)]
pub struct AssembledAccount {
    /// The assembled trace.
    pub trace: StorageAccessTrace,

    /// How many matches were dropped because their derivation could not be
    /// reproduced.
    pub dropped_matches: usize,
}

/// Assembles one account's trace from its diffed slots and their matches.
///
/// `layout` is absent for accounts whose layout could not be obtained; every
/// slot then carries the fallback label.
#[must_use]
pub fn assemble(
    layout: Option<&LayoutIndex>,
    diff: &AccountDiff,
    matches: &BTreeMap<Word, Vec<SlotMatch>>,
) -> AssembledAccount {
    let mut assembled = AssembledAccount {
        trace: StorageAccessTrace {
            intrinsic: diff.intrinsic,
            ..StorageAccessTrace::default()
        },
        ..AssembledAccount::default()
    };

    for (slot, access) in &diff.slots {
        let fallback = [SlotMatch::fallback(*slot)];
        let slot_matches: &[SlotMatch] = match matches.get(slot) {
            Some(found) if !found.is_empty() => found.as_slice(),
            _ => &fallback,
        };

        let mut ordered = Vec::with_capacity(slot_matches.len());
        for slot_match in slot_matches {
            if let Some(layout) = layout {
                let derived = resolver::derive_slot(layout, slot_match);
                if derived != Some(*slot) {
                    warn!(%slot, "dropping a match whose derivation does not reproduce its slot");
                    assembled.dropped_matches += 1;
                    continue;
                }
            }
            ordered.push((
                slot_match.sub_range,
                label_match(layout, diff, access, slot_match),
            ));
        }
        if ordered.is_empty() {
            ordered.push((
                fallback[0].sub_range,
                label_match(layout, diff, access, &fallback[0]),
            ));
        }

        ordered.sort_by_key(|(sub, access)| access_order_key(sub.offset, access));
        let labeled: Vec<LabeledAccess> = ordered.into_iter().map(|(_, access)| access).collect();

        if access.modified() {
            assembled.trace.writes.insert(*slot, labeled);
        } else {
            assembled.trace.reads.insert(*slot, labeled);
        }
    }

    assembled
}

/// The sortable form of one path segment: segment kind, the key source's
/// confidence rank (so argument-sourced reconstructions outrank stack
/// values on ambiguous slots), and the numeric key or index.
type SegmentOrder = (u8, (u8, usize), Word);

/// Builds the deterministic ordering key for accesses sharing a slot:
/// packed byte offset first (which is declaration order for packed fields),
/// then confidence and numeric order of keys and indices along the path.
fn access_order_key(offset: usize, access: &LabeledAccess) -> (usize, Vec<SegmentOrder>, String) {
    let path_key = access
        .path
        .iter()
        .map(|segment| match segment {
            PathSegment::Field { .. } => (0u8, (0, 0), Word::ZERO),
            PathSegment::Key { key } => (1, key.source.rank(), key.word),
            PathSegment::Index { index } => (2, (0, 0), Word::from(*index)),
            PathSegment::Length => (3, (0, 0), Word::ZERO),
        })
        .collect();

    (offset, path_key, access.full_expression.clone())
}

/// Labels a single verified match against the slot's diffed words.
fn label_match(
    layout: Option<&LayoutIndex>,
    diff: &AccountDiff,
    access: &SlotAccess,
    slot_match: &SlotMatch,
) -> LabeledAccess {
    match &slot_match.target {
        MatchTarget::Fallback => label_fallback(access),
        MatchTarget::Variable { index, path, leaf } => {
            let Some(layout) = layout else {
                return label_fallback(access);
            };
            let base_label = layout
                .variable(*index)
                .map_or_else(|| resolver::fallback_label(access.slot), |v| v.label.clone());
            let expression = expression(&base_label, path);

            if matches!(path.last(), Some(PathSegment::Length)) {
                return label_scalar_words(access, path, expression, SubRange::WHOLE, |word| {
                    Value::Uint(word.as_u256())
                });
            }

            match layout.types().descriptor(leaf) {
                Some(TypeDescriptor::Primitive(primitive)) => {
                    let primitive = *primitive;
                    let sub = slot_match.sub_range;
                    label_scalar_words(access, path, expression, sub, move |word| {
                        codec::decode_scalar(&codec::extract_sub_word(word, sub.offset, sub.size), &primitive)
                    })
                }
                Some(TypeDescriptor::BytesOrString { is_string }) => {
                    if matches!(path.last(), Some(PathSegment::Index { .. })) {
                        // A data slot of a long value: raw 32-byte chunk.
                        label_scalar_words(access, path, expression, SubRange::WHOLE, |word| {
                            Value::FixedBytes(word.as_bytes().to_vec())
                        })
                    } else {
                        label_bytes_head(diff, access, path, expression, *is_string)
                    }
                }
                _ => label_scalar_words(access, path, expression, SubRange::WHOLE, |word| {
                    Value::Unknown(word)
                }),
            }
        }
    }
}

/// Labels a slot with the synthetic fallback: raw words, unknown type.
fn label_fallback(access: &SlotAccess) -> LabeledAccess {
    let expression = resolver::fallback_label(access.slot);
    label_scalar_words(access, &[], expression, SubRange::WHOLE, Value::Unknown)
}

/// Labels a match whose value is a function of single words on each side.
fn label_scalar_words(
    access: &SlotAccess,
    path: &[PathSegment],
    expression: String,
    sub: SubRange,
    decode: impl Fn(Word) -> Value,
) -> LabeledAccess {
    let modified = codec::sub_word_modified(access.pre, access.post, sub.offset, sub.size);

    LabeledAccess {
        current: DecodedWord {
            hex:     access.pre,
            decoded: decode(access.pre),
        },
        next: modified.then(|| DecodedWord {
            hex:     access.post,
            decoded: decode(access.post),
        }),
        modified,
        slots: vec![access.slot],
        path: path.to_vec(),
        full_expression: expression,
        partial_decode: false,
        oracle_gap: access.gap,
    }
}

/// Labels the head slot of a `bytes`/`string`, aggregating data slots from
/// the account view for long values on either side.
fn label_bytes_head(
    diff: &AccountDiff,
    access: &SlotAccess,
    path: &[PathSegment],
    expression: String,
    is_string: bool,
) -> LabeledAccess {
    let (pre_bytes, pre_partial, pre_slots) =
        aggregate_bytes(diff, access.slot, access.pre, SnapshotPick::Pre);
    let (post_bytes, post_partial, post_slots) =
        aggregate_bytes(diff, access.slot, access.post, SnapshotPick::Post);
    let slots: Vec<Word> = pre_slots.into_iter().chain(post_slots).unique().collect();

    let modified = pre_bytes != post_bytes;
    let gap = access.gap
        || slots
            .iter()
            .filter_map(|slot| diff.slots.get(slot))
            .any(|backing| backing.gap);

    LabeledAccess {
        current: DecodedWord {
            hex:     access.pre,
            decoded: codec::decode_bytes_or_string(pre_bytes, is_string),
        },
        next: modified.then(|| DecodedWord {
            hex:     access.post,
            decoded: codec::decode_bytes_or_string(post_bytes, is_string),
        }),
        modified,
        slots,
        path: path.to_vec(),
        full_expression: expression,
        partial_decode: pre_partial || post_partial,
        oracle_gap: gap,
    }
}

/// Which side of the diffed words an aggregation reads.
#[derive(Clone, Copy)]
enum SnapshotPick {
    Pre,
    Post,
}

impl SnapshotPick {
    fn word(self, access: &SlotAccess) -> Word {
        match self {
            SnapshotPick::Pre => access.pre,
            SnapshotPick::Post => access.post,
        }
    }
}

/// Gathers the raw bytes of a `bytes`/`string` value on one side, reading
/// data slots out of the account view. Returns the bytes, whether the value
/// was truncated by absent slots, and the slots consulted.
fn aggregate_bytes(
    diff: &AccountDiff,
    head_slot: Word,
    head_word: Word,
    side: SnapshotPick,
) -> (Vec<u8>, bool, Vec<Word>) {
    let layout = codec::bytes_or_string_layout(head_slot, head_word);
    let mut slots = vec![head_slot];

    if layout.inline {
        return (head_word.as_bytes()[..layout.length].to_vec(), false, slots);
    }

    let Some(data_base) = layout.data_base else {
        return (Vec::new(), true, slots);
    };

    let mut data = Vec::with_capacity(layout.length);
    let mut partial = false;
    let slot_count = layout.length.div_ceil(32).min(MAX_BYTES_DATA_SLOTS);

    for index in 0..slot_count {
        let data_slot = Word::from(
            data_base.as_u256().wrapping_add(ethnum::U256::from(index as u64)),
        );
        slots.push(data_slot);

        match diff.slots.get(&data_slot) {
            Some(backing) => {
                let remaining = layout.length - data.len();
                let take = remaining.min(32);
                data.extend_from_slice(&side.word(backing).as_bytes()[..take]);
            }
            None => {
                partial = true;
                break;
            }
        }
    }

    (data, partial, slots)
}

/// Builds the canonical string identifier for a path: `.field` for struct
/// fields, `[key]` for mapping keys, `[index]` for array elements, and
/// `._length` for array lengths.
#[must_use]
pub fn expression(base_label: &str, path: &[PathSegment]) -> String {
    let mut out = base_label.to_string();
    for segment in path {
        match segment {
            PathSegment::Field { name } => {
                out.push('.');
                out.push_str(name);
            }
            PathSegment::Key { key } => {
                out.push('[');
                out.push_str(&key.value.to_expression_string());
                out.push(']');
            }
            PathSegment::Index { index } => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
            PathSegment::Length => out.push_str("._length"),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use ethnum::U256;

    use super::expression;
    use crate::{
        keys::{KeySource, MappingKey},
        layout::types::Primitive,
        resolver::PathSegment,
        value::{Value, Word},
    };

    #[test]
    fn expressions_concatenate_path_segments() {
        let path = vec![
            PathSegment::Field {
                name: "flags".to_string(),
            },
            PathSegment::Key {
                key: MappingKey {
                    word: Word::from(123u64),
                    value: Value::Uint(U256::from(123u64)),
                    ty: Some(Primitive::uint(256)),
                    source: KeySource::Argument { position: 0 },
                },
            },
        ];
        assert_eq!(expression("dynamicStruct", &path), "dynamicStruct.flags[123]");
    }

    #[test]
    fn length_segments_render_as_pseudo_fields() {
        let path = vec![
            PathSegment::Field {
                name: "numbers".to_string(),
            },
            PathSegment::Length,
        ];
        assert_eq!(expression("dynamicStruct", &path), "dynamicStruct.numbers._length");
    }

    #[test]
    fn string_keys_render_quoted() {
        let path = vec![PathSegment::Key {
            key: MappingKey {
                word: Word::ZERO,
                value: Value::String("owner".to_string()),
                ty: None,
                source: KeySource::Stack,
            },
        }];
        assert_eq!(expression("names", &path), "names[\"owner\"]");
    }
}
