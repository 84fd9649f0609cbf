//! This module contains the slot codec: pure functions implementing the
//! EVM's storage addressing algebra and the decoding of raw storage bytes
//! into typed values.
//!
//! The codec is the authority on how the compiler derives slots for
//! mappings, dynamic arrays, struct fields and packed scalars. Everything
//! else in the crate that needs a slot computes it through here, which is
//! what makes recorded match paths re-derivable (and hence verifiable).
//!
//! All hashing is keccak-256 and all arithmetic is modulo 2²⁵⁶.

use ethnum::{I256, U256};
use sha3::{Digest, Keccak256};

use crate::{
    constant::WORD_SIZE_BYTES,
    layout::types::{Primitive, PrimitiveKind},
    value::{Address, Value, Word},
};

/// Computes the keccak-256 hash of `data` as a [`Word`].
#[allow(clippy::missing_panics_doc)] // The digest width is always 32 bytes.
#[must_use]
pub fn keccak(data: &[u8]) -> Word {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    Word::new(digest.as_slice().try_into().expect("keccak-256 digests are 32 bytes"))
}

/// Computes the slot of a mapping entry: `keccak256(key ++ base)`, with the
/// key first, each operand a full 32-byte word.
#[must_use]
pub fn mapping_slot(base: Word, key: Word) -> Word {
    let mut preimage = [0u8; WORD_SIZE_BYTES * 2];
    preimage[..WORD_SIZE_BYTES].copy_from_slice(key.as_bytes());
    preimage[WORD_SIZE_BYTES..].copy_from_slice(base.as_bytes());
    keccak(&preimage)
}

/// Computes the slot of a nested mapping entry by applying [`mapping_slot`]
/// once per key, outermost key first.
#[must_use]
pub fn nested_mapping_slot(base: Word, keys: &[Word]) -> Word {
    keys.iter().fold(base, |slot, key| mapping_slot(slot, *key))
}

/// Computes the slot at which a dynamic array's element data begins:
/// `keccak256(base)`.
///
/// The array's length lives at `base` itself.
#[must_use]
pub fn array_data_slot(base: Word) -> Word {
    keccak(base.as_bytes())
}

/// Computes the slot of a dynamic array element: `keccak256(base) + offset`,
/// wrapping modulo 2²⁵⁶.
///
/// `slot_offset` is the element's slot distance from the data base, which
/// for multi-word or packed element types is not the element index itself;
/// see [`packed_element_position`].
#[must_use]
pub fn array_element_slot(base: Word, slot_offset: U256) -> Word {
    Word::from(array_data_slot(base).as_u256().wrapping_add(slot_offset))
}

/// Computes the slot of a struct field: `base + field_slot_offset`, wrapping
/// modulo 2²⁵⁶.
#[must_use]
pub fn struct_field_slot(base: Word, field_slot_offset: U256) -> Word {
    Word::from(base.as_u256().wrapping_add(field_slot_offset))
}

/// The position of an array element whose type packs into slots of
/// `element_bytes` each.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ElementPosition {
    /// The element's slot distance from the array's data base slot.
    pub slot_offset: U256,

    /// The element's byte offset within that slot.
    pub byte_offset: usize,
}

/// Computes where the element at `index` of an array lives, given the
/// element type's storage width.
///
/// Elements of up to 16 bytes pack several to a slot; wider elements start
/// on slot boundaries and may span several whole slots.
#[must_use]
pub fn packed_element_position(index: U256, element_bytes: usize) -> ElementPosition {
    if element_bytes >= WORD_SIZE_BYTES {
        let slots_per_element = element_bytes.div_ceil(WORD_SIZE_BYTES);
        ElementPosition {
            slot_offset: index.wrapping_mul(U256::from(slots_per_element as u64)),
            byte_offset: 0,
        }
    } else {
        let per_slot = (WORD_SIZE_BYTES / element_bytes) as u64;
        let slot_offset = index / U256::from(per_slot);
        let within = (index % U256::from(per_slot)).as_usize();
        ElementPosition {
            slot_offset,
            byte_offset: within * element_bytes,
        }
    }
}

/// The decoded head-word layout of a `bytes` or `string` variable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BytesLayout {
    /// Whether the data is stored inline in the head slot.
    pub inline: bool,

    /// The byte length of the value.
    pub length: usize,

    /// Where the out-of-line data begins, for non-inline values.
    pub data_base: Option<Word>,
}

/// Decodes the head word of a `bytes` or `string` variable at `base`.
///
/// The low bit of the head word distinguishes the two encodings: even means
/// the data is stored inline with `length = last_byte / 2`, odd means the
/// data lives at `keccak256(base)` onwards with `length = (head - 1) / 2`.
#[must_use]
pub fn bytes_or_string_layout(base: Word, head: Word) -> BytesLayout {
    let head_value = head.as_u256();
    if (head_value & U256::ONE) == U256::ONE {
        let length: usize = ((head_value - U256::ONE) >> 1u32).as_usize();
        BytesLayout {
            inline: false,
            length,
            data_base: Some(array_data_slot(base)),
        }
    } else {
        let length = usize::from(head.as_bytes()[WORD_SIZE_BYTES - 1] >> 1);
        BytesLayout {
            inline: true,
            length,
            data_base: None,
        }
    }
}

/// Extracts the bytes occupying the packed range `[offset, offset + size)`
/// of a storage word.
///
/// Packing offsets count from the low-order end of the word, so offset 0 is
/// the rightmost byte of the big-endian representation. The returned bytes
/// are the value's own big-endian bytes.
#[must_use]
pub fn extract_sub_word(word: Word, offset: usize, size: usize) -> Vec<u8> {
    debug_assert!(offset + size <= WORD_SIZE_BYTES, "sub-word range overflows the word");
    let end = WORD_SIZE_BYTES - offset;
    word.as_bytes()[end - size..end].to_vec()
}

/// Checks whether the packed range `[offset, offset + size)` differs
/// between two storage words.
#[must_use]
pub fn sub_word_modified(pre: Word, post: Word, offset: usize, size: usize) -> bool {
    extract_sub_word(pre, offset, size) != extract_sub_word(post, offset, size)
}

/// Decodes the big-endian `bytes` of a scalar into a typed [`Value`].
///
/// Integers are unsigned or two's complement per the primitive's kind,
/// booleans are any-byte-nonzero, addresses are the low 20 bytes, and fixed
/// byte sequences are taken as-is.
#[must_use]
pub fn decode_scalar(bytes: &[u8], primitive: &Primitive) -> Value {
    match primitive.kind {
        PrimitiveKind::Uint | PrimitiveKind::Enum => Value::Uint(be_to_u256(bytes)),
        PrimitiveKind::Int => Value::Int(be_to_i256(bytes)),
        PrimitiveKind::Bool => Value::Bool(bytes.iter().any(|b| *b != 0)),
        PrimitiveKind::Address => {
            let start = bytes.len().saturating_sub(20);
            let mut padded = [0u8; 20];
            let tail = &bytes[start..];
            padded[20 - tail.len()..].copy_from_slice(tail);
            Value::Address(Address::new(padded))
        }
        PrimitiveKind::FixedBytes => {
            let size = primitive.size_bytes().min(bytes.len());
            Value::FixedBytes(bytes[..size].to_vec())
        }
    }
}

/// Decodes raw `bytes` or `string` data into a typed [`Value`].
#[must_use]
pub fn decode_bytes_or_string(data: Vec<u8>, is_string: bool) -> Value {
    if is_string {
        Value::String(String::from_utf8_lossy(&data).into_owned())
    } else {
        Value::Bytes(data)
    }
}

/// Widens big-endian bytes into an unsigned 256-bit integer.
fn be_to_u256(bytes: &[u8]) -> U256 {
    let mut padded = [0u8; WORD_SIZE_BYTES];
    let start = WORD_SIZE_BYTES - bytes.len().min(WORD_SIZE_BYTES);
    padded[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(WORD_SIZE_BYTES)..]);
    U256::from_be_bytes(padded)
}

/// Sign-extends big-endian bytes into a signed 256-bit integer.
fn be_to_i256(bytes: &[u8]) -> I256 {
    let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
    let fill = if negative { 0xff } else { 0x00 };
    let mut padded = [fill; WORD_SIZE_BYTES];
    let start = WORD_SIZE_BYTES - bytes.len().min(WORD_SIZE_BYTES);
    padded[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(WORD_SIZE_BYTES)..]);
    I256::from_be_bytes(padded)
}

#[cfg(test)]
mod test {
    use ethnum::{I256, U256};

    use super::{
        array_element_slot,
        bytes_or_string_layout,
        decode_scalar,
        extract_sub_word,
        keccak,
        mapping_slot,
        nested_mapping_slot,
        packed_element_position,
        struct_field_slot,
        sub_word_modified,
    };
    use crate::{
        layout::types::Primitive,
        value::{Value, Word},
    };

    /// The keccak-256 hashes of the first five slot indices, taken from the
    /// canonical network-byte-order hashes of the integers 0 through 4.
    const SLOT_HASHES: [&str; 5] = [
        "290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563",
        "b10e2d527612073b26eecdfd717e6a320cf44b4afac2b0732d9fcbe2b7fa0cf6",
        "405787fa12a823e0f2b7631cc41b3ba8828b3321ca811111fa75cd3aa3bb5ace",
        "c2575a0e9e593c00f959f8c92f12db2869c3395a3b0502d05e2516446f71f85b",
        "8a35acfbc15ff81a39ae7d344fd709f28e8600b4aa8c65c6b64bfe7fe36bd19b",
    ];

    #[test]
    fn hashes_slot_indices_correctly() {
        for (index, expected) in SLOT_HASHES.iter().enumerate() {
            let base = Word::from(index as u64);
            assert_eq!(keccak(base.as_bytes()), Word::from_hex(expected).unwrap());
        }
    }

    #[test]
    fn hashes_the_zero_mapping_entry_correctly() {
        // keccak256 of 64 zero bytes, the parent of two zero leaves in any
        // keccak merkle tree.
        let expected =
            Word::from_hex("ad3228b676f7d3cd4284a5443f17f1962b36e491b30a40b2405849e597ba5fb5")
                .unwrap();
        assert_eq!(mapping_slot(Word::ZERO, Word::ZERO), expected);
    }

    #[test]
    fn nested_mapping_folds_left() {
        let base = Word::from(3u64);
        let keys = [Word::from(7u64), Word::from(9u64)];
        let expected = mapping_slot(mapping_slot(base, keys[0]), keys[1]);
        assert_eq!(nested_mapping_slot(base, &keys), expected);
        assert_eq!(nested_mapping_slot(base, &keys[..1]), mapping_slot(base, keys[0]));
        assert_eq!(nested_mapping_slot(base, &[]), base);
    }

    #[test]
    fn array_elements_offset_from_the_data_hash() {
        let base = Word::from(2u64);
        assert_eq!(
            array_element_slot(base, U256::ZERO),
            Word::from_hex(SLOT_HASHES[2]).unwrap()
        );

        let third = array_element_slot(base, U256::from(3u64));
        let expected = Word::from_hex(SLOT_HASHES[2]).unwrap().as_u256() + U256::from(3u64);
        assert_eq!(third.as_u256(), expected);
    }

    #[test]
    fn element_slots_wrap_modulo_word_size() {
        let base = Word::from(0u64);
        let data = Word::from_hex(SLOT_HASHES[0]).unwrap().as_u256();
        let offset = U256::MAX - data + U256::from(5u64);
        assert_eq!(array_element_slot(base, offset).as_u256(), U256::from(4u64));
    }

    #[test]
    fn struct_fields_offset_from_the_base() {
        let base = Word::from(4u64);
        assert_eq!(struct_field_slot(base, U256::from(2u64)), Word::from(6u64));
    }

    #[test]
    fn packed_elements_share_slots() {
        // uint64 elements: four per slot.
        let first = packed_element_position(U256::from(0u64), 8);
        assert_eq!((first.slot_offset, first.byte_offset), (U256::ZERO, 0));

        let third = packed_element_position(U256::from(2u64), 8);
        assert_eq!((third.slot_offset, third.byte_offset), (U256::ZERO, 16));

        let fifth = packed_element_position(U256::from(4u64), 8);
        assert_eq!((fifth.slot_offset, fifth.byte_offset), (U256::ONE, 0));

        // A 64-byte struct element: two slots per element.
        let second_wide = packed_element_position(U256::from(1u64), 64);
        assert_eq!(
            (second_wide.slot_offset, second_wide.byte_offset),
            (U256::from(2u64), 0)
        );
    }

    #[test]
    fn short_string_heads_decode_inline() {
        // "Named Init" is 10 bytes, so the head stores length * 2 = 20 in
        // its last byte with the data left-aligned.
        let mut head = [0u8; 32];
        head[..10].copy_from_slice(b"Named Init");
        head[31] = 20;

        let layout = bytes_or_string_layout(Word::from(3u64), Word::new(head));
        assert!(layout.inline);
        assert_eq!(layout.length, 10);
        assert_eq!(layout.data_base, None);
    }

    #[test]
    fn long_string_heads_point_at_the_data_hash() {
        // A 50-byte string stores length * 2 + 1 = 101 in the head.
        let head = Word::from(101u64);
        let base = Word::from(3u64);

        let layout = bytes_or_string_layout(base, head);
        assert!(!layout.inline);
        assert_eq!(layout.length, 50);
        assert_eq!(layout.data_base, Some(Word::from_hex(SLOT_HASHES[3]).unwrap()));
    }

    #[test]
    fn sub_words_extract_from_the_low_end() {
        // PackedStruct { uint8 a; uint16 b; uint32 c; bool d } at offsets
        // 0, 1, 3 and 7.
        let mut bytes = [0u8; 32];
        bytes[31] = 123; // a
        bytes[29..31].copy_from_slice(&45678u16.to_be_bytes()); // b
        bytes[25..29].copy_from_slice(&1_000_000u32.to_be_bytes()); // c
        bytes[24] = 1; // d
        let word = Word::new(bytes);

        assert_eq!(extract_sub_word(word, 0, 1), vec![123]);
        assert_eq!(extract_sub_word(word, 1, 2), 45678u16.to_be_bytes().to_vec());
        assert_eq!(extract_sub_word(word, 3, 4), 1_000_000u32.to_be_bytes().to_vec());
        assert_eq!(extract_sub_word(word, 7, 1), vec![1]);
    }

    #[test]
    fn modification_is_judged_per_sub_range() {
        let mut pre = [0u8; 32];
        pre[31] = 1;
        let mut post = pre;
        post[30] = 9;

        let pre = Word::new(pre);
        let post = Word::new(post);
        assert!(!sub_word_modified(pre, post, 0, 1));
        assert!(sub_word_modified(pre, post, 1, 1));
        assert!(sub_word_modified(pre, post, 0, 32));
    }

    #[test]
    fn scalars_decode_by_kind() {
        assert_eq!(
            decode_scalar(&[0x01, 0xe2, 0x40], &Primitive::uint(32)),
            Value::Uint(U256::from(123_456u64))
        );
        assert_eq!(
            decode_scalar(&[0xff], &Primitive::int(8)),
            Value::Int(I256::from(-1i32))
        );
        assert_eq!(decode_scalar(&[0x01], &Primitive::bool()), Value::Bool(true));
        assert_eq!(decode_scalar(&[0x00], &Primitive::bool()), Value::Bool(false));

        let mut address_bytes = [0u8; 20];
        address_bytes[19] = 0xab;
        assert_eq!(
            decode_scalar(&address_bytes, &Primitive::address()),
            Value::Address(crate::value::Address::new(address_bytes))
        );

        assert_eq!(
            decode_scalar(&[0xde, 0xad, 0xbe, 0xef], &Primitive::fixed_bytes(4)),
            Value::FixedBytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
    }
}
