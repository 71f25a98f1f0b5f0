//! Tests for primitive type encoding/decoding: integers, floats, bool,
//! fixed arrays, byte slices and strings.

use crate::encoding::*;

// ------------------------------------------------------------------------------------------------
// Integers
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_u8() {
    let bytes = encode_to_vec(&0xABu8).unwrap();
    assert_eq!(bytes, [0xAB]);
    let (decoded, consumed) = decode_from_slice::<u8>(&bytes).unwrap();
    assert_eq!(decoded, 0xAB);
    assert_eq!(consumed, 1);
}

#[test]
fn u16_is_big_endian() {
    let bytes = encode_to_vec(&0x1234u16).unwrap();
    assert_eq!(bytes, [0x12, 0x34]);
    let (decoded, consumed) = decode_from_slice::<u16>(&bytes).unwrap();
    assert_eq!(decoded, 0x1234);
    assert_eq!(consumed, 2);
}

#[test]
fn i32_negative_is_twos_complement_big_endian() {
    let bytes = encode_to_vec(&-2i32).unwrap();
    assert_eq!(bytes, [0xFF, 0xFF, 0xFF, 0xFE]);
    let (decoded, _) = decode_from_slice::<i32>(&bytes).unwrap();
    assert_eq!(decoded, -2);
}

#[test]
fn u64_is_big_endian() {
    let bytes = encode_to_vec(&0x0102_0304_0506_0708u64).unwrap();
    assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn i64_extremes() {
    for val in [i64::MIN, -1, 0, 1, i64::MAX] {
        let bytes = encode_to_vec(&val).unwrap();
        assert_eq!(bytes.len(), 8);
        let (decoded, consumed) = decode_from_slice::<i64>(&bytes).unwrap();
        assert_eq!(decoded, val);
        assert_eq!(consumed, 8);
    }
}

#[test]
fn u128_uses_sixteen_bytes() {
    let val = u128::MAX - 7;
    let bytes = encode_to_vec(&val).unwrap();
    assert_eq!(bytes.len(), 16);
    assert_eq!(decode_from_slice::<u128>(&bytes).unwrap().0, val);
}

#[test]
fn u32_truncated_buffer() {
    let err = decode_from_slice::<u32>(&[1, 2]).unwrap_err();
    assert!(matches!(
        err,
        EncodingError::UnexpectedEof {
            needed: 4,
            available: 2
        }
    ));
    assert!(err.is_eof());
}

// ------------------------------------------------------------------------------------------------
// Floats
// ------------------------------------------------------------------------------------------------

#[test]
fn f64_roundtrip_preserves_bits() {
    for val in [0.0f64, -0.0, 1.5, f64::MIN_POSITIVE, f64::INFINITY] {
        let bytes = encode_to_vec(&val).unwrap();
        let (decoded, _) = decode_from_slice::<f64>(&bytes).unwrap();
        assert_eq!(decoded.to_bits(), val.to_bits());
    }
}

#[test]
fn f32_nan_roundtrip() {
    let bytes = encode_to_vec(&f32::NAN).unwrap();
    let (decoded, consumed) = decode_from_slice::<f32>(&bytes).unwrap();
    assert!(decoded.is_nan());
    assert_eq!(consumed, 4);
}

// ------------------------------------------------------------------------------------------------
// bool
// ------------------------------------------------------------------------------------------------

#[test]
fn bool_roundtrip() {
    assert_eq!(encode_to_vec(&true).unwrap(), [1]);
    assert_eq!(encode_to_vec(&false).unwrap(), [0]);
    assert!(decode_from_slice::<bool>(&[1]).unwrap().0);
    assert!(!decode_from_slice::<bool>(&[0]).unwrap().0);
}

#[test]
fn bool_invalid_byte() {
    let err = decode_from_slice::<bool>(&[7]).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidBool(7)));
}

// ------------------------------------------------------------------------------------------------
// Byte arrays, byte vectors and strings
// ------------------------------------------------------------------------------------------------

#[test]
fn fixed_array_has_no_length_prefix() {
    let val = [9u8, 8, 7];
    let bytes = encode_to_vec(&val).unwrap();
    assert_eq!(bytes, [9, 8, 7]);
    assert_eq!(decode_from_slice::<[u8; 3]>(&bytes).unwrap().0, val);
}

#[test]
fn vec_u8_has_big_endian_length_prefix() {
    let bytes = encode_to_vec(&vec![0xAAu8, 0xBB]).unwrap();
    assert_eq!(bytes, [0, 0, 0, 2, 0xAA, 0xBB]);
    let (decoded, consumed) = decode_from_slice::<Vec<u8>>(&bytes).unwrap();
    assert_eq!(decoded, vec![0xAA, 0xBB]);
    assert_eq!(consumed, 6);
}

#[test]
fn string_roundtrip_multibyte() {
    let val = "zażółć".to_string();
    let bytes = encode_to_vec(&val).unwrap();
    let (decoded, consumed) = decode_from_slice::<String>(&bytes).unwrap();
    assert_eq!(decoded, val);
    assert_eq!(consumed, 4 + val.len());
}

#[test]
fn str_and_string_encode_identically() {
    let owned = encode_to_vec(&"abc".to_string()).unwrap();
    let borrowed = encode_to_vec(&"abc").unwrap();
    assert_eq!(owned, borrowed);
}

#[test]
fn string_invalid_utf8() {
    let buf = [0, 0, 0, 2, 0xC3, 0x28];
    let err = decode_from_slice::<String>(&buf).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidUtf8(_)));
}

// ------------------------------------------------------------------------------------------------
// SliceReader
// ------------------------------------------------------------------------------------------------

#[test]
fn slice_reader_reads_consecutive_values() {
    let mut buf = Vec::new();
    7u8.encode_to(&mut buf).unwrap();
    (-9i64).encode_to(&mut buf).unwrap();
    "hi".encode_to(&mut buf).unwrap();

    let mut reader = SliceReader::new(&buf);
    assert_eq!(reader.read::<u8>().unwrap(), 7);
    assert_eq!(reader.read::<i64>().unwrap(), -9);
    assert_eq!(reader.read::<String>().unwrap(), "hi");
    assert_eq!(reader.offset(), buf.len());
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn slice_reader_take_past_end_is_eof() {
    let buf = [1u8, 2, 3];
    let mut reader = SliceReader::new(&buf);
    assert_eq!(reader.take(2).unwrap(), &[1, 2]);
    assert!(reader.take(2).unwrap_err().is_eof());
}
