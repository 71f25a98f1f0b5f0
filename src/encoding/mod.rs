//! Deterministic binary primitives shared by every on-disk format.
//!
//! This module provides the [`Encode`] and [`Decode`] traits used by the
//! bean codec, the lookup files of the indexes and the small meta files.
//! The format is owned by this crate, so the on-disk representation never
//! changes because of a dependency upgrade.
//!
//! # Wire format
//!
//! | Rust type          | Encoding                                     |
//! |--------------------|----------------------------------------------|
//! | `u8` / `i8`        | 1 byte                                       |
//! | `u16` / `i16`      | 2 bytes, big-endian                          |
//! | `u32` / `i32`      | 4 bytes, big-endian                          |
//! | `u64` / `i64`      | 8 bytes, big-endian                          |
//! | `u128`             | 16 bytes, big-endian                         |
//! | `f32` / `f64`      | IEEE-754 bits, big-endian                    |
//! | `bool`             | 1 byte (`0x00` = false, `0x01` = true)       |
//! | `[u8; N]`          | `N` raw bytes (fixed-size, no length prefix) |
//! | `Vec<u8>` / bytes  | `[u32 len][bytes]`                           |
//! | `String`           | `[u32 len][utf-8 bytes]`                     |
//! | `Option<T>`        | `[u8 flag: 0=None, 1=Some][T if Some]`       |
//! | `Vec<T>`           | `[u32 count][T₁][T₂]…`                      |
//!
//! All multi-byte numbers are **big-endian**, so fixed-width keys written
//! by the indexes compare bytewise in the same order as their unsigned
//! value. Lengths and counts are `u32`.
//!
//! # Safety limits
//!
//! Variable-length decoders enforce upper bounds so that a corrupted length
//! prefix cannot trigger a huge allocation:
//!
//! - [`MAX_BYTE_LEN`]: maximum byte length for `Vec<u8>` and `String`.
//! - [`MAX_VEC_ELEMENTS`]: maximum element count for `Vec<T>`.
//!
//! # Zero-panic guarantee
//!
//! No function in this module uses `unwrap()`, `expect()`, or any other
//! panicking path.  All errors are propagated via [`EncodingError`].

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Safety limits
// ------------------------------------------------------------------------------------------------

/// Maximum byte length for a single `Vec<u8>` or `String` during decoding
/// (256 MiB).
pub const MAX_BYTE_LEN: u32 = 256 * 1024 * 1024;

/// Maximum element count for `Vec<T>` (non-`u8`) during decoding (16 M).
pub const MAX_VEC_ELEMENTS: u32 = 16 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced during encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A type tag or discriminant was not recognised.
    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag {
        /// The tag value that was read.
        tag: u32,
        /// The type being decoded.
        type_name: &'static str,
    },

    /// A bool field contained a byte other than `0x00` or `0x01`.
    #[error("invalid bool byte: 0x{0:02X} (expected 0x00 or 0x01)")]
    InvalidBool(u8),

    /// A byte-sequence decoded as a string was not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A length or count exceeded its safety limit.
    #[error("length overflow: {0}")]
    LengthOverflow(String),

    /// Application-level encode or decode error.
    #[error("{0}")]
    Custom(String),
}

impl EncodingError {
    /// Returns `true` if the error means the input ended mid-value.
    ///
    /// Readers that fetch data in windows use this to decide whether to
    /// read more bytes or to give up.
    pub fn is_eof(&self) -> bool {
        matches!(self, EncodingError::UnexpectedEof { .. })
    }
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` into a byte buffer.
///
/// Implementations **must** produce deterministic output: the same
/// logical value always yields the exact same byte sequence.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from a byte slice.
///
/// Returns `(value, bytes_consumed)` on success so that callers can
/// advance a cursor through a buffer containing multiple encoded items.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

// ------------------------------------------------------------------------------------------------
// Convenience functions
// ------------------------------------------------------------------------------------------------

/// Encode a value into a freshly-allocated `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the beginning of `buf`.
///
/// Returns `(value, bytes_consumed)`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

// ------------------------------------------------------------------------------------------------
// SliceReader — cursor over a byte slice
// ------------------------------------------------------------------------------------------------

/// A forward-only cursor that decodes consecutive values from a slice.
///
/// Keeps the `(value, consumed)` bookkeeping of [`Decode`] in one place so
/// that composite decoders read like a sequence of `read()` calls.
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> SliceReader<'a> {
    /// Creates a cursor positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Decodes the next value and advances past it.
    #[inline]
    pub fn read<T: Decode>(&mut self) -> Result<T, EncodingError> {
        let (value, consumed) = T::decode_from(&self.buf[self.offset..])?;
        self.offset += consumed;
        Ok(value)
    }

    /// Returns the next `n` raw bytes and advances past them.
    #[inline]
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], EncodingError> {
        require(&self.buf[self.offset..], n)?;
        let out = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    /// Reads a `u32` length prefix and checks it against `limit`.
    pub fn read_len(&mut self, limit: u32, what: &str) -> Result<usize, EncodingError> {
        let len: u32 = self.read()?;
        if len > limit {
            return Err(EncodingError::LengthOverflow(format!(
                "{what} length {len} exceeds limit ({limit})"
            )));
        }
        Ok(len as usize)
    }

    /// Number of bytes consumed so far.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes left in the slice.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Verify that `buf` has at least `needed` bytes, returning
/// [`EncodingError::UnexpectedEof`] if not.
#[inline]
pub(crate) fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Convert a `usize` length to `u32`, returning [`EncodingError::LengthOverflow`]
/// if the value exceeds `u32::MAX`.
#[inline]
pub(crate) fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

/// Copies the first `N` bytes of `buf` into an array.
#[inline]
fn fixed<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    require(buf, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(&buf[..N]);
    Ok(arr)
}

// ------------------------------------------------------------------------------------------------
// Fixed-width numbers
// ------------------------------------------------------------------------------------------------

macro_rules! impl_be_number {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Encode for $ty {
                #[inline]
                fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                    buf.extend_from_slice(&self.to_be_bytes());
                    Ok(())
                }
            }

            impl Decode for $ty {
                #[inline]
                fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                    const N: usize = std::mem::size_of::<$ty>();
                    let bytes = fixed::<N>(buf)?;
                    Ok((<$ty>::from_be_bytes(bytes), N))
                }
            }
        )*
    };
}

impl_be_number!(u8, i8, u16, i16, u32, i32, u64, i64, u128, f32, f64);

// ------------------------------------------------------------------------------------------------
// bool
// ------------------------------------------------------------------------------------------------

impl Encode for bool {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(u8::from(*self));
        Ok(())
    }
}

impl Decode for bool {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        match buf[0] {
            0 => Ok((false, 1)),
            1 => Ok((true, 1)),
            other => Err(EncodingError::InvalidBool(other)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Fixed-size byte arrays
// ------------------------------------------------------------------------------------------------

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((fixed::<N>(buf)?, N))
    }
}

// ------------------------------------------------------------------------------------------------
// Variable-length byte vectors: [u32 len][bytes]
// ------------------------------------------------------------------------------------------------

impl Encode for Vec<u8> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_slice().encode_to(buf)
    }
}

impl Decode for Vec<u8> {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, offset) = u32::decode_from(buf)?;
        if len > MAX_BYTE_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "byte vector length {len} exceeds MAX_BYTE_LEN ({MAX_BYTE_LEN})"
            )));
        }
        let len = len as usize;
        require(&buf[offset..], len)?;
        Ok((buf[offset..offset + len].to_vec(), offset + len))
    }
}

impl Encode for &[u8] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        len_to_u32(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Strings: [u32 len][utf-8 bytes]
// ------------------------------------------------------------------------------------------------

impl Encode for String {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_bytes().encode_to(buf)
    }
}

impl Decode for String {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (raw, consumed) = Vec::<u8>::decode_from(buf)?;
        Ok((String::from_utf8(raw)?, consumed))
    }
}

impl Encode for &str {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_bytes().encode_to(buf)
    }
}

// ------------------------------------------------------------------------------------------------
// Option<T>: [u8 flag][T if Some]
// ------------------------------------------------------------------------------------------------

impl<T: Encode> Encode for Option<T> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            None => buf.push(0),
            Some(val) => {
                buf.push(1);
                val.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Option<T> {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        match buf[0] {
            0 => Ok((None, 1)),
            1 => {
                let (val, consumed) = T::decode_from(&buf[1..])?;
                Ok((Some(val), 1 + consumed))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "Option<T>",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Vec<T>: [u32 count][T₁][T₂]…
//
// `Vec<u8>` has a specialised impl above, so vectors of other element
// types go through these free functions instead of a blanket impl.
// ------------------------------------------------------------------------------------------------

/// Encode a slice of `T` as `[u32 count][T₁][T₂]…`.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    len_to_u32(items.len())?.encode_to(buf)?;
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

/// Decode a `Vec<T>` from `[u32 count][T₁][T₂]…`.
///
/// The element count is capped at [`MAX_VEC_ELEMENTS`].
pub fn decode_vec<T: Decode>(buf: &[u8]) -> Result<(Vec<T>, usize), EncodingError> {
    let mut reader = SliceReader::new(buf);
    let count = reader.read_len(MAX_VEC_ELEMENTS, "vector element count")?;
    let mut items = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        items.push(reader.read::<T>()?);
    }
    Ok((items, reader.offset()))
}
