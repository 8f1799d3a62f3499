//! Protocol buffer wire format reader.
//!
//! [`WireReader`] is a cursor over a borrowed byte slice that understands the
//! tag/value framing of the protobuf wire format: base-128 varints, zigzag
//! varints, fixed 32/64-bit values and length-delimited byte runs. It has no
//! knowledge of the messages it walks; the vector tile decoder drives it.
//!
//! Every failure is reported as a distinct [`WireError`]. Reading never
//! panics and never silently truncates, so a malformed buffer can be
//! rejected without taking the process down.

use thiserror::Error;

/// Maximum number of 7-bit groups in a varint (70 bits covers a u64).
const MAX_VARINT_GROUPS: usize = 10;

/// Errors raised while reading wire-encoded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// The buffer ended in the middle of a varint.
    #[error("unterminated varint")]
    UnterminatedVarint,

    /// A varint ran longer than ten continuation groups.
    #[error("varint too long")]
    VarintTooLong,

    /// A field carried a wire type outside {0, 1, 2, 5}.
    #[error("unknown field type {0}")]
    UnknownFieldType(u32),

    /// A read or skip would move past the end of the buffer.
    #[error("unexpected end of buffer")]
    EndOfBuffer,
}

/// Encoding category of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    /// The numeric wire type as it appears in the low three tag bits.
    pub fn as_u32(self) -> u32 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        }
    }
}

impl TryFrom<u32> for WireType {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value & 0x7 {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(WireError::UnknownFieldType(other)),
        }
    }
}

/// Integer types a varint can be read into.
///
/// Bits that do not fit the target width are discarded, matching the
/// behavior of shifting into a fixed-width accumulator.
pub trait VarintValue: Sized {
    fn from_raw(raw: u64) -> Self;
}

/// Signed integer types a zigzag varint can be read into.
pub trait ZigZagValue: Sized {
    fn from_zigzag(raw: u64) -> Self;
}

macro_rules! impl_varint_value {
    ($($ty:ty),*) => {
        $(
            impl VarintValue for $ty {
                #[inline]
                fn from_raw(raw: u64) -> Self {
                    raw as $ty
                }
            }
        )*
    };
}

impl_varint_value!(u32, u64, i32, i64, usize);

impl ZigZagValue for i64 {
    #[inline]
    fn from_zigzag(raw: u64) -> Self {
        ((raw >> 1) as i64) ^ -((raw & 1) as i64)
    }
}

impl ZigZagValue for i32 {
    #[inline]
    fn from_zigzag(raw: u64) -> Self {
        i64::from_zigzag(raw) as i32
    }
}

/// Cursor-based reader over a protobuf-encoded byte range.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Raw value of the most recent tag (field number and wire type).
    value: u32,
}

impl<'a> WireReader<'a> {
    /// Creates a reader over the whole slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            value: 0,
        }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Advances to the next field.
    ///
    /// Returns `Ok(false)` when the end of input is reached, which is the
    /// normal way for a message to end.
    pub fn next(&mut self) -> Result<bool, WireError> {
        if self.is_empty() {
            return Ok(false);
        }
        self.value = self.varint::<u32>()?;
        Ok(true)
    }

    /// Field number of the current field.
    pub fn tag(&self) -> u32 {
        self.value >> 3
    }

    /// Raw wire type bits of the current field.
    pub fn raw_wire_type(&self) -> u32 {
        self.value & 0x7
    }

    /// Wire type of the current field.
    pub fn wire_type(&self) -> Result<WireType, WireError> {
        WireType::try_from(self.value)
    }

    /// Reads a base-128 varint into `T`.
    pub fn varint<T: VarintValue>(&mut self) -> Result<T, WireError> {
        self.read_raw_varint().map(T::from_raw)
    }

    /// Reads a zigzag-encoded varint into `T`.
    pub fn svarint<T: ZigZagValue>(&mut self) -> Result<T, WireError> {
        self.read_raw_varint().map(T::from_zigzag)
    }

    /// Reads a length-prefixed byte string, borrowing from the buffer.
    pub fn bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.varint::<usize>()?;
        let start = self.pos;
        self.skip_bytes(len)?;
        Ok(&self.data[start..start + len])
    }

    /// Reads a length-prefixed string. Invalid UTF-8 is replaced.
    pub fn string(&mut self) -> Result<String, WireError> {
        self.bytes()
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
    }

    /// Reads a length-delimited field and returns a reader over its contents.
    pub fn message(&mut self) -> Result<WireReader<'a>, WireError> {
        self.bytes().map(WireReader::new)
    }

    /// Reads a packed repeated varint field.
    pub fn packed_varints(&mut self) -> Result<PackedVarints<'a>, WireError> {
        self.message().map(|inner| PackedVarints { inner })
    }

    /// Reads a little-endian 32-bit float.
    pub fn float32(&mut self) -> Result<f32, WireError> {
        let raw = self.fixed::<4>()?;
        Ok(f32::from_le_bytes(raw))
    }

    /// Reads a little-endian 64-bit float.
    pub fn float64(&mut self) -> Result<f64, WireError> {
        let raw = self.fixed::<8>()?;
        Ok(f64::from_le_bytes(raw))
    }

    /// Reads a single byte as a boolean.
    pub fn boolean(&mut self) -> Result<bool, WireError> {
        let [byte] = self.fixed::<1>()?;
        Ok(byte != 0)
    }

    /// Skips the value of the current field.
    pub fn skip(&mut self) -> Result<(), WireError> {
        self.skip_value(self.value)
    }

    /// Skips a value whose tag value is `val`.
    pub fn skip_value(&mut self, val: u32) -> Result<(), WireError> {
        match WireType::try_from(val)? {
            WireType::Varint => self.read_raw_varint().map(|_| ()),
            WireType::Fixed64 => self.skip_bytes(8),
            WireType::LengthDelimited => {
                let len = self.varint::<usize>()?;
                self.skip_bytes(len)
            }
            WireType::Fixed32 => self.skip_bytes(4),
        }
    }

    /// Advances the cursor by `n` bytes.
    ///
    /// Fails with [`WireError::EndOfBuffer`] and leaves the cursor untouched
    /// when fewer than `n` bytes remain.
    pub fn skip_bytes(&mut self, n: usize) -> Result<(), WireError> {
        if n > self.remaining() {
            return Err(WireError::EndOfBuffer);
        }
        self.pos += n;
        Ok(())
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let start = self.pos;
        self.skip_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[start..start + N]);
        Ok(out)
    }

    fn read_raw_varint(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        for group in 0..MAX_VARINT_GROUPS {
            let Some(&byte) = self.data.get(self.pos) else {
                return Err(WireError::UnterminatedVarint);
            };
            self.pos += 1;
            result |= u64::from(byte & 0x7f) << (group * 7);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(WireError::VarintTooLong)
    }
}

/// Iterator over the varints of a packed repeated field.
#[derive(Debug, Clone)]
pub struct PackedVarints<'a> {
    inner: WireReader<'a>,
}

impl Iterator for PackedVarints<'_> {
    type Item = Result<u32, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.inner.is_empty() {
            None
        } else {
            Some(self.inner.varint::<u32>())
        }
    }
}

/// Minimal protobuf encoder.
///
/// Only what is needed to build tile payloads by hand: fixtures in tests
/// and the CLI's synthetic tiles.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Appends a raw varint.
    pub fn varint(&mut self, mut value: u64) -> &mut Self {
        while value >= 0x80 {
            self.buf.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
        self
    }

    /// Appends a zigzag-encoded varint.
    pub fn svarint(&mut self, value: i64) -> &mut Self {
        self.varint(zigzag_encode(value))
    }

    /// Appends a field tag.
    pub fn tag(&mut self, field: u32, wire_type: WireType) -> &mut Self {
        self.varint(u64::from((field << 3) | wire_type.as_u32()))
    }

    /// Appends a varint field.
    pub fn varint_field(&mut self, field: u32, value: u64) -> &mut Self {
        self.tag(field, WireType::Varint).varint(value)
    }

    /// Appends a length-delimited field.
    pub fn bytes_field(&mut self, field: u32, bytes: &[u8]) -> &mut Self {
        self.tag(field, WireType::LengthDelimited)
            .varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Appends a packed repeated varint field.
    pub fn packed_field(&mut self, field: u32, values: &[u32]) -> &mut Self {
        let mut packed = WireWriter::new();
        for value in values {
            packed.varint(u64::from(*value));
        }
        self.bytes_field(field, packed.as_bytes())
    }

    pub fn float32_field(&mut self, field: u32, value: f32) -> &mut Self {
        self.tag(field, WireType::Fixed32);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn float64_field(&mut self, field: u32, value: f64) -> &mut Self {
        self.tag(field, WireType::Fixed64);
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }
}

/// Zigzag-encodes a signed value.
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}
