//! Header codec ("pickle"): a self-delimiting, 4-byte aligned binary buffer.
//!
//! A pickle is a small header followed by a payload:
//!
//! ```text
//! 0x00  4   payload_size (u32 LE)
//! 0x04  ... payload: fields in write order, each zero-padded to 4 bytes
//! ```
//!
//! Fields carry no type tags. A reader must consume them in the order they
//! were written. Integers and floats are little-endian on every host; strings
//! are an `i32` byte length followed by UTF-8 bytes.

use crate::error::{Error, Result};

pub const SIZE_INT32: usize = 4;
pub const SIZE_UINT32: usize = 4;
pub const SIZE_INT64: usize = 8;
pub const SIZE_UINT64: usize = 8;
pub const SIZE_FLOAT: usize = 4;
pub const SIZE_DOUBLE: usize = 8;

/// Allocation granularity for payload storage.
const PAYLOAD_UNIT: usize = 64;

/// Round `i` up to the next multiple of `alignment`.
pub fn align_int(i: usize, alignment: usize) -> usize {
    i + (alignment - (i % alignment)) % alignment
}

/// A growable codec buffer.
///
/// Writes append a field, pad it to the next 4-byte boundary and update the
/// payload size stored in the first four bytes. Storage grows geometrically,
/// so writes never fail.
#[derive(Debug, Clone)]
pub struct Pickle {
    buf: Vec<u8>,
    header_size: usize,
    capacity_after_header: usize,
    write_offset: usize,
}

impl Default for Pickle {
    fn default() -> Self {
        Self::new()
    }
}

impl Pickle {
    /// Create an empty pickle ready for writing.
    pub fn new() -> Self {
        let mut pickle = Self {
            buf: Vec::new(),
            header_size: SIZE_UINT32,
            capacity_after_header: 0,
            write_offset: 0,
        };
        pickle.resize(PAYLOAD_UNIT);
        pickle.set_payload_size(0);
        pickle
    }

    /// Wrap an existing buffer for reading.
    ///
    /// The header size is the buffer length minus the declared payload size.
    /// If that is not positive, exceeds the buffer, or is not 4-byte aligned,
    /// the buffer is treated as empty: every subsequent read fails with a
    /// decode error. Wrapping never panics.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let buf = bytes.into();

        let declared = read_u32_le(&buf).map(|v| v as i64);
        let header_size = match declared {
            Some(payload) => buf.len() as i64 - payload,
            None => 0,
        };

        if header_size <= 0
            || header_size > buf.len() as i64
            || header_size as usize != align_int(header_size as usize, SIZE_UINT32)
        {
            return Self {
                buf: Vec::new(),
                header_size: 0,
                capacity_after_header: 0,
                write_offset: 0,
            };
        }

        let header_size = header_size as usize;
        let payload = buf.len() - header_size;
        Self {
            buf,
            header_size,
            capacity_after_header: payload,
            write_offset: payload,
        }
    }

    /// Size of the header preceding the payload (0 for a malformed buffer).
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Declared payload size in bytes.
    pub fn payload_size(&self) -> usize {
        read_u32_le(&self.buf).unwrap_or(0) as usize
    }

    /// Returns exactly `header_size + payload_size` bytes, without unused capacity.
    pub fn to_bytes(&self) -> Vec<u8> {
        let end = (self.header_size + self.payload_size()).min(self.buf.len());
        self.buf[..end].to_vec()
    }

    /// Start a sequential reader at the first payload field.
    pub fn reader(&self) -> PickleReader<'_> {
        PickleReader::new(&self.buf, self.header_size, self.payload_size())
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_i32(if value { 1 } else { 0 });
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_field(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_field(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_field(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_field(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_field(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_field(&value.to_le_bytes());
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) {
        self.write_i32(value.len() as i32);
        self.write_field(value.as_bytes());
    }

    fn write_field(&mut self, data: &[u8]) {
        if self.header_size < SIZE_UINT32 {
            // A malformed wrapped buffer has no room for the size field.
            *self = Self::new();
        }

        let data_length = align_int(data.len(), SIZE_UINT32);
        let new_size = self.write_offset + data_length;
        if new_size > self.capacity_after_header {
            self.resize(std::cmp::max(self.capacity_after_header * 2, new_size));
        }

        let start = self.header_size + self.write_offset;
        self.buf[start..start + data.len()].copy_from_slice(data);
        self.buf[start + data.len()..start + data_length].fill(0);

        self.set_payload_size(new_size);
        self.write_offset = new_size;
    }

    fn set_payload_size(&mut self, payload_size: usize) {
        self.buf[..SIZE_UINT32].copy_from_slice(&(payload_size as u32).to_le_bytes());
    }

    fn resize(&mut self, new_capacity: usize) {
        let new_capacity = align_int(new_capacity, PAYLOAD_UNIT);
        self.buf.resize(self.header_size + new_capacity, 0);
        self.capacity_after_header = new_capacity;
    }
}

fn read_u32_le(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; SIZE_UINT32] = buf.get(..SIZE_UINT32)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Sequential reader over a pickle's payload.
///
/// A read that asks for more bytes than remain pins the cursor at the end of
/// the payload, so every later read fails as well.
#[derive(Debug)]
pub struct PickleReader<'a> {
    data: &'a [u8],
    payload_offset: usize,
    read_index: usize,
    end_index: usize,
}

impl<'a> PickleReader<'a> {
    fn new(data: &'a [u8], payload_offset: usize, payload_size: usize) -> Self {
        let available = data.len().saturating_sub(payload_offset);
        Self {
            data,
            payload_offset,
            read_index: 0,
            end_index: payload_size.min(available),
        }
    }

    /// Payload bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.end_index - self.read_index
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_i32()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array::<SIZE_INT32>()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array::<SIZE_UINT32>()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array::<SIZE_INT64>()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array::<SIZE_UINT64>()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array::<SIZE_FLOAT>()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array::<SIZE_DOUBLE>()?))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let length = self.read_i32()?;
        let length = match usize::try_from(length) {
            Ok(length) => length,
            Err(_) => {
                self.read_index = self.end_index;
                return Err(Error::decode(format!("Negative string length {}", length)));
            }
        };

        let bytes = self.read_bytes(length)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::decode(format!("Invalid UTF-8 in string field: {}", e)))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        if length > self.end_index - self.read_index {
            self.read_index = self.end_index;
            return Err(Error::decode(format!(
                "Failed to read data with length of {}",
                length
            )));
        }

        let start = self.payload_offset + self.read_index;
        self.advance(length);
        Ok(&self.data[start..start + length])
    }

    fn advance(&mut self, size: usize) {
        let aligned = align_int(size, SIZE_UINT32);
        if self.end_index - self.read_index < aligned {
            self.read_index = self.end_index;
        } else {
            self.read_index += aligned;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_int() {
        assert_eq!(align_int(0, 4), 0);
        assert_eq!(align_int(1, 4), 4);
        assert_eq!(align_int(4, 4), 4);
        assert_eq!(align_int(5, 4), 8);
        assert_eq!(align_int(65, 64), 128);
    }

    #[test]
    fn test_empty_pickle() {
        let pickle = Pickle::new();
        assert_eq!(pickle.header_size(), 4);
        assert_eq!(pickle.payload_size(), 0);
        assert_eq!(pickle.to_bytes(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_u32_layout() {
        let mut pickle = Pickle::new();
        pickle.write_u32(0x0102_0304);
        assert_eq!(pickle.to_bytes(), vec![4, 0, 0, 0, 4, 3, 2, 1]);
    }

    #[test]
    fn test_string_layout_is_padded() {
        let mut pickle = Pickle::new();
        pickle.write_string("abc");
        assert_eq!(
            pickle.to_bytes(),
            vec![8, 0, 0, 0, 3, 0, 0, 0, b'a', b'b', b'c', 0]
        );
    }

    #[test]
    fn test_sequential_read() {
        let mut pickle = Pickle::new();
        pickle.write_bool(true);
        pickle.write_i32(-7);
        pickle.write_u64(u64::MAX);
        pickle.write_f64(1.5);
        pickle.write_string("héllo");

        let wrapped = Pickle::from_bytes(pickle.to_bytes());
        let mut reader = wrapped.reader();
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_i32().unwrap(), -7);
        assert_eq!(reader.read_u64().unwrap(), u64::MAX);
        assert_eq!(reader.read_f64().unwrap(), 1.5);
        assert_eq!(reader.read_string().unwrap(), "héllo");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_growth_beyond_initial_capacity() {
        let mut pickle = Pickle::new();
        let long = "x".repeat(1000);
        pickle.write_string(&long);
        pickle.write_u32(42);

        let bytes = pickle.to_bytes();
        assert_eq!(bytes.len(), 4 + 4 + 1000 + 4);

        let wrapped = Pickle::from_bytes(bytes);
        let mut reader = wrapped.reader();
        assert_eq!(reader.read_string().unwrap(), long);
        assert_eq!(reader.read_u32().unwrap(), 42);
    }

    #[test]
    fn test_read_past_end_pins_cursor() {
        let mut pickle = Pickle::new();
        pickle.write_u32(1);

        let wrapped = Pickle::from_bytes(pickle.to_bytes());
        let mut reader = wrapped.reader();
        assert!(reader.read_u64().is_err());
        assert_eq!(reader.remaining(), 0);
        // The u32 that would have fit is no longer reachable
        assert!(reader.read_u32().is_err());
    }

    #[test]
    fn test_oversized_string_length_fails() {
        let mut pickle = Pickle::new();
        pickle.write_i32(100);
        pickle.write_u32(0);

        let wrapped = Pickle::from_bytes(pickle.to_bytes());
        assert!(wrapped.reader().read_string().is_err());
    }

    #[test]
    fn test_negative_string_length_fails() {
        let mut pickle = Pickle::new();
        pickle.write_i32(-1);

        let wrapped = Pickle::from_bytes(pickle.to_bytes());
        let mut reader = wrapped.reader();
        assert!(reader.read_string().is_err());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let mut pickle = Pickle::new();
        pickle.write_i32(2);
        pickle.write_u32(u32::from_le_bytes([0xff, 0xfe, 0, 0]));

        let wrapped = Pickle::from_bytes(pickle.to_bytes());
        assert!(wrapped.reader().read_string().is_err());
    }

    #[test]
    fn test_malformed_buffers_are_empty() {
        // Declared payload larger than the buffer
        let too_big = Pickle::from_bytes(vec![100, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(too_big.header_size(), 0);
        assert!(too_big.to_bytes().is_empty());
        assert!(too_big.reader().read_u32().is_err());

        // Header size not 4-byte aligned
        let unaligned = Pickle::from_bytes(vec![3, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(unaligned.header_size(), 0);
        assert!(unaligned.reader().read_bool().is_err());

        // Too short to hold the size field
        let short = Pickle::from_bytes(vec![1, 2]);
        assert_eq!(short.header_size(), 0);
        assert!(short.reader().read_i32().is_err());

        // Empty
        let empty = Pickle::from_bytes(Vec::new());
        assert_eq!(empty.payload_size(), 0);
        assert!(empty.reader().read_string().is_err());
    }

    #[test]
    fn test_write_after_malformed_wrap() {
        let mut pickle = Pickle::from_bytes(vec![9, 9]);
        pickle.write_u32(5);
        assert_eq!(pickle.to_bytes(), vec![4, 0, 0, 0, 5, 0, 0, 0]);
    }

    #[test]
    fn test_append_to_wrapped_buffer() {
        let mut first = Pickle::new();
        first.write_u32(1);

        let mut pickle = Pickle::from_bytes(first.to_bytes());
        pickle.write_u32(2);

        let mut reader = pickle.reader();
        assert_eq!(reader.read_u32().unwrap(), 1);
        assert_eq!(reader.read_u32().unwrap(), 2);
    }

    // Property-based tests
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Field {
        Bool(bool),
        I32(i32),
        U32(u32),
        I64(i64),
        U64(u64),
        F32(f32),
        F64(f64),
        Str(String),
    }

    fn arb_field() -> impl Strategy<Value = Field> {
        prop_oneof![
            any::<bool>().prop_map(Field::Bool),
            any::<i32>().prop_map(Field::I32),
            any::<u32>().prop_map(Field::U32),
            any::<i64>().prop_map(Field::I64),
            any::<u64>().prop_map(Field::U64),
            any::<f32>()
                .prop_filter("NaN never compares equal", |f| !f.is_nan())
                .prop_map(Field::F32),
            any::<f64>()
                .prop_filter("NaN never compares equal", |f| !f.is_nan())
                .prop_map(Field::F64),
            ".{0,40}".prop_map(Field::Str),
        ]
    }

    fn write(pickle: &mut Pickle, field: &Field) {
        match field {
            Field::Bool(v) => pickle.write_bool(*v),
            Field::I32(v) => pickle.write_i32(*v),
            Field::U32(v) => pickle.write_u32(*v),
            Field::I64(v) => pickle.write_i64(*v),
            Field::U64(v) => pickle.write_u64(*v),
            Field::F32(v) => pickle.write_f32(*v),
            Field::F64(v) => pickle.write_f64(*v),
            Field::Str(v) => pickle.write_string(v),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Every field reads back as written, in order
        #[test]
        fn prop_fields_roundtrip(fields in prop::collection::vec(arb_field(), 0..32)) {
            let mut pickle = Pickle::new();
            for field in &fields {
                write(&mut pickle, field);
            }

            let wrapped = Pickle::from_bytes(pickle.to_bytes());
            let mut reader = wrapped.reader();
            for field in &fields {
                match field {
                    Field::Bool(v) => { prop_assert_eq!(reader.read_bool()?, *v); }
                    Field::I32(v) => { prop_assert_eq!(reader.read_i32()?, *v); }
                    Field::U32(v) => { prop_assert_eq!(reader.read_u32()?, *v); }
                    Field::I64(v) => { prop_assert_eq!(reader.read_i64()?, *v); }
                    Field::U64(v) => { prop_assert_eq!(reader.read_u64()?, *v); }
                    Field::F32(v) => { prop_assert_eq!(reader.read_f32()?, *v); }
                    Field::F64(v) => { prop_assert_eq!(reader.read_f64()?, *v); }
                    Field::Str(v) => { prop_assert_eq!(&reader.read_string()?, v); }
                }
            }
            prop_assert_eq!(reader.remaining(), 0);
        }

        /// Payload stays 4-byte aligned and to_bytes carries no slack
        #[test]
        fn prop_alignment_and_exact_length(fields in prop::collection::vec(arb_field(), 0..32)) {
            let mut pickle = Pickle::new();
            for field in &fields {
                prop_assert_eq!(pickle.payload_size() % SIZE_UINT32, 0);
                write(&mut pickle, field);
            }
            prop_assert_eq!(pickle.payload_size() % SIZE_UINT32, 0);
            prop_assert_eq!(
                pickle.to_bytes().len(),
                pickle.header_size() + pickle.payload_size()
            );
        }

        /// Wrapping arbitrary bytes never panics, and reads either succeed or fail cleanly
        #[test]
        fn prop_wrap_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let pickle = Pickle::from_bytes(bytes);
            let mut reader = pickle.reader();
            let _ = reader.read_string();
            let _ = reader.read_u64();
            prop_assert!(pickle.to_bytes().len() <= 64);
        }
    }
}
