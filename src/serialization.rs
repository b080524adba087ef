//! Flat little-endian framing for buffer change sets.
//!
//! The wire format is fixed-width integers with no version tag:
//! `u32` scalars, points as `row | column`, texts as `len | units`.

use crate::error::{Error, Result};
use crate::point::Point;

/// Appends little-endian fields to a byte vector.
#[derive(Debug, Default)]
pub struct Serializer {
    bytes: Vec<u8>,
}

impl Serializer {
    /// Create an empty serializer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `u32`.
    pub fn append_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a `u16`.
    pub fn append_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a point as `row | column`.
    pub fn append_point(&mut self, point: Point) {
        self.append_u32(point.row);
        self.append_u32(point.column);
    }

    /// Append UTF-16 code units as `len | units`.
    pub fn append_units(&mut self, units: &[u16]) {
        self.append_u32(units.len() as u32);
        for &unit in units {
            self.append_u16(unit);
        }
    }

    /// Consume the serializer, yielding the bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Reads little-endian fields from a byte slice with bounds checking.
#[derive(Debug)]
pub struct Deserializer<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Deserializer<'a> {
    /// Create a deserializer over a byte slice.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let remaining = self.bytes.len() - self.offset;
        if remaining < count {
            return Err(Error::TruncatedData {
                expected: count,
                remaining,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    /// Read a `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a point.
    pub fn read_point(&mut self) -> Result<Point> {
        let row = self.read_u32()?;
        let column = self.read_u32()?;
        Ok(Point::new(row, column))
    }

    /// Read a `len | units` sequence of UTF-16 code units.
    pub fn read_units(&mut self) -> Result<Vec<u16>> {
        let len = self.read_u32()? as usize;
        // Each unit is two bytes; reject lengths the input cannot hold.
        let remaining = self.bytes.len() - self.offset;
        if remaining / 2 < len {
            return Err(Error::TruncatedData {
                expected: len * 2,
                remaining,
            });
        }
        let mut units = Vec::with_capacity(len);
        for _ in 0..len {
            units.push(self.read_u16()?);
        }
        Ok(units)
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_scalars() {
        let mut serializer = Serializer::new();
        serializer.append_u32(0xDEAD_BEEF);
        serializer.append_point(Point::new(3, 7));
        serializer.append_units(&[b'h' as u16, b'i' as u16]);
        let bytes = serializer.finish();

        let mut deserializer = Deserializer::new(&bytes);
        assert_eq!(deserializer.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(deserializer.read_point().unwrap(), Point::new(3, 7));
        assert_eq!(
            deserializer.read_units().unwrap(),
            vec![b'h' as u16, b'i' as u16]
        );
        assert_eq!(deserializer.remaining(), 0);
    }

    #[test]
    fn test_truncated_read() {
        let mut deserializer = Deserializer::new(&[1, 2]);
        assert!(matches!(
            deserializer.read_u32(),
            Err(Error::TruncatedData {
                expected: 4,
                remaining: 2
            })
        ));
    }

    #[test]
    fn test_unit_length_overflow_rejected() {
        // Length claims more units than the input holds.
        let mut serializer = Serializer::new();
        serializer.append_u32(u32::MAX);
        let bytes = serializer.finish();
        let mut deserializer = Deserializer::new(&bytes);
        assert!(deserializer.read_units().is_err());
    }
}
