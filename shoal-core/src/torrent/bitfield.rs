//! Fixed-length piece bitfield with run searching

use bytes::Bytes;

use crate::picker::PickerError;

/// Bitfield representing which pieces are held, wanted or requested.
///
/// Bits are stored most-significant-bit first within each byte, matching the
/// wire representation of a peer's bitfield. Bits past `len` are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    bits: Vec<u8>,
    piece_count: u32,
}

impl BitField {
    /// Create new bitfield for given number of pieces, all bits cleared
    pub fn new(piece_count: u32) -> Self {
        let byte_count = piece_count.div_ceil(8);
        Self {
            bits: vec![0u8; byte_count as usize],
            piece_count,
        }
    }

    /// Create bitfield with every piece set
    pub fn full(piece_count: u32) -> Self {
        let mut field = Self::new(piece_count);
        field.fill(true);
        field
    }

    /// Create bitfield with only the given pieces set
    pub fn from_indices(piece_count: u32, indices: impl IntoIterator<Item = u32>) -> Self {
        let mut field = Self::new(piece_count);
        for index in indices {
            field.set(index, true);
        }
        field
    }

    /// Create bitfield from raw bytes (received from peer)
    ///
    /// # Errors
    /// - `PickerError::InvalidBitfield` - Byte length does not match piece count,
    ///   or spare bits past the last piece are set
    pub fn from_bytes(piece_data: Bytes, piece_count: u32) -> Result<Self, PickerError> {
        let expected_bytes = piece_count.div_ceil(8) as usize;
        if piece_data.len() != expected_bytes {
            return Err(PickerError::InvalidBitfield {
                reason: format!(
                    "expected {expected_bytes} bytes for {piece_count} pieces, got {}",
                    piece_data.len()
                ),
            });
        }

        let field = Self {
            bits: piece_data.to_vec(),
            piece_count,
        };
        if field.spare_bits_set() {
            return Err(PickerError::InvalidBitfield {
                reason: "spare bits set past final piece".to_string(),
            });
        }
        Ok(field)
    }

    /// Number of pieces tracked by this bitfield.
    pub fn len(&self) -> u32 {
        self.piece_count
    }

    /// Whether the bitfield tracks zero pieces.
    pub fn is_empty(&self) -> bool {
        self.piece_count == 0
    }

    /// Check whether the given piece bit is set. Out of range reads as false.
    pub fn get(&self, index: u32) -> bool {
        if index >= self.piece_count {
            return false;
        }
        let byte_index = (index / 8) as usize;
        let bit_index = 7 - (index % 8);
        self.bits[byte_index] & (1 << bit_index) != 0
    }

    /// Set or clear the given piece bit. Out of range writes are ignored.
    pub fn set(&mut self, index: u32, value: bool) {
        if index >= self.piece_count {
            return;
        }
        let byte_index = (index / 8) as usize;
        let bit_index = 7 - (index % 8);
        if value {
            self.bits[byte_index] |= 1 << bit_index;
        } else {
            self.bits[byte_index] &= !(1 << bit_index);
        }
    }

    /// Set every bit to `value`.
    pub fn fill(&mut self, value: bool) {
        let byte = if value { 0xff } else { 0x00 };
        self.bits.fill(byte);
        self.clear_spare_bits();
    }

    /// First set bit in `[start, end)`, scanning left to right.
    pub fn first_true(&self, start: u32, end: u32) -> Option<u32> {
        self.first_matching(start, end, true)
    }

    /// First cleared bit in `[start, end)`, scanning left to right.
    pub fn first_false(&self, start: u32, end: u32) -> Option<u32> {
        self.first_matching(start, end, false)
    }

    /// True when no bit is set.
    pub fn all_false(&self) -> bool {
        self.bits.iter().all(|byte| *byte == 0)
    }

    /// True when every bit is set.
    pub fn all_true(&self) -> bool {
        self.count_ones() == self.piece_count
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u32 {
        self.bits.iter().map(|byte| byte.count_ones()).sum()
    }

    /// In-place union: `self = self | other`.
    pub fn union_with(&mut self, other: &BitField) {
        debug_assert_eq!(self.piece_count, other.piece_count);
        for (lhs, rhs) in self.bits.iter_mut().zip(&other.bits) {
            *lhs |= *rhs;
        }
        self.clear_spare_bits();
    }

    /// In-place intersection: `self = self & other`.
    pub fn intersect_with(&mut self, other: &BitField) {
        debug_assert_eq!(self.piece_count, other.piece_count);
        for (lhs, rhs) in self.bits.iter_mut().zip(&other.bits) {
            *lhs &= *rhs;
        }
    }

    /// In-place difference: `self = self & !other`.
    pub fn difference_with(&mut self, other: &BitField) {
        debug_assert_eq!(self.piece_count, other.piece_count);
        for (lhs, rhs) in self.bits.iter_mut().zip(&other.bits) {
            *lhs &= !*rhs;
        }
    }

    /// Iterator over the indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.piece_count).filter(|index| self.get(*index))
    }

    /// Get raw bytes for transmission
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn first_matching(&self, start: u32, end: u32, value: bool) -> Option<u32> {
        let end = end.min(self.piece_count);
        let mut index = start;
        while index < end {
            // Skip whole bytes that cannot contain a match
            if index % 8 == 0 && index + 8 <= end {
                let byte = self.bits[(index / 8) as usize];
                let skip = if value { byte == 0x00 } else { byte == 0xff };
                if skip {
                    index += 8;
                    continue;
                }
            }
            if self.get(index) == value {
                return Some(index);
            }
            index += 1;
        }
        None
    }

    fn spare_bits_set(&self) -> bool {
        let used = self.piece_count % 8;
        match self.bits.last() {
            Some(last) if used != 0 => last & (0xff >> used) != 0,
            _ => false,
        }
    }

    fn clear_spare_bits(&mut self) {
        let used = self.piece_count % 8;
        if used != 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= !(0xff >> used);
            }
        }
    }
}
