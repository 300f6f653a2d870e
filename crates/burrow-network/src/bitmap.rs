//! Fixed-width bit set used to track address slots.
//!
//! The persisted form is a string of `'0'` and `'1'` characters, one per
//! slot, index 0 first.

use std::fmt;

/// A bit set whose width is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

/// Why a persisted bitmap was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitmapError {
    /// The string does not have the expected number of slots.
    Length {
        /// Slots required by the subnet size.
        expected: usize,
        /// Slots found.
        actual: usize,
    },
    /// A character other than `'0'` or `'1'` at the given index.
    Character(usize),
}

impl fmt::Display for BitmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length { expected, actual } => {
                write!(f, "bitmap has {actual} slots, expected {expected}")
            }
            Self::Character(index) => write!(f, "invalid bitmap character at index {index}"),
        }
    }
}

impl Bitmap {
    /// Creates a bitmap of `len` clear bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Parses the persisted form, requiring exactly `expected_len` slots.
    ///
    /// # Errors
    ///
    /// Returns a [`BitmapError`] on a length mismatch or a foreign character.
    pub fn parse(s: &str, expected_len: usize) -> Result<Self, BitmapError> {
        if s.len() != expected_len {
            return Err(BitmapError::Length {
                expected: expected_len,
                actual: s.len(),
            });
        }
        let mut bitmap = Self::new(expected_len);
        for (index, byte) in s.bytes().enumerate() {
            match byte {
                b'0' => {}
                b'1' => bitmap.set(index),
                _ => return Err(BitmapError::Character(index)),
            }
        }
        Ok(bitmap)
    }

    /// Number of slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the bitmap has no slots.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the bit at `index`; out-of-range slots read as clear.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1_u64 << (index % 64)) != 0
    }

    /// Sets the bit at `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.words[index / 64] |= 1_u64 << (index % 64);
        }
    }

    /// Clears the bit at `index`, returning whether it was set.
    pub fn clear(&mut self, index: usize) -> bool {
        let was_set = self.get(index);
        if was_set {
            self.words[index / 64] &= !(1_u64 << (index % 64));
        }
        was_set
    }

    /// Lowest clear index below `limit`.
    #[must_use]
    pub fn first_clear(&self, limit: usize) -> Option<usize> {
        (0..limit.min(self.len)).find(|&i| !self.get(i))
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns `true` if any bit at or after `from` is set.
    #[must_use]
    pub fn any_set_from(&self, from: usize) -> bool {
        (from..self.len).any(|i| self.get(i))
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = (0..self.len)
            .map(|i| if self.get(i) { '1' } else { '0' })
            .collect();
        f.write_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_and_count() {
        let mut bitmap = Bitmap::new(130);
        bitmap.set(0);
        bitmap.set(64);
        bitmap.set(129);
        assert_eq!(bitmap.count_ones(), 3);
        assert!(bitmap.clear(64));
        assert!(!bitmap.clear(64));
        assert_eq!(bitmap.count_ones(), 2);
        assert!(!bitmap.get(500));
    }

    #[test]
    fn first_clear_respects_limit() {
        let mut bitmap = Bitmap::new(4);
        bitmap.set(0);
        bitmap.set(1);
        assert_eq!(bitmap.first_clear(2), None);
        assert_eq!(bitmap.first_clear(4), Some(2));
    }

    #[test]
    fn persisted_form_round_trips() {
        let bitmap = Bitmap::parse("1010", 4).expect("parse");
        assert!(bitmap.get(0) && !bitmap.get(1) && bitmap.get(2));
        assert_eq!(bitmap.to_string(), "1010");
        assert!(bitmap.any_set_from(1));
        assert!(!Bitmap::parse("1000", 4).expect("parse").any_set_from(1));
    }

    #[test]
    fn corrupt_forms_are_rejected() {
        assert_eq!(
            Bitmap::parse("101", 4),
            Err(BitmapError::Length {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(Bitmap::parse("10x0", 4), Err(BitmapError::Character(2)));
    }
}
