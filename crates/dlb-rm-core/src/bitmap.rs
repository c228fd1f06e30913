//! Fixed-length bitmap with contiguous-range search.
//!
//! A set bit means the entry is available. Credits, history-list entries and
//! atomic-inflight entries are all handed out as contiguous runs, so the
//! interesting operation here is [`RangeBitmap::find_set_bit_range`], a
//! first-fit search from index zero.

use crate::error::{Error, Result};

const WORD_BITS: usize = u64::BITS as usize;

/// Bit vector whose set bits mark available entries.
///
/// `RangeBitmap::default()` is unallocated: every operation on it fails with
/// [`Error::InvalidArgument`] until it is replaced by [`RangeBitmap::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeBitmap {
    words: Vec<u64>,
    len: usize,
}

impl RangeBitmap {
    /// Allocate a bitmap of `len` bits, all zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `len` is zero.
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidArgument(
                "bitmap length must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        })
    }

    /// Number of bits in the bitmap.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the bitmap is unallocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_allocated(&self) -> Result<()> {
        if self.len == 0 {
            return Err(Error::InvalidArgument("bitmap is unallocated".to_string()));
        }
        Ok(())
    }

    fn check_range(&self, bit: usize, len: usize) -> Result<()> {
        self.check_allocated()?;
        match bit.checked_add(len) {
            Some(end) if bit < self.len && end <= self.len => Ok(()),
            _ => Err(Error::InvalidArgument(format!(
                "range {bit}+{len} exceeds bitmap length {}",
                self.len
            ))),
        }
    }

    /// Mask off bits past `len` in the last word.
    fn trim(&mut self) {
        let tail = self.len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    /// Whether bit `bit` is set. Out-of-range bits read as clear.
    #[must_use]
    pub fn test(&self, bit: usize) -> bool {
        bit < self.len && self.words[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
    }

    /// Set every bit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated.
    pub fn fill(&mut self) -> Result<()> {
        self.check_allocated()?;
        self.words.fill(u64::MAX);
        self.trim();
        Ok(())
    }

    /// Clear every bit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated.
    pub fn zero(&mut self) -> Result<()> {
        self.check_allocated()?;
        self.words.fill(0);
        Ok(())
    }

    /// Set one bit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated or
    /// `bit` is out of range.
    pub fn set(&mut self, bit: usize) -> Result<()> {
        self.set_range(bit, 1)
    }

    /// Clear one bit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated or
    /// `bit` is out of range.
    pub fn clear(&mut self, bit: usize) -> Result<()> {
        self.clear_range(bit, 1)
    }

    /// Set `len` bits starting at `bit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated or the
    /// range runs past its end.
    pub fn set_range(&mut self, bit: usize, len: usize) -> Result<()> {
        self.check_range(bit, len)?;
        for i in bit..bit + len {
            self.words[i / WORD_BITS] |= 1 << (i % WORD_BITS);
        }
        Ok(())
    }

    /// Clear `len` bits starting at `bit`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated or the
    /// range runs past its end.
    pub fn clear_range(&mut self, bit: usize, len: usize) -> Result<()> {
        self.check_range(bit, len)?;
        for i in bit..bit + len {
            self.words[i / WORD_BITS] &= !(1 << (i % WORD_BITS));
        }
        Ok(())
    }

    /// Number of set bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated.
    pub fn count(&self) -> Result<usize> {
        self.check_allocated()?;
        Ok(self.words.iter().map(|w| w.count_ones() as usize).sum())
    }

    /// Length of the longest run of set bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated.
    pub fn longest_set_range(&self) -> Result<usize> {
        self.check_allocated()?;
        let mut longest = 0;
        let mut run = 0;
        for i in 0..self.len {
            if self.test(i) {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
        Ok(longest)
    }

    /// First index of a run of `len` set bits, searching from index zero.
    ///
    /// `Ok(None)` means no such run exists, even if the population count
    /// would be large enough.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated or
    /// `len` is zero.
    pub fn find_set_bit_range(&self, len: usize) -> Result<Option<usize>> {
        self.check_allocated()?;
        if len == 0 {
            return Err(Error::InvalidArgument(
                "range length must be non-zero".to_string(),
            ));
        }
        if len > self.len {
            return Ok(None);
        }

        let mut start = 0;
        let mut run = 0;
        for i in 0..self.len {
            if self.test(i) {
                if run == 0 {
                    start = i;
                }
                run += 1;
                if run == len {
                    return Ok(Some(start));
                }
            } else {
                run = 0;
            }
        }
        Ok(None)
    }

    /// Every maximal run of set bits as `(start, len)`, in index order.
    #[must_use]
    pub fn set_runs(&self) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        let mut start = None;
        for i in 0..self.len {
            match (self.test(i), start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    runs.push((s, i - s));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push((s, self.len - s));
        }
        runs
    }

    /// First set bit, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bitmap is unallocated.
    pub fn find_set_bit(&self) -> Result<Option<usize>> {
        self.check_allocated()?;
        Ok(self
            .words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * WORD_BITS + w.trailing_zeros() as usize))
    }

    /// Store `src1 | src2` into `self`, over the shortest of the three lengths.
    /// Bits of `self` past that length are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if any of the bitmaps is
    /// unallocated.
    pub fn or(&mut self, src1: &RangeBitmap, src2: &RangeBitmap) -> Result<()> {
        self.check_allocated()?;
        src1.check_allocated()?;
        src2.check_allocated()?;

        let min = self.len.min(src1.len).min(src2.len);
        for i in 0..min {
            let word = &mut self.words[i / WORD_BITS];
            let mask = 1 << (i % WORD_BITS);
            if src1.test(i) || src2.test(i) {
                *word |= mask;
            } else {
                *word &= !mask;
            }
        }
        Ok(())
    }

    /// In-place union with `other`, over the shorter of the two lengths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either bitmap is unallocated.
    pub fn or_assign(&mut self, other: &RangeBitmap) -> Result<()> {
        self.check_allocated()?;
        other.check_allocated()?;
        let min = self.len.min(other.len);
        for i in 0..min {
            if other.test(i) {
                self.words[i / WORD_BITS] |= 1 << (i % WORD_BITS);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_zero_length_rejected() {
        assert!(matches!(
            RangeBitmap::new(0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_new_is_all_clear() {
        let bm = RangeBitmap::new(100).unwrap();
        assert_eq!(bm.len(), 100);
        assert_eq!(bm.count().unwrap(), 0);
        assert_eq!(bm.find_set_bit().unwrap(), None);
    }

    #[test]
    fn test_unallocated_operations_fail() {
        let mut bm = RangeBitmap::default();
        assert!(bm.is_empty());
        assert!(bm.fill().is_err());
        assert!(bm.zero().is_err());
        assert!(bm.count().is_err());
        assert!(bm.longest_set_range().is_err());
        assert!(bm.find_set_bit_range(1).is_err());
        assert!(bm.set_range(0, 1).is_err());
    }

    #[test]
    fn test_fill_respects_length() {
        let mut bm = RangeBitmap::new(70).unwrap();
        bm.fill().unwrap();
        assert_eq!(bm.count().unwrap(), 70);
        assert_eq!(bm.longest_set_range().unwrap(), 70);
        assert!(!bm.test(70));
    }

    #[test]
    fn test_range_past_end_rejected() {
        let mut bm = RangeBitmap::new(64).unwrap();
        assert!(bm.set_range(60, 5).is_err());
        assert!(bm.clear_range(64, 1).is_err());
        assert!(bm.set(64).is_err());
        bm.set_range(60, 4).unwrap();
        assert_eq!(bm.count().unwrap(), 4);
    }

    #[test]
    fn test_clear_then_set_restores_count() {
        let mut bm = RangeBitmap::new(2048).unwrap();
        bm.fill().unwrap();
        bm.clear_range(100, 500).unwrap();
        assert_eq!(bm.count().unwrap(), 2048 - 500);
        bm.set_range(100, 500).unwrap();
        assert_eq!(bm.count().unwrap(), 2048);
    }

    #[test]
    fn test_find_set_bit_range_first_fit() {
        let mut bm = RangeBitmap::new(128).unwrap();
        bm.set_range(10, 4).unwrap();
        bm.set_range(20, 8).unwrap();
        bm.set_range(40, 16).unwrap();
        assert_eq!(bm.find_set_bit_range(4).unwrap(), Some(10));
        assert_eq!(bm.find_set_bit_range(5).unwrap(), Some(20));
        assert_eq!(bm.find_set_bit_range(9).unwrap(), Some(40));
        assert_eq!(bm.find_set_bit_range(17).unwrap(), None);
    }

    #[test]
    fn test_find_set_bit_range_fragmented_is_none() {
        let mut bm = RangeBitmap::new(64).unwrap();
        for i in (0..64).step_by(2) {
            bm.set(i).unwrap();
        }
        assert_eq!(bm.count().unwrap(), 32);
        assert_eq!(bm.find_set_bit_range(2).unwrap(), None);
        assert_eq!(bm.longest_set_range().unwrap(), 1);
    }

    #[test]
    fn test_find_set_bit_range_zero_length_rejected() {
        let bm = RangeBitmap::new(8).unwrap();
        assert!(bm.find_set_bit_range(0).is_err());
        assert_eq!(bm.find_set_bit_range(9).unwrap(), None);
    }

    #[test]
    fn test_run_across_word_boundary() {
        let mut bm = RangeBitmap::new(256).unwrap();
        bm.set_range(60, 10).unwrap();
        assert_eq!(bm.find_set_bit_range(10).unwrap(), Some(60));
        assert_eq!(bm.longest_set_range().unwrap(), 10);
        assert_eq!(bm.find_set_bit().unwrap(), Some(60));
    }

    #[test]
    fn test_or_combines() {
        let mut a = RangeBitmap::new(32).unwrap();
        let mut b = RangeBitmap::new(32).unwrap();
        let mut dest = RangeBitmap::new(32).unwrap();
        a.set_range(0, 4).unwrap();
        b.set_range(4, 4).unwrap();
        dest.set(31).unwrap();
        dest.or(&a, &b).unwrap();
        assert_eq!(dest.count().unwrap(), 8);
        assert_eq!(dest.find_set_bit_range(8).unwrap(), Some(0));
    }

    #[test]
    fn test_or_assign_unions() {
        let mut a = RangeBitmap::new(16).unwrap();
        let mut b = RangeBitmap::new(16).unwrap();
        a.set_range(0, 2).unwrap();
        b.set_range(8, 2).unwrap();
        a.or_assign(&b).unwrap();
        assert_eq!(a.count().unwrap(), 4);
        assert!(a.test(9));
    }

    #[test]
    fn test_set_runs() {
        let mut bm = RangeBitmap::new(130).unwrap();
        assert!(bm.set_runs().is_empty());
        bm.set_range(2, 3).unwrap();
        bm.set_range(64, 2).unwrap();
        bm.set_range(125, 5).unwrap();
        assert_eq!(bm.set_runs(), vec![(2, 3), (64, 2), (125, 5)]);
    }
}
