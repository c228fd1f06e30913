//! Sequence-number groups for ordered queues.
//!
//! Each group holds 1024 sequence numbers split evenly among the queues
//! using it. The mode selects the per-queue share: mode `m` gives
//! `32 << m` sequence numbers per queue and `32 >> m` queue slots.

use crate::error::{Error, Result};
use crate::{SN_GROUPS, SN_MODES};

/// Sequence numbers per group.
const SN_PER_GROUP: u32 = 1024;

#[derive(Debug, Clone, Default)]
pub(crate) struct SnGroup {
    pub mode: u32,
    pub slot_use_bitmap: u64,
}

impl SnGroup {
    pub(crate) fn sequence_numbers_per_queue(&self) -> u32 {
        32 << self.mode
    }

    fn num_slots(&self) -> u32 {
        SN_PER_GROUP / self.sequence_numbers_per_queue()
    }

    fn full_mask(&self) -> u64 {
        (1u64 << self.num_slots()) - 1
    }

    pub(crate) fn is_full(&self) -> bool {
        self.slot_use_bitmap == self.full_mask()
    }

    pub(crate) fn used_slots(&self) -> u32 {
        self.slot_use_bitmap.count_ones()
    }

    /// Claim the lowest free slot.
    pub(crate) fn alloc_slot(&mut self) -> Option<u32> {
        let slot = (0..self.num_slots()).find(|&s| self.slot_use_bitmap & (1 << s) == 0)?;
        self.slot_use_bitmap |= 1 << slot;
        Some(slot)
    }

    pub(crate) fn free_slot(&mut self, slot: u32) {
        self.slot_use_bitmap &= !(1u64 << slot);
    }

    /// Change the per-queue share. Refused once any queue uses the group.
    pub(crate) fn set_sequence_numbers(&mut self, value: u32) -> Result<()> {
        if self.slot_use_bitmap != 0 {
            return Err(Error::PermissionDenied(
                "sequence-number group is in use".to_string(),
            ));
        }
        let mode = (0..SN_MODES as u32)
            .find(|&m| 32 << m == value)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("{value} sequence numbers per queue"))
            })?;
        self.mode = mode;
        Ok(())
    }
}

/// Pack every group's mode into the mode register, 4 bits per group.
pub(crate) fn mode_word(groups: &[SnGroup; SN_GROUPS]) -> u32 {
    groups
        .iter()
        .enumerate()
        .fold(0, |word, (i, g)| word | ((g.mode & 0xf) << (4 * i)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        let group = SnGroup::default();
        assert_eq!(group.sequence_numbers_per_queue(), 32);
        assert_eq!(group.num_slots(), 32);
    }

    #[test]
    fn test_full_masks_per_mode() {
        let expected = [0xffff_ffff, 0xffff, 0xff, 0xf, 0x3, 0x1];
        for (mode, mask) in expected.into_iter().enumerate() {
            let group = SnGroup {
                mode: mode as u32,
                slot_use_bitmap: 0,
            };
            assert_eq!(group.full_mask(), mask, "mode {mode}");
        }
    }

    #[test]
    fn test_alloc_until_full() {
        let mut group = SnGroup::default();
        group.set_sequence_numbers(256).unwrap();
        assert_eq!(group.mode, 3);
        for expected in 0..4 {
            assert_eq!(group.alloc_slot(), Some(expected));
        }
        assert!(group.is_full());
        assert_eq!(group.alloc_slot(), None);
        group.free_slot(1);
        assert_eq!(group.used_slots(), 3);
        assert_eq!(group.alloc_slot(), Some(1));
    }

    #[test]
    fn test_set_rejects_bad_value_and_busy_group() {
        let mut group = SnGroup::default();
        assert!(matches!(
            group.set_sequence_numbers(48),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            group.set_sequence_numbers(2048),
            Err(Error::InvalidArgument(_))
        ));
        group.alloc_slot();
        assert!(matches!(
            group.set_sequence_numbers(64),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_mode_word() {
        let mut groups: [SnGroup; SN_GROUPS] = Default::default();
        groups[1].mode = 2;
        groups[3].mode = 5;
        assert_eq!(mode_word(&groups), (2 << 4) | (5 << 12));
    }
}
