//! Formal Verification Specifications for dlb-rm
//!
//! Design-by-contract specifications using Verus-style pre/postconditions
//! for the argument and allocation rules the resource manager enforces.
//!
//! # Examples
//!
//! ```rust,ignore
//! use crate::verification_specs::port_contracts;
//! assert!(port_contracts::valid_cq_depth(64));
//! ```
//!
//! ```rust,ignore
//! use crate::verification_specs::sn_contracts;
//! assert_eq!(sn_contracts::slots_for_mode(2), 8);
//! ```

use dlb_rm_core::{MAX_CQ_DEPTH, MAX_PORT_CREDIT_QUANTUM, MIN_CQ_DEPTH, SN_MODES};

/// Port argument invariants
///
/// #[requires(MIN_CQ_DEPTH.is_power_of_two() && MAX_CQ_DEPTH.is_power_of_two())]
/// #[ensures(result.is_ok() ==> low < high && quantum < high)]
/// #[invariant(MAX_PORT_CREDIT_QUANTUM < u16::MAX)]
pub mod port_contracts {
    use super::{MAX_CQ_DEPTH, MAX_PORT_CREDIT_QUANTUM, MIN_CQ_DEPTH};

    /// #[ensures(result == true ==> depth.is_power_of_two())]
    /// #[ensures(result == true ==> MIN_CQ_DEPTH <= depth && depth <= MAX_CQ_DEPTH)]
    pub fn valid_cq_depth(depth: u32) -> bool {
        depth.is_power_of_two() && (MIN_CQ_DEPTH..=MAX_CQ_DEPTH).contains(&depth)
    }

    /// #[requires(pool_avail <= u32::MAX)]
    /// #[ensures(result == true ==> low < high)]
    /// #[ensures(result == true ==> quantum < high)]
    /// #[ensures(result == true ==> u32::from(high) <= pool_avail)]
    pub fn valid_credit_watermarks(high: u16, low: u16, quantum: u16, pool_avail: u32) -> bool {
        u32::from(high) <= pool_avail
            && low < high
            && quantum < high
            && u32::from(quantum) <= MAX_PORT_CREDIT_QUANTUM
    }
}

/// Sequence-number group invariants
///
/// #[invariant(sequence_numbers_per_queue * slots == 1024)]
/// #[requires(mode < SN_MODES)]
pub mod sn_contracts {
    use super::SN_MODES;

    /// #[requires(mode < SN_MODES)]
    /// #[ensures(result == 32 >> mode)]
    pub fn slots_for_mode(mode: usize) -> u32 {
        debug_assert!(mode < SN_MODES);
        32 >> mode
    }

    /// #[requires(mode < SN_MODES)]
    /// #[ensures(result.count_ones() == slots_for_mode(mode))]
    pub fn full_mask(mode: usize) -> u64 {
        (1u64 << slots_for_mode(mode)) - 1
    }
}

/// Contiguous window invariants
///
/// #[invariant(base <= base + offset && base + offset <= bound)]
/// #[ensures(result.is_some() ==> result.unwrap() + n <= bound)]
pub mod window_contracts {
    /// #[requires(base <= bound)]
    /// #[ensures(result.is_some() ==> offset + n <= bound - base)]
    /// #[ensures(result.is_none() ==> offset + n > bound - base)]
    pub fn carve(base: u32, bound: u32, offset: u32, n: u32) -> Option<u32> {
        let end = offset.checked_add(n)?;
        (end <= bound - base).then_some(base + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlb_rm_core::args::CreateLdbPortArgs;
    use dlb_rm_core::freelist::Freelist;

    #[test]
    fn test_cq_depth_contract() {
        assert!(port_contracts::valid_cq_depth(8));
        assert!(port_contracts::valid_cq_depth(1024));
        assert!(!port_contracts::valid_cq_depth(4));
        assert!(!port_contracts::valid_cq_depth(48));
        assert!(!port_contracts::valid_cq_depth(2048));
    }
    #[test]
    fn test_default_port_args_satisfy_contracts() {
        let args = CreateLdbPortArgs::default();
        assert!(port_contracts::valid_cq_depth(u32::from(args.cq_depth)));
        assert!(port_contracts::valid_credit_watermarks(
            args.ldb_credit_high_watermark,
            args.ldb_credit_low_watermark,
            args.ldb_credit_quantum,
            64,
        ));
    }
    #[test]
    fn test_sn_masks() {
        let masks: Vec<u64> = (0..SN_MODES).map(sn_contracts::full_mask).collect();
        assert_eq!(masks, vec![0xffff_ffff, 0xffff, 0xff, 0xf, 0x3, 0x1]);
    }
    #[test]
    fn test_carve_matches_freelist() {
        let mut fl = Freelist::new(100, 16);
        assert_eq!(window_contracts::carve(100, 116, 0, 10), fl.alloc(10));
        assert_eq!(window_contracts::carve(100, 116, 10, 7), fl.alloc(7));
        assert_eq!(window_contracts::carve(100, 116, 10, 6), fl.alloc(6));
    }
}

// ─── Kani Proof Stubs ────────────────────────────────────────────
// Model-checking proofs for critical invariants
// Requires: cargo install --locked kani-verifier

#[cfg(kani)]
mod kani_proofs {
    #[kani::proof]
    fn verify_cq_depth_bounds() {
        let depth: u32 = kani::any();
        if super::port_contracts::valid_cq_depth(depth) {
            assert!(depth >= 8 && depth <= 1024);
        }
    }

    #[kani::proof]
    fn verify_sn_slots_cover_group() {
        let mode: usize = kani::any();
        kani::assume(mode < 6);
        let per_queue = 32u32 << mode;
        assert_eq!(per_queue * super::sn_contracts::slots_for_mode(mode), 1024);
    }

    #[kani::proof]
    fn verify_carve_in_window() {
        let base: u32 = kani::any();
        let len: u32 = kani::any();
        let offset: u32 = kani::any();
        let n: u32 = kani::any();
        kani::assume(base.checked_add(len).is_some());
        kani::assume(offset <= len);
        if let Some(start) = super::window_contracts::carve(base, base + len, offset, n) {
            assert!(start + n <= base + len);
        }
    }
}
