//! Property-based tests for invariants

use dlb_rm::bitmap::RangeBitmap;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_runs_partition_set_bits(bits in prop::collection::vec(any::<bool>(), 1..300)) {
        let mut bm = RangeBitmap::new(bits.len()).unwrap();
        for (i, &b) in bits.iter().enumerate() {
            if b {
                bm.set(i).unwrap();
            }
        }
        let runs = bm.set_runs();
        let covered: usize = runs.iter().map(|&(_, len)| len).sum();
        prop_assert_eq!(covered, bm.count().unwrap());
        prop_assert_eq!(
            runs.iter().map(|&(_, len)| len).max().unwrap_or(0),
            bm.longest_set_range().unwrap()
        );
        for pair in runs.windows(2) {
            // Maximal runs never touch.
            prop_assert!(pair[0].0 + pair[0].1 < pair[1].0);
        }
    }
}
