//! Property tests for range bitmaps and domain allocation.

use proptest::prelude::*;

use dlb_rm_core::args::CreateSchedDomainArgs;
use dlb_rm_core::bitmap::RangeBitmap;
use dlb_rm_core::{Device, DeviceConfig, Func, MAX_NUM_LDB_CREDITS, MAX_NUM_LDB_QUEUES};

const BITS: usize = 512;

fn bitmap_with(clears: &[(usize, usize)]) -> RangeBitmap {
    let mut bm = RangeBitmap::new(BITS).unwrap();
    bm.fill().unwrap();
    for &(start, len) in clears {
        bm.clear_range(start, len).unwrap();
    }
    bm
}

fn ranges() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..BITS).prop_flat_map(|s| (Just(s), 1..=(BITS - s))), 0..8)
}

#[derive(Debug, Clone)]
enum Step {
    Create { queues: u32, credits: u32 },
    Reset(usize),
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            (0u32..12, 0u32..3000).prop_map(|(queues, credits)| Step::Create { queues, credits }),
            (0usize..8).prop_map(Step::Reset),
        ],
        1..24,
    )
}

proptest! {
    #[test]
    fn test_clear_then_set_restores_count(clears in ranges(), start in 0..BITS, len in 1usize..64) {
        let mut bm = bitmap_with(&clears);
        let len = len.min(BITS - start);
        let before = bm.count().unwrap();
        let was_set: Vec<bool> = (start..start + len).map(|i| bm.test(i)).collect();

        bm.clear_range(start, len).unwrap();
        let cleared = was_set.iter().filter(|&&b| b).count();
        prop_assert_eq!(bm.count().unwrap(), before - cleared);

        bm.set_range(start, len).unwrap();
        prop_assert!((start..start + len).all(|i| bm.test(i)));
        prop_assert_eq!(bm.count().unwrap(), before + was_set.len() - cleared);
    }

    #[test]
    fn test_found_range_is_entirely_set(clears in ranges(), len in 1usize..=BITS) {
        let bm = bitmap_with(&clears);
        match bm.find_set_bit_range(len).unwrap() {
            Some(base) => {
                prop_assert!(base + len <= BITS);
                prop_assert!((base..base + len).all(|i| bm.test(i)));
            }
            None => prop_assert!(bm.longest_set_range().unwrap() < len),
        }
    }

    #[test]
    fn test_allocation_conserves_resources(steps in steps()) {
        let (dev, _) = Device::simulated(DeviceConfig::default()).unwrap();
        let mut live: Vec<u32> = Vec::new();

        for step in steps {
            let before = dev.snapshot();
            match step {
                Step::Create { queues, credits } => {
                    let args = CreateSchedDomainArgs {
                        num_ldb_queues: queues,
                        num_ldb_ports: u32::from(queues > 0),
                        num_ldb_credits: credits,
                        num_hist_list_entries: 32,
                        ..CreateSchedDomainArgs::default()
                    };
                    match dev.create_sched_domain(Func::Pf, &args) {
                        Ok(id) => live.push(id),
                        Err(_) => prop_assert_eq!(dev.snapshot(), before),
                    }
                }
                Step::Reset(i) if !live.is_empty() => {
                    let id = live.remove(i % live.len());
                    dev.reset_domain(Func::Pf, id).unwrap();
                }
                Step::Reset(_) => {}
            }

            let snap = dev.snapshot();
            let pf = &snap.functions[0];
            let queues: usize = snap.domains.iter().map(|d| d.ldb_queues.len()).sum();
            prop_assert_eq!(pf.avail_ldb_queues.len() + queues, MAX_NUM_LDB_QUEUES);
            let credits: usize = snap.domains.iter().map(|d| d.ldb_credits.total() as usize).sum();
            let free: usize = pf.ldb_credits.iter().map(|&(_, len)| len).sum();
            prop_assert_eq!(free + credits, MAX_NUM_LDB_CREDITS);
            prop_assert_eq!(snap.domains.len(), live.len());
        }
    }
}
