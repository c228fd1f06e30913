//! Resource registry.
//!
//! Every physical resource instance lives in a fixed array here, allocated
//! once at device initialization. Ownership is expressed with index lists:
//! each function (PF and every VF) keeps lists of the instances available to
//! it, each domain keeps lists of what it has attached, and each instance
//! carries a back-reference to its domain.
//!
//! Credits, history-list entries and atomic-inflight entries are not
//! instances but ranges. Functions track them in [`RangeBitmap`]s and domains
//! in [`Freelist`](crate::freelist::Freelist) windows carved from those
//! bitmaps.

mod sn_group;
mod types;

use std::collections::VecDeque;

pub(crate) use sn_group::{mode_word, SnGroup};
pub use types::{Func, QidMapState};
pub(crate) use types::{CreditPool, DirPqPair, Domain, LdbPort, LdbQueue, QidMap, ResourceId};

use crate::args::NumResources;
use crate::bitmap::RangeBitmap;
use crate::error::{Error, Result};
use crate::{
    MAX_NUM_AQOS_ENTRIES, MAX_NUM_DIR_CREDITS, MAX_NUM_DIR_CREDIT_POOLS, MAX_NUM_DIR_PORTS,
    MAX_NUM_DOMAINS, MAX_NUM_HIST_LIST_ENTRIES, MAX_NUM_LDB_CREDITS, MAX_NUM_LDB_CREDIT_POOLS,
    MAX_NUM_LDB_PORTS, MAX_NUM_LDB_QUEUES, SN_GROUPS,
};

/// Initial order of the PF's available load-balanced ports.
///
/// Consecutive allocations land far apart, so ports handed to one domain
/// rarely neighbor ports of another.
const INIT_LDB_PORT_ORDER: [usize; MAX_NUM_LDB_PORTS] = [
    0, 31, 62, 29, 60, 27, 58, 25, 56, 23, 54, 21, 52, 19, 50, 17, 48, 15, 46, 13, 44, 11, 42,
    9, 40, 7, 38, 5, 36, 3, 34, 1, 32, 63, 30, 61, 28, 59, 26, 57, 24, 55, 22, 53, 20, 51, 18,
    49, 16, 47, 14, 45, 12, 43, 10, 41, 8, 39, 6, 37, 4, 35, 2, 33,
];

// ============================================================================
// Per-function pools
// ============================================================================

/// Resources available to one function and the domains it has in use.
#[derive(Debug, Clone)]
pub(crate) struct FunctionResources {
    pub avail_domains: VecDeque<usize>,
    pub used_domains: VecDeque<usize>,
    pub avail_ldb_queues: VecDeque<usize>,
    pub avail_ldb_ports: VecDeque<usize>,
    pub avail_dir_pq_pairs: VecDeque<usize>,
    pub avail_ldb_credit_pools: VecDeque<usize>,
    pub avail_dir_credit_pools: VecDeque<usize>,

    pub avail_qed_entries: RangeBitmap,
    pub avail_dqed_entries: RangeBitmap,
    pub avail_aqed_entries: RangeBitmap,
    pub avail_hist_list_entries: RangeBitmap,

    /// Set while the VF driver is registered. A locked VF's resource
    /// assignment cannot change.
    pub locked: bool,
}

impl FunctionResources {
    /// Empty pool; bitmaps allocated with no entries available.
    fn empty() -> Result<Self> {
        Ok(Self {
            avail_domains: VecDeque::new(),
            used_domains: VecDeque::new(),
            avail_ldb_queues: VecDeque::new(),
            avail_ldb_ports: VecDeque::new(),
            avail_dir_pq_pairs: VecDeque::new(),
            avail_ldb_credit_pools: VecDeque::new(),
            avail_dir_credit_pools: VecDeque::new(),
            avail_qed_entries: RangeBitmap::new(MAX_NUM_LDB_CREDITS)?,
            avail_dqed_entries: RangeBitmap::new(MAX_NUM_DIR_CREDITS)?,
            avail_aqed_entries: RangeBitmap::new(MAX_NUM_AQOS_ENTRIES)?,
            avail_hist_list_entries: RangeBitmap::new(MAX_NUM_HIST_LIST_ENTRIES)?,
            locked: false,
        })
    }

    /// Pool owning every resource of the device.
    fn full() -> Result<Self> {
        let mut rsrcs = Self::empty()?;
        rsrcs.avail_domains = (0..MAX_NUM_DOMAINS).collect();
        rsrcs.avail_ldb_queues = (0..MAX_NUM_LDB_QUEUES).collect();
        rsrcs.avail_ldb_ports = INIT_LDB_PORT_ORDER.iter().copied().collect();
        rsrcs.avail_dir_pq_pairs = (0..MAX_NUM_DIR_PORTS).collect();
        rsrcs.avail_ldb_credit_pools = (0..MAX_NUM_LDB_CREDIT_POOLS).collect();
        rsrcs.avail_dir_credit_pools = (0..MAX_NUM_DIR_CREDIT_POOLS).collect();
        rsrcs.avail_qed_entries.fill()?;
        rsrcs.avail_dqed_entries.fill()?;
        rsrcs.avail_aqed_entries.fill()?;
        rsrcs.avail_hist_list_entries.fill()?;
        Ok(rsrcs)
    }

    /// Available counts and longest contiguous runs.
    pub(crate) fn num_resources(&self) -> Result<NumResources> {
        Ok(NumResources {
            num_sched_domains: count(self.avail_domains.len()),
            num_ldb_queues: count(self.avail_ldb_queues.len()),
            num_ldb_ports: count(self.avail_ldb_ports.len()),
            num_dir_ports: count(self.avail_dir_pq_pairs.len()),
            num_atomic_inflights: count(self.avail_aqed_entries.count()?),
            max_contiguous_atomic_inflights: count(self.avail_aqed_entries.longest_set_range()?),
            num_hist_list_entries: count(self.avail_hist_list_entries.count()?),
            max_contiguous_hist_list_entries: count(
                self.avail_hist_list_entries.longest_set_range()?,
            ),
            num_ldb_credits: count(self.avail_qed_entries.count()?),
            max_contiguous_ldb_credits: count(self.avail_qed_entries.longest_set_range()?),
            num_dir_credits: count(self.avail_dqed_entries.count()?),
            max_contiguous_dir_credits: count(self.avail_dqed_entries.longest_set_range()?),
            num_ldb_credit_pools: count(self.avail_ldb_credit_pools.len()),
            num_dir_credit_pools: count(self.avail_dir_credit_pools.len()),
        })
    }
}

/// Registry counts never exceed the device maxima, all well below `u32::MAX`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn count(n: usize) -> u32 {
    n as u32
}

// ============================================================================
// Registry
// ============================================================================

/// Every resource instance of the device plus per-function ownership.
#[derive(Debug, Clone)]
pub(crate) struct Resources {
    pub pf: FunctionResources,
    pub vfs: Vec<FunctionResources>,

    pub domains: Vec<Domain>,
    pub ldb_queues: Vec<LdbQueue>,
    pub ldb_ports: Vec<LdbPort>,
    pub dir_pq_pairs: Vec<DirPqPair>,
    pub ldb_credit_pools: Vec<CreditPool>,
    pub dir_credit_pools: Vec<CreditPool>,
    pub sn_groups: [SnGroup; SN_GROUPS],
}

fn instances<T>(n: usize, make: impl Fn(ResourceId) -> T) -> Vec<T> {
    (0..n).map(|i| make(ResourceId::new(count(i)))).collect()
}

impl Resources {
    /// Registry with every resource available to the PF and `num_vfs`
    /// empty VF pools.
    pub(crate) fn new(num_vfs: u32) -> Result<Self> {
        let vfs = (0..num_vfs)
            .map(|_| FunctionResources::empty())
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pf: FunctionResources::full()?,
            vfs,
            domains: (0..MAX_NUM_DOMAINS).map(|i| Domain::new(count(i))).collect(),
            ldb_queues: instances(MAX_NUM_LDB_QUEUES, |id| LdbQueue {
                id,
                ..LdbQueue::default()
            }),
            ldb_ports: instances(MAX_NUM_LDB_PORTS, |id| LdbPort {
                id,
                ..LdbPort::default()
            }),
            dir_pq_pairs: instances(MAX_NUM_DIR_PORTS, |id| DirPqPair {
                id,
                ..DirPqPair::default()
            }),
            ldb_credit_pools: instances(MAX_NUM_LDB_CREDIT_POOLS, |id| CreditPool {
                id,
                ..CreditPool::default()
            }),
            dir_credit_pools: instances(MAX_NUM_DIR_CREDIT_POOLS, |id| CreditPool {
                id,
                ..CreditPool::default()
            }),
            sn_groups: Default::default(),
        })
    }

    /// Number of VF pools.
    pub(crate) fn num_vfs(&self) -> u32 {
        count(self.vfs.len())
    }

    pub(crate) fn func(&self, func: Func) -> Result<&FunctionResources> {
        match func {
            Func::Pf => Ok(&self.pf),
            Func::Vf(vf) => self
                .vfs
                .get(vf as usize)
                .ok_or_else(|| Error::InvalidArgument(format!("no such VF {vf}"))),
        }
    }

    pub(crate) fn func_mut(&mut self, func: Func) -> Result<&mut FunctionResources> {
        match func {
            Func::Pf => Ok(&mut self.pf),
            Func::Vf(vf) => self
                .vfs
                .get_mut(vf as usize)
                .ok_or_else(|| Error::InvalidArgument(format!("no such VF {vf}"))),
        }
    }

    // ------------------------------------------------------------------------
    // Lookups by requester id
    // ------------------------------------------------------------------------

    /// Domain addressed by `id`. The PF addresses any domain by physical id;
    /// a VF only its own in-use domains, by virtual id.
    pub(crate) fn domain_index(&self, func: Func, id: u32) -> Option<usize> {
        match func {
            Func::Pf => ((id as usize) < self.domains.len()).then_some(id as usize),
            Func::Vf(vf) => self
                .vfs
                .get(vf as usize)?
                .used_domains
                .iter()
                .copied()
                .find(|&d| self.domains[d].id.virt_id == id),
        }
    }

    pub(crate) fn domain_ldb_queue(&self, func: Func, domain: usize, id: u32) -> Option<usize> {
        self.domains[domain]
            .ldb_queues()
            .find(|&q| self.ldb_queues[q].id.matches(func, id))
    }

    pub(crate) fn domain_ldb_port(&self, func: Func, domain: usize, id: u32) -> Option<usize> {
        self.domains[domain]
            .ldb_ports()
            .find(|&p| self.ldb_ports[p].id.matches(func, id))
    }

    pub(crate) fn domain_dir_pq_pair(&self, func: Func, domain: usize, id: u32) -> Option<usize> {
        self.domains[domain]
            .dir_pq_pairs()
            .find(|&p| self.dir_pq_pairs[p].id.matches(func, id))
    }

    pub(crate) fn domain_ldb_pool(&self, func: Func, domain: usize, id: u32) -> Option<usize> {
        self.domains[domain]
            .ldb_credit_pools()
            .find(|&p| self.ldb_credit_pools[p].id.matches(func, id))
    }

    pub(crate) fn domain_dir_pool(&self, func: Func, domain: usize, id: u32) -> Option<usize> {
        self.domains[domain]
            .dir_credit_pools()
            .find(|&p| self.dir_credit_pools[p].id.matches(func, id))
    }

    // ------------------------------------------------------------------------
    // Port placement
    // ------------------------------------------------------------------------

    /// Position in `avail` of the next load-balanced port to give `domain`.
    ///
    /// Prefers a port whose neighbors (with wraparound) both belong to other
    /// domains, then one with a single foreign neighbor and the other
    /// unattached, then one with both neighbors unattached, and finally the
    /// head of the list.
    pub(crate) fn next_ldb_port(&self, avail: &VecDeque<usize>, domain: usize) -> Option<usize> {
        let owner = |port: usize| self.ldb_ports[port].domain;
        let neighbors = |port: usize| {
            let next = (port + 1) % MAX_NUM_LDB_PORTS;
            let prev = (port + MAX_NUM_LDB_PORTS - 1) % MAX_NUM_LDB_PORTS;
            (owner(prev), owner(next))
        };
        let foreign = |o: Option<usize>| matches!(o, Some(d) if d != domain);

        let tiers: [&dyn Fn(Option<usize>, Option<usize>) -> bool; 3] = [
            &|prev, next| foreign(prev) && foreign(next),
            &|prev, next| {
                (foreign(prev) && next.is_none()) || (prev.is_none() && foreign(next))
            },
            &|prev, next| prev.is_none() && next.is_none(),
        ];

        for tier in tiers {
            if let Some(pos) = avail.iter().position(|&port| {
                let (prev, next) = neighbors(port);
                tier(prev, next)
            }) {
                return Some(pos);
            }
        }
        (!avail.is_empty()).then_some(0)
    }
}
