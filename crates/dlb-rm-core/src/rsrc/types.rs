//! Entities tracked by the resource registry.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::freelist::Freelist;
use crate::QIDS_PER_LDB_CQ;

/// Requesting function: the primary (PF) or a tenant (VF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Func {
    /// Physical function. Uses physical ids and can address every domain.
    Pf,
    /// Virtual function `n`. Uses virtual ids and sees only its own domains.
    Vf(u32),
}

impl Func {
    /// Whether the request comes from a tenant.
    #[must_use]
    pub fn is_vf(self) -> bool {
        matches!(self, Self::Vf(_))
    }
}

impl std::fmt::Display for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pf => f.write_str("pf"),
            Self::Vf(n) => write!(f, "vf{n}"),
        }
    }
}

/// Identity of one resource instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct ResourceId {
    pub phys_id: u32,
    pub virt_id: u32,
    pub vf_owned: bool,
    pub vf_id: u32,
}

impl ResourceId {
    pub(crate) fn new(phys_id: u32) -> Self {
        Self {
            phys_id,
            ..Self::default()
        }
    }

    /// Id as the requester numbers it.
    pub(crate) fn for_func(&self, func: Func) -> u32 {
        if func.is_vf() {
            self.virt_id
        } else {
            self.phys_id
        }
    }

    /// Whether a request from `func` addressing `id` refers to this instance.
    pub(crate) fn matches(&self, func: Func, id: u32) -> bool {
        self.for_func(func) == id
    }

    /// Function currently owning the instance.
    pub(crate) fn owner(&self) -> Func {
        if self.vf_owned {
            Func::Vf(self.vf_id)
        } else {
            Func::Pf
        }
    }
}

/// Lifecycle of one queue-to-port mapping slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum QidMapState {
    /// Slot is free.
    #[default]
    Unmapped,
    /// Queue is mapped.
    Mapped,
    /// Dynamic map waiting for the queue's inflights to drain.
    MapInProgress,
    /// Unmap waiting for the port's inflights to drain.
    UnmapInProgress,
    /// Unmap in progress, with another queue to map once it completes.
    UnmapInProgressPendingMap,
}

/// One of a port's mapping slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct QidMap {
    pub qid: u32,
    pub pending_qid: u32,
    pub priority: u32,
    pub pending_priority: u32,
    pub state: QidMapState,
}

/// Load-balanced queue.
#[derive(Debug, Clone, Default)]
pub(crate) struct LdbQueue {
    pub id: ResourceId,
    pub domain: Option<usize>,
    pub configured: bool,
    pub num_qid_inflights: u32,
    pub aqed_base: u32,
    pub aqed_limit: u32,
    /// Sequence-number group and slot of an ordered queue.
    pub sn: Option<(usize, u32)>,
    pub num_mappings: u32,
    pub num_pending_additions: u32,
}

/// Load-balanced port and its consumer queue.
#[derive(Debug, Clone, Default)]
pub(crate) struct LdbPort {
    pub id: ResourceId,
    pub domain: Option<usize>,
    pub configured: bool,
    pub enabled: bool,
    pub qid_map: [QidMap; QIDS_PER_LDB_CQ],
    pub num_mappings: u32,
    pub num_pending_removals: u32,
    pub hist_list_entry_base: u32,
    pub hist_list_entry_limit: u32,
    pub ldb_pool: Option<usize>,
    pub dir_pool: Option<usize>,
}

impl LdbPort {
    /// Slots not in the unmapped state.
    pub(crate) fn occupied_slots(&self) -> usize {
        self.qid_map
            .iter()
            .filter(|m| m.state != QidMapState::Unmapped)
            .count()
    }

    /// First slot in `state` holding `qid`.
    pub(crate) fn find_slot(&self, state: QidMapState, qid: u32) -> Option<usize> {
        self.qid_map
            .iter()
            .position(|m| m.state == state && m.qid == qid)
    }

    /// First slot in `state`, whatever queue it holds.
    pub(crate) fn find_slot_in_state(&self, state: QidMapState) -> Option<usize> {
        self.qid_map.iter().position(|m| m.state == state)
    }

    /// Slot whose pending map targets `qid`.
    pub(crate) fn find_pending_map_slot(&self, qid: u32) -> Option<usize> {
        self.qid_map.iter().position(|m| {
            m.state == QidMapState::UnmapInProgressPendingMap && m.pending_qid == qid
        })
    }
}

/// Directed port and the queue paired with it.
#[derive(Debug, Clone, Default)]
pub(crate) struct DirPqPair {
    pub id: ResourceId,
    pub domain: Option<usize>,
    pub port_configured: bool,
    pub queue_configured: bool,
    pub enabled: bool,
    pub ldb_pool: Option<usize>,
    pub dir_pool: Option<usize>,
}

/// Credit pool, load-balanced or directed.
#[derive(Debug, Clone, Default)]
pub(crate) struct CreditPool {
    pub id: ResourceId,
    pub domain: Option<usize>,
    pub configured: bool,
    pub base: u32,
    pub total_credits: u32,
    pub avail_credits: u32,
}

/// Scheduling domain. Resource lists hold physical indices.
#[derive(Debug, Clone)]
pub(crate) struct Domain {
    pub id: ResourceId,
    pub owner: Func,
    pub configured: bool,
    pub started: bool,

    pub avail_ldb_queues: VecDeque<usize>,
    pub used_ldb_queues: VecDeque<usize>,
    pub avail_ldb_ports: VecDeque<usize>,
    pub used_ldb_ports: VecDeque<usize>,
    pub avail_dir_pq_pairs: VecDeque<usize>,
    pub used_dir_pq_pairs: VecDeque<usize>,
    pub avail_ldb_credit_pools: VecDeque<usize>,
    pub used_ldb_credit_pools: VecDeque<usize>,
    pub avail_dir_credit_pools: VecDeque<usize>,
    pub used_dir_credit_pools: VecDeque<usize>,

    pub qed_freelist: Freelist,
    pub dqed_freelist: Freelist,
    pub aqed_freelist: Freelist,
    pub hist_list_entries: Freelist,

    pub num_pending_removals: u32,
    pub num_pending_additions: u32,
}

impl Domain {
    pub(crate) fn new(phys_id: u32) -> Self {
        Self {
            id: ResourceId::new(phys_id),
            owner: Func::Pf,
            configured: false,
            started: false,
            avail_ldb_queues: VecDeque::new(),
            used_ldb_queues: VecDeque::new(),
            avail_ldb_ports: VecDeque::new(),
            used_ldb_ports: VecDeque::new(),
            avail_dir_pq_pairs: VecDeque::new(),
            used_dir_pq_pairs: VecDeque::new(),
            avail_ldb_credit_pools: VecDeque::new(),
            used_ldb_credit_pools: VecDeque::new(),
            avail_dir_credit_pools: VecDeque::new(),
            used_dir_credit_pools: VecDeque::new(),
            qed_freelist: Freelist::default(),
            dqed_freelist: Freelist::default(),
            aqed_freelist: Freelist::default(),
            hist_list_entries: Freelist::default(),
            num_pending_removals: 0,
            num_pending_additions: 0,
        }
    }

    /// Load-balanced queues attached to the domain, used first.
    pub(crate) fn ldb_queues(&self) -> impl Iterator<Item = usize> + '_ {
        self.used_ldb_queues
            .iter()
            .chain(self.avail_ldb_queues.iter())
            .copied()
    }

    /// Load-balanced ports attached to the domain, used first.
    pub(crate) fn ldb_ports(&self) -> impl Iterator<Item = usize> + '_ {
        self.used_ldb_ports
            .iter()
            .chain(self.avail_ldb_ports.iter())
            .copied()
    }

    /// Directed pairs attached to the domain, used first.
    pub(crate) fn dir_pq_pairs(&self) -> impl Iterator<Item = usize> + '_ {
        self.used_dir_pq_pairs
            .iter()
            .chain(self.avail_dir_pq_pairs.iter())
            .copied()
    }

    pub(crate) fn ldb_credit_pools(&self) -> impl Iterator<Item = usize> + '_ {
        self.used_ldb_credit_pools
            .iter()
            .chain(self.avail_ldb_credit_pools.iter())
            .copied()
    }

    pub(crate) fn dir_credit_pools(&self) -> impl Iterator<Item = usize> + '_ {
        self.used_dir_credit_pools
            .iter()
            .chain(self.avail_dir_credit_pools.iter())
            .copied()
    }

    pub(crate) fn has_dir_pq_pairs(&self) -> bool {
        !self.used_dir_pq_pairs.is_empty() || !self.avail_dir_pq_pairs.is_empty()
    }

    pub(crate) fn has_ldb_queues(&self) -> bool {
        !self.used_ldb_queues.is_empty() || !self.avail_ldb_queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_numbering() {
        let mut id = ResourceId::new(12);
        assert_eq!(id.for_func(Func::Pf), 12);
        assert_eq!(id.owner(), Func::Pf);

        id.vf_owned = true;
        id.vf_id = 3;
        id.virt_id = 0;
        assert!(id.matches(Func::Vf(3), 0));
        assert!(!id.matches(Func::Vf(3), 12));
        assert_eq!(id.owner(), Func::Vf(3));
    }

    #[test]
    fn test_port_slot_search() {
        let mut port = LdbPort::default();
        assert_eq!(port.occupied_slots(), 0);
        port.qid_map[2] = QidMap {
            qid: 5,
            state: QidMapState::Mapped,
            ..QidMap::default()
        };
        port.qid_map[4] = QidMap {
            qid: 1,
            pending_qid: 9,
            state: QidMapState::UnmapInProgressPendingMap,
            ..QidMap::default()
        };
        assert_eq!(port.occupied_slots(), 2);
        assert_eq!(port.find_slot(QidMapState::Mapped, 5), Some(2));
        assert_eq!(port.find_slot(QidMapState::Mapped, 1), None);
        assert_eq!(port.find_pending_map_slot(9), Some(4));
        assert_eq!(port.find_slot_in_state(QidMapState::Unmapped), Some(0));
    }

    #[test]
    fn test_func_display() {
        assert_eq!(Func::Pf.to_string(), "pf");
        assert_eq!(Func::Vf(7).to_string(), "vf7");
    }
}
