//! Moving resources between the PF and its VFs.
//!
//! A VF's assignment can only change while its driver is not registered
//! (the VF is unlocked). Every update first gives the VF's currently
//! available share back to the PF and then carves the new share out, so the
//! result depends only on the requested count. Feasibility is checked before
//! anything moves: a refused update leaves both functions untouched.

use std::collections::VecDeque;

use super::{internal, reject, Manager};
use crate::bitmap::RangeBitmap;
use crate::error::{Error, Result, Status};
use crate::rsrc::{count, Func, FunctionResources, ResourceId, Resources};

/// Resources assigned by instance count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListRsrc {
    Domains,
    LdbQueues,
    LdbPorts,
    DirPorts,
    LdbPools,
    DirPools,
}

impl ListRsrc {
    const ALL: [Self; 6] = [
        Self::Domains,
        Self::LdbQueues,
        Self::LdbPorts,
        Self::DirPorts,
        Self::LdbPools,
        Self::DirPools,
    ];

    fn unavailable(self) -> Status {
        match self {
            Self::Domains => Status::DomainUnavailable,
            Self::LdbQueues => Status::LdbQueuesUnavailable,
            Self::LdbPorts => Status::LdbPortsUnavailable,
            Self::DirPorts => Status::DirPortsUnavailable,
            Self::LdbPools => Status::LdbCreditPoolsUnavailable,
            Self::DirPools => Status::DirCreditPoolsUnavailable,
        }
    }

    fn list(self, rsrcs: &FunctionResources) -> &VecDeque<usize> {
        match self {
            Self::Domains => &rsrcs.avail_domains,
            Self::LdbQueues => &rsrcs.avail_ldb_queues,
            Self::LdbPorts => &rsrcs.avail_ldb_ports,
            Self::DirPorts => &rsrcs.avail_dir_pq_pairs,
            Self::LdbPools => &rsrcs.avail_ldb_credit_pools,
            Self::DirPools => &rsrcs.avail_dir_credit_pools,
        }
    }

    fn list_mut(self, rsrcs: &mut FunctionResources) -> &mut VecDeque<usize> {
        match self {
            Self::Domains => &mut rsrcs.avail_domains,
            Self::LdbQueues => &mut rsrcs.avail_ldb_queues,
            Self::LdbPorts => &mut rsrcs.avail_ldb_ports,
            Self::DirPorts => &mut rsrcs.avail_dir_pq_pairs,
            Self::LdbPools => &mut rsrcs.avail_ldb_credit_pools,
            Self::DirPools => &mut rsrcs.avail_dir_credit_pools,
        }
    }

    fn id_mut(self, rsrcs: &mut Resources, idx: usize) -> &mut ResourceId {
        match self {
            Self::Domains => &mut rsrcs.domains[idx].id,
            Self::LdbQueues => &mut rsrcs.ldb_queues[idx].id,
            Self::LdbPorts => &mut rsrcs.ldb_ports[idx].id,
            Self::DirPorts => &mut rsrcs.dir_pq_pairs[idx].id,
            Self::LdbPools => &mut rsrcs.ldb_credit_pools[idx].id,
            Self::DirPools => &mut rsrcs.dir_credit_pools[idx].id,
        }
    }
}

/// Resources assigned as a contiguous range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeRsrc {
    LdbCredits,
    DirCredits,
    HistListEntries,
    AtomicInflights,
}

impl RangeRsrc {
    fn unavailable(self) -> Status {
        match self {
            Self::LdbCredits => Status::LdbCreditsUnavailable,
            Self::DirCredits => Status::DirCreditsUnavailable,
            Self::HistListEntries => Status::HistListEntriesUnavailable,
            Self::AtomicInflights => Status::AtomicInflightsUnavailable,
        }
    }

    fn bitmap_mut(self, rsrcs: &mut FunctionResources) -> &mut RangeBitmap {
        match self {
            Self::LdbCredits => &mut rsrcs.avail_qed_entries,
            Self::DirCredits => &mut rsrcs.avail_dqed_entries,
            Self::HistListEntries => &mut rsrcs.avail_hist_list_entries,
            Self::AtomicInflights => &mut rsrcs.avail_aqed_entries,
        }
    }
}

impl Manager {
    /// The VF must exist and be unlocked.
    fn check_transfer(&self, vf: u32) -> Result<()> {
        let rsrcs = self.rsrcs.func(Func::Vf(vf))?;
        if rsrcs.locked {
            return Err(Error::PermissionDenied(format!(
                "vf{vf} is in use; its resources cannot change"
            )));
        }
        Ok(())
    }

    fn transfer_list(&mut self, vf: u32, kind: ListRsrc, num: u32) -> Result<()> {
        tracing::debug!(vf, ?kind, num, "update vf resources");
        self.check_transfer(vf)?;
        let func = Func::Vf(vf);
        let num = num as usize;
        let avail = kind.list(&self.rsrcs.pf).len() + kind.list(self.rsrcs.func(func)?).len();
        if num > avail {
            return reject(kind.unavailable());
        }

        let returned: Vec<usize> = kind.list_mut(self.rsrcs.func_mut(func)?).drain(..).collect();
        for &idx in &returned {
            let id = kind.id_mut(&mut self.rsrcs, idx);
            id.vf_owned = false;
            id.vf_id = 0;
        }
        let pf_list = kind.list_mut(&mut self.rsrcs.pf);
        for &idx in returned.iter().rev() {
            pf_list.push_front(idx);
        }

        let moved: Vec<usize> = pf_list.drain(..num).collect();
        for &idx in &moved {
            let id = kind.id_mut(&mut self.rsrcs, idx);
            id.vf_owned = true;
            id.vf_id = vf;
        }
        kind.list_mut(self.rsrcs.func_mut(func)?).extend(moved);
        tracing::trace!(vf, ?kind, num, "vf assignment updated");
        Ok(())
    }

    fn transfer_range(&mut self, vf: u32, kind: RangeRsrc, num: u32) -> Result<()> {
        tracing::debug!(vf, ?kind, num, "update vf resources");
        self.check_transfer(vf)?;
        let num = num as usize;
        let Resources { pf, vfs, .. } = &mut self.rsrcs;
        let vf_rsrcs = vfs
            .get_mut(vf as usize)
            .ok_or_else(|| internal(format!("vf{vf} vanished")))?;
        let pf_map = kind.bitmap_mut(pf);
        let vf_map = kind.bitmap_mut(vf_rsrcs);

        if num > 0 {
            let mut merged = RangeBitmap::new(pf_map.len())?;
            merged.or(pf_map, vf_map)?;
            if merged.find_set_bit_range(num)?.is_none() {
                return reject(kind.unavailable());
            }
        }

        pf_map.or_assign(vf_map)?;
        vf_map.zero()?;
        if num > 0 {
            let base = pf_map
                .find_set_bit_range(num)?
                .ok_or_else(|| internal("contiguous run vanished during transfer"))?;
            pf_map.clear_range(base, num)?;
            vf_map.set_range(base, num)?;
        }
        tracing::trace!(vf, ?kind, num, "vf assignment updated");
        Ok(())
    }

    /// Assign scheduling domains to a VF.
    pub(crate) fn update_vf_sched_domains(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_list(vf, ListRsrc::Domains, num)
    }

    pub(crate) fn update_vf_ldb_queues(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_list(vf, ListRsrc::LdbQueues, num)
    }

    pub(crate) fn update_vf_ldb_ports(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_list(vf, ListRsrc::LdbPorts, num)
    }

    pub(crate) fn update_vf_dir_ports(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_list(vf, ListRsrc::DirPorts, num)
    }

    pub(crate) fn update_vf_ldb_credit_pools(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_list(vf, ListRsrc::LdbPools, num)
    }

    pub(crate) fn update_vf_dir_credit_pools(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_list(vf, ListRsrc::DirPools, num)
    }

    pub(crate) fn update_vf_ldb_credits(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_range(vf, RangeRsrc::LdbCredits, num)
    }

    pub(crate) fn update_vf_dir_credits(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_range(vf, RangeRsrc::DirCredits, num)
    }

    pub(crate) fn update_vf_hist_list_entries(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_range(vf, RangeRsrc::HistListEntries, num)
    }

    pub(crate) fn update_vf_atomic_inflights(&mut self, vf: u32, num: u32) -> Result<()> {
        self.transfer_range(vf, RangeRsrc::AtomicInflights, num)
    }

    /// Give every available resource of a VF back to the PF.
    pub(crate) fn reset_vf_resources(&mut self, vf: u32) -> Result<()> {
        self.check_transfer(vf)?;
        for kind in ListRsrc::ALL {
            self.transfer_list(vf, kind, 0)?;
        }
        for kind in [
            RangeRsrc::LdbCredits,
            RangeRsrc::DirCredits,
            RangeRsrc::HistListEntries,
            RangeRsrc::AtomicInflights,
        ] {
            self.transfer_range(vf, kind, 0)?;
        }
        Ok(())
    }

    /// Freeze a VF's assignment while its driver is registered, numbering
    /// its resources from zero as the VF will see them.
    pub(crate) fn lock_vf(&mut self, vf: u32) -> Result<()> {
        let func = Func::Vf(vf);
        for kind in ListRsrc::ALL {
            let list: Vec<usize> = kind.list(self.rsrcs.func(func)?).iter().copied().collect();
            for (virt, idx) in list.into_iter().enumerate() {
                kind.id_mut(&mut self.rsrcs, idx).virt_id = count(virt);
            }
        }
        self.rsrcs.func_mut(func)?.locked = true;
        tracing::debug!(vf, "vf locked");
        Ok(())
    }

    pub(crate) fn unlock_vf(&mut self, vf: u32) -> Result<()> {
        self.rsrcs.func_mut(Func::Vf(vf))?.locked = false;
        tracing::debug!(vf, "vf unlocked");
        Ok(())
    }

    pub(crate) fn vf_is_locked(&self, vf: u32) -> Result<bool> {
        Ok(self.rsrcs.func(Func::Vf(vf))?.locked)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixture::*;
    use super::*;
    use crate::args::CreateSchedDomainArgs;
    use crate::config::DeviceConfig;

    fn with_vfs(n: u32) -> Manager {
        manager_with(DeviceConfig {
            num_vfs: n,
            ..DeviceConfig::default()
        })
        .0
    }

    #[test]
    fn test_list_transfer_replaces_share() {
        let mut m = with_vfs(2);
        m.update_vf_ldb_queues(0, 10).unwrap();
        assert_eq!(m.rsrcs.vfs[0].avail_ldb_queues.len(), 10);
        assert_eq!(m.rsrcs.pf.avail_ldb_queues.len(), 118);
        let q = m.rsrcs.vfs[0].avail_ldb_queues[0];
        assert_eq!(m.rsrcs.ldb_queues[q].id.owner(), Func::Vf(0));

        m.update_vf_ldb_queues(0, 4).unwrap();
        assert_eq!(m.rsrcs.vfs[0].avail_ldb_queues.len(), 4);
        assert_eq!(m.rsrcs.pf.avail_ldb_queues.len(), 124);
        assert_eq!(m.rsrcs.vfs[0].avail_ldb_queues[0], q);
        let owned = m.rsrcs.ldb_queues.iter().filter(|q| q.id.vf_owned).count();
        assert_eq!(owned, 4);
    }

    #[test]
    fn test_oversized_list_transfer_changes_nothing() {
        let mut m = with_vfs(1);
        m.update_vf_dir_ports(0, 8).unwrap();
        let pf = m.rsrcs.pf.num_resources().unwrap();
        let vf = m.rsrcs.vfs[0].num_resources().unwrap();

        let err = m.update_vf_dir_ports(0, 129).unwrap_err();
        assert_eq!(err.status(), Some(Status::DirPortsUnavailable));
        assert_eq!(m.rsrcs.pf.num_resources().unwrap(), pf);
        assert_eq!(m.rsrcs.vfs[0].num_resources().unwrap(), vf);
    }

    #[test]
    fn test_credit_transfer_is_contiguous() {
        let mut m = with_vfs(1);
        m.update_vf_ldb_credits(0, 100).unwrap();
        let vf = &m.rsrcs.vfs[0].avail_qed_entries;
        assert_eq!(vf.count().unwrap(), 100);
        assert_eq!(vf.longest_set_range().unwrap(), 100);
        assert_eq!(m.rsrcs.pf.avail_qed_entries.count().unwrap(), 16384 - 100);
    }

    #[test]
    fn test_fragmented_credit_transfer_fails_cleanly() {
        let mut m = with_vfs(2);
        m.update_vf_ldb_credits(0, 8192).unwrap();
        m.update_vf_ldb_credits(1, 8192).unwrap();
        let before = m.rsrcs.vfs[0].avail_qed_entries.clone();

        let err = m.update_vf_ldb_credits(0, 8193).unwrap_err();
        assert_eq!(err.status(), Some(Status::LdbCreditsUnavailable));
        assert_eq!(m.rsrcs.vfs[0].avail_qed_entries, before);
        assert_eq!(m.rsrcs.pf.avail_qed_entries.count().unwrap(), 0);
    }

    #[test]
    fn test_locked_vf_refuses_transfer() {
        let mut m = with_vfs(1);
        m.update_vf_ldb_credits(0, 64).unwrap();
        m.lock_vf(0).unwrap();
        let before = m.rsrcs.vfs[0].avail_qed_entries.clone();

        let err = m.update_vf_ldb_credits(0, 128).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert_eq!(m.rsrcs.vfs[0].avail_qed_entries, before);

        m.unlock_vf(0).unwrap();
        assert!(!m.vf_is_locked(0).unwrap());
        m.update_vf_ldb_credits(0, 128).unwrap();
    }

    #[test]
    fn test_unknown_vf() {
        let mut m = with_vfs(1);
        assert!(matches!(
            m.update_vf_ldb_queues(1, 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(m.lock_vf(3).is_err());
    }

    #[test]
    fn test_lock_numbers_resources_for_vf() {
        let mut m = with_vfs(1);
        m.update_vf_sched_domains(0, 2).unwrap();
        m.update_vf_ldb_queues(0, 3).unwrap();
        m.lock_vf(0).unwrap();
        assert!(m.vf_is_locked(0).unwrap());

        let virt: Vec<u32> = m.rsrcs.vfs[0]
            .avail_ldb_queues
            .iter()
            .map(|&q| m.rsrcs.ldb_queues[q].id.virt_id)
            .collect();
        assert_eq!(virt, vec![0, 1, 2]);

        let id = m
            .create_sched_domain(Func::Vf(0), &CreateSchedDomainArgs::default())
            .unwrap();
        assert_eq!(id, 0);
        let d = m.rsrcs.vfs[0].used_domains[0];
        assert_eq!(m.rsrcs.domains[d].owner, Func::Vf(0));
    }

    #[test]
    fn test_reset_vf_resources_returns_everything() {
        let mut m = with_vfs(1);
        let full = m.rsrcs.pf.num_resources().unwrap();
        m.update_vf_sched_domains(0, 1).unwrap();
        m.update_vf_ldb_ports(0, 4).unwrap();
        m.update_vf_ldb_credit_pools(0, 2).unwrap();
        m.update_vf_dir_credit_pools(0, 2).unwrap();
        m.update_vf_dir_credits(0, 512).unwrap();
        m.update_vf_hist_list_entries(0, 256).unwrap();
        m.update_vf_atomic_inflights(0, 64).unwrap();

        m.reset_vf_resources(0).unwrap();
        assert_eq!(m.rsrcs.pf.num_resources().unwrap(), full);
        assert_eq!(m.rsrcs.vfs[0].num_resources().unwrap(), Default::default());
    }
}
