//! Read-side operations, port enablement and sequence-number groups.

use serde::Serialize;

use super::{reject, Manager};
use crate::args::NumResources;
use crate::bitmap::RangeBitmap;
use crate::error::{Error, Result, Status};
use crate::freelist::Freelist;
use crate::hw::regs;
use crate::rsrc::{count, mode_word, Func, FunctionResources, QidMapState};
use crate::SN_GROUPS;

/// One occupied mapping slot of a load-balanced port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QidMapping {
    /// Physical port id.
    pub port: u32,
    /// Slot index, 0..8.
    pub slot: u32,
    /// Queue occupying the slot.
    pub qid: u32,
    /// Queue waiting to replace the occupant, for a pending map.
    pub pending_qid: Option<u32>,
    /// Servicing priority.
    pub priority: u32,
    /// Slot state.
    pub state: QidMapState,
}

/// Resources available to one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct FunctionSnapshot {
    pub func: Func,
    pub locked: bool,
    pub avail_domains: Vec<u32>,
    pub used_domains: Vec<u32>,
    pub avail_ldb_queues: Vec<u32>,
    pub avail_ldb_ports: Vec<u32>,
    pub avail_dir_ports: Vec<u32>,
    pub avail_ldb_credit_pools: Vec<u32>,
    pub avail_dir_credit_pools: Vec<u32>,
    /// Available ranges as `(start, len)` runs.
    pub ldb_credits: Vec<(usize, usize)>,
    pub dir_credits: Vec<(usize, usize)>,
    pub hist_list_entries: Vec<(usize, usize)>,
    pub atomic_inflights: Vec<(usize, usize)>,
}

/// State of one configured domain. Ids are physical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct DomainSnapshot {
    pub id: u32,
    pub owner: Func,
    pub started: bool,
    pub ldb_queues: Vec<u32>,
    pub ldb_ports: Vec<u32>,
    pub dir_ports: Vec<u32>,
    pub ldb_credit_pools: Vec<u32>,
    pub dir_credit_pools: Vec<u32>,
    pub ldb_credits: Freelist,
    pub dir_credits: Freelist,
    pub atomic_inflights: Freelist,
    pub hist_list_entries: Freelist,
    pub num_pending_removals: u32,
    pub num_pending_additions: u32,
    pub mappings: Vec<QidMapping>,
}

/// One sequence-number group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct SnGroupSnapshot {
    pub sequence_numbers_per_queue: u32,
    pub used_slots: u32,
}

/// Point-in-time copy of the registry.
///
/// Two snapshots compare equal when no ownership, allocation or mapping
/// changed between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// The PF followed by every VF.
    pub functions: Vec<FunctionSnapshot>,
    /// Configured domains.
    pub domains: Vec<DomainSnapshot>,
    /// Sequence-number groups.
    pub sn_groups: Vec<SnGroupSnapshot>,
    /// Whether a domain reset has failed.
    pub reset_failed: bool,
}

fn ids<'a>(list: impl IntoIterator<Item = &'a usize>) -> Vec<u32> {
    list.into_iter().map(|&i| count(i)).collect()
}

fn runs(bitmap: &RangeBitmap) -> Vec<(usize, usize)> {
    bitmap.set_runs()
}

fn function_snapshot(func: Func, rsrcs: &FunctionResources) -> FunctionSnapshot {
    FunctionSnapshot {
        func,
        locked: rsrcs.locked,
        avail_domains: ids(&rsrcs.avail_domains),
        used_domains: ids(&rsrcs.used_domains),
        avail_ldb_queues: ids(&rsrcs.avail_ldb_queues),
        avail_ldb_ports: ids(&rsrcs.avail_ldb_ports),
        avail_dir_ports: ids(&rsrcs.avail_dir_pq_pairs),
        avail_ldb_credit_pools: ids(&rsrcs.avail_ldb_credit_pools),
        avail_dir_credit_pools: ids(&rsrcs.avail_dir_credit_pools),
        ldb_credits: runs(&rsrcs.avail_qed_entries),
        dir_credits: runs(&rsrcs.avail_dqed_entries),
        hist_list_entries: runs(&rsrcs.avail_hist_list_entries),
        atomic_inflights: runs(&rsrcs.avail_aqed_entries),
    }
}

fn check_group(group: u32) -> Result<usize> {
    let g = group as usize;
    if g >= SN_GROUPS {
        return Err(Error::InvalidArgument(format!(
            "sequence-number group {group} out of range"
        )));
    }
    Ok(g)
}

impl Manager {
    /// Available resources of `func`, with the longest contiguous runs of
    /// each range resource.
    pub(crate) fn get_num_resources(&self, func: Func) -> Result<NumResources> {
        self.rsrcs.func(func)?.num_resources()
    }

    // ========================================================================
    // Queue depth
    // ========================================================================

    /// Saturates: a removed device reads all-ones.
    pub(crate) fn ldb_queue_depth_of(&self, q: usize) -> u32 {
        let qid = count(q);
        self.regs
            .read(regs::qid_aqed_active_cnt(qid))
            .saturating_add(self.regs.read(regs::qid_atm_active(qid)))
            .saturating_add(self.regs.read(regs::qid_ldb_enqueue_cnt(qid)))
    }

    pub(crate) fn dir_queue_depth_of(&self, p: usize) -> u32 {
        self.regs.read(regs::qid_dir_enqueue_cnt(count(p)))
    }

    pub(crate) fn get_ldb_queue_depth(&self, func: Func, domain_id: u32, qid: u32) -> Result<u32> {
        tracing::debug!(%func, domain_id, qid, "get ldb queue depth");
        let d = self.configured_domain(func, domain_id)?;
        match self.rsrcs.domain_ldb_queue(func, d, qid) {
            Some(q) if self.rsrcs.ldb_queues[q].configured => Ok(self.ldb_queue_depth_of(q)),
            _ => reject(Status::InvalidQid),
        }
    }

    pub(crate) fn get_dir_queue_depth(&self, func: Func, domain_id: u32, qid: u32) -> Result<u32> {
        tracing::debug!(%func, domain_id, qid, "get dir queue depth");
        let d = self.configured_domain(func, domain_id)?;
        match self.rsrcs.domain_dir_pq_pair(func, d, qid) {
            Some(p) if self.rsrcs.dir_pq_pairs[p].queue_configured => {
                Ok(self.dir_queue_depth_of(p))
            }
            _ => reject(Status::InvalidQid),
        }
    }

    // ========================================================================
    // Ports
    // ========================================================================

    fn configured_ldb_port(&self, func: Func, d: usize, port_id: u32) -> Result<usize> {
        match self.rsrcs.domain_ldb_port(func, d, port_id) {
            Some(p) if self.rsrcs.ldb_ports[p].configured => Ok(p),
            _ => reject(Status::InvalidPortId),
        }
    }

    fn configured_dir_port(&self, func: Func, d: usize, port_id: u32) -> Result<usize> {
        match self.rsrcs.domain_dir_pq_pair(func, d, port_id) {
            Some(p) if self.rsrcs.dir_pq_pairs[p].port_configured => Ok(p),
            _ => reject(Status::InvalidPortId),
        }
    }

    pub(crate) fn ldb_port_owned_by_domain(
        &self,
        func: Func,
        domain_id: u32,
        port_id: u32,
    ) -> Result<bool> {
        let d = self.configured_domain(func, domain_id)?;
        Ok(self.configured_ldb_port(func, d, port_id).is_ok())
    }

    pub(crate) fn dir_port_owned_by_domain(
        &self,
        func: Func,
        domain_id: u32,
        port_id: u32,
    ) -> Result<bool> {
        let d = self.configured_domain(func, domain_id)?;
        Ok(self.configured_dir_port(func, d, port_id).is_ok())
    }

    /// Let the port's CQ be scheduled again.
    pub(crate) fn enable_ldb_port(&mut self, func: Func, domain_id: u32, port_id: u32) -> Result<()> {
        tracing::debug!(%func, domain_id, port_id, "enable ldb port");
        let d = self.configured_domain(func, domain_id)?;
        let p = self.configured_ldb_port(func, d, port_id)?;
        self.rsrcs.ldb_ports[p].enabled = true;
        self.ldb_cq_enable(p);
        self.intr.set_disabled(true, count(p), false);
        Ok(())
    }

    /// Stop scheduling to the port's CQ and release any interrupt waiter.
    pub(crate) fn disable_ldb_port(&mut self, func: Func, domain_id: u32, port_id: u32) -> Result<()> {
        tracing::debug!(%func, domain_id, port_id, "disable ldb port");
        let d = self.configured_domain(func, domain_id)?;
        let p = self.configured_ldb_port(func, d, port_id)?;
        self.rsrcs.ldb_ports[p].enabled = false;
        self.ldb_cq_disable(p);
        self.intr.set_disabled(true, count(p), true);
        Ok(())
    }

    pub(crate) fn enable_dir_port(&mut self, func: Func, domain_id: u32, port_id: u32) -> Result<()> {
        tracing::debug!(%func, domain_id, port_id, "enable dir port");
        let d = self.configured_domain(func, domain_id)?;
        let p = self.configured_dir_port(func, d, port_id)?;
        self.rsrcs.dir_pq_pairs[p].enabled = true;
        self.regs.write(regs::cq_dir_dsbl(count(p)), 0);
        self.regs.flush();
        self.intr.set_disabled(false, count(p), false);
        Ok(())
    }

    pub(crate) fn disable_dir_port(&mut self, func: Func, domain_id: u32, port_id: u32) -> Result<()> {
        tracing::debug!(%func, domain_id, port_id, "disable dir port");
        let d = self.configured_domain(func, domain_id)?;
        let p = self.configured_dir_port(func, d, port_id)?;
        self.rsrcs.dir_pq_pairs[p].enabled = false;
        self.regs.write(regs::cq_dir_dsbl(count(p)), 1);
        self.regs.flush();
        self.intr.set_disabled(false, count(p), true);
        Ok(())
    }

    /// Resolve a port for a CQ interrupt wait and arm its interrupt.
    /// Returns the physical port id to wait on.
    pub(crate) fn arm_cq_interrupt(
        &mut self,
        func: Func,
        domain_id: u32,
        port_id: u32,
        is_ldb: bool,
    ) -> Result<u32> {
        let d = self.configured_domain(func, domain_id)?;
        let (id, reg) = if is_ldb {
            let p = count(self.configured_ldb_port(func, d, port_id)?);
            (p, regs::ldb_cq_int_enb(p))
        } else {
            let p = count(self.configured_dir_port(func, d, port_id)?);
            (p, regs::dir_cq_int_enb(p))
        };
        self.regs.write(reg, 1);
        Ok(id)
    }

    /// Physical id of a configured port, for delivering its CQ interrupt.
    pub(crate) fn cq_port(&self, func: Func, domain_id: u32, port_id: u32, is_ldb: bool) -> Result<u32> {
        let d = self.configured_domain(func, domain_id)?;
        let p = if is_ldb {
            self.configured_ldb_port(func, d, port_id)?
        } else {
            self.configured_dir_port(func, d, port_id)?
        };
        Ok(count(p))
    }

    // ========================================================================
    // Sequence-number groups
    // ========================================================================

    pub(crate) fn get_group_sequence_numbers(&self, group: u32) -> Result<u32> {
        let g = check_group(group)?;
        Ok(self.rsrcs.sn_groups[g].sequence_numbers_per_queue())
    }

    /// Change a group's per-queue share. Refused while any ordered queue
    /// uses the group.
    pub(crate) fn set_group_sequence_numbers(&mut self, group: u32, value: u32) -> Result<()> {
        tracing::debug!(group, value, "set group sequence numbers");
        let g = check_group(group)?;
        self.rsrcs.sn_groups[g].set_sequence_numbers(value)?;
        let word = mode_word(&self.rsrcs.sn_groups);
        self.regs.write(regs::sn_mode(), word);
        tracing::trace!(group, mode = self.rsrcs.sn_groups[g].mode, "sequence-number mode set");
        Ok(())
    }

    pub(crate) fn get_group_sequence_number_occupancy(&self, group: u32) -> Result<u32> {
        let g = check_group(group)?;
        Ok(self.rsrcs.sn_groups[g].used_slots())
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    pub(crate) fn snapshot(&self) -> Snapshot {
        let mut functions = vec![function_snapshot(Func::Pf, &self.rsrcs.pf)];
        functions.extend(
            self.rsrcs
                .vfs
                .iter()
                .enumerate()
                .map(|(vf, rsrcs)| function_snapshot(Func::Vf(count(vf)), rsrcs)),
        );

        let domains = self
            .rsrcs
            .domains
            .iter()
            .enumerate()
            .filter(|(_, domain)| domain.configured)
            .map(|(d, domain)| {
                let ldb_ports: Vec<usize> = domain.ldb_ports().collect();
                let mappings = ldb_ports
                    .iter()
                    .flat_map(|&p| {
                        self.rsrcs.ldb_ports[p]
                            .qid_map
                            .iter()
                            .enumerate()
                            .filter(|(_, m)| m.state != QidMapState::Unmapped)
                            .map(move |(slot, m)| QidMapping {
                                port: count(p),
                                slot: count(slot),
                                qid: m.qid,
                                pending_qid: (m.state == QidMapState::UnmapInProgressPendingMap)
                                    .then_some(m.pending_qid),
                                priority: m.priority,
                                state: m.state,
                            })
                    })
                    .collect();
                DomainSnapshot {
                    id: count(d),
                    owner: domain.owner,
                    started: domain.started,
                    ldb_queues: domain.ldb_queues().map(count).collect(),
                    ldb_ports: ldb_ports.into_iter().map(count).collect(),
                    dir_ports: domain.dir_pq_pairs().map(count).collect(),
                    ldb_credit_pools: domain.ldb_credit_pools().map(count).collect(),
                    dir_credit_pools: domain.dir_credit_pools().map(count).collect(),
                    ldb_credits: domain.qed_freelist,
                    dir_credits: domain.dqed_freelist,
                    atomic_inflights: domain.aqed_freelist,
                    hist_list_entries: domain.hist_list_entries,
                    num_pending_removals: domain.num_pending_removals,
                    num_pending_additions: domain.num_pending_additions,
                    mappings,
                }
            })
            .collect();

        let sn_groups = self
            .rsrcs
            .sn_groups
            .iter()
            .map(|g| SnGroupSnapshot {
                sequence_numbers_per_queue: g.sequence_numbers_per_queue(),
                used_slots: g.used_slots(),
            })
            .collect();

        Snapshot {
            functions,
            domains,
            sn_groups,
            reset_failed: self.reset_failed,
        }
    }
}
