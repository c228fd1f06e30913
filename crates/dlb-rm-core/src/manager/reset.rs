//! Scheduling domain reset.
//!
//! Reset quiesces the domain's hardware before giving anything back: queue
//! writes are refused, CQs are drained until the device reports no
//! outstanding work, in-progress map and unmap transitions are finished, and
//! every register the domain programmed returns to its default. Only then
//! do the resources go back to the function that owns the domain.
//!
//! A failure while draining or verifying latches `reset_failed`, which
//! refuses further domain creation until the device is reinitialized.

use super::{internal, Manager};
use crate::error::{Error, Result};
use crate::hw::regs;
use crate::rsrc::{count, CreditPool, DirPqPair, Func, LdbPort, LdbQueue, QidMapState, Resources};
use crate::QIDS_PER_LDB_CQ;

impl Manager {
    /// Reset a configured domain and return its resources to its owner.
    pub(crate) fn reset_domain(&mut self, func: Func, domain_id: u32) -> Result<()> {
        tracing::debug!(%func, domain_id, "reset domain");
        let d = self.configured_domain(func, domain_id)?;

        if let Err(e) = self.reset_domain_hw(d) {
            self.reset_failed = true;
            tracing::error!(domain = d, error = %e, "domain reset failed");
            return Err(e);
        }
        self.reset_domain_software(d)?;

        tracing::debug!(%func, domain_id, phys_id = d, "domain reset");
        Ok(())
    }

    /// Reset every domain a VF has in use.
    pub(crate) fn reset_vf(&mut self, vf: u32) -> Result<()> {
        tracing::debug!(vf, "reset vf domains");
        let func = Func::Vf(vf);
        let used: Vec<usize> = self.rsrcs.func(func)?.used_domains.iter().copied().collect();
        for d in used {
            if !self.rsrcs.domains[d].configured {
                continue;
            }
            if let Err(e) = self.reset_domain_hw(d) {
                self.reset_failed = true;
                tracing::error!(vf, domain = d, error = %e, "vf domain reset failed");
                return Err(e);
            }
            self.reset_domain_software(d)?;
        }
        Ok(())
    }

    // ========================================================================
    // Hardware phase
    // ========================================================================

    fn reset_domain_hw(&mut self, d: usize) -> Result<()> {
        let domain = &self.rsrcs.domains[d];
        let started = domain.started;
        let ldb_ports: Vec<usize> = domain.used_ldb_ports.iter().copied().collect();
        let dir_ports: Vec<usize> = domain.used_dir_pq_pairs.iter().copied().collect();

        self.disable_queue_write_perms(d);

        // Interrupts off; release anyone blocked on these CQs.
        for &p in &ldb_ports {
            self.regs.write(regs::ldb_cq_int_enb(count(p)), 0);
            self.intr.set_disabled(true, count(p), true);
        }
        for &p in &dir_ports {
            self.regs.write(regs::dir_cq_int_enb(count(p)), 0);
            self.intr.set_disabled(false, count(p), true);
        }

        for &p in &ldb_ports {
            self.regs.write(regs::ldb_pp_crd_upd_en(count(p)), 0);
        }
        for &p in &dir_ports {
            self.regs.write(regs::dir_pp_crd_upd_en(count(p)), 0);
        }

        self.disable_ldb_cqs(d);
        self.drain_ldb_cqs(d);
        self.wait_for_ldb_cqs_to_empty(d)?;

        let unmaps = self.finish_unmap_procedures(d)?;
        let maps = self.finish_map_procedures(d)?;
        if unmaps + maps > 0 {
            tracing::debug!(domain = d, unmaps, maps, "transitions left unfinished by reset");
        }

        // Every CQ back on, including user-disabled ones, so mapped queues
        // can drain.
        for &p in &ldb_ports {
            self.rsrcs.ldb_ports[p].enabled = true;
            self.regs.write(regs::cq_ldb_dsbl(count(p)), 0);
        }
        self.regs.flush();

        if started {
            self.drain_mapped_queues(d)?;
            self.drain_unmapped_queues(d)?;
            self.wait_for_pools_to_refill(d)?;
        }

        self.disable_ldb_cqs(d);
        if started {
            self.drain_dir_queues(d)?;
        }
        for &p in &dir_ports {
            self.regs.write(regs::cq_dir_dsbl(count(p)), 1);
        }

        for &p in &dir_ports {
            self.regs.write(regs::dir_pp_v(count(p)), 0);
        }
        for &p in &ldb_ports {
            self.regs.write(regs::ldb_pp_v(count(p)), 0);
        }
        self.regs.flush();

        self.verify_reset_success(d)?;
        self.reset_domain_registers(d);
        Ok(())
    }

    fn disable_queue_write_perms(&mut self, d: usize) {
        let domain = &self.rsrcs.domains[d];
        let dom = count(d);
        for q in domain.used_ldb_queues.iter().copied() {
            self.regs.write(regs::ldb_vasqid_v(dom, count(q)), 0);
        }
        for p in domain.used_dir_pq_pairs.iter().copied() {
            if self.rsrcs.dir_pq_pairs[p].queue_configured {
                self.regs.write(regs::dir_vasqid_v(dom, count(p)), 0);
            }
        }
    }

    fn disable_ldb_cqs(&mut self, d: usize) {
        let ports: Vec<usize> = self.rsrcs.domains[d].used_ldb_ports.iter().copied().collect();
        for p in ports {
            self.ldb_cq_disable(p);
        }
    }

    /// Issue completions and token returns for everything each CQ owes.
    fn drain_ldb_cqs(&mut self, d: usize) {
        for p in self.rsrcs.domains[d].used_ldb_ports.iter().copied() {
            let id = count(p);
            let inflights = self.regs.read(regs::cq_ldb_infl_cnt(id));
            if inflights > 0 {
                self.regs.write(regs::ldb_pp_complete(id), inflights);
            }
            let tokens = self.regs.read(regs::cq_ldb_tkn_cnt(id));
            if tokens > 0 {
                self.regs.write(regs::ldb_pp_token_return(id), tokens);
            }
        }
        self.regs.flush();
    }

    fn ldb_cq_empty(&self, p: usize) -> bool {
        let id = count(p);
        self.regs.read(regs::cq_ldb_infl_cnt(id)) == 0 && self.regs.read(regs::cq_ldb_tkn_cnt(id)) == 0
    }

    /// Poll `done` up to `attempts` times.
    fn poll(
        &mut self,
        attempts: u32,
        what: impl FnOnce() -> String,
        mut done: impl FnMut(&mut Self) -> bool,
    ) -> Result<()> {
        for _ in 0..attempts {
            if done(self) {
                return Ok(());
            }
        }
        Err(Error::Timeout {
            what: what(),
            attempts,
        })
    }

    fn wait_for_ldb_cqs_to_empty(&mut self, d: usize) -> Result<()> {
        let retries = self.config.cq_drain_retries;
        let ports: Vec<usize> = self.rsrcs.domains[d].used_ldb_ports.iter().copied().collect();
        for p in ports {
            self.poll(retries, || format!("ldb port {p} completions"), |m| m.ldb_cq_empty(p))?;
        }
        Ok(())
    }

    fn mapped_queues_empty(&self, d: usize) -> bool {
        self.rsrcs.domains[d]
            .used_ldb_queues
            .iter()
            .filter(|&&q| self.rsrcs.ldb_queues[q].num_mappings > 0)
            .all(|&q| self.ldb_queue_depth_of(q) == 0)
    }

    fn drain_mapped_queues(&mut self, d: usize) -> Result<()> {
        let retries = self.config.queue_drain_retries;
        self.poll(
            retries,
            || format!("domain {d} mapped ldb queues"),
            |m| {
                if m.mapped_queues_empty(d) {
                    return true;
                }
                m.drain_ldb_cqs(d);
                false
            },
        )
    }

    /// Give each non-empty unmapped queue a consumer long enough to drain it.
    fn drain_unmapped_queues(&mut self, d: usize) -> Result<()> {
        let queues: Vec<usize> = self.rsrcs.domains[d].used_ldb_queues.iter().copied().collect();
        for q in queues {
            if self.rsrcs.ldb_queues[q].num_mappings != 0 || self.ldb_queue_depth_of(q) == 0 {
                continue;
            }
            let p = self.rsrcs.domains[d]
                .used_ldb_ports
                .front()
                .copied()
                .ok_or_else(|| internal(format!("domain {d} has ldb queues but no ldb ports")))?;

            if self.rsrcs.ldb_ports[p].num_mappings == count(QIDS_PER_LDB_CQ) {
                self.release_slot(p, 0)?;
            }
            self.map_qid_dynamic(d, p, q, 0)?;
            self.drain_mapped_queues(d)?;
        }
        Ok(())
    }

    fn wait_for_pools_to_refill(&mut self, d: usize) -> Result<()> {
        let retries = self.config.queue_drain_retries;
        let domain = &self.rsrcs.domains[d];
        let ldb: Vec<(usize, u32)> = domain
            .used_ldb_credit_pools
            .iter()
            .map(|&p| (p, self.rsrcs.ldb_credit_pools[p].total_credits))
            .collect();
        let dir: Vec<(usize, u32)> = domain
            .used_dir_credit_pools
            .iter()
            .map(|&p| (p, self.rsrcs.dir_credit_pools[p].total_credits))
            .collect();

        for (p, total) in ldb {
            let reg = regs::ldb_pool_crd_cnt(count(p));
            self.poll(retries, || format!("ldb pool {p} refill"), |m| {
                m.regs.read(reg) == total
            })?;
        }
        for (p, total) in dir {
            let reg = regs::dir_pool_crd_cnt(count(p));
            self.poll(retries, || format!("dir pool {p} refill"), |m| {
                m.regs.read(reg) == total
            })?;
        }
        Ok(())
    }

    fn drain_dir_queues(&mut self, d: usize) -> Result<()> {
        let retries = self.config.queue_drain_retries;
        let pairs: Vec<usize> = self.rsrcs.domains[d].used_dir_pq_pairs.iter().copied().collect();
        for p in pairs {
            self.poll(retries, || format!("dir queue {p}"), |m| {
                if m.dir_queue_depth_of(p) == 0 {
                    return true;
                }
                let id = count(p);
                let tokens = m.regs.read(regs::cq_dir_tkn_cnt(id));
                if tokens > 0 {
                    m.regs.write(regs::dir_pp_token_return(id), tokens);
                }
                false
            })?;
        }
        Ok(())
    }

    fn verify_reset_success(&self, d: usize) -> Result<()> {
        let domain = &self.rsrcs.domains[d];
        if let Some(q) = domain
            .used_ldb_queues
            .iter()
            .find(|&&q| self.ldb_queue_depth_of(q) != 0)
        {
            return Err(internal(format!("failed to empty ldb queue {q}")));
        }
        if let Some(p) = domain.used_ldb_ports.iter().find(|&&p| !self.ldb_cq_empty(p)) {
            return Err(internal(format!("failed to empty ldb port {p}")));
        }
        for &p in &domain.used_dir_pq_pairs {
            if self.dir_queue_depth_of(p) != 0 {
                return Err(internal(format!("failed to empty dir queue {p}")));
            }
            if self.regs.read(regs::cq_dir_tkn_cnt(count(p))) != 0 {
                return Err(internal(format!("failed to empty dir port {p}")));
            }
        }
        Ok(())
    }

    /// Return every register the domain programmed to its default.
    fn reset_domain_registers(&mut self, d: usize) {
        let domain = &self.rsrcs.domains[d];
        let queues: Vec<usize> = domain.used_ldb_queues.iter().copied().collect();
        let ports: Vec<usize> = domain.used_ldb_ports.iter().copied().collect();
        let pairs: Vec<usize> = domain.used_dir_pq_pairs.iter().copied().collect();
        let ldb_pools: Vec<usize> = domain.used_ldb_credit_pools.iter().copied().collect();
        let dir_pools: Vec<usize> = domain.used_dir_credit_pools.iter().copied().collect();

        for q in queues {
            let qid = count(q);
            self.regs.write(regs::ldb_qid_v(qid), 0);
            self.regs.write(regs::qid_ldb_infl_lim(qid), 0);
            self.regs.write(regs::ldb_qid_sn_cfg(qid), 0);
            self.regs.write(regs::ldb_qid_aqed_fl(qid), 0);
        }

        for p in ports {
            let id = count(p);
            let slots = self.rsrcs.ldb_ports[p].qid_map;
            for (slot, map) in slots.iter().enumerate() {
                if map.state != QidMapState::Unmapped {
                    self.regs
                        .clear_bits(regs::qid2cqidix(map.qid, id), regs::qid2cqidix_bit(id, slot));
                }
            }
            for reg in [
                regs::cq2priov(id),
                regs::cq2qid(id, 0),
                regs::cq2qid(id, 1),
                regs::ldb_if_status(id),
                regs::ldb_has_work(id),
                regs::ldb_pp_ldb_pool(id),
                regs::ldb_pp_dir_pool(id),
                regs::ldb_pp_ldb_crd_wm(id),
                regs::ldb_pp_dir_crd_wm(id),
                regs::ldb_pp_crd_quantum(id),
                regs::ldb_cq_hist_list(id),
                regs::ldb_cq_depth(id),
                regs::ldb_cq_depth_thrsh(id),
            ] {
                self.regs.write(reg, 0);
            }
        }

        for p in pairs {
            let id = count(p);
            for reg in [
                regs::dir_qid_v(id),
                regs::dir_pp_ldb_pool(id),
                regs::dir_pp_dir_pool(id),
                regs::dir_pp_ldb_crd_wm(id),
                regs::dir_pp_dir_crd_wm(id),
                regs::dir_pp_crd_quantum(id),
                regs::dir_cq_depth(id),
                regs::dir_cq_depth_thrsh(id),
            ] {
                self.regs.write(reg, 0);
            }
        }

        for p in ldb_pools {
            let id = count(p);
            self.regs.write(regs::ldb_pool_enabled(id), 0);
            self.regs.write(regs::ldb_pool_crd_cnt(id), 0);
            self.regs.write(regs::ldb_pool_fl(id), 0);
        }
        for p in dir_pools {
            let id = count(p);
            self.regs.write(regs::dir_pool_enabled(id), 0);
            self.regs.write(regs::dir_pool_crd_cnt(id), 0);
            self.regs.write(regs::dir_pool_fl(id), 0);
        }
        self.regs.flush();
    }

    // ========================================================================
    // Software phase
    // ========================================================================

    /// Return the domain's resources to its owner and unconfigure it.
    fn reset_domain_software(&mut self, d: usize) -> Result<()> {
        let owner = self.rsrcs.domains[d].owner;
        let Resources {
            pf,
            vfs,
            domains,
            ldb_queues,
            ldb_ports,
            dir_pq_pairs,
            ldb_credit_pools,
            dir_credit_pools,
            sn_groups,
        } = &mut self.rsrcs;
        let rsrcs = match owner {
            Func::Pf => pf,
            Func::Vf(vf) => vfs
                .get_mut(vf as usize)
                .ok_or_else(|| internal(format!("domain {d} owned by missing VF {vf}")))?,
        };
        let domain = &mut domains[d];

        for q in domain.used_ldb_queues.drain(..).chain(domain.avail_ldb_queues.drain(..)) {
            let queue = &mut ldb_queues[q];
            if let Some((group, slot)) = queue.sn {
                sn_groups[group].free_slot(slot);
            }
            *queue = LdbQueue {
                id: queue.id,
                ..LdbQueue::default()
            };
            rsrcs.avail_ldb_queues.push_back(q);
        }
        for p in domain.used_ldb_ports.drain(..).chain(domain.avail_ldb_ports.drain(..)) {
            let port = &mut ldb_ports[p];
            *port = LdbPort {
                id: port.id,
                ..LdbPort::default()
            };
            rsrcs.avail_ldb_ports.push_back(p);
        }
        for p in domain
            .used_dir_pq_pairs
            .drain(..)
            .chain(domain.avail_dir_pq_pairs.drain(..))
        {
            let pair = &mut dir_pq_pairs[p];
            *pair = DirPqPair {
                id: pair.id,
                ..DirPqPair::default()
            };
            rsrcs.avail_dir_pq_pairs.push_back(p);
        }
        for p in domain
            .used_ldb_credit_pools
            .drain(..)
            .chain(domain.avail_ldb_credit_pools.drain(..))
        {
            let pool = &mut ldb_credit_pools[p];
            *pool = CreditPool {
                id: pool.id,
                ..CreditPool::default()
            };
            rsrcs.avail_ldb_credit_pools.push_back(p);
        }
        for p in domain
            .used_dir_credit_pools
            .drain(..)
            .chain(domain.avail_dir_credit_pools.drain(..))
        {
            let pool = &mut dir_credit_pools[p];
            *pool = CreditPool {
                id: pool.id,
                ..CreditPool::default()
            };
            rsrcs.avail_dir_credit_pools.push_back(p);
        }

        for (freelist, bitmap) in [
            (&mut domain.qed_freelist, &mut rsrcs.avail_qed_entries),
            (&mut domain.dqed_freelist, &mut rsrcs.avail_dqed_entries),
            (&mut domain.aqed_freelist, &mut rsrcs.avail_aqed_entries),
            (&mut domain.hist_list_entries, &mut rsrcs.avail_hist_list_entries),
        ] {
            if freelist.total() > 0 {
                bitmap.set_range(freelist.base as usize, freelist.total() as usize)?;
            }
            freelist.reset();
        }

        domain.configured = false;
        domain.started = false;
        domain.num_pending_additions = 0;
        domain.num_pending_removals = 0;

        let pos = rsrcs
            .used_domains
            .iter()
            .position(|&u| u == d)
            .ok_or_else(|| internal(format!("domain {d} missing from its owner's used list")))?;
        rsrcs.used_domains.remove(pos);
        rsrcs.avail_domains.push_back(d);

        tracing::trace!(domain = d, owner = %owner, "domain returned to owner");
        Ok(())
    }
}
