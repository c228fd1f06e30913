//! Credit pool, queue and port configuration within a domain.

use super::{internal, reject, Manager};
use crate::args::{
    CreateDirPoolArgs, CreateDirPortArgs, CreateDirQueueArgs, CreateLdbPoolArgs,
    CreateLdbPortArgs, CreateLdbQueueArgs,
};
use crate::error::{Result, Status};
use crate::hw::regs;
use crate::rsrc::{count, Func, QidMap};
use crate::{MAX_CQ_DEPTH, MAX_PORT_CREDIT_QUANTUM, MAX_QID_INFLIGHTS, MIN_CQ_DEPTH, QIDS_PER_LDB_CQ};

/// Which credit pool family a port argument refers to.
#[derive(Debug, Clone, Copy)]
enum PoolKind {
    Ldb,
    Dir,
}

impl PoolKind {
    fn invalid_id(self) -> Status {
        match self {
            Self::Ldb => Status::InvalidLdbCreditPoolId,
            Self::Dir => Status::InvalidDirCreditPoolId,
        }
    }

    fn unavailable(self) -> Status {
        match self {
            Self::Ldb => Status::LdbCreditsUnavailable,
            Self::Dir => Status::DirCreditsUnavailable,
        }
    }

    fn invalid_low_watermark(self) -> Status {
        match self {
            Self::Ldb => Status::InvalidLdbCreditLowWatermark,
            Self::Dir => Status::InvalidDirCreditLowWatermark,
        }
    }

    fn invalid_quantum(self) -> Status {
        match self {
            Self::Ldb => Status::InvalidLdbCreditQuantum,
            Self::Dir => Status::InvalidDirCreditQuantum,
        }
    }
}

/// Credit settings of one pool family on a port.
#[derive(Debug, Clone, Copy)]
struct PortCredits {
    pool_id: u32,
    high_watermark: u16,
    low_watermark: u16,
    quantum: u16,
}

fn valid_cq_depth(depth: u16) -> bool {
    (MIN_CQ_DEPTH..=MAX_CQ_DEPTH).contains(&u32::from(depth)) && depth.is_power_of_two()
}

impl Manager {
    // ========================================================================
    // Credit pools
    // ========================================================================

    /// Create a load-balanced credit pool from the domain's credits.
    pub(crate) fn create_ldb_pool(
        &mut self,
        func: Func,
        domain_id: u32,
        args: &CreateLdbPoolArgs,
    ) -> Result<u32> {
        tracing::debug!(%func, domain_id, ?args, "create ldb pool");
        let d = self.unstarted_domain(func, domain_id)?;
        let domain = &self.rsrcs.domains[d];
        if domain.avail_ldb_credit_pools.is_empty() {
            return reject(Status::LdbCreditPoolsUnavailable);
        }
        if domain.qed_freelist.available() < args.num_ldb_credits {
            return reject(Status::LdbCreditsUnavailable);
        }

        let domain = &mut self.rsrcs.domains[d];
        let p = domain
            .avail_ldb_credit_pools
            .pop_front()
            .ok_or_else(|| internal("no ldb pool after validation"))?;
        let base = domain
            .qed_freelist
            .alloc(args.num_ldb_credits)
            .ok_or_else(|| internal("ldb credits short after validation"))?;
        domain.used_ldb_credit_pools.push_back(p);

        let pool = &mut self.rsrcs.ldb_credit_pools[p];
        pool.base = base;
        pool.total_credits = args.num_ldb_credits;
        pool.avail_credits = args.num_ldb_credits;
        pool.configured = true;
        self.regs.write(
            regs::ldb_pool_fl(count(p)),
            regs::pack16(base, base + args.num_ldb_credits),
        );

        tracing::trace!(pool = p, base, "ldb pool configured");
        Ok(self.rsrcs.ldb_credit_pools[p].id.for_func(func))
    }

    /// Create a directed credit pool from the domain's credits.
    pub(crate) fn create_dir_pool(
        &mut self,
        func: Func,
        domain_id: u32,
        args: &CreateDirPoolArgs,
    ) -> Result<u32> {
        tracing::debug!(%func, domain_id, ?args, "create dir pool");
        let d = self.unstarted_domain(func, domain_id)?;
        let domain = &self.rsrcs.domains[d];
        if domain.avail_dir_credit_pools.is_empty() {
            return reject(Status::DirCreditPoolsUnavailable);
        }
        if domain.dqed_freelist.available() < args.num_dir_credits {
            return reject(Status::DirCreditsUnavailable);
        }

        let domain = &mut self.rsrcs.domains[d];
        let p = domain
            .avail_dir_credit_pools
            .pop_front()
            .ok_or_else(|| internal("no dir pool after validation"))?;
        let base = domain
            .dqed_freelist
            .alloc(args.num_dir_credits)
            .ok_or_else(|| internal("dir credits short after validation"))?;
        domain.used_dir_credit_pools.push_back(p);

        let pool = &mut self.rsrcs.dir_credit_pools[p];
        pool.base = base;
        pool.total_credits = args.num_dir_credits;
        pool.avail_credits = args.num_dir_credits;
        pool.configured = true;
        self.regs.write(
            regs::dir_pool_fl(count(p)),
            regs::pack16(base, base + args.num_dir_credits),
        );

        tracing::trace!(pool = p, base, "dir pool configured");
        Ok(self.rsrcs.dir_credit_pools[p].id.for_func(func))
    }

    // ========================================================================
    // Queues
    // ========================================================================

    /// Create a load-balanced queue, ordered if it asks for sequence numbers.
    pub(crate) fn create_ldb_queue(
        &mut self,
        func: Func,
        domain_id: u32,
        args: &CreateLdbQueueArgs,
    ) -> Result<u32> {
        tracing::debug!(%func, domain_id, ?args, "create ldb queue");
        let d = self.unstarted_domain(func, domain_id)?;
        let domain = &self.rsrcs.domains[d];
        if domain.avail_ldb_queues.is_empty() {
            return reject(Status::LdbQueuesUnavailable);
        }
        let group = if args.num_sequence_numbers == 0 {
            None
        } else {
            match self.rsrcs.sn_groups.iter().position(|g| {
                g.sequence_numbers_per_queue() == args.num_sequence_numbers && !g.is_full()
            }) {
                Some(g) => Some(g),
                None => return reject(Status::SequenceNumbersUnavailable),
            }
        };
        if args.num_qid_inflights > MAX_QID_INFLIGHTS {
            return reject(Status::InvalidQidInflightAllocation);
        }
        if args.num_sequence_numbers != 0 && args.num_qid_inflights > args.num_sequence_numbers {
            return reject(Status::InvalidQidInflightAllocation);
        }
        if domain.aqed_freelist.available() < args.num_atomic_inflights {
            return reject(Status::AtomicInflightsUnavailable);
        }

        let domain = &mut self.rsrcs.domains[d];
        let q = domain
            .avail_ldb_queues
            .pop_front()
            .ok_or_else(|| internal("no ldb queue after validation"))?;
        let aqed_base = domain
            .aqed_freelist
            .alloc(args.num_atomic_inflights)
            .ok_or_else(|| internal("atomic inflights short after validation"))?;
        domain.used_ldb_queues.push_back(q);

        let sn = match group {
            Some(g) => {
                let slot = self.rsrcs.sn_groups[g]
                    .alloc_slot()
                    .ok_or_else(|| internal("sequence-number group filled after validation"))?;
                Some((g, slot))
            }
            None => None,
        };

        let queue = &mut self.rsrcs.ldb_queues[q];
        queue.configured = true;
        queue.num_qid_inflights = args.num_qid_inflights;
        queue.aqed_base = aqed_base;
        queue.aqed_limit = aqed_base + args.num_atomic_inflights;
        queue.sn = sn;
        queue.num_mappings = 0;
        queue.num_pending_additions = 0;

        let qid = count(q);
        self.regs.write(
            regs::ldb_qid_aqed_fl(qid),
            regs::pack16(aqed_base, aqed_base + args.num_atomic_inflights),
        );
        self.regs
            .write(regs::qid_ldb_infl_lim(qid), args.num_qid_inflights);
        let sn_word = sn.map_or(0, |(g, slot)| regs::sn_cfg(count(g), slot));
        self.regs.write(regs::ldb_qid_sn_cfg(qid), sn_word);
        self.regs.write(regs::ldb_qid_v(qid), 1);

        tracing::trace!(queue = q, ?sn, "ldb queue configured");
        Ok(self.rsrcs.ldb_queues[q].id.for_func(func))
    }

    /// Create a directed queue, pairing it with an existing port or a new
    /// pair when `port_id` is -1.
    pub(crate) fn create_dir_queue(
        &mut self,
        func: Func,
        domain_id: u32,
        args: &CreateDirQueueArgs,
    ) -> Result<u32> {
        tracing::debug!(%func, domain_id, ?args, "create dir queue");
        let d = self.unstarted_domain(func, domain_id)?;

        let existing = match u32::try_from(args.port_id) {
            Ok(port_id) => match self.rsrcs.domain_dir_pq_pair(func, d, port_id) {
                Some(p)
                    if self.rsrcs.dir_pq_pairs[p].port_configured
                        && !self.rsrcs.dir_pq_pairs[p].queue_configured =>
                {
                    Some(p)
                }
                _ => return reject(Status::InvalidPortId),
            },
            Err(_) if args.port_id == -1 => {
                if self.rsrcs.domains[d].avail_dir_pq_pairs.is_empty() {
                    return reject(Status::DirQueuesUnavailable);
                }
                None
            }
            Err(_) => return reject(Status::InvalidPortId),
        };

        let p = match existing {
            Some(p) => p,
            None => {
                let domain = &mut self.rsrcs.domains[d];
                let p = domain
                    .avail_dir_pq_pairs
                    .pop_front()
                    .ok_or_else(|| internal("no dir pair after validation"))?;
                domain.used_dir_pq_pairs.push_back(p);
                p
            }
        };

        self.rsrcs.dir_pq_pairs[p].queue_configured = true;
        self.regs.write(regs::dir_qid_v(count(p)), 1);

        tracing::trace!(pair = p, "dir queue configured");
        Ok(self.rsrcs.dir_pq_pairs[p].id.for_func(func))
    }

    // ========================================================================
    // Ports
    // ========================================================================

    /// Check one family of port credit arguments. Returns the pool index.
    fn verify_port_credits(
        &self,
        func: Func,
        d: usize,
        kind: PoolKind,
        credits: PortCredits,
    ) -> Result<usize> {
        let lookup = match kind {
            PoolKind::Ldb => self.rsrcs.domain_ldb_pool(func, d, credits.pool_id),
            PoolKind::Dir => self.rsrcs.domain_dir_pool(func, d, credits.pool_id),
        };
        let pools = match kind {
            PoolKind::Ldb => &self.rsrcs.ldb_credit_pools,
            PoolKind::Dir => &self.rsrcs.dir_credit_pools,
        };
        let p = match lookup {
            Some(p) if pools[p].configured && pools[p].domain == Some(d) => p,
            _ => return reject(kind.invalid_id()),
        };
        if u32::from(credits.high_watermark) > pools[p].avail_credits {
            return reject(kind.unavailable());
        }
        if credits.low_watermark >= credits.high_watermark {
            return reject(kind.invalid_low_watermark());
        }
        if credits.quantum >= credits.high_watermark
            || u32::from(credits.quantum) > MAX_PORT_CREDIT_QUANTUM
        {
            return reject(kind.invalid_quantum());
        }
        Ok(p)
    }

    /// Pools a new port in domain `d` draws from. A domain without
    /// load-balanced queues gives its ports no load-balanced credits, and
    /// likewise for directed pairs.
    fn verify_port_pools(
        &self,
        func: Func,
        d: usize,
        ldb: PortCredits,
        dir: PortCredits,
    ) -> Result<(Option<usize>, Option<usize>)> {
        let domain = &self.rsrcs.domains[d];
        let ldb_pool = if domain.has_ldb_queues() {
            Some(self.verify_port_credits(func, d, PoolKind::Ldb, ldb)?)
        } else {
            None
        };
        let dir_pool = if domain.has_dir_pq_pairs() {
            Some(self.verify_port_credits(func, d, PoolKind::Dir, dir)?)
        } else {
            None
        };
        Ok((ldb_pool, dir_pool))
    }

    /// Take each port's high watermark out of its pools.
    fn reserve_port_credits(
        &mut self,
        ldb_pool: Option<usize>,
        dir_pool: Option<usize>,
        ldb: PortCredits,
        dir: PortCredits,
    ) {
        if let Some(p) = ldb_pool {
            self.rsrcs.ldb_credit_pools[p].avail_credits -= u32::from(ldb.high_watermark);
        }
        if let Some(p) = dir_pool {
            self.rsrcs.dir_credit_pools[p].avail_credits -= u32::from(dir.high_watermark);
        }
    }

    /// Create a load-balanced port and its CQ.
    pub(crate) fn create_ldb_port(
        &mut self,
        func: Func,
        domain_id: u32,
        args: &CreateLdbPortArgs,
    ) -> Result<u32> {
        tracing::debug!(%func, domain_id, ?args, "create ldb port");
        let d = self.unstarted_domain(func, domain_id)?;
        if self.rsrcs.domains[d].avail_ldb_ports.is_empty() {
            return reject(Status::LdbPortsUnavailable);
        }

        let ldb = PortCredits {
            pool_id: args.ldb_credit_pool_id,
            high_watermark: args.ldb_credit_high_watermark,
            low_watermark: args.ldb_credit_low_watermark,
            quantum: args.ldb_credit_quantum,
        };
        let dir = PortCredits {
            pool_id: args.dir_credit_pool_id,
            high_watermark: args.dir_credit_high_watermark,
            low_watermark: args.dir_credit_low_watermark,
            quantum: args.dir_credit_quantum,
        };
        let (ldb_pool, dir_pool) = self.verify_port_pools(func, d, ldb, dir)?;

        if !valid_cq_depth(args.cq_depth) {
            return reject(Status::InvalidCqDepth);
        }
        if args.cq_history_list_size == 0 {
            return reject(Status::InvalidHistListDepth);
        }
        let hist_size = u32::from(args.cq_history_list_size);
        if hist_size > self.rsrcs.domains[d].hist_list_entries.available() {
            return reject(Status::HistListEntriesUnavailable);
        }

        let domain = &mut self.rsrcs.domains[d];
        let p = domain
            .avail_ldb_ports
            .pop_front()
            .ok_or_else(|| internal("no ldb port after validation"))?;
        let hist_base = domain
            .hist_list_entries
            .alloc(hist_size)
            .ok_or_else(|| internal("history list short after validation"))?;
        domain.used_ldb_ports.push_back(p);
        self.reserve_port_credits(ldb_pool, dir_pool, ldb, dir);

        let port = &mut self.rsrcs.ldb_ports[p];
        port.configured = true;
        port.enabled = true;
        port.qid_map = [QidMap::default(); QIDS_PER_LDB_CQ];
        port.num_mappings = 0;
        port.num_pending_removals = 0;
        port.hist_list_entry_base = hist_base;
        port.hist_list_entry_limit = hist_base + hist_size;
        port.ldb_pool = ldb_pool;
        port.dir_pool = dir_pool;

        let id = count(p);
        let pool_reg = |pool: Option<usize>| pool.map_or(0, count);
        self.regs.write(regs::ldb_pp_ldb_pool(id), pool_reg(ldb_pool));
        self.regs.write(regs::ldb_pp_dir_pool(id), pool_reg(dir_pool));
        self.regs.write(
            regs::ldb_pp_ldb_crd_wm(id),
            regs::pack16(ldb.low_watermark.into(), ldb.high_watermark.into()),
        );
        self.regs.write(
            regs::ldb_pp_dir_crd_wm(id),
            regs::pack16(dir.low_watermark.into(), dir.high_watermark.into()),
        );
        self.regs.write(
            regs::ldb_pp_crd_quantum(id),
            regs::pack16(ldb.quantum.into(), dir.quantum.into()),
        );
        self.regs.write(
            regs::ldb_cq_hist_list(id),
            regs::pack16(hist_base, hist_base + hist_size - 1),
        );
        self.regs.write(regs::ldb_cq_depth(id), args.cq_depth.into());
        self.regs
            .write(regs::ldb_cq_depth_thrsh(id), args.cq_depth_threshold.into());
        self.regs.write(regs::cq2priov(id), 0);
        self.regs.write(regs::ldb_if_status(id), 0);
        self.regs.write(regs::ldb_has_work(id), 0);
        self.regs.write(regs::ldb_pp_crd_upd_en(id), 1);
        self.regs.write(regs::cq_ldb_dsbl(id), 0);
        self.regs.write(regs::ldb_pp_v(id), 1);
        self.intr.clear(true, id);

        tracing::trace!(port = p, hist_base, "ldb port configured");
        Ok(self.rsrcs.ldb_ports[p].id.for_func(func))
    }

    /// Create a directed port, pairing it with an existing queue or a new
    /// pair when `queue_id` is -1.
    pub(crate) fn create_dir_port(
        &mut self,
        func: Func,
        domain_id: u32,
        args: &CreateDirPortArgs,
    ) -> Result<u32> {
        tracing::debug!(%func, domain_id, ?args, "create dir port");
        let d = self.unstarted_domain(func, domain_id)?;

        let existing = match u32::try_from(args.queue_id) {
            Ok(queue_id) => match self.rsrcs.domain_dir_pq_pair(func, d, queue_id) {
                Some(p)
                    if self.rsrcs.dir_pq_pairs[p].queue_configured
                        && !self.rsrcs.dir_pq_pairs[p].port_configured =>
                {
                    Some(p)
                }
                _ => return reject(Status::InvalidDirQueueId),
            },
            Err(_) if args.queue_id == -1 => {
                if self.rsrcs.domains[d].avail_dir_pq_pairs.is_empty() {
                    return reject(Status::DirPortsUnavailable);
                }
                None
            }
            Err(_) => return reject(Status::InvalidDirQueueId),
        };

        let ldb = PortCredits {
            pool_id: args.ldb_credit_pool_id,
            high_watermark: args.ldb_credit_high_watermark,
            low_watermark: args.ldb_credit_low_watermark,
            quantum: args.ldb_credit_quantum,
        };
        let dir = PortCredits {
            pool_id: args.dir_credit_pool_id,
            high_watermark: args.dir_credit_high_watermark,
            low_watermark: args.dir_credit_low_watermark,
            quantum: args.dir_credit_quantum,
        };
        let (ldb_pool, dir_pool) = self.verify_port_pools(func, d, ldb, dir)?;

        if !valid_cq_depth(args.cq_depth) {
            return reject(Status::InvalidCqDepth);
        }

        let p = match existing {
            Some(p) => p,
            None => {
                let domain = &mut self.rsrcs.domains[d];
                let p = domain
                    .avail_dir_pq_pairs
                    .pop_front()
                    .ok_or_else(|| internal("no dir pair after validation"))?;
                domain.used_dir_pq_pairs.push_back(p);
                p
            }
        };
        self.reserve_port_credits(ldb_pool, dir_pool, ldb, dir);

        let pair = &mut self.rsrcs.dir_pq_pairs[p];
        pair.port_configured = true;
        pair.enabled = true;
        pair.ldb_pool = ldb_pool;
        pair.dir_pool = dir_pool;

        let id = count(p);
        let pool_reg = |pool: Option<usize>| pool.map_or(0, count);
        self.regs.write(regs::dir_pp_ldb_pool(id), pool_reg(ldb_pool));
        self.regs.write(regs::dir_pp_dir_pool(id), pool_reg(dir_pool));
        self.regs.write(
            regs::dir_pp_ldb_crd_wm(id),
            regs::pack16(ldb.low_watermark.into(), ldb.high_watermark.into()),
        );
        self.regs.write(
            regs::dir_pp_dir_crd_wm(id),
            regs::pack16(dir.low_watermark.into(), dir.high_watermark.into()),
        );
        self.regs.write(
            regs::dir_pp_crd_quantum(id),
            regs::pack16(ldb.quantum.into(), dir.quantum.into()),
        );
        self.regs.write(regs::dir_cq_depth(id), args.cq_depth.into());
        self.regs
            .write(regs::dir_cq_depth_thrsh(id), args.cq_depth_threshold.into());
        self.regs.write(regs::dir_pp_crd_upd_en(id), 1);
        self.regs.write(regs::cq_dir_dsbl(id), 0);
        self.regs.write(regs::dir_pp_v(id), 1);
        self.intr.clear(false, id);

        tracing::trace!(pair = p, "dir port configured");
        Ok(self.rsrcs.dir_pq_pairs[p].id.for_func(func))
    }
}
