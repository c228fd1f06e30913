//! Queue-to-port mapping state machine.
//!
//! Each load-balanced port has [`QIDS_PER_LDB_CQ`] mapping slots. Before a
//! domain starts no traffic can race a table rewrite, so maps land at once.
//! On a live domain a map must wait for the queue's inflight count to read
//! zero with its consumers disabled, and an unmap must wait for the port's
//! CQ to return every outstanding completion. Work that cannot finish
//! immediately stays in an in-progress state and the deferred worker
//! retries it.

use super::{internal, reject, Manager};
use crate::args::{MapOutcome, MapQidArgs, UnmapOutcome, UnmapQidArgs};
use crate::error::{Result, Status};
use crate::hw::regs;
use crate::rsrc::{count, Func, QidMapState, Resources};
use crate::{QIDS_PER_LDB_CQ, QID_PRIORITIES};

use QidMapState::{
    MapInProgress, Mapped, UnmapInProgress, UnmapInProgressPendingMap as PendingMap, Unmapped,
};

fn dec(counter: &mut u32, what: &str) -> Result<()> {
    *counter = counter
        .checked_sub(1)
        .ok_or_else(|| internal(format!("{what} underflow")))?;
    Ok(())
}

impl Manager {
    // ========================================================================
    // Requests
    // ========================================================================

    /// Map a load-balanced queue to a load-balanced port at a priority, or
    /// change the priority of an existing mapping.
    pub(crate) fn map_qid(
        &mut self,
        func: Func,
        domain_id: u32,
        args: &MapQidArgs,
    ) -> Result<MapOutcome> {
        tracing::debug!(%func, domain_id, ?args, "map qid");
        let d = self.configured_domain(func, domain_id)?;
        let p = match self.rsrcs.domain_ldb_port(func, d, args.port_id) {
            Some(p) if self.rsrcs.ldb_ports[p].configured => p,
            _ => return reject(Status::InvalidPortId),
        };
        if args.priority >= count(QID_PRIORITIES) {
            return reject(Status::InvalidPriority);
        }
        let q = match self.rsrcs.domain_ldb_queue(func, d, args.qid) {
            Some(q) if self.rsrcs.ldb_queues[q].configured => q,
            _ => return reject(Status::InvalidQid),
        };
        self.verify_map_slot(p, count(q))?;

        if self.rsrcs.ldb_ports[p].num_pending_removals > 0 {
            self.finish_unmap_port(d, p)?;
        }

        let enabled = self.rsrcs.ldb_ports[p].enabled;
        if enabled {
            self.ldb_cq_disable(p);
        }
        let outcome = self.port_map_qid(d, p, q, args.priority);
        if enabled {
            self.ldb_cq_enable(p);
        }
        let outcome = outcome?;
        tracing::debug!(port = p, queue = q, ?outcome, "map qid done");
        Ok(outcome)
    }

    /// A map needs a free slot, a slot already tracking the queue, or an
    /// unmap in progress to queue behind.
    fn verify_map_slot(&self, p: usize, qid: u32) -> Result<()> {
        let port = &self.rsrcs.ldb_ports[p];
        if port.occupied_slots() < QIDS_PER_LDB_CQ
            || port.find_slot(Mapped, qid).is_some()
            || port.find_slot(MapInProgress, qid).is_some()
            || port.find_pending_map_slot(qid).is_some()
            || port.find_slot_in_state(UnmapInProgress).is_some()
        {
            return Ok(());
        }
        reject(Status::NoQidSlotsAvailable)
    }

    fn port_map_qid(&mut self, d: usize, p: usize, q: usize, priority: u32) -> Result<MapOutcome> {
        let qid = count(q);
        let port = &self.rsrcs.ldb_ports[p];

        if let Some(slot) = port.find_slot(Mapped, qid) {
            self.set_slot_priority(p, slot, priority);
            return Ok(MapOutcome::PriorityChanged);
        }
        if let Some(slot) = port.find_slot(UnmapInProgress, qid) {
            self.set_slot_priority(p, slot, priority);
            self.slot_transition(p, q, slot, Mapped)?;
            return Ok(MapOutcome::Mapped);
        }
        if let Some(slot) = port.find_slot(MapInProgress, qid) {
            self.rsrcs.ldb_ports[p].qid_map[slot].priority = priority;
            return Ok(MapOutcome::Deferred);
        }
        if let Some(slot) = port.find_pending_map_slot(qid) {
            self.rsrcs.ldb_ports[p].qid_map[slot].pending_priority = priority;
            return Ok(MapOutcome::Pending);
        }
        if port.find_slot_in_state(Unmapped).is_none() {
            let slot = port
                .find_slot_in_state(UnmapInProgress)
                .ok_or_else(|| internal(format!("ldb port {p} has no slot to map into")))?;
            let occupant = port.qid_map[slot].qid as usize;
            let map = &mut self.rsrcs.ldb_ports[p].qid_map[slot];
            map.pending_qid = qid;
            map.pending_priority = priority;
            self.slot_transition(p, occupant, slot, PendingMap)?;
            tracing::info!(port = p, queue = q, slot, "map queued behind unmap");
            return Ok(MapOutcome::Pending);
        }

        self.ldb_port_map_qid(d, p, q, priority)
    }

    /// Remove a queue's mapping from a load-balanced port.
    pub(crate) fn unmap_qid(
        &mut self,
        func: Func,
        domain_id: u32,
        args: &UnmapQidArgs,
    ) -> Result<UnmapOutcome> {
        tracing::debug!(%func, domain_id, ?args, "unmap qid");
        let d = self.configured_domain(func, domain_id)?;
        let p = match self.rsrcs.domain_ldb_port(func, d, args.port_id) {
            Some(p) if self.rsrcs.ldb_ports[p].configured => p,
            _ => return reject(Status::InvalidPortId),
        };
        let q = match self.rsrcs.domain_ldb_queue(func, d, args.qid) {
            Some(q) if self.rsrcs.ldb_queues[q].configured => q,
            _ => return reject(Status::InvalidQid),
        };
        let qid = count(q);
        let port = &self.rsrcs.ldb_ports[p];

        if let Some(slot) = port.find_slot(MapInProgress, qid) {
            self.slot_transition(p, q, slot, Unmapped)?;
            if self.rsrcs.ldb_queues[q].num_pending_additions == 0 {
                self.set_inflight_limit(q);
            }
            return Ok(UnmapOutcome::Unmapped);
        }
        if let Some(slot) = port.find_pending_map_slot(qid) {
            let occupant = port.qid_map[slot].qid as usize;
            self.slot_transition(p, occupant, slot, UnmapInProgress)?;
            return Ok(UnmapOutcome::Unmapped);
        }
        let Some(slot) = port.find_slot(Mapped, qid) else {
            return reject(Status::InvalidQid);
        };

        self.ldb_cq_disable(p);
        self.slot_transition(p, q, slot, UnmapInProgress)?;
        if self.finish_unmap_port(d, p)? {
            return Ok(UnmapOutcome::Unmapped);
        }
        tracing::info!(port = p, queue = q, "unmap waiting for CQ to drain");
        self.schedule_worker();
        Ok(UnmapOutcome::Deferred)
    }

    /// Number of unmaps still in progress on a load-balanced port.
    pub(crate) fn pending_port_unmaps(
        &self,
        func: Func,
        domain_id: u32,
        port_id: u32,
    ) -> Result<u32> {
        let d = self.configured_domain(func, domain_id)?;
        match self.rsrcs.domain_ldb_port(func, d, port_id) {
            Some(p) if self.rsrcs.ldb_ports[p].configured => {
                Ok(self.rsrcs.ldb_ports[p].num_pending_removals)
            }
            _ => reject(Status::InvalidPortId),
        }
    }

    // ========================================================================
    // Slot bookkeeping
    // ========================================================================

    /// Move a slot to `new`, keeping the queue, port and domain counters in
    /// step. `q` is the queue currently occupying the slot.
    fn slot_transition(&mut self, p: usize, q: usize, slot: usize, new: QidMapState) -> Result<()> {
        let Resources {
            domains,
            ldb_queues,
            ldb_ports,
            ..
        } = &mut self.rsrcs;
        let port = &mut ldb_ports[p];
        let d = port
            .domain
            .ok_or_else(|| internal(format!("ldb port {p} has no domain")))?;
        let domain = &mut domains[d];
        let queue = &mut ldb_queues[q];
        let current = port.qid_map[slot].state;

        match (current, new) {
            (Unmapped, Mapped) => {
                queue.num_mappings += 1;
                port.num_mappings += 1;
            }
            (Unmapped, MapInProgress) => {
                queue.num_pending_additions += 1;
                domain.num_pending_additions += 1;
            }
            (Mapped, Unmapped) => {
                dec(&mut queue.num_mappings, "queue mappings")?;
                dec(&mut port.num_mappings, "port mappings")?;
            }
            (Mapped, UnmapInProgress) => {
                port.num_pending_removals += 1;
                domain.num_pending_removals += 1;
            }
            (Mapped, Mapped) | (UnmapInProgress, PendingMap) | (PendingMap, UnmapInProgress) => {}
            (MapInProgress, Unmapped) => {
                dec(&mut queue.num_pending_additions, "queue pending additions")?;
                dec(&mut domain.num_pending_additions, "domain pending additions")?;
            }
            (MapInProgress, Mapped) => {
                queue.num_mappings += 1;
                port.num_mappings += 1;
                dec(&mut queue.num_pending_additions, "queue pending additions")?;
                dec(&mut domain.num_pending_additions, "domain pending additions")?;
            }
            (UnmapInProgress | PendingMap, Unmapped) => {
                dec(&mut port.num_pending_removals, "port pending removals")?;
                dec(&mut domain.num_pending_removals, "domain pending removals")?;
                dec(&mut queue.num_mappings, "queue mappings")?;
                dec(&mut port.num_mappings, "port mappings")?;
            }
            (UnmapInProgress, Mapped) => {
                dec(&mut port.num_pending_removals, "port pending removals")?;
                dec(&mut domain.num_pending_removals, "domain pending removals")?;
            }
            _ => {
                return Err(internal(format!(
                    "invalid slot transition {current:?} -> {new:?} (port {p}, slot {slot})"
                )))
            }
        }

        port.qid_map[slot].state = new;
        tracing::trace!(port = p, queue = q, slot, ?current, ?new, "slot transition");
        Ok(())
    }

    fn set_slot_priority(&mut self, p: usize, slot: usize, priority: u32) {
        let reg = regs::cq2priov(count(p));
        self.regs.clear_bits(reg, regs::cq2priov_prio_mask(slot));
        self.regs.set_bits(reg, regs::cq2priov_prio(slot, priority));
        self.rsrcs.ldb_ports[p].qid_map[slot].priority = priority;
    }

    // ========================================================================
    // CQ and queue controls
    // ========================================================================

    pub(crate) fn ldb_cq_disable(&mut self, p: usize) {
        self.regs.write(regs::cq_ldb_dsbl(count(p)), 1);
        self.regs.flush();
    }

    /// Re-enable a CQ unless the user disabled it or an unmap is draining it.
    pub(crate) fn ldb_cq_enable(&mut self, p: usize) {
        let port = &self.rsrcs.ldb_ports[p];
        if !port.enabled || port.num_pending_removals > 0 {
            return;
        }
        self.regs.write(regs::cq_ldb_dsbl(count(p)), 0);
        self.regs.flush();
    }

    /// Ports of the domain with `q` in a mapped slot.
    fn mapped_ports(&self, d: usize, q: usize) -> Vec<usize> {
        let qid = count(q);
        self.rsrcs.domains[d]
            .used_ldb_ports
            .iter()
            .copied()
            .filter(|&p| self.rsrcs.ldb_ports[p].find_slot(Mapped, qid).is_some())
            .collect()
    }

    fn disable_mapped_cqs(&mut self, d: usize, q: usize) {
        for p in self.mapped_ports(d, q) {
            self.ldb_cq_disable(p);
        }
    }

    fn enable_mapped_cqs(&mut self, d: usize, q: usize) {
        for p in self.mapped_ports(d, q) {
            self.ldb_cq_enable(p);
        }
    }

    fn set_inflight_limit(&mut self, q: usize) {
        let limit = self.rsrcs.ldb_queues[q].num_qid_inflights;
        self.regs.write(regs::qid_ldb_infl_lim(count(q)), limit);
    }

    fn clear_inflight_limit(&mut self, q: usize) {
        self.regs.write(regs::qid_ldb_infl_lim(count(q)), 0);
    }

    fn queue_inflights(&self, q: usize) -> u32 {
        self.regs.read(regs::qid_ldb_infl_cnt(count(q)))
    }

    // ========================================================================
    // Mapping
    // ========================================================================

    /// Map into a free slot: directly before start, through the inflight
    /// drain protocol after.
    fn ldb_port_map_qid(
        &mut self,
        d: usize,
        p: usize,
        q: usize,
        priority: u32,
    ) -> Result<MapOutcome> {
        if self.rsrcs.domains[d].started {
            self.map_qid_dynamic(d, p, q, priority)
        } else {
            self.map_qid_static(p, q, priority)?;
            Ok(MapOutcome::Mapped)
        }
    }

    /// Program the slot tables. Reuses a slot already tracking the queue.
    fn map_qid_static(&mut self, p: usize, q: usize, priority: u32) -> Result<usize> {
        let qid = count(q);
        let port = &self.rsrcs.ldb_ports[p];
        let slot = port
            .find_slot(MapInProgress, qid)
            .or_else(|| port.find_slot(Mapped, qid))
            .or_else(|| port.find_slot_in_state(Unmapped))
            .ok_or_else(|| internal(format!("ldb port {p} has no slot for queue {q}")))?;

        let id = count(p);
        let priov = regs::cq2priov(id);
        self.regs.clear_bits(priov, regs::cq2priov_prio_mask(slot));
        self.regs.set_bits(
            priov,
            regs::cq2priov_valid(slot) | regs::cq2priov_prio(slot, priority),
        );

        let half = count(slot / 4);
        let shift = (slot % 4) * 8;
        self.regs.clear_bits(regs::cq2qid(id, half), 0xff << shift);
        self.regs.set_bits(regs::cq2qid(id, half), (qid & 0xff) << shift);
        self.regs
            .set_bits(regs::qid2cqidix(qid, id), regs::qid2cqidix_bit(id, slot));

        let map = &mut self.rsrcs.ldb_ports[p].qid_map[slot];
        map.qid = qid;
        map.priority = priority;
        self.slot_transition(p, q, slot, Mapped)?;
        Ok(slot)
    }

    pub(super) fn map_qid_dynamic(
        &mut self,
        d: usize,
        p: usize,
        q: usize,
        priority: u32,
    ) -> Result<MapOutcome> {
        self.clear_inflight_limit(q);

        let slot = self.rsrcs.ldb_ports[p]
            .find_slot_in_state(Unmapped)
            .ok_or_else(|| internal(format!("ldb port {p} has no free slot")))?;
        let map = &mut self.rsrcs.ldb_ports[p].qid_map[slot];
        map.qid = count(q);
        map.priority = priority;
        self.slot_transition(p, q, slot, MapInProgress)?;

        if self.queue_inflights(q) != 0 {
            tracing::info!(port = p, queue = q, "map waiting for queue inflights");
            self.schedule_worker();
            return Ok(MapOutcome::Deferred);
        }

        // Close the race with one more schedule before the disable lands.
        self.ldb_cq_disable(p);
        self.disable_mapped_cqs(d, q);
        if self.queue_inflights(q) != 0 {
            self.ldb_cq_enable(p);
            self.enable_mapped_cqs(d, q);
            tracing::info!(port = p, queue = q, "map waiting for queue inflights");
            self.schedule_worker();
            return Ok(MapOutcome::Deferred);
        }

        self.finish_map_qid_dynamic(d, p, q)?;
        Ok(MapOutcome::Mapped)
    }

    /// Complete an in-progress map. The queue's inflight count must read
    /// zero with its consumers disabled.
    fn finish_map_qid_dynamic(&mut self, d: usize, p: usize, q: usize) -> Result<()> {
        let qid = count(q);
        if self.queue_inflights(q) != 0 {
            return Err(internal(format!("queue {q} has inflights while finishing map")));
        }
        let slot = self.rsrcs.ldb_ports[p]
            .find_slot(MapInProgress, qid)
            .ok_or_else(|| internal(format!("no in-progress map of queue {q} on port {p}")))?;
        let priority = self.rsrcs.ldb_ports[p].qid_map[slot].priority;
        let slot = self.map_qid_static(p, q, priority)?;

        let id = count(p);
        let mut has_work = 0;
        if self.regs.read(regs::qid_aqed_active_cnt(qid)) > 0 {
            has_work |= 1 << slot;
        }
        if self.regs.read(regs::qid_ldb_enqueue_cnt(qid)) > 0 {
            has_work |= 1 << (slot + 8);
        }
        if has_work != 0 {
            self.regs.set_bits(regs::ldb_has_work(id), has_work);
        }

        self.regs.clear_bits(regs::ldb_if_status(id), 1 << slot);
        for port in self.mapped_ports(d, q) {
            if let Some(s) = self.rsrcs.ldb_ports[port].find_slot(Mapped, qid) {
                self.regs.set_bits(regs::ldb_if_status(count(port)), 1 << s);
            }
        }

        self.set_inflight_limit(q);
        self.enable_mapped_cqs(d, q);
        if self.rsrcs.ldb_queues[q].num_pending_additions > 0 {
            self.clear_inflight_limit(q);
        }
        tracing::debug!(port = p, queue = q, slot, "dynamic map finished");
        Ok(())
    }

    // ========================================================================
    // Completion passes
    // ========================================================================

    /// Finish every unmap draining on a port once its CQ has no outstanding
    /// completions. Returns whether the port was drained.
    pub(crate) fn finish_unmap_port(&mut self, d: usize, p: usize) -> Result<bool> {
        if self.rsrcs.ldb_ports[p].num_pending_removals == 0 {
            return Ok(false);
        }
        if self.regs.read(regs::cq_ldb_infl_cnt(count(p))) > 0 {
            return Ok(false);
        }
        for slot in 0..QIDS_PER_LDB_CQ {
            let state = self.rsrcs.ldb_ports[p].qid_map[slot].state;
            if state == UnmapInProgress || state == PendingMap {
                self.finish_unmap_port_slot(d, p, slot)?;
            }
        }
        Ok(true)
    }

    /// Unprogram a slot and free it. The port's CQ must have no
    /// outstanding completions.
    pub(super) fn release_slot(&mut self, p: usize, slot: usize) -> Result<()> {
        let map = self.rsrcs.ldb_ports[p].qid_map[slot];
        let id = count(p);
        self.regs
            .clear_bits(regs::cq2priov(id), regs::cq2priov_valid(slot));
        self.regs
            .clear_bits(regs::qid2cqidix(map.qid, id), regs::qid2cqidix_bit(id, slot));
        self.slot_transition(p, map.qid as usize, slot, Unmapped)
    }

    fn finish_unmap_port_slot(&mut self, d: usize, p: usize, slot: usize) -> Result<()> {
        let map = self.rsrcs.ldb_ports[p].qid_map[slot];
        let id = count(p);
        self.release_slot(p, slot)?;

        self.regs
            .clear_bits(regs::ldb_has_work(id), (1 << slot) | (1 << (slot + 8)));
        self.regs.set_bits(regs::ldb_if_status(id), 1 << slot);
        self.ldb_cq_enable(p);
        tracing::debug!(port = p, queue = map.qid, slot, "unmap finished");

        if map.state == PendingMap {
            self.ldb_port_map_qid(d, p, map.pending_qid as usize, map.pending_priority)?;
        }
        Ok(())
    }

    /// Try each in-progress map on the port.
    fn finish_map_port(&mut self, d: usize, p: usize) -> Result<()> {
        for slot in 0..QIDS_PER_LDB_CQ {
            let map = self.rsrcs.ldb_ports[p].qid_map[slot];
            if map.state != MapInProgress {
                continue;
            }
            let q = map.qid as usize;
            if self.queue_inflights(q) != 0 {
                continue;
            }
            self.ldb_cq_disable(p);
            self.disable_mapped_cqs(d, q);
            if self.queue_inflights(q) != 0 {
                self.ldb_cq_enable(p);
                self.enable_mapped_cqs(d, q);
                continue;
            }
            self.finish_map_qid_dynamic(d, p, q)?;
        }
        Ok(())
    }

    /// Attempt every pending unmap of a domain. Returns how many remain.
    pub(crate) fn finish_unmap_procedures(&mut self, d: usize) -> Result<u32> {
        let domain = &self.rsrcs.domains[d];
        if !domain.configured || domain.num_pending_removals == 0 {
            return Ok(0);
        }
        let ports: Vec<usize> = domain.used_ldb_ports.iter().copied().collect();
        for p in ports {
            self.finish_unmap_port(d, p)?;
        }
        Ok(self.rsrcs.domains[d].num_pending_removals)
    }

    /// Attempt every pending map of a domain. Returns how many remain.
    pub(crate) fn finish_map_procedures(&mut self, d: usize) -> Result<u32> {
        let domain = &self.rsrcs.domains[d];
        if !domain.configured || domain.num_pending_additions == 0 {
            return Ok(0);
        }
        let ports: Vec<usize> = domain.used_ldb_ports.iter().copied().collect();
        for p in ports {
            self.finish_map_port(d, p)?;
        }
        Ok(self.rsrcs.domains[d].num_pending_additions)
    }

    /// One deferred-worker pass over every domain. Returns the number of
    /// transitions still pending.
    pub(crate) fn finish_pending_work(&mut self) -> Result<u32> {
        let mut remaining = 0;
        for d in 0..self.rsrcs.domains.len() {
            remaining += self.finish_unmap_procedures(d)?;
        }
        for d in 0..self.rsrcs.domains.len() {
            remaining += self.finish_map_procedures(d)?;
        }
        Ok(remaining)
    }
}
