//! Scheduling domain creation and start.

use std::collections::VecDeque;

use super::{internal, reject, Manager};
use crate::args::CreateSchedDomainArgs;
use crate::bitmap::RangeBitmap;
use crate::error::{Result, Status};
use crate::freelist::Freelist;
use crate::hw::regs;
use crate::rsrc::{count, Func, FunctionResources, Resources};

/// Carve `n` contiguous entries out of a function bitmap.
fn carve(bitmap: &mut RangeBitmap, n: u32) -> Result<Freelist> {
    if n == 0 {
        return Ok(Freelist::default());
    }
    let base = bitmap
        .find_set_bit_range(n as usize)?
        .ok_or_else(|| internal(format!("no contiguous run of {n} entries after validation")))?;
    bitmap.clear_range(base, n as usize)?;
    Ok(Freelist::new(count(base), n))
}

/// Move `n` entries from the head of `from` to the tail of `to`.
fn take(from: &mut VecDeque<usize>, to: &mut VecDeque<usize>, n: u32) -> Result<Vec<usize>> {
    let mut moved = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let idx = from
            .pop_front()
            .ok_or_else(|| internal("resource list shorter than validated"))?;
        to.push_back(idx);
        moved.push(idx);
    }
    Ok(moved)
}

fn longest(bitmap: &RangeBitmap) -> Result<u32> {
    Ok(count(bitmap.longest_set_range()?))
}

impl Manager {
    /// Create a scheduling domain and attach the requested resources.
    /// Returns the domain id as the requester numbers it.
    pub(crate) fn create_sched_domain(
        &mut self,
        func: Func,
        args: &CreateSchedDomainArgs,
    ) -> Result<u32> {
        self.check_requester(func)?;
        tracing::debug!(%func, ?args, "create sched domain");

        self.verify_create_sched_domain_args(func, args)?;
        let domain = self.attach_domain_resources(func, args)?;

        let id = self.rsrcs.domains[domain].id.for_func(func);
        tracing::debug!(%func, domain_id = id, phys_id = domain, "created sched domain");
        Ok(id)
    }

    fn verify_create_sched_domain_args(
        &self,
        func: Func,
        args: &CreateSchedDomainArgs,
    ) -> Result<()> {
        let rsrcs: &FunctionResources = self.rsrcs.func(func)?;

        if self.reset_failed {
            return reject(Status::DomainResetFailed);
        }
        if rsrcs.avail_domains.is_empty() {
            return reject(Status::DomainUnavailable);
        }
        if count(rsrcs.avail_ldb_queues.len()) < args.num_ldb_queues {
            return reject(Status::LdbQueuesUnavailable);
        }
        if count(rsrcs.avail_ldb_ports.len()) < args.num_ldb_ports {
            return reject(Status::LdbPortsUnavailable);
        }
        if args.num_ldb_queues > 0 && args.num_ldb_ports == 0 {
            return reject(Status::LdbPortRequiredForLdbQueues);
        }
        if count(rsrcs.avail_dir_pq_pairs.len()) < args.num_dir_ports {
            return reject(Status::DirPortsUnavailable);
        }
        if let Some(cap) = self.config.effective_port_cap() {
            let attached = self.rsrcs.ldb_ports.iter().filter(|p| p.domain.is_some()).count()
                + self
                    .rsrcs
                    .dir_pq_pairs
                    .iter()
                    .filter(|p| p.domain.is_some())
                    .count();
            let requested = u64::from(args.num_ldb_ports) + u64::from(args.num_dir_ports);
            if attached as u64 + requested > u64::from(cap) {
                return reject(if args.num_ldb_ports > 0 {
                    Status::LdbPortsUnavailable
                } else {
                    Status::DirPortsUnavailable
                });
            }
        }
        if longest(&rsrcs.avail_qed_entries)? < args.num_ldb_credits {
            return reject(Status::LdbCreditsUnavailable);
        }
        if longest(&rsrcs.avail_dqed_entries)? < args.num_dir_credits {
            return reject(Status::DirCreditsUnavailable);
        }
        if count(rsrcs.avail_ldb_credit_pools.len()) < args.num_ldb_credit_pools {
            return reject(Status::LdbCreditPoolsUnavailable);
        }
        if count(rsrcs.avail_dir_credit_pools.len()) < args.num_dir_credit_pools {
            return reject(Status::DirCreditPoolsUnavailable);
        }
        if longest(&rsrcs.avail_aqed_entries)? < args.num_atomic_inflights {
            return reject(Status::AtomicInflightsUnavailable);
        }
        if longest(&rsrcs.avail_hist_list_entries)? < args.num_hist_list_entries {
            return reject(Status::HistListEntriesUnavailable);
        }
        Ok(())
    }

    fn attach_domain_resources(&mut self, func: Func, args: &CreateSchedDomainArgs) -> Result<usize> {
        let d = self
            .rsrcs
            .func_mut(func)?
            .avail_domains
            .pop_front()
            .ok_or_else(|| internal("no domain after validation"))?;

        // Ports one at a time: placement depends on the ports already given
        // to this domain.
        for _ in 0..args.num_ldb_ports {
            let pos = self
                .rsrcs
                .next_ldb_port(&self.rsrcs.func(func)?.avail_ldb_ports, d)
                .ok_or_else(|| internal("no ldb port after validation"))?;
            let port = self
                .rsrcs
                .func_mut(func)?
                .avail_ldb_ports
                .remove(pos)
                .ok_or_else(|| internal("ldb port position out of range"))?;
            self.rsrcs.ldb_ports[port].domain = Some(d);
            self.rsrcs.domains[d].avail_ldb_ports.push_back(port);
        }

        let Resources {
            pf,
            vfs,
            domains,
            ldb_queues,
            dir_pq_pairs,
            ldb_credit_pools,
            dir_credit_pools,
            ..
        } = &mut self.rsrcs;
        let rsrcs = match func {
            Func::Pf => pf,
            Func::Vf(vf) => vfs
                .get_mut(vf as usize)
                .ok_or_else(|| internal(format!("no such VF {vf}")))?,
        };
        let domain = &mut domains[d];

        for q in take(&mut rsrcs.avail_ldb_queues, &mut domain.avail_ldb_queues, args.num_ldb_queues)? {
            ldb_queues[q].domain = Some(d);
        }
        for p in take(&mut rsrcs.avail_dir_pq_pairs, &mut domain.avail_dir_pq_pairs, args.num_dir_ports)? {
            dir_pq_pairs[p].domain = Some(d);
        }
        for p in take(
            &mut rsrcs.avail_ldb_credit_pools,
            &mut domain.avail_ldb_credit_pools,
            args.num_ldb_credit_pools,
        )? {
            ldb_credit_pools[p].domain = Some(d);
        }
        for p in take(
            &mut rsrcs.avail_dir_credit_pools,
            &mut domain.avail_dir_credit_pools,
            args.num_dir_credit_pools,
        )? {
            dir_credit_pools[p].domain = Some(d);
        }

        domain.qed_freelist = carve(&mut rsrcs.avail_qed_entries, args.num_ldb_credits)?;
        domain.dqed_freelist = carve(&mut rsrcs.avail_dqed_entries, args.num_dir_credits)?;
        domain.aqed_freelist = carve(&mut rsrcs.avail_aqed_entries, args.num_atomic_inflights)?;
        domain.hist_list_entries =
            carve(&mut rsrcs.avail_hist_list_entries, args.num_hist_list_entries)?;

        domain.owner = func;
        domain.configured = true;
        domain.started = false;
        domain.num_pending_additions = 0;
        domain.num_pending_removals = 0;
        rsrcs.used_domains.push_back(d);
        tracing::trace!(domain = d, "domain configured");
        Ok(d)
    }

    /// Enable the domain's pools and queues. No configuration is accepted
    /// afterwards, and map/unmap become dynamic.
    pub(crate) fn start_domain(&mut self, func: Func, domain_id: u32) -> Result<()> {
        tracing::debug!(%func, domain_id, "start domain");
        let d = self.unstarted_domain(func, domain_id)?;
        let domain = &self.rsrcs.domains[d];
        let dom = count(d);

        for p in domain.used_ldb_credit_pools.iter().copied() {
            let pool = &self.rsrcs.ldb_credit_pools[p];
            self.regs.write(regs::ldb_pool_crd_cnt(count(p)), pool.total_credits);
            self.regs.write(regs::ldb_pool_enabled(count(p)), 1);
        }
        for p in domain.used_dir_credit_pools.iter().copied() {
            let pool = &self.rsrcs.dir_credit_pools[p];
            self.regs.write(regs::dir_pool_crd_cnt(count(p)), pool.total_credits);
            self.regs.write(regs::dir_pool_enabled(count(p)), 1);
        }
        for q in domain.used_ldb_queues.iter().copied() {
            self.regs.write(regs::ldb_vasqid_v(dom, count(q)), 1);
        }
        for p in domain.used_dir_pq_pairs.iter().copied() {
            if self.rsrcs.dir_pq_pairs[p].queue_configured {
                self.regs.write(regs::dir_vasqid_v(dom, count(p)), 1);
            }
        }
        self.regs.flush();

        self.rsrcs.domains[d].started = true;
        tracing::trace!(domain = d, "domain started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixture::*;
    use super::*;
    use crate::config::{DeviceConfig, Revision};
    use crate::error::Error;

    fn args() -> CreateSchedDomainArgs {
        CreateSchedDomainArgs {
            num_ldb_queues: 1,
            num_ldb_ports: 1,
            num_ldb_credits: 100,
            num_ldb_credit_pools: 1,
            ..CreateSchedDomainArgs::default()
        }
    }

    fn status<T: std::fmt::Debug>(result: Result<T>) -> Status {
        result.unwrap_err().status().unwrap()
    }

    #[test]
    fn test_create_carves_contiguous_credits() {
        let (mut m, _) = manager();
        let id = m.create_sched_domain(Func::Pf, &args()).unwrap();
        let d = id as usize;
        let domain = &m.rsrcs.domains[d];
        assert!(domain.configured);
        assert_eq!(domain.qed_freelist, Freelist::new(0, 100));
        assert_eq!(domain.avail_ldb_queues.len(), 1);
        assert_eq!(m.rsrcs.pf.avail_qed_entries.count().unwrap(), 16384 - 100);
        assert_eq!(m.rsrcs.pf.used_domains, VecDeque::from([d]));

        let q = domain.avail_ldb_queues[0];
        assert_eq!(m.rsrcs.ldb_queues[q].domain, Some(d));
    }

    #[test]
    fn test_validation_order() {
        let (mut m, _) = manager();
        let bad = CreateSchedDomainArgs {
            num_ldb_queues: 129,
            num_ldb_ports: 65,
            ..args()
        };
        assert_eq!(status(m.create_sched_domain(Func::Pf, &bad)), Status::LdbQueuesUnavailable);

        let bad = CreateSchedDomainArgs {
            num_ldb_ports: 0,
            ..args()
        };
        assert_eq!(
            status(m.create_sched_domain(Func::Pf, &bad)),
            Status::LdbPortRequiredForLdbQueues
        );

        let bad = CreateSchedDomainArgs {
            num_ldb_credits: 16385,
            num_atomic_inflights: 4096,
            ..args()
        };
        assert_eq!(status(m.create_sched_domain(Func::Pf, &bad)), Status::LdbCreditsUnavailable);

        let bad = CreateSchedDomainArgs {
            num_hist_list_entries: 5121,
            ..args()
        };
        assert_eq!(
            status(m.create_sched_domain(Func::Pf, &bad)),
            Status::HistListEntriesUnavailable
        );
    }

    #[test]
    fn test_reset_failed_latch_blocks_creation() {
        let (mut m, _) = manager();
        m.reset_failed = true;
        assert_eq!(status(m.create_sched_domain(Func::Pf, &args())), Status::DomainResetFailed);
    }

    #[test]
    fn test_domains_run_out() {
        let (mut m, _) = manager();
        let empty = CreateSchedDomainArgs::default();
        for _ in 0..32 {
            m.create_sched_domain(Func::Pf, &empty).unwrap();
        }
        assert_eq!(status(m.create_sched_domain(Func::Pf, &empty)), Status::DomainUnavailable);
    }

    #[test]
    fn test_port_cap_on_early_revision() {
        let (mut m, _) = manager_with(DeviceConfig {
            revision: Revision::A2,
            port_cap: Some(4),
            ..DeviceConfig::default()
        });
        let three = CreateSchedDomainArgs {
            num_ldb_ports: 2,
            num_dir_ports: 1,
            ..CreateSchedDomainArgs::default()
        };
        m.create_sched_domain(Func::Pf, &three).unwrap();
        assert_eq!(status(m.create_sched_domain(Func::Pf, &three)), Status::LdbPortsUnavailable);

        let dir_only = CreateSchedDomainArgs {
            num_dir_ports: 2,
            ..CreateSchedDomainArgs::default()
        };
        assert_eq!(
            status(m.create_sched_domain(Func::Pf, &dir_only)),
            Status::DirPortsUnavailable
        );
    }

    #[test]
    fn test_ports_spread_across_domains() {
        let (mut m, _) = manager();
        let two_ports = CreateSchedDomainArgs {
            num_ldb_ports: 2,
            ..CreateSchedDomainArgs::default()
        };
        let a = m.create_sched_domain(Func::Pf, &two_ports).unwrap() as usize;
        let b = m.create_sched_domain(Func::Pf, &two_ports).unwrap() as usize;
        let ports_a: Vec<_> = m.rsrcs.domains[a].avail_ldb_ports.iter().copied().collect();
        let ports_b: Vec<_> = m.rsrcs.domains[b].avail_ldb_ports.iter().copied().collect();
        assert_eq!(ports_a, vec![0, 31]);
        for p in ports_b {
            assert!(!ports_a.contains(&p));
            assert_eq!(m.rsrcs.ldb_ports[p].domain, Some(b));
        }
    }

    #[test]
    fn test_start_enables_queues_and_pools() {
        let (mut m, regs) = manager();
        let setup = domain_with(&mut m, 2, 1);
        m.start_domain(Func::Pf, setup.domain).unwrap();
        let d = setup.domain;
        for q in &setup.queues {
            assert_eq!(regs.get(regs::ldb_vasqid_v(d, *q)), 1);
        }
        let pool = m.rsrcs.domains[d as usize].used_ldb_credit_pools[0];
        assert_eq!(regs.get(regs::ldb_pool_crd_cnt(count(pool))), 1024);
        assert!(matches!(
            m.start_domain(Func::Pf, d),
            Err(Error::Rejected(Status::DomainStarted))
        ));
    }
}
