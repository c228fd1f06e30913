//! Resource manager state and operations.
//!
//! [`Manager`] owns the registry and the register interface. Every operation
//! validates its request against current state first and only then mutates,
//! so a rejected request leaves no trace. Callers serialize access through
//! the device lock.

mod configure;
mod domain;
mod qid_map;
mod query;
mod reset;
mod transfer;

use std::sync::Arc;

pub use query::{DomainSnapshot, FunctionSnapshot, QidMapping, SnGroupSnapshot, Snapshot};

use crate::config::DeviceConfig;
use crate::error::{Error, Result, Status};
use crate::hw::{regs, RegisterIo};
use crate::intr::Interrupts;
use crate::rsrc::{mode_word, Func, Resources};
use crate::worker::WorkerSignal;

pub(crate) struct Manager {
    pub(crate) regs: Box<dyn RegisterIo>,
    pub(crate) rsrcs: Resources,
    pub(crate) config: DeviceConfig,
    /// Latched when a domain reset fails; refuses further domain creation.
    pub(crate) reset_failed: bool,
    pub(crate) worker: Arc<WorkerSignal>,
    pub(crate) intr: Arc<Interrupts>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("num_vfs", &self.rsrcs.num_vfs())
            .field("reset_failed", &self.reset_failed)
            .finish_non_exhaustive()
    }
}

/// Log and build an internal error.
pub(crate) fn internal(what: impl Into<String>) -> Error {
    let what = what.into();
    tracing::error!(%what, "internal error");
    Error::Internal(what)
}

fn reject<T>(status: Status) -> Result<T> {
    tracing::debug!(%status, "request rejected");
    Err(Error::Rejected(status))
}

impl Manager {
    pub(crate) fn new(
        config: DeviceConfig,
        regs: Box<dyn RegisterIo>,
        worker: Arc<WorkerSignal>,
        intr: Arc<Interrupts>,
    ) -> Result<Self> {
        config.validate()?;
        let rsrcs = Resources::new(config.num_vfs)?;
        let mut manager = Self {
            regs,
            rsrcs,
            config,
            reset_failed: false,
            worker,
            intr,
        };
        let word = mode_word(&manager.rsrcs.sn_groups);
        manager.regs.write(regs::sn_mode(), word);
        tracing::info!(
            num_vfs = manager.rsrcs.num_vfs(),
            revision = ?manager.config.revision,
            "resource manager initialized"
        );
        Ok(manager)
    }

    /// Requests from a VF are only served while its driver is registered.
    fn check_requester(&self, func: Func) -> Result<()> {
        let rsrcs = self.rsrcs.func(func)?;
        if func.is_vf() && !rsrcs.locked {
            return Err(Error::PermissionDenied(format!(
                "{func} is not registered"
            )));
        }
        Ok(())
    }

    /// Domain addressed by the requester.
    fn domain(&self, func: Func, domain_id: u32) -> Result<usize> {
        self.check_requester(func)?;
        match self.rsrcs.domain_index(func, domain_id) {
            Some(d) => Ok(d),
            None => reject(Status::InvalidDomainId),
        }
    }

    /// Domain addressed by the requester, which must be configured.
    fn configured_domain(&self, func: Func, domain_id: u32) -> Result<usize> {
        let d = self.domain(func, domain_id)?;
        if !self.rsrcs.domains[d].configured {
            return reject(Status::DomainNotConfigured);
        }
        Ok(d)
    }

    /// Configured domain that has not been started yet.
    fn unstarted_domain(&self, func: Func, domain_id: u32) -> Result<usize> {
        let d = self.configured_domain(func, domain_id)?;
        if self.rsrcs.domains[d].started {
            return reject(Status::DomainStarted);
        }
        Ok(d)
    }

    /// Schedule the deferred completion worker.
    fn schedule_worker(&self) {
        if self.worker.schedule() {
            tracing::info!("deferred map/unmap work scheduled");
        }
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use crate::args::{
        CreateDirPoolArgs, CreateLdbPoolArgs, CreateLdbPortArgs, CreateLdbQueueArgs,
        CreateSchedDomainArgs,
    };
    use crate::hw::MemRegisterFile;

    pub(crate) fn manager_with(config: DeviceConfig) -> (Manager, MemRegisterFile) {
        let regs = MemRegisterFile::new();
        let manager = Manager::new(
            config,
            Box::new(regs.clone()),
            Arc::new(WorkerSignal::default()),
            Arc::new(Interrupts::new()),
        )
        .unwrap();
        (manager, regs)
    }

    pub(crate) fn manager() -> (Manager, MemRegisterFile) {
        manager_with(DeviceConfig::default())
    }

    /// Configured PF domain with `queues` ldb queues, `ports` ldb ports, one
    /// pool of each kind, and the ports created.
    pub(crate) struct Setup {
        pub domain: u32,
        pub queues: Vec<u32>,
        pub ports: Vec<u32>,
    }

    pub(crate) fn domain_with(manager: &mut Manager, queues: u32, ports: u32) -> Setup {
        let args = CreateSchedDomainArgs {
            num_ldb_queues: queues,
            num_ldb_ports: ports,
            num_dir_ports: 1,
            num_atomic_inflights: 64,
            num_hist_list_entries: 32 * ports,
            num_ldb_credits: 1024,
            num_dir_credits: 256,
            num_ldb_credit_pools: 1,
            num_dir_credit_pools: 1,
        };
        let domain = manager.create_sched_domain(Func::Pf, &args).unwrap();
        let ldb_pool = manager
            .create_ldb_pool(Func::Pf, domain, &CreateLdbPoolArgs { num_ldb_credits: 1024 })
            .unwrap();
        let dir_pool = manager
            .create_dir_pool(Func::Pf, domain, &CreateDirPoolArgs { num_dir_credits: 256 })
            .unwrap();
        let queues = (0..queues)
            .map(|_| {
                manager
                    .create_ldb_queue(Func::Pf, domain, &CreateLdbQueueArgs::default())
                    .unwrap()
            })
            .collect();
        let port_args = CreateLdbPortArgs {
            ldb_credit_pool_id: ldb_pool,
            dir_credit_pool_id: dir_pool,
            ..CreateLdbPortArgs::default()
        };
        let ports = (0..ports)
            .map(|_| manager.create_ldb_port(Func::Pf, domain, &port_args).unwrap())
            .collect();
        Setup {
            domain,
            queues,
            ports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::*;
    use super::*;

    #[test]
    fn test_new_rejects_bad_config() {
        let config = DeviceConfig {
            num_vfs: 17,
            ..DeviceConfig::default()
        };
        let result = Manager::new(
            config,
            Box::new(crate::hw::MemRegisterFile::new()),
            Arc::new(WorkerSignal::default()),
            Arc::new(Interrupts::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unregistered_vf_is_refused() {
        let (manager, _) = manager_with(DeviceConfig {
            num_vfs: 1,
            ..DeviceConfig::default()
        });
        assert!(matches!(
            manager.check_requester(Func::Vf(0)),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            manager.check_requester(Func::Vf(1)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(manager.check_requester(Func::Pf).is_ok());
    }

    #[test]
    fn test_domain_lookup_statuses() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.domain(Func::Pf, 40),
            Err(Error::Rejected(Status::InvalidDomainId))
        ));
        assert!(matches!(
            manager.configured_domain(Func::Pf, 0),
            Err(Error::Rejected(Status::DomainNotConfigured))
        ));
    }
}
