//! Device handle: the public entry point of the resource manager.
//!
//! A [`Device`] owns one resource manager behind a single lock, the deferred
//! completion worker thread, and the CQ interrupt state. Every operation
//! takes the lock for its whole duration; only CQ interrupt waits block
//! outside it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::args::{
    CreateDirPoolArgs, CreateDirPortArgs, CreateDirQueueArgs, CreateLdbPoolArgs,
    CreateLdbPortArgs, CreateLdbQueueArgs, CreateSchedDomainArgs, MapOutcome, MapQidArgs,
    NumResources, UnmapOutcome, UnmapQidArgs,
};
use crate::config::{DeviceConfig, Revision};
use crate::error::Result;
use crate::hw::{MemRegisterFile, RegisterIo};
use crate::intr::{Interrupts, WaitOutcome};
use crate::manager::{Manager, Snapshot};
use crate::mbox::{
    encode_num_resources, map_outcome_word, unmap_outcome_word, MboxReply, MboxStatus, VfRequest,
    MBOX_INTERFACE_VERSION,
};
use crate::rsrc::Func;
use crate::worker::{self, WorkerSignal};

/// State shared between the device handle and its worker thread.
pub(crate) struct Shared {
    pub(crate) manager: Mutex<Manager>,
    pub(crate) signal: Arc<WorkerSignal>,
    pub(crate) intr: Arc<Interrupts>,
}

/// A DLB device under resource management.
///
/// All resources start out owned by the PF. Dropping the device stops its
/// worker thread.
pub struct Device {
    shared: Arc<Shared>,
    config: DeviceConfig,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.config)
            .field("worker_active", &self.worker_active())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Bring up a device over `regs`, with every resource on the PF.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for an invalid
    /// configuration, or [`Error::Io`](crate::Error::Io) if the worker thread
    /// cannot be started.
    pub fn new(config: DeviceConfig, regs: Box<dyn RegisterIo>) -> Result<Self> {
        let signal = Arc::new(WorkerSignal::default());
        let intr = Arc::new(Interrupts::new());
        let manager = Manager::new(config.clone(), regs, Arc::clone(&signal), Arc::clone(&intr))?;
        let shared = Arc::new(Shared {
            manager: Mutex::new(manager),
            signal,
            intr,
        });
        let backoff = Duration::from_micros(config.worker_backoff_us);
        let worker = worker::spawn(Arc::clone(&shared), backoff)?;
        Ok(Self {
            shared,
            config,
            worker: Some(worker),
        })
    }

    /// Device over an in-memory register file. The returned handle shares
    /// the file's storage, for injecting hardware state.
    ///
    /// # Errors
    ///
    /// Same as [`Device::new`].
    pub fn simulated(config: DeviceConfig) -> Result<(Self, MemRegisterFile)> {
        let regs = MemRegisterFile::new();
        let device = Self::new(config, Box::new(regs.clone()))?;
        Ok((device, regs))
    }

    /// Configuration the device was brought up with.
    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    // ========================================================================
    // Domain lifecycle
    // ========================================================================

    /// Resources available to `func`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) for
    /// an unknown VF.
    pub fn get_num_resources(&self, func: Func) -> Result<NumResources> {
        self.shared.manager.lock().get_num_resources(func)
    }

    /// Create a scheduling domain with the requested resources. Returns its
    /// id as the requester numbers it.
    ///
    /// # Errors
    ///
    /// Rejected with a status naming the first resource class that cannot be
    /// satisfied; nothing is allocated in that case.
    pub fn create_sched_domain(&self, func: Func, args: &CreateSchedDomainArgs) -> Result<u32> {
        self.shared.manager.lock().create_sched_domain(func, args)
    }

    /// # Errors
    ///
    /// Rejected if the domain is not configured, already started, or short
    /// of credits.
    pub fn create_ldb_pool(&self, func: Func, domain_id: u32, args: &CreateLdbPoolArgs) -> Result<u32> {
        self.shared.manager.lock().create_ldb_pool(func, domain_id, args)
    }

    /// # Errors
    ///
    /// Rejected if the domain is not configured, already started, or short
    /// of credits.
    pub fn create_dir_pool(&self, func: Func, domain_id: u32, args: &CreateDirPoolArgs) -> Result<u32> {
        self.shared.manager.lock().create_dir_pool(func, domain_id, args)
    }

    /// # Errors
    ///
    /// Rejected on invalid arguments or exhausted domain resources.
    pub fn create_ldb_queue(&self, func: Func, domain_id: u32, args: &CreateLdbQueueArgs) -> Result<u32> {
        self.shared.manager.lock().create_ldb_queue(func, domain_id, args)
    }

    /// # Errors
    ///
    /// Rejected on invalid arguments or exhausted domain resources.
    pub fn create_dir_queue(&self, func: Func, domain_id: u32, args: &CreateDirQueueArgs) -> Result<u32> {
        self.shared.manager.lock().create_dir_queue(func, domain_id, args)
    }

    /// # Errors
    ///
    /// Rejected on invalid arguments or exhausted domain resources.
    pub fn create_ldb_port(&self, func: Func, domain_id: u32, args: &CreateLdbPortArgs) -> Result<u32> {
        self.shared.manager.lock().create_ldb_port(func, domain_id, args)
    }

    /// # Errors
    ///
    /// Rejected on invalid arguments or exhausted domain resources.
    pub fn create_dir_port(&self, func: Func, domain_id: u32, args: &CreateDirPortArgs) -> Result<u32> {
        self.shared.manager.lock().create_dir_port(func, domain_id, args)
    }

    /// Start a configured domain. Configuration is refused afterwards.
    ///
    /// # Errors
    ///
    /// Rejected if the domain is not configured or already started.
    pub fn start_domain(&self, func: Func, domain_id: u32) -> Result<()> {
        self.shared.manager.lock().start_domain(func, domain_id)
    }

    /// Drain a domain and return every resource it holds to its owner.
    ///
    /// # Errors
    ///
    /// Rejected if the domain is not configured. A drain that does not
    /// finish returns [`Error::Timeout`](crate::Error::Timeout) and latches
    /// [`Device::reset_failed`].
    pub fn reset_domain(&self, func: Func, domain_id: u32) -> Result<()> {
        self.shared.manager.lock().reset_domain(func, domain_id)
    }

    // ========================================================================
    // Queue mapping
    // ========================================================================

    /// Map a load-balanced queue to a port at a priority.
    ///
    /// # Errors
    ///
    /// Rejected for an unknown port or queue, a bad priority, or a full port.
    pub fn map_qid(&self, func: Func, domain_id: u32, args: &MapQidArgs) -> Result<MapOutcome> {
        self.shared.manager.lock().map_qid(func, domain_id, args)
    }

    /// Unmap a load-balanced queue from a port.
    ///
    /// # Errors
    ///
    /// Rejected for an unknown port or a queue not mapped to it.
    pub fn unmap_qid(&self, func: Func, domain_id: u32, args: &UnmapQidArgs) -> Result<UnmapOutcome> {
        self.shared.manager.lock().unmap_qid(func, domain_id, args)
    }

    /// Unmaps of the port still waiting for its CQ to drain.
    ///
    /// # Errors
    ///
    /// Rejected for an unknown domain or port.
    pub fn pending_port_unmaps(&self, func: Func, domain_id: u32, port_id: u32) -> Result<u32> {
        self.shared.manager.lock().pending_port_unmaps(func, domain_id, port_id)
    }

    /// Run one deferred-completion pass now. Returns the transitions still
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`](crate::Error::Internal) if a slot is found
    /// in an impossible state.
    pub fn finish_pending_work(&self) -> Result<u32> {
        self.shared.manager.lock().finish_pending_work()
    }

    /// Whether the deferred worker is running or scheduled.
    #[must_use]
    pub fn worker_active(&self) -> bool {
        self.shared.signal.is_busy()
    }

    /// Wait up to `timeout` for the deferred worker to go idle.
    #[must_use]
    pub fn wait_worker_idle(&self, timeout: Duration) -> bool {
        self.shared.signal.wait_idle(timeout)
    }

    // ========================================================================
    // Ports and queues
    // ========================================================================

    /// # Errors
    ///
    /// Rejected for an unknown domain or port.
    pub fn enable_ldb_port(&self, func: Func, domain_id: u32, port_id: u32) -> Result<()> {
        self.shared.manager.lock().enable_ldb_port(func, domain_id, port_id)
    }

    /// # Errors
    ///
    /// Rejected for an unknown domain or port.
    pub fn disable_ldb_port(&self, func: Func, domain_id: u32, port_id: u32) -> Result<()> {
        self.shared.manager.lock().disable_ldb_port(func, domain_id, port_id)
    }

    /// # Errors
    ///
    /// Rejected for an unknown domain or port.
    pub fn enable_dir_port(&self, func: Func, domain_id: u32, port_id: u32) -> Result<()> {
        self.shared.manager.lock().enable_dir_port(func, domain_id, port_id)
    }

    /// # Errors
    ///
    /// Rejected for an unknown domain or port.
    pub fn disable_dir_port(&self, func: Func, domain_id: u32, port_id: u32) -> Result<()> {
        self.shared.manager.lock().disable_dir_port(func, domain_id, port_id)
    }

    /// # Errors
    ///
    /// Rejected if the domain is not configured.
    pub fn ldb_port_owned_by_domain(&self, func: Func, domain_id: u32, port_id: u32) -> Result<bool> {
        self.shared
            .manager
            .lock()
            .ldb_port_owned_by_domain(func, domain_id, port_id)
    }

    /// # Errors
    ///
    /// Rejected if the domain is not configured.
    pub fn dir_port_owned_by_domain(&self, func: Func, domain_id: u32, port_id: u32) -> Result<bool> {
        self.shared
            .manager
            .lock()
            .dir_port_owned_by_domain(func, domain_id, port_id)
    }

    /// # Errors
    ///
    /// Rejected for an unknown domain or queue.
    pub fn get_ldb_queue_depth(&self, func: Func, domain_id: u32, qid: u32) -> Result<u32> {
        self.shared.manager.lock().get_ldb_queue_depth(func, domain_id, qid)
    }

    /// # Errors
    ///
    /// Rejected for an unknown domain or queue.
    pub fn get_dir_queue_depth(&self, func: Func, domain_id: u32, qid: u32) -> Result<u32> {
        self.shared.manager.lock().get_dir_queue_depth(func, domain_id, qid)
    }

    // ========================================================================
    // Sequence numbers
    // ========================================================================

    /// Sequence numbers per queue of a group.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`](crate::Error::InvalidArgument) for a group
    /// out of range.
    pub fn get_group_sequence_numbers(&self, group: u32) -> Result<u32> {
        self.shared.manager.lock().get_group_sequence_numbers(group)
    }

    /// # Errors
    ///
    /// [`Error::InvalidArgument`](crate::Error::InvalidArgument) for a bad
    /// group or value, [`Error::PermissionDenied`](crate::Error::PermissionDenied)
    /// while the group is in use.
    pub fn set_group_sequence_numbers(&self, group: u32, value: u32) -> Result<()> {
        self.shared.manager.lock().set_group_sequence_numbers(group, value)
    }

    /// Ordered queues using a group.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`](crate::Error::InvalidArgument) for a group
    /// out of range.
    pub fn get_group_sequence_number_occupancy(&self, group: u32) -> Result<u32> {
        self.shared.manager.lock().get_group_sequence_number_occupancy(group)
    }

    // ========================================================================
    // VF resource assignment
    // ========================================================================

    /// # Errors
    ///
    /// Fails without change if the VF is locked or the PF lacks the
    /// resources.
    pub fn update_vf_sched_domains(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_sched_domains(vf, num)
    }

    /// # Errors
    ///
    /// As [`Device::update_vf_sched_domains`].
    pub fn update_vf_ldb_queues(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_ldb_queues(vf, num)
    }

    /// # Errors
    ///
    /// As [`Device::update_vf_sched_domains`].
    pub fn update_vf_ldb_ports(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_ldb_ports(vf, num)
    }

    /// # Errors
    ///
    /// As [`Device::update_vf_sched_domains`].
    pub fn update_vf_dir_ports(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_dir_ports(vf, num)
    }

    /// # Errors
    ///
    /// As [`Device::update_vf_sched_domains`].
    pub fn update_vf_ldb_credit_pools(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_ldb_credit_pools(vf, num)
    }

    /// # Errors
    ///
    /// As [`Device::update_vf_sched_domains`].
    pub fn update_vf_dir_credit_pools(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_dir_credit_pools(vf, num)
    }

    /// # Errors
    ///
    /// Fails without change if the VF is locked or no contiguous run of
    /// `num` credits exists.
    pub fn update_vf_ldb_credits(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_ldb_credits(vf, num)
    }

    /// # Errors
    ///
    /// As [`Device::update_vf_ldb_credits`].
    pub fn update_vf_dir_credits(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_dir_credits(vf, num)
    }

    /// # Errors
    ///
    /// As [`Device::update_vf_ldb_credits`].
    pub fn update_vf_hist_list_entries(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_hist_list_entries(vf, num)
    }

    /// # Errors
    ///
    /// As [`Device::update_vf_ldb_credits`].
    pub fn update_vf_atomic_inflights(&self, vf: u32, num: u32) -> Result<()> {
        self.shared.manager.lock().update_vf_atomic_inflights(vf, num)
    }

    /// Return everything available to a VF to the PF.
    ///
    /// # Errors
    ///
    /// Fails without change if the VF is locked.
    pub fn reset_vf_resources(&self, vf: u32) -> Result<()> {
        self.shared.manager.lock().reset_vf_resources(vf)
    }

    /// Freeze a VF's assignment and give its resources virtual ids.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`](crate::Error::InvalidArgument) for an
    /// unknown VF.
    pub fn lock_vf(&self, vf: u32) -> Result<()> {
        self.shared.manager.lock().lock_vf(vf)
    }

    /// # Errors
    ///
    /// [`Error::InvalidArgument`](crate::Error::InvalidArgument) for an
    /// unknown VF.
    pub fn unlock_vf(&self, vf: u32) -> Result<()> {
        self.shared.manager.lock().unlock_vf(vf)
    }

    /// # Errors
    ///
    /// [`Error::InvalidArgument`](crate::Error::InvalidArgument) for an
    /// unknown VF.
    pub fn vf_is_locked(&self, vf: u32) -> Result<bool> {
        self.shared.manager.lock().vf_is_locked(vf)
    }

    /// Reset every domain a VF has in use.
    ///
    /// # Errors
    ///
    /// The first domain reset failure.
    pub fn reset_vf(&self, vf: u32) -> Result<()> {
        self.shared.manager.lock().reset_vf(vf)
    }

    // ========================================================================
    // CQ interrupts
    // ========================================================================

    /// Arm a port's CQ interrupt and block until it fires, the port is
    /// disabled, the device is reset, or `timeout` passes.
    ///
    /// The device lock is not held while blocked.
    ///
    /// # Errors
    ///
    /// Rejected for an unknown domain or port.
    pub fn wait_for_cq_interrupt(
        &self,
        func: Func,
        domain_id: u32,
        port_id: u32,
        is_ldb: bool,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome> {
        let id = self
            .shared
            .manager
            .lock()
            .arm_cq_interrupt(func, domain_id, port_id, is_ldb)?;
        tracing::trace!(%func, domain_id, port_id, is_ldb, "waiting for cq interrupt");
        self.shared.intr.wait(is_ldb, id, timeout)
    }

    /// Deliver a port's CQ interrupt.
    ///
    /// # Errors
    ///
    /// Rejected for an unknown domain or port.
    pub fn wake_cq(&self, func: Func, domain_id: u32, port_id: u32, is_ldb: bool) -> Result<()> {
        let id = self
            .shared
            .manager
            .lock()
            .cq_port(func, domain_id, port_id, is_ldb)?;
        self.shared.intr.wake(is_ldb, id)
    }

    /// Release every CQ waiter ahead of a device reset and give the worker
    /// up to `reset_timeout_s` to finish. Returns whether it went idle.
    #[must_use]
    pub fn begin_device_reset(&self) -> bool {
        tracing::info!("device reset starting");
        self.shared.intr.notify_reset();
        self.wait_worker_idle(Duration::from_secs(self.config.reset_timeout_s))
    }

    /// Allow CQ waits again after a device reset.
    pub fn end_device_reset(&self) {
        self.shared.intr.clear_reset();
        tracing::info!("device reset complete");
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Whether a domain reset has failed. Domain creation is refused once
    /// set.
    #[must_use]
    pub fn reset_failed(&self) -> bool {
        self.shared.manager.lock().reset_failed
    }

    /// Point-in-time copy of the registry.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.shared.manager.lock().snapshot()
    }

    // ========================================================================
    // Mailbox
    // ========================================================================

    /// Serve one mailbox request from VF `vf` and return the reply bytes.
    ///
    /// Operation failures travel in the reply; only a reply that cannot be
    /// encoded is an error here.
    ///
    /// # Errors
    ///
    /// [`Error::Mailbox`](crate::Error::Mailbox) if the reply overflows the
    /// mailbox.
    pub fn handle_vf_request(&self, vf: u32, request: &[u8]) -> Result<Vec<u8>> {
        let reply = match VfRequest::decode(request) {
            Ok(req) => {
                tracing::debug!(vf, cmd = ?req.cmd(), "mailbox request");
                self.serve_vf_request(vf, req)
            }
            Err(status) => {
                tracing::debug!(vf, ?status, "undecodable mailbox request");
                MboxReply::refused(status)
            }
        };
        reply.encode()
    }

    fn serve_vf_request(&self, vf: u32, req: VfRequest) -> MboxReply {
        let func = Func::Vf(vf);
        let one = |r: Result<u32>| r.map(|v| vec![v]);
        let none = |r: Result<()>| r.map(|()| Vec::new());
        let flag = |r: Result<bool>| r.map(|b| vec![u32::from(b)]);

        let result = match req {
            VfRequest::Register {
                min_version,
                max_version,
            } => {
                if !(min_version..=max_version).contains(&MBOX_INTERFACE_VERSION) {
                    return MboxReply::refused(MboxStatus::VersionMismatch);
                }
                self.lock_vf(vf).map(|()| vec![MBOX_INTERFACE_VERSION, vf])
            }
            VfRequest::Unregister => {
                let mut manager = self.shared.manager.lock();
                manager
                    .reset_vf(vf)
                    .and_then(|()| manager.unlock_vf(vf))
                    .map(|()| Vec::new())
            }
            VfRequest::GetNumResources => self
                .get_num_resources(func)
                .map(|num| encode_num_resources(&num)),
            VfRequest::CreateSchedDomain(args) => one(self.create_sched_domain(func, &args)),
            VfRequest::ResetSchedDomain { domain_id } => none(self.reset_domain(func, domain_id)),
            VfRequest::CreateLdbPool { domain_id, args } => {
                one(self.create_ldb_pool(func, domain_id, &args))
            }
            VfRequest::CreateDirPool { domain_id, args } => {
                one(self.create_dir_pool(func, domain_id, &args))
            }
            VfRequest::CreateLdbQueue { domain_id, args } => {
                one(self.create_ldb_queue(func, domain_id, &args))
            }
            VfRequest::CreateDirQueue { domain_id, args } => {
                one(self.create_dir_queue(func, domain_id, &args))
            }
            VfRequest::CreateLdbPort { domain_id, args } => {
                one(self.create_ldb_port(func, domain_id, &args))
            }
            VfRequest::CreateDirPort { domain_id, args } => {
                one(self.create_dir_port(func, domain_id, &args))
            }
            VfRequest::EnableLdbPort { domain_id, port_id } => {
                none(self.enable_ldb_port(func, domain_id, port_id))
            }
            VfRequest::DisableLdbPort { domain_id, port_id } => {
                none(self.disable_ldb_port(func, domain_id, port_id))
            }
            VfRequest::EnableDirPort { domain_id, port_id } => {
                none(self.enable_dir_port(func, domain_id, port_id))
            }
            VfRequest::DisableDirPort { domain_id, port_id } => {
                none(self.disable_dir_port(func, domain_id, port_id))
            }
            VfRequest::LdbPortOwnedByDomain { domain_id, port_id } => {
                flag(self.ldb_port_owned_by_domain(func, domain_id, port_id))
            }
            VfRequest::DirPortOwnedByDomain { domain_id, port_id } => {
                flag(self.dir_port_owned_by_domain(func, domain_id, port_id))
            }
            VfRequest::MapQid { domain_id, args } => self
                .map_qid(func, domain_id, &args)
                .map(|o| vec![map_outcome_word(o)]),
            VfRequest::UnmapQid { domain_id, args } => self
                .unmap_qid(func, domain_id, &args)
                .map(|o| vec![unmap_outcome_word(o)]),
            VfRequest::StartDomain { domain_id } => none(self.start_domain(func, domain_id)),
            VfRequest::ArmCqIntr {
                domain_id,
                port_id,
                is_ldb,
            } => self
                .shared
                .manager
                .lock()
                .arm_cq_interrupt(func, domain_id, port_id, is_ldb)
                .map(|_| Vec::new()),
            VfRequest::AckVfFlrDone => Ok(Vec::new()),
            VfRequest::GetSnAllocation { group } => one(self.get_group_sequence_numbers(group)),
            VfRequest::GetLdbQueueDepth {
                domain_id,
                queue_id,
            } => one(self.get_ldb_queue_depth(func, domain_id, queue_id)),
            VfRequest::GetDirQueueDepth {
                domain_id,
                queue_id,
            } => one(self.get_dir_queue_depth(func, domain_id, queue_id)),
            VfRequest::PendingPortUnmaps { domain_id, port_id } => {
                one(self.pending_port_unmaps(func, domain_id, port_id))
            }
            VfRequest::QueryCqPollMode => Ok(vec![u32::from(self.config.revision >= Revision::B0)]),
            VfRequest::GetSnOccupancy { group } => {
                one(self.get_group_sequence_number_occupancy(group))
            }
            VfRequest::Unsupported(cmd) => {
                tracing::debug!(vf, ?cmd, "unsupported mailbox command");
                return MboxReply::refused(MboxStatus::InvalidCmdType);
            }
        };

        match result {
            Ok(values) => MboxReply::ok(values),
            Err(e) => {
                tracing::debug!(vf, error = %e, "mailbox request failed");
                MboxReply::failed(&e)
            }
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shared.signal.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}
