//! Resource manager for DLB hardware queue-management devices.
//!
//! This crate partitions a device's queues, ports, credits and history-list
//! entries into scheduling domains, maps load-balanced queues onto consumer
//! ports (deferring the transition while traffic drains), and moves resources
//! between the physical function and its virtual functions.
//!
//! # Example
//!
//! ```
//! use dlb_rm_core::args::{CreateLdbQueueArgs, CreateSchedDomainArgs};
//! use dlb_rm_core::{Device, DeviceConfig, Func};
//!
//! let (device, _regs) = Device::simulated(DeviceConfig::default()).unwrap();
//!
//! let args = CreateSchedDomainArgs {
//!     num_ldb_queues: 2,
//!     num_ldb_ports: 1,
//!     num_ldb_credits: 512,
//!     ..CreateSchedDomainArgs::default()
//! };
//! let domain = device.create_sched_domain(Func::Pf, &args).unwrap();
//! let queue = device
//!     .create_ldb_queue(Func::Pf, domain, &CreateLdbQueueArgs::default())
//!     .unwrap();
//! device.start_domain(Func::Pf, domain).unwrap();
//!
//! assert_eq!(device.get_ldb_queue_depth(Func::Pf, domain, queue).unwrap(), 0);
//! device.reset_domain(Func::Pf, domain).unwrap();
//! ```

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod args;
pub mod bitmap;
pub mod config;
mod device;
mod error;
pub mod freelist;
pub mod hw;
pub mod intr;
mod manager;
pub mod mbox;
mod rsrc;
mod worker;

pub use args::{MapOutcome, NumResources, UnmapOutcome};
pub use config::{load_config, DeviceConfig, Revision};
pub use device::Device;
pub use error::{Error, ErrorKind, Result, Status};
pub use hw::{MemRegisterFile, MmioRegisters, RegisterIo};
pub use intr::WaitOutcome;
pub use manager::{DomainSnapshot, FunctionSnapshot, QidMapping, SnGroupSnapshot, Snapshot};
pub use rsrc::{Func, QidMapState};

/// Virtual functions a device can expose.
pub const MAX_NUM_VFS: usize = 16;
/// Scheduling domains.
pub const MAX_NUM_DOMAINS: usize = 32;
/// Load-balanced queues.
pub const MAX_NUM_LDB_QUEUES: usize = 128;
/// Load-balanced ports.
pub const MAX_NUM_LDB_PORTS: usize = 64;
/// Directed port/queue pairs.
pub const MAX_NUM_DIR_PORTS: usize = 128;
/// Load-balanced credits (QED entries).
pub const MAX_NUM_LDB_CREDITS: usize = 16384;
/// Directed credits (DQED entries).
pub const MAX_NUM_DIR_CREDITS: usize = 4096;
/// Load-balanced credit pools.
pub const MAX_NUM_LDB_CREDIT_POOLS: usize = 64;
/// Directed credit pools.
pub const MAX_NUM_DIR_CREDIT_POOLS: usize = 64;
/// History-list entries.
pub const MAX_NUM_HIST_LIST_ENTRIES: usize = 5120;
/// Atomic inflight storage (AQED entries).
pub const MAX_NUM_AQOS_ENTRIES: usize = 2048;
/// Queue slots in one load-balanced CQ.
pub const QIDS_PER_LDB_CQ: usize = 8;
/// Priority levels of a queue-to-port mapping.
pub const QID_PRIORITIES: usize = 8;
/// Sequence-number groups.
pub const SN_GROUPS: usize = 4;
/// Sequence-number allocation modes per group.
pub const SN_MODES: usize = 6;

/// Upper bound on a load-balanced queue's inflight limit.
pub const MAX_QID_INFLIGHTS: u32 = 4096;
/// Upper bound on a port's credit quantum.
pub const MAX_PORT_CREDIT_QUANTUM: u32 = 1023;
/// Smallest CQ depth.
pub const MIN_CQ_DEPTH: u32 = 8;
/// Largest CQ depth.
pub const MAX_CQ_DEPTH: u32 = 1024;
