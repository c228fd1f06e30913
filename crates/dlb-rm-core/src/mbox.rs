//! Mailbox protocol between the PF and its VFs.
//!
//! A VF that is not co-resident with the resource manager sends its requests
//! through a mailbox: a fixed-size buffer per direction plus a doorbell. Each
//! buffer is split so a request and a reply can be in flight at once:
//!
//! | Direction | Requests | Replies |
//! |---|---|---|
//! | VF to PF | 240 bytes | 16 bytes |
//! | PF to VF | 16 bytes | 48 bytes |
//!
//! Messages are sequences of little-endian 32-bit words. A request starts
//! with its command type; a PF reply starts with a mailbox status, the
//! operation's errno and its device status, followed by result words.
//!
//! The transport itself (register windows, doorbells, interrupts) sits
//! behind [`MboxTransport`]; [`send_sync`] adds the bounded wait for a reply.

use std::sync::Arc;
use std::time::Duration;

use nix::libc;
use serde::Serialize;

use crate::args::{
    CreateDirPoolArgs, CreateDirPortArgs, CreateDirQueueArgs, CreateLdbPoolArgs,
    CreateLdbPortArgs, CreateLdbQueueArgs, CreateSchedDomainArgs, MapOutcome, MapQidArgs,
    NumResources, UnmapOutcome, UnmapQidArgs,
};
use crate::device::Device;
use crate::error::{Error, Result, Status};

/// Protocol version spoken by this implementation.
pub const MBOX_INTERFACE_VERSION: u32 = 1;

/// VF to PF request section.
pub const VF2PF_REQ_BYTES: usize = 240;
/// VF to PF reply section.
pub const VF2PF_RESP_BYTES: usize = 16;
/// PF to VF reply section.
pub const PF2VF_RESP_BYTES: usize = 48;
/// PF to VF request section.
pub const PF2VF_REQ_BYTES: usize = 16;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$doc:meta])* $variant:ident,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[repr(u32)]
        pub enum $name {
            $($(#[$doc])* $variant,)+
        }

        impl $name {
            /// Every value in wire order.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Decode from the wire value.
            #[must_use]
            pub fn from_u32(value: u32) -> Option<Self> {
                Self::ALL.get(value as usize).copied()
            }

            /// Wire value.
            #[must_use]
            pub fn as_u32(self) -> u32 {
                self as u32
            }
        }
    };
}

wire_enum! {
    /// Commands a VF sends to the PF.
    MboxCmd {
        /// Announce the VF driver; locks its resource assignment.
        Register,
        /// Withdraw the VF driver; resets its domains and unlocks it.
        Unregister,
        /// Query available resources.
        GetNumResources,
        /// Create a scheduling domain.
        CreateSchedDomain,
        /// Reset a scheduling domain.
        ResetSchedDomain,
        /// Create a load-balanced credit pool.
        CreateLdbPool,
        /// Create a directed credit pool.
        CreateDirPool,
        /// Create a load-balanced queue.
        CreateLdbQueue,
        /// Create a directed queue.
        CreateDirQueue,
        /// Create a load-balanced port.
        CreateLdbPort,
        /// Create a directed port.
        CreateDirPort,
        /// Enable a load-balanced port.
        EnableLdbPort,
        /// Disable a load-balanced port.
        DisableLdbPort,
        /// Enable a directed port.
        EnableDirPort,
        /// Disable a directed port.
        DisableDirPort,
        /// Whether a load-balanced port belongs to a domain.
        LdbPortOwnedByDomain,
        /// Whether a directed port belongs to a domain.
        DirPortOwnedByDomain,
        /// Map a queue to a port.
        MapQid,
        /// Unmap a queue from a port.
        UnmapQid,
        /// Start a domain.
        StartDomain,
        /// Route a load-balanced port's interrupt.
        EnableLdbPortIntr,
        /// Route a directed port's interrupt.
        EnableDirPortIntr,
        /// Arm a CQ interrupt.
        ArmCqIntr,
        /// Query resources in use.
        GetNumUsedResources,
        /// Start CQ schedule counting.
        InitCqSchedCount,
        /// Read CQ schedule counts.
        CollectCqSchedCount,
        /// Acknowledge the end of a VF reset.
        AckVfFlrDone,
        /// Sequence numbers per queue of a group.
        GetSnAllocation,
        /// Depth of a load-balanced queue.
        GetLdbQueueDepth,
        /// Depth of a directed queue.
        GetDirQueueDepth,
        /// Unmaps still draining on a port.
        PendingPortUnmaps,
        /// CQ poll mode of the device.
        QueryCqPollMode,
        /// Occupied slots of a sequence-number group.
        GetSnOccupancy,
    }
}

wire_enum! {
    /// Commands the PF sends to a VF.
    VfCmd {
        /// Alert about one of the VF's domains.
        DomainAlert,
        /// Device-level notification.
        Notification,
        /// Whether the VF has the device open.
        InUse,
    }
}

wire_enum! {
    /// Mailbox-level outcome of an exchange, separate from the outcome of
    /// the operation it carried.
    MboxStatus {
        /// The command was delivered and handled.
        Success,
        /// Unknown or unsupported command.
        InvalidCmdType,
        /// No common protocol version.
        VersionMismatch,
        /// Out-of-sequence message, first phase expected.
        ExpectedPhaseOne,
        /// Out-of-sequence message, second phase expected.
        ExpectedPhaseTwo,
        /// The message names a VF other than the sender.
        InvalidOwnerVf,
    }
}

wire_enum! {
    /// Device-level notifications sent to VFs.
    VfNotification {
        /// The device is about to be reset.
        PreReset,
        /// The device reset completed.
        PostReset,
    }
}

// ============================================================================
// Word codec
// ============================================================================

fn to_bytes(words: &[u32], limit: usize, what: &str) -> Result<Vec<u8>> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    if bytes.len() > limit {
        return Err(Error::Mailbox(format!(
            "{what} of {} bytes exceeds the {limit}-byte mailbox",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Sequential reader over message words.
struct Words {
    words: Vec<u32>,
    pos: usize,
}

impl Words {
    fn new(bytes: &[u8]) -> Self {
        Self {
            words: to_words(bytes),
            pos: 0,
        }
    }

    fn next(&mut self) -> Option<u32> {
        let w = self.words.get(self.pos).copied()?;
        self.pos += 1;
        Some(w)
    }

    fn next_u16(&mut self) -> Option<u16> {
        u16::try_from(self.next()?).ok()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn next_i32(&mut self) -> Option<i32> {
        Some(self.next()? as i32)
    }

    fn rest(&mut self) -> Vec<u32> {
        let rest = self.words.get(self.pos..).unwrap_or_default().to_vec();
        self.pos = self.words.len();
        rest
    }
}

/// Two's-complement word of a signed field.
#[allow(clippy::cast_sign_loss)]
const fn signed_word(value: i32) -> u32 {
    value as u32
}

const fn pack16(lo: u32, hi: u32) -> u32 {
    (lo & 0xffff) | ((hi & 0xffff) << 16)
}

const fn unpack16(word: u32) -> (u32, u32) {
    (word & 0xffff, word >> 16)
}

/// Resource counts packed into nine words.
#[must_use]
pub fn encode_num_resources(num: &NumResources) -> Vec<u32> {
    vec![
        pack16(num.num_sched_domains, num.num_ldb_queues),
        pack16(num.num_ldb_ports, num.num_dir_ports),
        pack16(num.num_ldb_credit_pools, num.num_dir_credit_pools),
        num.num_atomic_inflights,
        num.max_contiguous_atomic_inflights,
        num.num_hist_list_entries,
        num.max_contiguous_hist_list_entries,
        pack16(num.num_ldb_credits, num.max_contiguous_ldb_credits),
        pack16(num.num_dir_credits, num.max_contiguous_dir_credits),
    ]
}

/// Inverse of [`encode_num_resources`].
///
/// # Errors
///
/// Returns [`Error::Mailbox`] if fewer than nine words are given.
pub fn decode_num_resources(words: &[u32]) -> Result<NumResources> {
    let [w0, w1, w2, w3, w4, w5, w6, w7, w8] = words
        .get(..9)
        .and_then(|w| <[u32; 9]>::try_from(w).ok())
        .ok_or_else(|| Error::Mailbox("short resource reply".to_string()))?;
    let (num_sched_domains, num_ldb_queues) = unpack16(w0);
    let (num_ldb_ports, num_dir_ports) = unpack16(w1);
    let (num_ldb_credit_pools, num_dir_credit_pools) = unpack16(w2);
    let (num_ldb_credits, max_contiguous_ldb_credits) = unpack16(w7);
    let (num_dir_credits, max_contiguous_dir_credits) = unpack16(w8);
    Ok(NumResources {
        num_sched_domains,
        num_ldb_queues,
        num_ldb_ports,
        num_dir_ports,
        num_atomic_inflights: w3,
        max_contiguous_atomic_inflights: w4,
        num_hist_list_entries: w5,
        max_contiguous_hist_list_entries: w6,
        num_ldb_credits,
        max_contiguous_ldb_credits,
        num_dir_credits,
        max_contiguous_dir_credits,
        num_ldb_credit_pools,
        num_dir_credit_pools,
    })
}

/// Wire value of a map outcome.
#[must_use]
pub fn map_outcome_word(outcome: MapOutcome) -> u32 {
    match outcome {
        MapOutcome::Mapped => 0,
        MapOutcome::Deferred => 1,
        MapOutcome::PriorityChanged => 2,
        MapOutcome::Pending => 3,
    }
}

fn map_outcome_from_word(word: u32) -> Result<MapOutcome> {
    match word {
        0 => Ok(MapOutcome::Mapped),
        1 => Ok(MapOutcome::Deferred),
        2 => Ok(MapOutcome::PriorityChanged),
        3 => Ok(MapOutcome::Pending),
        _ => Err(Error::Mailbox(format!("unknown map outcome {word}"))),
    }
}

/// Wire value of an unmap outcome.
#[must_use]
pub fn unmap_outcome_word(outcome: UnmapOutcome) -> u32 {
    match outcome {
        UnmapOutcome::Unmapped => 0,
        UnmapOutcome::Deferred => 1,
    }
}

fn unmap_outcome_from_word(word: u32) -> Result<UnmapOutcome> {
    match word {
        0 => Ok(UnmapOutcome::Unmapped),
        1 => Ok(UnmapOutcome::Deferred),
        _ => Err(Error::Mailbox(format!("unknown unmap outcome {word}"))),
    }
}

// ============================================================================
// VF to PF requests
// ============================================================================

/// A decoded VF request. Ids are the VF's virtual ids.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum VfRequest {
    Register { min_version: u32, max_version: u32 },
    Unregister,
    GetNumResources,
    CreateSchedDomain(CreateSchedDomainArgs),
    ResetSchedDomain { domain_id: u32 },
    CreateLdbPool { domain_id: u32, args: CreateLdbPoolArgs },
    CreateDirPool { domain_id: u32, args: CreateDirPoolArgs },
    CreateLdbQueue { domain_id: u32, args: CreateLdbQueueArgs },
    CreateDirQueue { domain_id: u32, args: CreateDirQueueArgs },
    CreateLdbPort { domain_id: u32, args: CreateLdbPortArgs },
    CreateDirPort { domain_id: u32, args: CreateDirPortArgs },
    EnableLdbPort { domain_id: u32, port_id: u32 },
    DisableLdbPort { domain_id: u32, port_id: u32 },
    EnableDirPort { domain_id: u32, port_id: u32 },
    DisableDirPort { domain_id: u32, port_id: u32 },
    LdbPortOwnedByDomain { domain_id: u32, port_id: u32 },
    DirPortOwnedByDomain { domain_id: u32, port_id: u32 },
    MapQid { domain_id: u32, args: MapQidArgs },
    UnmapQid { domain_id: u32, args: UnmapQidArgs },
    StartDomain { domain_id: u32 },
    ArmCqIntr { domain_id: u32, port_id: u32, is_ldb: bool },
    AckVfFlrDone,
    GetSnAllocation { group: u32 },
    GetLdbQueueDepth { domain_id: u32, queue_id: u32 },
    GetDirQueueDepth { domain_id: u32, queue_id: u32 },
    PendingPortUnmaps { domain_id: u32, port_id: u32 },
    QueryCqPollMode,
    GetSnOccupancy { group: u32 },
    /// A known command this PF does not serve.
    Unsupported(MboxCmd),
}

impl VfRequest {
    /// Command type on the wire.
    #[must_use]
    pub fn cmd(&self) -> MboxCmd {
        match self {
            Self::Register { .. } => MboxCmd::Register,
            Self::Unregister => MboxCmd::Unregister,
            Self::GetNumResources => MboxCmd::GetNumResources,
            Self::CreateSchedDomain(_) => MboxCmd::CreateSchedDomain,
            Self::ResetSchedDomain { .. } => MboxCmd::ResetSchedDomain,
            Self::CreateLdbPool { .. } => MboxCmd::CreateLdbPool,
            Self::CreateDirPool { .. } => MboxCmd::CreateDirPool,
            Self::CreateLdbQueue { .. } => MboxCmd::CreateLdbQueue,
            Self::CreateDirQueue { .. } => MboxCmd::CreateDirQueue,
            Self::CreateLdbPort { .. } => MboxCmd::CreateLdbPort,
            Self::CreateDirPort { .. } => MboxCmd::CreateDirPort,
            Self::EnableLdbPort { .. } => MboxCmd::EnableLdbPort,
            Self::DisableLdbPort { .. } => MboxCmd::DisableLdbPort,
            Self::EnableDirPort { .. } => MboxCmd::EnableDirPort,
            Self::DisableDirPort { .. } => MboxCmd::DisableDirPort,
            Self::LdbPortOwnedByDomain { .. } => MboxCmd::LdbPortOwnedByDomain,
            Self::DirPortOwnedByDomain { .. } => MboxCmd::DirPortOwnedByDomain,
            Self::MapQid { .. } => MboxCmd::MapQid,
            Self::UnmapQid { .. } => MboxCmd::UnmapQid,
            Self::StartDomain { .. } => MboxCmd::StartDomain,
            Self::ArmCqIntr { .. } => MboxCmd::ArmCqIntr,
            Self::AckVfFlrDone => MboxCmd::AckVfFlrDone,
            Self::GetSnAllocation { .. } => MboxCmd::GetSnAllocation,
            Self::GetLdbQueueDepth { .. } => MboxCmd::GetLdbQueueDepth,
            Self::GetDirQueueDepth { .. } => MboxCmd::GetDirQueueDepth,
            Self::PendingPortUnmaps { .. } => MboxCmd::PendingPortUnmaps,
            Self::QueryCqPollMode => MboxCmd::QueryCqPollMode,
            Self::GetSnOccupancy { .. } => MboxCmd::GetSnOccupancy,
            Self::Unsupported(cmd) => *cmd,
        }
    }

    /// Serialize into the VF to PF request section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mailbox`] if the request does not fit.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = vec![self.cmd().as_u32()];
        match self {
            Self::Register {
                min_version,
                max_version,
            } => w.extend([*min_version, *max_version]),
            Self::Unregister
            | Self::GetNumResources
            | Self::AckVfFlrDone
            | Self::QueryCqPollMode
            | Self::Unsupported(_) => {}
            Self::CreateSchedDomain(a) => w.extend([
                a.num_ldb_queues,
                a.num_ldb_ports,
                a.num_dir_ports,
                a.num_atomic_inflights,
                a.num_hist_list_entries,
                a.num_ldb_credits,
                a.num_dir_credits,
                a.num_ldb_credit_pools,
                a.num_dir_credit_pools,
            ]),
            Self::ResetSchedDomain { domain_id } | Self::StartDomain { domain_id } => {
                w.push(*domain_id);
            }
            Self::CreateLdbPool { domain_id, args } => {
                w.extend([*domain_id, args.num_ldb_credits]);
            }
            Self::CreateDirPool { domain_id, args } => {
                w.extend([*domain_id, args.num_dir_credits]);
            }
            Self::CreateLdbQueue { domain_id, args } => w.extend([
                *domain_id,
                args.num_sequence_numbers,
                args.num_qid_inflights,
                args.num_atomic_inflights,
            ]),
            Self::CreateDirQueue { domain_id, args } => {
                w.extend([*domain_id, signed_word(args.port_id)]);
            }
            Self::CreateLdbPort { domain_id, args } => w.extend([
                *domain_id,
                args.ldb_credit_pool_id,
                args.dir_credit_pool_id,
                args.ldb_credit_high_watermark.into(),
                args.ldb_credit_low_watermark.into(),
                args.ldb_credit_quantum.into(),
                args.dir_credit_high_watermark.into(),
                args.dir_credit_low_watermark.into(),
                args.dir_credit_quantum.into(),
                args.cq_depth.into(),
                args.cq_depth_threshold.into(),
                args.cq_history_list_size.into(),
            ]),
            Self::CreateDirPort { domain_id, args } => w.extend([
                *domain_id,
                args.ldb_credit_pool_id,
                args.dir_credit_pool_id,
                args.ldb_credit_high_watermark.into(),
                args.ldb_credit_low_watermark.into(),
                args.ldb_credit_quantum.into(),
                args.dir_credit_high_watermark.into(),
                args.dir_credit_low_watermark.into(),
                args.dir_credit_quantum.into(),
                args.cq_depth.into(),
                args.cq_depth_threshold.into(),
                signed_word(args.queue_id),
            ]),
            Self::EnableLdbPort { domain_id, port_id }
            | Self::DisableLdbPort { domain_id, port_id }
            | Self::EnableDirPort { domain_id, port_id }
            | Self::DisableDirPort { domain_id, port_id }
            | Self::LdbPortOwnedByDomain { domain_id, port_id }
            | Self::DirPortOwnedByDomain { domain_id, port_id }
            | Self::PendingPortUnmaps { domain_id, port_id } => w.extend([*domain_id, *port_id]),
            Self::MapQid { domain_id, args } => {
                w.extend([*domain_id, args.port_id, args.qid, args.priority]);
            }
            Self::UnmapQid { domain_id, args } => {
                w.extend([*domain_id, args.port_id, args.qid]);
            }
            Self::ArmCqIntr {
                domain_id,
                port_id,
                is_ldb,
            } => w.extend([*domain_id, *port_id, u32::from(*is_ldb)]),
            Self::GetSnAllocation { group } | Self::GetSnOccupancy { group } => w.push(*group),
            Self::GetLdbQueueDepth {
                domain_id,
                queue_id,
            }
            | Self::GetDirQueueDepth {
                domain_id,
                queue_id,
            } => w.extend([*domain_id, *queue_id]),
        }
        to_bytes(&w, VF2PF_REQ_BYTES, "request")
    }

    /// Parse a VF request.
    ///
    /// # Errors
    ///
    /// Returns the mailbox status to answer with when the command is unknown
    /// or truncated.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, MboxStatus> {
        let mut w = Words::new(bytes);
        let cmd = w
            .next()
            .and_then(MboxCmd::from_u32)
            .ok_or(MboxStatus::InvalidCmdType)?;
        Self::decode_body(cmd, &mut w).ok_or(MboxStatus::InvalidCmdType)
    }

    fn decode_body(cmd: MboxCmd, w: &mut Words) -> Option<Self> {
        let req = match cmd {
            MboxCmd::Register => Self::Register {
                min_version: w.next()?,
                max_version: w.next()?,
            },
            MboxCmd::Unregister => Self::Unregister,
            MboxCmd::GetNumResources => Self::GetNumResources,
            MboxCmd::CreateSchedDomain => Self::CreateSchedDomain(CreateSchedDomainArgs {
                num_ldb_queues: w.next()?,
                num_ldb_ports: w.next()?,
                num_dir_ports: w.next()?,
                num_atomic_inflights: w.next()?,
                num_hist_list_entries: w.next()?,
                num_ldb_credits: w.next()?,
                num_dir_credits: w.next()?,
                num_ldb_credit_pools: w.next()?,
                num_dir_credit_pools: w.next()?,
            }),
            MboxCmd::ResetSchedDomain => Self::ResetSchedDomain {
                domain_id: w.next()?,
            },
            MboxCmd::CreateLdbPool => Self::CreateLdbPool {
                domain_id: w.next()?,
                args: CreateLdbPoolArgs {
                    num_ldb_credits: w.next()?,
                },
            },
            MboxCmd::CreateDirPool => Self::CreateDirPool {
                domain_id: w.next()?,
                args: CreateDirPoolArgs {
                    num_dir_credits: w.next()?,
                },
            },
            MboxCmd::CreateLdbQueue => Self::CreateLdbQueue {
                domain_id: w.next()?,
                args: CreateLdbQueueArgs {
                    num_sequence_numbers: w.next()?,
                    num_qid_inflights: w.next()?,
                    num_atomic_inflights: w.next()?,
                },
            },
            MboxCmd::CreateDirQueue => Self::CreateDirQueue {
                domain_id: w.next()?,
                args: CreateDirQueueArgs {
                    port_id: w.next_i32()?,
                },
            },
            MboxCmd::CreateLdbPort => Self::CreateLdbPort {
                domain_id: w.next()?,
                args: CreateLdbPortArgs {
                    ldb_credit_pool_id: w.next()?,
                    dir_credit_pool_id: w.next()?,
                    ldb_credit_high_watermark: w.next_u16()?,
                    ldb_credit_low_watermark: w.next_u16()?,
                    ldb_credit_quantum: w.next_u16()?,
                    dir_credit_high_watermark: w.next_u16()?,
                    dir_credit_low_watermark: w.next_u16()?,
                    dir_credit_quantum: w.next_u16()?,
                    cq_depth: w.next_u16()?,
                    cq_depth_threshold: w.next_u16()?,
                    cq_history_list_size: w.next_u16()?,
                },
            },
            MboxCmd::CreateDirPort => Self::CreateDirPort {
                domain_id: w.next()?,
                args: CreateDirPortArgs {
                    ldb_credit_pool_id: w.next()?,
                    dir_credit_pool_id: w.next()?,
                    ldb_credit_high_watermark: w.next_u16()?,
                    ldb_credit_low_watermark: w.next_u16()?,
                    ldb_credit_quantum: w.next_u16()?,
                    dir_credit_high_watermark: w.next_u16()?,
                    dir_credit_low_watermark: w.next_u16()?,
                    dir_credit_quantum: w.next_u16()?,
                    cq_depth: w.next_u16()?,
                    cq_depth_threshold: w.next_u16()?,
                    queue_id: w.next_i32()?,
                },
            },
            MboxCmd::EnableLdbPort => Self::EnableLdbPort {
                domain_id: w.next()?,
                port_id: w.next()?,
            },
            MboxCmd::DisableLdbPort => Self::DisableLdbPort {
                domain_id: w.next()?,
                port_id: w.next()?,
            },
            MboxCmd::EnableDirPort => Self::EnableDirPort {
                domain_id: w.next()?,
                port_id: w.next()?,
            },
            MboxCmd::DisableDirPort => Self::DisableDirPort {
                domain_id: w.next()?,
                port_id: w.next()?,
            },
            MboxCmd::LdbPortOwnedByDomain => Self::LdbPortOwnedByDomain {
                domain_id: w.next()?,
                port_id: w.next()?,
            },
            MboxCmd::DirPortOwnedByDomain => Self::DirPortOwnedByDomain {
                domain_id: w.next()?,
                port_id: w.next()?,
            },
            MboxCmd::MapQid => Self::MapQid {
                domain_id: w.next()?,
                args: MapQidArgs {
                    port_id: w.next()?,
                    qid: w.next()?,
                    priority: w.next()?,
                },
            },
            MboxCmd::UnmapQid => Self::UnmapQid {
                domain_id: w.next()?,
                args: UnmapQidArgs {
                    port_id: w.next()?,
                    qid: w.next()?,
                },
            },
            MboxCmd::StartDomain => Self::StartDomain {
                domain_id: w.next()?,
            },
            MboxCmd::ArmCqIntr => Self::ArmCqIntr {
                domain_id: w.next()?,
                port_id: w.next()?,
                is_ldb: w.next()? != 0,
            },
            MboxCmd::AckVfFlrDone => Self::AckVfFlrDone,
            MboxCmd::GetSnAllocation => Self::GetSnAllocation { group: w.next()? },
            MboxCmd::GetLdbQueueDepth => Self::GetLdbQueueDepth {
                domain_id: w.next()?,
                queue_id: w.next()?,
            },
            MboxCmd::GetDirQueueDepth => Self::GetDirQueueDepth {
                domain_id: w.next()?,
                queue_id: w.next()?,
            },
            MboxCmd::PendingPortUnmaps => Self::PendingPortUnmaps {
                domain_id: w.next()?,
                port_id: w.next()?,
            },
            MboxCmd::QueryCqPollMode => Self::QueryCqPollMode,
            MboxCmd::GetSnOccupancy => Self::GetSnOccupancy { group: w.next()? },
            MboxCmd::EnableLdbPortIntr
            | MboxCmd::EnableDirPortIntr
            | MboxCmd::GetNumUsedResources
            | MboxCmd::InitCqSchedCount
            | MboxCmd::CollectCqSchedCount => Self::Unsupported(cmd),
        };
        Some(req)
    }
}

/// The PF's answer to a VF request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MboxReply {
    /// Mailbox-level outcome.
    pub status: MboxStatus,
    /// Negative errno of the operation, 0 on success.
    pub errno: i32,
    /// Device status of the operation.
    pub dev_status: Status,
    /// Result words.
    pub values: Vec<u32>,
}

impl MboxReply {
    /// Successful reply carrying `values`.
    #[must_use]
    pub fn ok(values: Vec<u32>) -> Self {
        Self {
            status: MboxStatus::Success,
            errno: 0,
            dev_status: Status::Success,
            values,
        }
    }

    /// Reply reporting a failed operation.
    #[must_use]
    pub fn failed(err: &Error) -> Self {
        Self {
            status: MboxStatus::Success,
            errno: err.to_errno(),
            dev_status: err.status().unwrap_or(Status::Success),
            values: Vec::new(),
        }
    }

    /// Reply refusing the exchange itself.
    #[must_use]
    pub fn refused(status: MboxStatus) -> Self {
        Self {
            status,
            errno: -libc::EINVAL,
            dev_status: Status::Success,
            values: Vec::new(),
        }
    }

    /// Serialize into the PF to VF reply section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mailbox`] if the reply does not fit.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = vec![
            self.status.as_u32(),
            signed_word(self.errno),
            self.dev_status.as_u32(),
        ];
        w.extend(&self.values);
        to_bytes(&w, PF2VF_RESP_BYTES, "reply")
    }

    /// Parse a PF reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mailbox`] for a truncated reply or unknown status.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut w = Words::new(bytes);
        let short = || Error::Mailbox("truncated reply".to_string());
        let status = MboxStatus::from_u32(w.next().ok_or_else(short)?)
            .ok_or_else(|| Error::Mailbox("unknown mailbox status".to_string()))?;
        let errno = w.next_i32().ok_or_else(short)?;
        let dev_status = Status::from_u32(w.next().ok_or_else(short)?)
            .ok_or_else(|| Error::Mailbox("unknown device status".to_string()))?;
        Ok(Self {
            status,
            errno,
            dev_status,
            values: w.rest(),
        })
    }

    /// Result words, or the error the PF reported.
    ///
    /// # Errors
    ///
    /// Reconstructs the PF-side error from the errno and device status.
    pub fn into_result(self) -> Result<Vec<u32>> {
        if self.status != MboxStatus::Success {
            return Err(Error::Mailbox(format!("{:?}", self.status)));
        }
        if self.errno == 0 {
            return Ok(self.values);
        }
        let err = match (-self.errno, self.dev_status) {
            (libc::EFAULT, _) | (_, Status::InternalError) => {
                Error::Internal("reported by the primary function".to_string())
            }
            (_, Status::MboxError) => Error::Mailbox("reported by the primary function".to_string()),
            (libc::EINVAL, Status::Success) => {
                Error::InvalidArgument("rejected by the primary function".to_string())
            }
            (libc::EINVAL, status) => Error::Rejected(status),
            (libc::EPERM, _) => {
                Error::PermissionDenied("refused by the primary function".to_string())
            }
            (libc::ETIMEDOUT, _) => Error::Timeout {
                what: "primary function".to_string(),
                attempts: 0,
            },
            (errno, _) => Error::Mailbox(format!("primary function failed with errno {errno}")),
        };
        Err(err)
    }
}

// ============================================================================
// PF to VF requests
// ============================================================================

/// A request from the PF to a VF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PfRequest {
    DomainAlert {
        domain_id: u32,
        alert_id: u32,
        aux_alert_data: u32,
    },
    Notification(VfNotification),
    InUse,
}

impl PfRequest {
    /// Serialize into the PF to VF request section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mailbox`] if the request does not fit.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let w = match self {
            Self::DomainAlert {
                domain_id,
                alert_id,
                aux_alert_data,
            } => vec![
                VfCmd::DomainAlert.as_u32(),
                *domain_id,
                *alert_id,
                *aux_alert_data,
            ],
            Self::Notification(n) => vec![VfCmd::Notification.as_u32(), n.as_u32()],
            Self::InUse => vec![VfCmd::InUse.as_u32()],
        };
        to_bytes(&w, PF2VF_REQ_BYTES, "request")
    }

    /// Parse a PF request.
    ///
    /// # Errors
    ///
    /// Returns the mailbox status to answer with.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, MboxStatus> {
        let mut w = Words::new(bytes);
        let parsed = match w.next().and_then(VfCmd::from_u32) {
            Some(VfCmd::DomainAlert) => Self::decode_alert(&mut w),
            Some(VfCmd::Notification) => w
                .next()
                .and_then(VfNotification::from_u32)
                .map(Self::Notification),
            Some(VfCmd::InUse) => Some(Self::InUse),
            None => None,
        };
        parsed.ok_or(MboxStatus::InvalidCmdType)
    }

    fn decode_alert(w: &mut Words) -> Option<Self> {
        Some(Self::DomainAlert {
            domain_id: w.next()?,
            alert_id: w.next()?,
            aux_alert_data: w.next()?,
        })
    }
}

/// A VF's answer to a PF request: a status and one value word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfReply {
    /// Mailbox-level outcome.
    pub status: MboxStatus,
    /// Result, e.g. the in-use flag.
    pub value: u32,
}

impl VfReply {
    /// Serialize into the VF to PF reply section.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the reply is two words.
    pub fn encode(&self) -> Result<Vec<u8>> {
        to_bytes(&[self.status.as_u32(), self.value], VF2PF_RESP_BYTES, "reply")
    }

    /// Parse a VF reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mailbox`] for a truncated reply or unknown status.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut w = Words::new(bytes);
        let status = w
            .next()
            .and_then(MboxStatus::from_u32)
            .ok_or_else(|| Error::Mailbox("bad VF reply".to_string()))?;
        let value = w
            .next()
            .ok_or_else(|| Error::Mailbox("truncated VF reply".to_string()))?;
        Ok(Self { status, value })
    }
}

// ============================================================================
// Transport
// ============================================================================

/// One direction of a mailbox: post a request, collect the peer's reply.
pub trait MboxTransport: Send {
    /// Write `request` into the outgoing section and ring the doorbell.
    ///
    /// # Errors
    ///
    /// Transport-specific failures.
    fn post(&mut self, request: &[u8]) -> Result<()>;

    /// The peer's reply, once it has arrived.
    ///
    /// # Errors
    ///
    /// Transport-specific failures.
    fn take_reply(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Send a request and poll for the reply once per millisecond, giving up
/// after `timeout_ms` polls.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if no reply arrives in time, or the
/// transport's error.
pub fn send_sync<T: MboxTransport + ?Sized>(
    transport: &mut T,
    request: &[u8],
    timeout_ms: u64,
) -> Result<Vec<u8>> {
    transport.post(request)?;
    for _ in 0..timeout_ms {
        if let Some(reply) = transport.take_reply()? {
            return Ok(reply);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    tracing::error!(timeout_ms, "mailbox reply timed out");
    Err(Error::Timeout {
        what: "mailbox reply".to_string(),
        attempts: u32::try_from(timeout_ms).unwrap_or(u32::MAX),
    })
}

/// In-process link from a VF to a [`Device`] acting as its PF.
#[derive(Debug)]
pub struct LocalLink {
    device: Arc<Device>,
    vf: u32,
    reply: Option<Vec<u8>>,
}

impl LocalLink {
    /// Link for VF `vf` of `device`.
    #[must_use]
    pub fn new(device: Arc<Device>, vf: u32) -> Self {
        Self {
            device,
            vf,
            reply: None,
        }
    }
}

impl MboxTransport for LocalLink {
    fn post(&mut self, request: &[u8]) -> Result<()> {
        self.reply = Some(self.device.handle_vf_request(self.vf, request)?);
        Ok(())
    }

    fn take_reply(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.reply.take())
    }
}

/// Ask a VF whether it has the device open.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if the VF does not answer, or
/// [`Error::Mailbox`] if it refuses.
pub fn vf_in_use<T: MboxTransport + ?Sized>(transport: &mut T, timeout_ms: u64) -> Result<bool> {
    let reply = send_sync(transport, &PfRequest::InUse.encode()?, timeout_ms)?;
    let reply = VfReply::decode(&reply)?;
    if reply.status != MboxStatus::Success {
        return Err(Error::Mailbox(format!("{:?}", reply.status)));
    }
    Ok(reply.value != 0)
}

/// Deliver a device-level notification to a VF.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if the VF does not acknowledge, or
/// [`Error::Mailbox`] if it refuses.
pub fn notify_vf<T: MboxTransport + ?Sized>(
    transport: &mut T,
    notification: VfNotification,
    timeout_ms: u64,
) -> Result<()> {
    tracing::debug!(?notification, "notify vf");
    let reply = send_sync(
        transport,
        &PfRequest::Notification(notification).encode()?,
        timeout_ms,
    )?;
    let reply = VfReply::decode(&reply)?;
    if reply.status != MboxStatus::Success {
        return Err(Error::Mailbox(format!("{:?}", reply.status)));
    }
    Ok(())
}

// ============================================================================
// VF-side client
// ============================================================================

/// Typed VF-side access to the PF's resource manager over a mailbox.
#[derive(Debug)]
pub struct VfClient<T> {
    transport: T,
    timeout_ms: u64,
}

fn first(values: &[u32]) -> Result<u32> {
    values
        .first()
        .copied()
        .ok_or_else(|| Error::Mailbox("reply carries no value".to_string()))
}

impl<T: MboxTransport> VfClient<T> {
    /// Client over `transport`, waiting up to `timeout_ms` for each reply.
    pub fn new(transport: T, timeout_ms: u64) -> Self {
        Self {
            transport,
            timeout_ms,
        }
    }

    /// Send one request and return its result words.
    ///
    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn call(&mut self, request: &VfRequest) -> Result<Vec<u32>> {
        tracing::trace!(cmd = ?request.cmd(), "mailbox request");
        let reply = send_sync(&mut self.transport, &request.encode()?, self.timeout_ms)?;
        MboxReply::decode(&reply)?.into_result()
    }

    fn call_value(&mut self, request: &VfRequest) -> Result<u32> {
        first(&self.call(request)?)
    }

    /// Register the VF driver. Returns the negotiated version.
    ///
    /// # Errors
    ///
    /// [`Error::Mailbox`] on a version mismatch.
    pub fn register(&mut self) -> Result<u32> {
        self.call_value(&VfRequest::Register {
            min_version: MBOX_INTERFACE_VERSION,
            max_version: MBOX_INTERFACE_VERSION,
        })
    }

    /// Unregister the VF driver, resetting its domains.
    ///
    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn unregister(&mut self) -> Result<()> {
        self.call(&VfRequest::Unregister).map(drop)
    }

    /// Resources available to this VF.
    ///
    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn get_num_resources(&mut self) -> Result<NumResources> {
        decode_num_resources(&self.call(&VfRequest::GetNumResources)?)
    }

    /// Create a scheduling domain; returns its virtual id.
    ///
    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn create_sched_domain(&mut self, args: &CreateSchedDomainArgs) -> Result<u32> {
        self.call_value(&VfRequest::CreateSchedDomain(*args))
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn reset_sched_domain(&mut self, domain_id: u32) -> Result<()> {
        self.call(&VfRequest::ResetSchedDomain { domain_id }).map(drop)
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn create_ldb_pool(&mut self, domain_id: u32, args: &CreateLdbPoolArgs) -> Result<u32> {
        self.call_value(&VfRequest::CreateLdbPool {
            domain_id,
            args: *args,
        })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn create_dir_pool(&mut self, domain_id: u32, args: &CreateDirPoolArgs) -> Result<u32> {
        self.call_value(&VfRequest::CreateDirPool {
            domain_id,
            args: *args,
        })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn create_ldb_queue(&mut self, domain_id: u32, args: &CreateLdbQueueArgs) -> Result<u32> {
        self.call_value(&VfRequest::CreateLdbQueue {
            domain_id,
            args: *args,
        })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn create_dir_queue(&mut self, domain_id: u32, args: &CreateDirQueueArgs) -> Result<u32> {
        self.call_value(&VfRequest::CreateDirQueue {
            domain_id,
            args: *args,
        })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn create_ldb_port(&mut self, domain_id: u32, args: &CreateLdbPortArgs) -> Result<u32> {
        self.call_value(&VfRequest::CreateLdbPort {
            domain_id,
            args: *args,
        })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn create_dir_port(&mut self, domain_id: u32, args: &CreateDirPortArgs) -> Result<u32> {
        self.call_value(&VfRequest::CreateDirPort {
            domain_id,
            args: *args,
        })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn start_domain(&mut self, domain_id: u32) -> Result<()> {
        self.call(&VfRequest::StartDomain { domain_id }).map(drop)
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn map_qid(&mut self, domain_id: u32, args: &MapQidArgs) -> Result<MapOutcome> {
        let word = self.call_value(&VfRequest::MapQid {
            domain_id,
            args: *args,
        })?;
        map_outcome_from_word(word)
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn unmap_qid(&mut self, domain_id: u32, args: &UnmapQidArgs) -> Result<UnmapOutcome> {
        let word = self.call_value(&VfRequest::UnmapQid {
            domain_id,
            args: *args,
        })?;
        unmap_outcome_from_word(word)
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn pending_port_unmaps(&mut self, domain_id: u32, port_id: u32) -> Result<u32> {
        self.call_value(&VfRequest::PendingPortUnmaps { domain_id, port_id })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn get_ldb_queue_depth(&mut self, domain_id: u32, queue_id: u32) -> Result<u32> {
        self.call_value(&VfRequest::GetLdbQueueDepth {
            domain_id,
            queue_id,
        })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn get_dir_queue_depth(&mut self, domain_id: u32, queue_id: u32) -> Result<u32> {
        self.call_value(&VfRequest::GetDirQueueDepth {
            domain_id,
            queue_id,
        })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn ldb_port_owned_by_domain(&mut self, domain_id: u32, port_id: u32) -> Result<bool> {
        Ok(self.call_value(&VfRequest::LdbPortOwnedByDomain { domain_id, port_id })? != 0)
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn get_sn_allocation(&mut self, group: u32) -> Result<u32> {
        self.call_value(&VfRequest::GetSnAllocation { group })
    }

    /// # Errors
    ///
    /// Any mailbox failure or the error the PF reported.
    pub fn get_sn_occupancy(&mut self, group: u32) -> Result<u32> {
        self.call_value(&VfRequest::GetSnOccupancy { group })
    }

    /// Give the transport back.
    pub fn into_inner(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_enum_values() {
        assert_eq!(MboxCmd::ALL.len(), 33);
        assert_eq!(MboxCmd::Register.as_u32(), 0);
        assert_eq!(MboxCmd::MapQid.as_u32(), 17);
        assert_eq!(MboxCmd::GetSnOccupancy.as_u32(), 32);
        assert_eq!(MboxCmd::from_u32(33), None);
        assert_eq!(MboxStatus::InvalidOwnerVf.as_u32(), 5);
        assert_eq!(VfCmd::InUse.as_u32(), 2);
        assert_eq!(VfNotification::from_u32(1), Some(VfNotification::PostReset));
    }

    #[test]
    fn test_words_are_little_endian() {
        let bytes = VfRequest::StartDomain { domain_id: 0x0102_0304 }
            .encode()
            .unwrap();
        assert_eq!(bytes, vec![19, 0, 0, 0, 4, 3, 2, 1]);
    }

    #[test]
    fn test_largest_requests_fit() {
        let req = VfRequest::CreateLdbPort {
            domain_id: 0,
            args: CreateLdbPortArgs::default(),
        };
        let bytes = req.encode().unwrap();
        assert!(bytes.len() <= VF2PF_REQ_BYTES);
        assert_eq!(VfRequest::decode(&bytes), Ok(req));

        let req = VfRequest::CreateDirPort {
            domain_id: 2,
            args: CreateDirPortArgs::default(),
        };
        assert_eq!(VfRequest::decode(&req.encode().unwrap()), Ok(req));
    }

    #[test]
    fn test_decode_rejects_unknown_and_truncated() {
        assert_eq!(
            VfRequest::decode(&99u32.to_le_bytes()),
            Err(MboxStatus::InvalidCmdType)
        );
        let mut bytes = VfRequest::MapQid {
            domain_id: 0,
            args: MapQidArgs::default(),
        }
        .encode()
        .unwrap();
        bytes.truncate(8);
        assert_eq!(VfRequest::decode(&bytes), Err(MboxStatus::InvalidCmdType));
        assert_eq!(VfRequest::decode(&[]), Err(MboxStatus::InvalidCmdType));
    }

    #[test]
    fn test_unserved_commands_decode_as_unsupported() {
        let bytes = MboxCmd::InitCqSchedCount.as_u32().to_le_bytes();
        assert_eq!(
            VfRequest::decode(&bytes),
            Ok(VfRequest::Unsupported(MboxCmd::InitCqSchedCount))
        );
    }

    #[test]
    fn test_num_resources_fit_reply() {
        let num = NumResources {
            num_sched_domains: 32,
            num_ldb_queues: 128,
            num_ldb_ports: 64,
            num_dir_ports: 128,
            num_atomic_inflights: 2048,
            max_contiguous_atomic_inflights: 2048,
            num_hist_list_entries: 5120,
            max_contiguous_hist_list_entries: 5120,
            num_ldb_credits: 16384,
            max_contiguous_ldb_credits: 16384,
            num_dir_credits: 4096,
            max_contiguous_dir_credits: 4096,
            num_ldb_credit_pools: 64,
            num_dir_credit_pools: 64,
        };
        let reply = MboxReply::ok(encode_num_resources(&num));
        let bytes = reply.encode().unwrap();
        assert_eq!(bytes.len(), PF2VF_RESP_BYTES);
        let values = MboxReply::decode(&bytes).unwrap().into_result().unwrap();
        assert_eq!(decode_num_resources(&values).unwrap(), num);
    }

    #[test]
    fn test_oversized_reply_refused() {
        let reply = MboxReply::ok(vec![0; 10]);
        assert!(matches!(reply.encode(), Err(Error::Mailbox(_))));
    }

    #[test]
    fn test_reply_reconstructs_errors() {
        let cases = [
            Error::Rejected(Status::LdbQueuesUnavailable),
            Error::PermissionDenied("locked".to_string()),
            Error::InvalidArgument("vf".to_string()),
            Error::Internal("bad".to_string()),
        ];
        for err in cases {
            let bytes = MboxReply::failed(&err).encode().unwrap();
            let back = MboxReply::decode(&bytes).unwrap().into_result().unwrap_err();
            assert_eq!(back.kind(), err.kind(), "{err}");
            assert_eq!(back.status(), err.status(), "{err}");
        }

        let refused = MboxReply::refused(MboxStatus::VersionMismatch);
        let back = MboxReply::decode(&refused.encode().unwrap()).unwrap();
        assert!(matches!(back.into_result(), Err(Error::Mailbox(_))));
    }

    #[test]
    fn test_pf_requests_fit() {
        let alert = PfRequest::DomainAlert {
            domain_id: 1,
            alert_id: 2,
            aux_alert_data: 3,
        };
        let bytes = alert.encode().unwrap();
        assert_eq!(bytes.len(), PF2VF_REQ_BYTES);
        assert_eq!(PfRequest::decode(&bytes), Ok(alert));
        let note = PfRequest::Notification(VfNotification::PreReset);
        assert_eq!(PfRequest::decode(&note.encode().unwrap()), Ok(note));
        assert_eq!(PfRequest::decode(&[7, 0, 0, 0]), Err(MboxStatus::InvalidCmdType));
    }

    /// Transport whose peer never answers.
    struct Silent;

    impl MboxTransport for Silent {
        fn post(&mut self, _request: &[u8]) -> Result<()> {
            Ok(())
        }

        fn take_reply(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    /// Transport standing in for a VF that answers PF requests.
    struct FakeVf {
        in_use: bool,
        seen: Vec<PfRequest>,
        reply: Option<Vec<u8>>,
    }

    impl MboxTransport for FakeVf {
        fn post(&mut self, request: &[u8]) -> Result<()> {
            let reply = match PfRequest::decode(request) {
                Ok(req) => {
                    self.seen.push(req);
                    VfReply {
                        status: MboxStatus::Success,
                        value: u32::from(self.in_use && req == PfRequest::InUse),
                    }
                }
                Err(status) => VfReply { status, value: 0 },
            };
            self.reply = Some(reply.encode()?);
            Ok(())
        }

        fn take_reply(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.reply.take())
        }
    }

    /// Silent transport that counts polls.
    #[derive(Default)]
    struct Counting {
        polls: u32,
    }

    impl MboxTransport for Counting {
        fn post(&mut self, _request: &[u8]) -> Result<()> {
            Ok(())
        }

        fn take_reply(&mut self) -> Result<Option<Vec<u8>>> {
            self.polls += 1;
            Ok(None)
        }
    }

    #[test]
    fn test_send_sync_polls_match_reported_attempts() {
        let mut link = Counting::default();
        let err = send_sync(&mut link, &[0, 0, 0, 0], 5).unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 5, .. }));
        assert_eq!(link.polls, 5);
    }

    #[test]
    fn test_send_sync_times_out() {
        let err = send_sync(&mut Silent, &[0, 0, 0, 0], 3).unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 3, .. }));
        assert!(err.is_retriable());
    }

    #[test]
    fn test_pf_to_vf_exchange() {
        let mut vf = FakeVf {
            in_use: true,
            seen: Vec::new(),
            reply: None,
        };
        assert!(vf_in_use(&mut vf, 10).unwrap());
        notify_vf(&mut vf, VfNotification::PreReset, 10).unwrap();
        assert_eq!(
            vf.seen,
            vec![
                PfRequest::InUse,
                PfRequest::Notification(VfNotification::PreReset)
            ]
        );
    }
}
