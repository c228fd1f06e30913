//! Error types for dlb-rm-core.

use nix::libc;
use serde::Serialize;
use thiserror::Error;

/// Broad classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Malformed or out-of-range argument. Caller-correctable, never mutates.
    InvalidRequest,
    /// Well-formed request exceeding currently free capacity.
    ResourceUnavailable,
    /// Operation issued in the wrong state (not configured, started, locked).
    Precondition,
    /// An invariant the manager enforces was found violated.
    Internal,
    /// A bounded retry loop or cross-function request ran out of attempts.
    Timeout,
}

macro_rules! statuses {
    ($($(#[$doc:meta])* $variant:ident = $name:literal,)+) => {
        /// Response status reported to the requester of a device operation.
        ///
        /// The numeric values are part of the device ABI and must not be
        /// reordered.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        #[repr(u32)]
        pub enum Status {
            $($(#[$doc])* $variant,)+
        }

        impl Status {
            /// Every status in ABI order.
            pub const ALL: &'static [Status] = &[$(Status::$variant,)+];

            /// Upper-snake-case name of the status.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Status::$variant => $name,)+
                }
            }
        }
    };
}

statuses! {
    /// Request completed.
    Success = "SUCCESS",
    /// Name already in use.
    NameExists = "NAME_EXISTS",
    /// No scheduling domain available.
    DomainUnavailable = "DOMAIN_UNAVAILABLE",
    /// Not enough load-balanced ports.
    LdbPortsUnavailable = "LDB_PORTS_UNAVAILABLE",
    /// Not enough directed ports.
    DirPortsUnavailable = "DIR_PORTS_UNAVAILABLE",
    /// Not enough load-balanced queues.
    LdbQueuesUnavailable = "LDB_QUEUES_UNAVAILABLE",
    /// Not enough load-balanced credits.
    LdbCreditsUnavailable = "LDB_CREDITS_UNAVAILABLE",
    /// Not enough directed credits.
    DirCreditsUnavailable = "DIR_CREDITS_UNAVAILABLE",
    /// Not enough load-balanced credit pools.
    LdbCreditPoolsUnavailable = "LDB_CREDIT_POOLS_UNAVAILABLE",
    /// Not enough directed credit pools.
    DirCreditPoolsUnavailable = "DIR_CREDIT_POOLS_UNAVAILABLE",
    /// No sequence-number group slot for the requested allocation.
    SequenceNumbersUnavailable = "SEQUENCE_NUMBERS_UNAVAILABLE",
    /// Unknown or foreign domain id.
    InvalidDomainId = "INVALID_DOMAIN_ID",
    /// Queue inflight limit out of range.
    InvalidQidInflightAllocation = "INVALID_QID_INFLIGHT_ALLOCATION",
    /// Not enough atomic-inflight entries.
    AtomicInflightsUnavailable = "ATOMIC_INFLIGHTS_UNAVAILABLE",
    /// Not enough history-list entries.
    HistListEntriesUnavailable = "HIST_LIST_ENTRIES_UNAVAILABLE",
    /// Unknown or unconfigured load-balanced credit pool.
    InvalidLdbCreditPoolId = "INVALID_LDB_CREDIT_POOL_ID",
    /// Unknown or unconfigured directed credit pool.
    InvalidDirCreditPoolId = "INVALID_DIR_CREDIT_POOL_ID",
    /// Pop-count address rejected.
    InvalidPopCountVirtAddr = "INVALID_POP_COUNT_VIRT_ADDR",
    /// Unknown load-balanced queue.
    InvalidLdbQueueId = "INVALID_LDB_QUEUE_ID",
    /// CQ depth not a supported power of two.
    InvalidCqDepth = "INVALID_CQ_DEPTH",
    /// CQ address rejected.
    InvalidCqVirtAddr = "INVALID_CQ_VIRT_ADDR",
    /// Unknown or unconfigured port.
    InvalidPortId = "INVALID_PORT_ID",
    /// Unknown, unconfigured or unmapped queue.
    InvalidQid = "INVALID_QID",
    /// Priority outside the supported range.
    InvalidPriority = "INVALID_PRIORITY",
    /// Every mapping slot of the port is occupied.
    NoQidSlotsAvailable = "NO_QID_SLOTS_AVAILABLE",
    /// Load-balanced freelist exhausted.
    QedFreelistEntriesUnavailable = "QED_FREELIST_ENTRIES_UNAVAILABLE",
    /// Directed freelist exhausted.
    DqedFreelistEntriesUnavailable = "DQED_FREELIST_ENTRIES_UNAVAILABLE",
    /// Unknown or mismatched directed queue.
    InvalidDirQueueId = "INVALID_DIR_QUEUE_ID",
    /// Not enough directed queues.
    DirQueuesUnavailable = "DIR_QUEUES_UNAVAILABLE",
    /// Load-balanced low watermark not below the high watermark.
    InvalidLdbCreditLowWatermark = "INVALID_LDB_CREDIT_LOW_WATERMARK",
    /// Load-balanced quantum out of range.
    InvalidLdbCreditQuantum = "INVALID_LDB_CREDIT_QUANTUM",
    /// Directed low watermark not below the high watermark.
    InvalidDirCreditLowWatermark = "INVALID_DIR_CREDIT_LOW_WATERMARK",
    /// Directed quantum out of range.
    InvalidDirCreditQuantum = "INVALID_DIR_CREDIT_QUANTUM",
    /// Domain has not been created.
    DomainNotConfigured = "DOMAIN_NOT_CONFIGURED",
    /// Process already attached.
    PidAlreadyAttached = "PID_ALREADY_ATTACHED",
    /// Process not attached.
    PidNotAttached = "PID_NOT_ATTACHED",
    /// Internal inconsistency detected.
    InternalError = "INTERNAL_ERROR",
    /// Domain still referenced.
    DomainInUse = "DOMAIN_IN_USE",
    /// IOMMU mapping failed.
    IommuMappingError = "IOMMU_MAPPING_ERROR",
    /// Page pinning failed.
    FailToPinMemoryPage = "FAIL_TO_PIN_MEMORY_PAGE",
    /// Pop-count page pinning failed.
    UnableToPinPopcountPages = "UNABLE_TO_PIN_POPCOUNT_PAGES",
    /// CQ page pinning failed.
    UnableToPinCqPages = "UNABLE_TO_PIN_CQ_PAGES",
    /// CQ memory not physically contiguous.
    DiscontiguousCqMemory = "DISCONTIGUOUS_CQ_MEMORY",
    /// Pop-count memory not physically contiguous.
    DiscontiguousPopCountMemory = "DISCONTIGUOUS_POP_COUNT_MEMORY",
    /// Domain already started.
    DomainStarted = "DOMAIN_STARTED",
    /// Large pool missing.
    LargePoolNotSpecified = "LARGE_POOL_NOT_SPECIFIED",
    /// Small pool missing.
    SmallPoolNotSpecified = "SMALL_POOL_NOT_SPECIFIED",
    /// Neither pool given.
    NeitherPoolSpecified = "NEITHER_POOL_SPECIFIED",
    /// Domain not started.
    DomainNotStarted = "DOMAIN_NOT_STARTED",
    /// Measurement duration rejected.
    InvalidMeasurementDuration = "INVALID_MEASUREMENT_DURATION",
    /// Unknown performance metric group.
    InvalidPerfMetricGroupId = "INVALID_PERF_METRIC_GROUP_ID",
    /// Load-balanced queues requested without a load-balanced port.
    LdbPortRequiredForLdbQueues = "LDB_PORT_REQUIRED_FOR_LDB_QUEUES",
    /// A previous domain reset failed; the device needs a full reset.
    DomainResetFailed = "DOMAIN_RESET_FAILED",
    /// Mailbox exchange with the primary function failed.
    MboxError = "MBOX_ERROR",
    /// History-list depth rejected.
    InvalidHistListDepth = "INVALID_HIST_LIST_DEPTH",
    /// Allocation failure.
    NoMemory = "NO_MEMORY",
}

impl Status {
    /// Decode a status from its ABI value.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// ABI value of the status.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Classification of a failure status; `None` for [`Status::Success`].
    #[must_use]
    pub fn kind(self) -> Option<ErrorKind> {
        use Status::{
            AtomicInflightsUnavailable, DirCreditPoolsUnavailable, DirCreditsUnavailable,
            DirPortsUnavailable, DirQueuesUnavailable, DomainInUse, DomainNotConfigured,
            DomainNotStarted, DomainResetFailed, DomainStarted, DomainUnavailable,
            DqedFreelistEntriesUnavailable, HistListEntriesUnavailable, InternalError,
            LdbCreditPoolsUnavailable, LdbCreditsUnavailable, LdbPortsUnavailable,
            LdbQueuesUnavailable, MboxError, NoMemory, NoQidSlotsAvailable, PidAlreadyAttached,
            PidNotAttached, QedFreelistEntriesUnavailable, SequenceNumbersUnavailable, Success,
        };

        match self {
            Success => None,
            DomainUnavailable
            | LdbPortsUnavailable
            | DirPortsUnavailable
            | LdbQueuesUnavailable
            | LdbCreditsUnavailable
            | DirCreditsUnavailable
            | LdbCreditPoolsUnavailable
            | DirCreditPoolsUnavailable
            | SequenceNumbersUnavailable
            | AtomicInflightsUnavailable
            | HistListEntriesUnavailable
            | NoQidSlotsAvailable
            | QedFreelistEntriesUnavailable
            | DqedFreelistEntriesUnavailable
            | DirQueuesUnavailable
            | NoMemory => Some(ErrorKind::ResourceUnavailable),
            DomainNotConfigured | DomainInUse | DomainStarted | DomainNotStarted
            | PidAlreadyAttached | PidNotAttached => Some(ErrorKind::Precondition),
            InternalError | DomainResetFailed | MboxError => Some(ErrorKind::Internal),
            _ => Some(ErrorKind::InvalidRequest),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors returned by resource-manager operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was refused; the status says why.
    #[error("request rejected: {0}")]
    Rejected(Status),

    /// The target function is locked or otherwise not modifiable.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An argument is outside the valid range of a data structure.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A bounded retry loop gave up.
    #[error("timed out after {attempts} attempts: {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The peer function answered with a mailbox-level failure.
    #[error("mailbox error: {0}")]
    Mailbox(String),

    /// Configuration could not be parsed or is inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error (register mapping, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Self::Rejected(status)
    }
}

impl Error {
    /// Status to place in the requester's response, if the error has one.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Rejected(status) => Some(*status),
            Self::Internal(_) => Some(Status::InternalError),
            Self::Mailbox(_) => Some(Status::MboxError),
            _ => None,
        }
    }

    /// Classification of the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rejected(status) => status.kind().unwrap_or(ErrorKind::InvalidRequest),
            Self::PermissionDenied(_) => ErrorKind::Precondition,
            Self::InvalidArgument(_) | Self::Config(_) => ErrorKind::InvalidRequest,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Mailbox(_) | Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Negative errno equivalent, as a device driver would report it.
    #[must_use]
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::Rejected(_) | Self::InvalidArgument(_) | Self::Config(_) => -libc::EINVAL,
            Self::PermissionDenied(_) => -libc::EPERM,
            Self::Timeout { .. } => -libc::ETIMEDOUT,
            Self::Mailbox(_) => -libc::EIO,
            Self::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
            Self::Internal(_) => -libc::EFAULT,
        }
    }
}

/// Result type for resource-manager operations.
pub type Result<T> = std::result::Result<T, Error>;
