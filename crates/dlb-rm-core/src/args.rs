//! Request and response structures of the device operations.
//!
//! Field names and widths follow the device's user ABI; the structures are
//! also what a configuration plan deserializes into.

use serde::{Deserialize, Serialize};

/// Resources requested for a new scheduling domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSchedDomainArgs {
    /// Load-balanced queues.
    pub num_ldb_queues: u32,
    /// Load-balanced ports.
    pub num_ldb_ports: u32,
    /// Directed queue/port pairs.
    pub num_dir_ports: u32,
    /// Atomic-inflight entries, as one contiguous run.
    pub num_atomic_inflights: u32,
    /// History-list entries, as one contiguous run.
    pub num_hist_list_entries: u32,
    /// Load-balanced credits, as one contiguous run.
    pub num_ldb_credits: u32,
    /// Directed credits, as one contiguous run.
    pub num_dir_credits: u32,
    /// Load-balanced credit pools.
    pub num_ldb_credit_pools: u32,
    /// Directed credit pools.
    pub num_dir_credit_pools: u32,
}

/// Load-balanced credit pool request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateLdbPoolArgs {
    /// Credits moved from the domain into the pool.
    pub num_ldb_credits: u32,
}

/// Directed credit pool request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateDirPoolArgs {
    /// Credits moved from the domain into the pool.
    pub num_dir_credits: u32,
}

/// Load-balanced queue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateLdbQueueArgs {
    /// Sequence numbers for an ordered queue; zero for unordered.
    pub num_sequence_numbers: u32,
    /// Inflight limit of the queue.
    pub num_qid_inflights: u32,
    /// Atomic-inflight entries taken from the domain.
    pub num_atomic_inflights: u32,
}

impl Default for CreateLdbQueueArgs {
    fn default() -> Self {
        Self {
            num_sequence_numbers: 0,
            num_qid_inflights: 32,
            num_atomic_inflights: 0,
        }
    }
}

/// Directed queue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateDirQueueArgs {
    /// Already-created directed port to pair with, or -1 for a new pair.
    pub port_id: i32,
}

impl Default for CreateDirQueueArgs {
    fn default() -> Self {
        Self { port_id: -1 }
    }
}

/// Load-balanced port request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct CreateLdbPortArgs {
    pub ldb_credit_pool_id: u32,
    pub dir_credit_pool_id: u32,
    pub ldb_credit_high_watermark: u16,
    pub ldb_credit_low_watermark: u16,
    pub ldb_credit_quantum: u16,
    pub dir_credit_high_watermark: u16,
    pub dir_credit_low_watermark: u16,
    pub dir_credit_quantum: u16,
    /// Power of two in 8..=1024.
    pub cq_depth: u16,
    pub cq_depth_threshold: u16,
    /// History-list entries taken from the domain.
    pub cq_history_list_size: u16,
}

impl Default for CreateLdbPortArgs {
    fn default() -> Self {
        Self {
            ldb_credit_pool_id: 0,
            dir_credit_pool_id: 0,
            ldb_credit_high_watermark: 16,
            ldb_credit_low_watermark: 8,
            ldb_credit_quantum: 8,
            dir_credit_high_watermark: 16,
            dir_credit_low_watermark: 8,
            dir_credit_quantum: 8,
            cq_depth: 32,
            cq_depth_threshold: 1,
            cq_history_list_size: 32,
        }
    }
}

/// Directed port request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct CreateDirPortArgs {
    pub ldb_credit_pool_id: u32,
    pub dir_credit_pool_id: u32,
    pub ldb_credit_high_watermark: u16,
    pub ldb_credit_low_watermark: u16,
    pub ldb_credit_quantum: u16,
    pub dir_credit_high_watermark: u16,
    pub dir_credit_low_watermark: u16,
    pub dir_credit_quantum: u16,
    /// Power of two in 8..=1024.
    pub cq_depth: u16,
    pub cq_depth_threshold: u16,
    /// Already-created directed queue to pair with, or -1 for a new pair.
    pub queue_id: i32,
}

impl Default for CreateDirPortArgs {
    fn default() -> Self {
        Self {
            ldb_credit_pool_id: 0,
            dir_credit_pool_id: 0,
            ldb_credit_high_watermark: 16,
            ldb_credit_low_watermark: 8,
            ldb_credit_quantum: 8,
            dir_credit_high_watermark: 16,
            dir_credit_low_watermark: 8,
            dir_credit_quantum: 8,
            cq_depth: 32,
            cq_depth_threshold: 1,
            queue_id: -1,
        }
    }
}

/// Map a load-balanced queue to a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapQidArgs {
    /// Consumer port.
    pub port_id: u32,
    /// Queue.
    pub qid: u32,
    /// Servicing priority, 0 (highest) to 7.
    pub priority: u32,
}

/// Unmap a load-balanced queue from a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmapQidArgs {
    /// Consumer port.
    pub port_id: u32,
    /// Queue.
    pub qid: u32,
}

/// Resources available to a function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct NumResources {
    pub num_sched_domains: u32,
    pub num_ldb_queues: u32,
    pub num_ldb_ports: u32,
    pub num_dir_ports: u32,
    pub num_atomic_inflights: u32,
    pub max_contiguous_atomic_inflights: u32,
    pub num_hist_list_entries: u32,
    pub max_contiguous_hist_list_entries: u32,
    pub num_ldb_credits: u32,
    pub max_contiguous_ldb_credits: u32,
    pub num_dir_credits: u32,
    pub max_contiguous_dir_credits: u32,
    pub num_ldb_credit_pools: u32,
    pub num_dir_credit_pools: u32,
}

/// Result of a map request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MapOutcome {
    /// The queue is mapped.
    Mapped,
    /// The map waits for the queue's inflights to drain.
    Deferred,
    /// The queue was already mapped; only its priority changed.
    PriorityChanged,
    /// The map waits behind an in-progress unmap of the slot's occupant.
    Pending,
}

/// Result of an unmap request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnmapOutcome {
    /// The slot is free.
    Unmapped,
    /// The unmap waits for the port's inflights to drain.
    Deferred,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_defaults_request_new_pair() {
        assert_eq!(CreateDirQueueArgs::default().port_id, -1);
        assert_eq!(CreateDirPortArgs::default().queue_id, -1);
    }

    #[test]
    fn test_parse_domain_args_partial() {
        let args: CreateSchedDomainArgs = toml::from_str(
            r"
            num_ldb_queues = 2
            num_ldb_ports = 4
            num_ldb_credits = 1024
        ",
        )
        .unwrap();
        assert_eq!(args.num_ldb_queues, 2);
        assert_eq!(args.num_ldb_ports, 4);
        assert_eq!(args.num_ldb_credits, 1024);
        assert_eq!(args.num_dir_ports, 0);
    }

    #[test]
    fn test_parse_port_args_defaults() {
        let args: CreateLdbPortArgs = toml::from_str("cq_depth = 64").unwrap();
        assert_eq!(args.cq_depth, 64);
        assert_eq!(args.cq_history_list_size, 32);
        assert!(args.ldb_credit_low_watermark < args.ldb_credit_high_watermark);
    }
}
