//! Register map.
//!
//! Every register family occupies a 64 KiB window of its address space,
//! indexed by resource id in 4-byte words. Fields packed into a register are
//! described next to its constructor.

use super::{Reg, Space};

const FAMILY_SHIFT: u32 = 16;

const fn csr(family: u32, index: u32) -> Reg {
    Reg {
        space: Space::Csr,
        offset: (family << FAMILY_SHIFT) | (index << 2),
    }
}

const fn func(family: u32, index: u32) -> Reg {
    Reg {
        space: Space::Func,
        offset: (family << FAMILY_SHIFT) | (index << 2),
    }
}

// ============================================================================
// CSR families
// ============================================================================

const LDB_VASQID_V: u32 = 0x01;
const DIR_VASQID_V: u32 = 0x02;
const LDB_QID_V: u32 = 0x03;
const DIR_QID_V: u32 = 0x04;
const LDB_QID_SN_CFG: u32 = 0x05;
const LDB_QID_AQED_FL: u32 = 0x06;
const QID_LDB_INFL_LIM: u32 = 0x07;
const QID_LDB_INFL_CNT: u32 = 0x08;
const QID_AQED_ACTIVE_CNT: u32 = 0x09;
const QID_ATM_ACTIVE: u32 = 0x0a;
const QID_LDB_ENQUEUE_CNT: u32 = 0x0b;
const QID_DIR_ENQUEUE_CNT: u32 = 0x0c;
const SN_MODE: u32 = 0x0d;

const LDB_POOL_ENABLED: u32 = 0x10;
const DIR_POOL_ENABLED: u32 = 0x11;
const LDB_POOL_CRD_CNT: u32 = 0x12;
const DIR_POOL_CRD_CNT: u32 = 0x13;
const LDB_POOL_FL: u32 = 0x14;
const DIR_POOL_FL: u32 = 0x15;

const LDB_PP_V: u32 = 0x20;
const DIR_PP_V: u32 = 0x21;
const LDB_PP_LDB_POOL: u32 = 0x22;
const LDB_PP_DIR_POOL: u32 = 0x23;
const LDB_PP_LDB_CRD_WM: u32 = 0x24;
const LDB_PP_DIR_CRD_WM: u32 = 0x25;
const LDB_PP_CRD_QUANTUM: u32 = 0x26;
const DIR_PP_LDB_POOL: u32 = 0x27;
const DIR_PP_DIR_POOL: u32 = 0x28;
const DIR_PP_LDB_CRD_WM: u32 = 0x29;
const DIR_PP_DIR_CRD_WM: u32 = 0x2a;
const DIR_PP_CRD_QUANTUM: u32 = 0x2b;
const LDB_PP_CRD_UPD_EN: u32 = 0x2c;
const DIR_PP_CRD_UPD_EN: u32 = 0x2d;

const LDB_CQ_DEPTH: u32 = 0x30;
const DIR_CQ_DEPTH: u32 = 0x31;
const LDB_CQ_DEPTH_THRSH: u32 = 0x32;
const DIR_CQ_DEPTH_THRSH: u32 = 0x33;
const LDB_CQ_HIST_LIST: u32 = 0x34;
const CQ_LDB_DSBL: u32 = 0x35;
const CQ_DIR_DSBL: u32 = 0x36;
const CQ_LDB_INFL_CNT: u32 = 0x37;
const CQ_LDB_TKN_CNT: u32 = 0x38;
const CQ_DIR_TKN_CNT: u32 = 0x39;
const LDB_CQ_INT_ENB: u32 = 0x3a;
const DIR_CQ_INT_ENB: u32 = 0x3b;

const CQ2PRIOV: u32 = 0x40;
const CQ2QID: u32 = 0x41;
const QID2CQIDIX: u32 = 0x42;
const LDB_IF_STATUS: u32 = 0x43;
const LDB_HAS_WORK: u32 = 0x44;

// ============================================================================
// Func families
// ============================================================================

const LDB_PP_COMPLETE: u32 = 0x01;
const LDB_PP_TOKEN_RETURN: u32 = 0x02;
const DIR_PP_TOKEN_RETURN: u32 = 0x03;

/// Number of queue indices per domain in the VAS queue-permission tables.
const VASQID_STRIDE: u32 = 128;

// ============================================================================
// Queues
// ============================================================================

/// Write permission of load-balanced queue `queue` from domain `domain`.
#[must_use]
pub const fn ldb_vasqid_v(domain: u32, queue: u32) -> Reg {
    csr(LDB_VASQID_V, domain * VASQID_STRIDE + queue)
}

/// Write permission of directed queue `queue` from domain `domain`.
#[must_use]
pub const fn dir_vasqid_v(domain: u32, queue: u32) -> Reg {
    csr(DIR_VASQID_V, domain * VASQID_STRIDE + queue)
}

/// Load-balanced queue valid bit.
#[must_use]
pub const fn ldb_qid_v(queue: u32) -> Reg {
    csr(LDB_QID_V, queue)
}

/// Directed queue valid bit.
#[must_use]
pub const fn dir_qid_v(queue: u32) -> Reg {
    csr(DIR_QID_V, queue)
}

/// Ordered-queue config: `[3:0]` group, `[9:4]` slot, `[15]` ordered.
#[must_use]
pub const fn ldb_qid_sn_cfg(queue: u32) -> Reg {
    csr(LDB_QID_SN_CFG, queue)
}

/// Pack an ordered-queue config word.
#[must_use]
pub const fn sn_cfg(group: u32, slot: u32) -> u32 {
    (group & 0xf) | ((slot & 0x3f) << 4) | (1 << 15)
}

/// Atomic-inflight window: `[15:0]` base, `[31:16]` bound.
#[must_use]
pub const fn ldb_qid_aqed_fl(queue: u32) -> Reg {
    csr(LDB_QID_AQED_FL, queue)
}

/// Queue inflight limit.
#[must_use]
pub const fn qid_ldb_infl_lim(queue: u32) -> Reg {
    csr(QID_LDB_INFL_LIM, queue)
}

/// Queue inflight count.
#[must_use]
pub const fn qid_ldb_infl_cnt(queue: u32) -> Reg {
    csr(QID_LDB_INFL_CNT, queue)
}

/// Atomic entries active in the AQED.
#[must_use]
pub const fn qid_aqed_active_cnt(queue: u32) -> Reg {
    csr(QID_AQED_ACTIVE_CNT, queue)
}

/// Atomic entries active in the scheduler.
#[must_use]
pub const fn qid_atm_active(queue: u32) -> Reg {
    csr(QID_ATM_ACTIVE, queue)
}

/// Non-atomic entries enqueued to a load-balanced queue.
#[must_use]
pub const fn qid_ldb_enqueue_cnt(queue: u32) -> Reg {
    csr(QID_LDB_ENQUEUE_CNT, queue)
}

/// Entries enqueued to a directed queue.
#[must_use]
pub const fn qid_dir_enqueue_cnt(queue: u32) -> Reg {
    csr(QID_DIR_ENQUEUE_CNT, queue)
}

/// Sequence-number mode of every group, 4 bits per group.
#[must_use]
pub const fn sn_mode() -> Reg {
    csr(SN_MODE, 0)
}

// ============================================================================
// Credit pools
// ============================================================================

/// Load-balanced pool enable.
#[must_use]
pub const fn ldb_pool_enabled(pool: u32) -> Reg {
    csr(LDB_POOL_ENABLED, pool)
}

/// Directed pool enable.
#[must_use]
pub const fn dir_pool_enabled(pool: u32) -> Reg {
    csr(DIR_POOL_ENABLED, pool)
}

/// Credits currently in a load-balanced pool's hardware freelist.
#[must_use]
pub const fn ldb_pool_crd_cnt(pool: u32) -> Reg {
    csr(LDB_POOL_CRD_CNT, pool)
}

/// Credits currently in a directed pool's hardware freelist.
#[must_use]
pub const fn dir_pool_crd_cnt(pool: u32) -> Reg {
    csr(DIR_POOL_CRD_CNT, pool)
}

/// Load-balanced pool credit window: `[15:0]` base, `[31:16]` bound.
#[must_use]
pub const fn ldb_pool_fl(pool: u32) -> Reg {
    csr(LDB_POOL_FL, pool)
}

/// Directed pool credit window: `[15:0]` base, `[31:16]` bound.
#[must_use]
pub const fn dir_pool_fl(pool: u32) -> Reg {
    csr(DIR_POOL_FL, pool)
}

/// Pack a `[15:0]` / `[31:16]` pair.
#[must_use]
pub const fn pack16(lo: u32, hi: u32) -> u32 {
    (lo & 0xffff) | ((hi & 0xffff) << 16)
}

// ============================================================================
// Producer ports
// ============================================================================

/// Load-balanced producer port valid.
#[must_use]
pub const fn ldb_pp_v(port: u32) -> Reg {
    csr(LDB_PP_V, port)
}

/// Directed producer port valid.
#[must_use]
pub const fn dir_pp_v(port: u32) -> Reg {
    csr(DIR_PP_V, port)
}

/// Load-balanced pool used by a load-balanced port.
#[must_use]
pub const fn ldb_pp_ldb_pool(port: u32) -> Reg {
    csr(LDB_PP_LDB_POOL, port)
}

/// Directed pool used by a load-balanced port.
#[must_use]
pub const fn ldb_pp_dir_pool(port: u32) -> Reg {
    csr(LDB_PP_DIR_POOL, port)
}

/// Load-balanced credit watermarks of a load-balanced port: low, high.
#[must_use]
pub const fn ldb_pp_ldb_crd_wm(port: u32) -> Reg {
    csr(LDB_PP_LDB_CRD_WM, port)
}

/// Directed credit watermarks of a load-balanced port: low, high.
#[must_use]
pub const fn ldb_pp_dir_crd_wm(port: u32) -> Reg {
    csr(LDB_PP_DIR_CRD_WM, port)
}

/// Credit quanta of a load-balanced port: ldb, dir.
#[must_use]
pub const fn ldb_pp_crd_quantum(port: u32) -> Reg {
    csr(LDB_PP_CRD_QUANTUM, port)
}

/// Load-balanced pool used by a directed port.
#[must_use]
pub const fn dir_pp_ldb_pool(port: u32) -> Reg {
    csr(DIR_PP_LDB_POOL, port)
}

/// Directed pool used by a directed port.
#[must_use]
pub const fn dir_pp_dir_pool(port: u32) -> Reg {
    csr(DIR_PP_DIR_POOL, port)
}

/// Load-balanced credit watermarks of a directed port: low, high.
#[must_use]
pub const fn dir_pp_ldb_crd_wm(port: u32) -> Reg {
    csr(DIR_PP_LDB_CRD_WM, port)
}

/// Directed credit watermarks of a directed port: low, high.
#[must_use]
pub const fn dir_pp_dir_crd_wm(port: u32) -> Reg {
    csr(DIR_PP_DIR_CRD_WM, port)
}

/// Credit quanta of a directed port: ldb, dir.
#[must_use]
pub const fn dir_pp_crd_quantum(port: u32) -> Reg {
    csr(DIR_PP_CRD_QUANTUM, port)
}

/// Credit auto-update enable of a load-balanced port.
#[must_use]
pub const fn ldb_pp_crd_upd_en(port: u32) -> Reg {
    csr(LDB_PP_CRD_UPD_EN, port)
}

/// Credit auto-update enable of a directed port.
#[must_use]
pub const fn dir_pp_crd_upd_en(port: u32) -> Reg {
    csr(DIR_PP_CRD_UPD_EN, port)
}

// ============================================================================
// Consumer queues
// ============================================================================

/// Load-balanced CQ depth.
#[must_use]
pub const fn ldb_cq_depth(port: u32) -> Reg {
    csr(LDB_CQ_DEPTH, port)
}

/// Directed CQ depth.
#[must_use]
pub const fn dir_cq_depth(port: u32) -> Reg {
    csr(DIR_CQ_DEPTH, port)
}

/// Load-balanced CQ interrupt depth threshold.
#[must_use]
pub const fn ldb_cq_depth_thrsh(port: u32) -> Reg {
    csr(LDB_CQ_DEPTH_THRSH, port)
}

/// Directed CQ interrupt depth threshold.
#[must_use]
pub const fn dir_cq_depth_thrsh(port: u32) -> Reg {
    csr(DIR_CQ_DEPTH_THRSH, port)
}

/// History-list window of a load-balanced CQ: base, limit.
#[must_use]
pub const fn ldb_cq_hist_list(port: u32) -> Reg {
    csr(LDB_CQ_HIST_LIST, port)
}

/// Load-balanced CQ scheduling disable.
#[must_use]
pub const fn cq_ldb_dsbl(port: u32) -> Reg {
    csr(CQ_LDB_DSBL, port)
}

/// Directed CQ scheduling disable.
#[must_use]
pub const fn cq_dir_dsbl(port: u32) -> Reg {
    csr(CQ_DIR_DSBL, port)
}

/// Completions owed by a load-balanced CQ.
#[must_use]
pub const fn cq_ldb_infl_cnt(port: u32) -> Reg {
    csr(CQ_LDB_INFL_CNT, port)
}

/// Tokens owed by a load-balanced CQ.
#[must_use]
pub const fn cq_ldb_tkn_cnt(port: u32) -> Reg {
    csr(CQ_LDB_TKN_CNT, port)
}

/// Tokens owed by a directed CQ.
#[must_use]
pub const fn cq_dir_tkn_cnt(port: u32) -> Reg {
    csr(CQ_DIR_TKN_CNT, port)
}

/// Load-balanced CQ interrupt enable.
#[must_use]
pub const fn ldb_cq_int_enb(port: u32) -> Reg {
    csr(LDB_CQ_INT_ENB, port)
}

/// Directed CQ interrupt enable.
#[must_use]
pub const fn dir_cq_int_enb(port: u32) -> Reg {
    csr(DIR_CQ_INT_ENB, port)
}

// ============================================================================
// Queue-to-CQ mapping tables
// ============================================================================

/// Slot valid bits `[7:0]` and 3-bit priorities from bit 8, per slot.
#[must_use]
pub const fn cq2priov(port: u32) -> Reg {
    csr(CQ2PRIOV, port)
}

/// Valid bit of `slot` in [`cq2priov`].
#[must_use]
pub const fn cq2priov_valid(slot: usize) -> u32 {
    1 << slot
}

/// Priority field mask of `slot` in [`cq2priov`].
#[must_use]
pub const fn cq2priov_prio_mask(slot: usize) -> u32 {
    0x7 << (8 + slot * 3)
}

/// Priority field value of `slot` in [`cq2priov`].
#[must_use]
pub const fn cq2priov_prio(slot: usize, priority: u32) -> u32 {
    (priority & 0x7) << (8 + slot * 3)
}

/// Queue ids of slots 0-3 (`half` 0) or 4-7 (`half` 1), one byte each.
#[must_use]
pub const fn cq2qid(port: u32, half: u32) -> Reg {
    csr(CQ2QID, port * 2 + half)
}

/// Slot bitmask of every CQ in a group of four mapping `queue`,
/// one byte per CQ.
#[must_use]
pub const fn qid2cqidix(queue: u32, port: u32) -> Reg {
    csr(QID2CQIDIX, queue * 16 + port / 4)
}

/// Bit of (`port`, `slot`) within [`qid2cqidix`].
#[must_use]
pub const fn qid2cqidix_bit(port: u32, slot: usize) -> u32 {
    1 << ((port % 4) * 8 + slot as u32)
}

/// Per-slot inflight-ok status of a load-balanced CQ.
#[must_use]
pub const fn ldb_if_status(port: u32) -> Reg {
    csr(LDB_IF_STATUS, port)
}

/// Per-slot has-work bits: `[7:0]` atomic, `[15:8]` non-atomic.
#[must_use]
pub const fn ldb_has_work(port: u32) -> Reg {
    csr(LDB_HAS_WORK, port)
}

// ============================================================================
// Producer-port doorbells
// ============================================================================

/// Issue the written number of completions on a load-balanced port.
#[must_use]
pub const fn ldb_pp_complete(port: u32) -> Reg {
    func(LDB_PP_COMPLETE, port)
}

/// Return the written number of tokens on a load-balanced port.
#[must_use]
pub const fn ldb_pp_token_return(port: u32) -> Reg {
    func(LDB_PP_TOKEN_RETURN, port)
}

/// Return the written number of tokens on a directed port.
#[must_use]
pub const fn dir_pp_token_return(port: u32) -> Reg {
    func(DIR_PP_TOKEN_RETURN, port)
}

/// Counter register a doorbell write retires entries from.
#[must_use]
pub fn doorbell_counter(reg: Reg) -> Option<Reg> {
    if reg.space != Space::Func {
        return None;
    }
    let index = (reg.offset & ((1 << FAMILY_SHIFT) - 1)) >> 2;
    match reg.offset >> FAMILY_SHIFT {
        LDB_PP_COMPLETE => Some(cq_ldb_infl_cnt(index)),
        LDB_PP_TOKEN_RETURN => Some(cq_ldb_tkn_cnt(index)),
        DIR_PP_TOKEN_RETURN => Some(cq_dir_tkn_cnt(index)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families_do_not_collide() {
        assert_ne!(cq_ldb_infl_cnt(0), cq_ldb_tkn_cnt(0));
        assert_ne!(ldb_vasqid_v(0, 1), ldb_vasqid_v(1, 1));
        assert_eq!(ldb_vasqid_v(1, 0).offset - ldb_vasqid_v(0, 0).offset, 128 * 4);
        assert_eq!(qid_ldb_infl_cnt(5).space, Space::Csr);
        assert_eq!(ldb_pp_complete(5).space, Space::Func);
    }

    #[test]
    fn test_doorbell_counter_decode() {
        assert_eq!(doorbell_counter(ldb_pp_complete(7)), Some(cq_ldb_infl_cnt(7)));
        assert_eq!(doorbell_counter(ldb_pp_token_return(63)), Some(cq_ldb_tkn_cnt(63)));
        assert_eq!(doorbell_counter(dir_pp_token_return(127)), Some(cq_dir_tkn_cnt(127)));
        assert_eq!(doorbell_counter(cq_ldb_infl_cnt(7)), None);
    }

    #[test]
    fn test_priority_fields() {
        assert_eq!(cq2priov_prio(0, 7), 0x700);
        assert_eq!(cq2priov_prio(7, 1), 1 << 29);
        assert_eq!(cq2priov_prio_mask(1), 0x7 << 11);
        assert_eq!(cq2priov_valid(3), 0x8);
    }

    #[test]
    fn test_qid2cqidix_grouping() {
        assert_eq!(qid2cqidix(2, 4), qid2cqidix(2, 7));
        assert_ne!(qid2cqidix(2, 3), qid2cqidix(2, 4));
        assert_eq!(qid2cqidix_bit(5, 2), 1 << 10);
    }

    #[test]
    fn test_packing() {
        assert_eq!(pack16(0x10, 0x20), 0x0020_0010);
        assert_eq!(sn_cfg(2, 3), 2 | (3 << 4) | (1 << 15));
    }
}
