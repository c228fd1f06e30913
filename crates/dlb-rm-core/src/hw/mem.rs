//! In-memory register file.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{regs, Reg, RegisterIo};

#[derive(Debug, Default)]
struct State {
    words: HashMap<Reg, u32>,
    writes: u64,
    journal: Option<Vec<(Reg, u32)>>,
}

/// Register file backed by a hash map. Unwritten registers read as zero.
///
/// Clones share the same storage, so a test can keep a handle to the file
/// handed to a device and inject hardware state (queue depths, CQ inflight
/// counts) while the device runs.
///
/// Writes to producer-port doorbells retire entries from the matching CQ
/// counter, which is enough for domain reset to drain CQs.
#[derive(Debug, Clone, Default)]
pub struct MemRegisterFile {
    state: Arc<Mutex<State>>,
}

impl MemRegisterFile {
    /// Create an empty register file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a register.
    #[must_use]
    pub fn get(&self, reg: Reg) -> u32 {
        self.state.lock().words.get(&reg).copied().unwrap_or(0)
    }

    /// Set a register, bypassing doorbell handling and the write counter.
    pub fn set(&self, reg: Reg, value: u32) {
        self.state.lock().words.insert(reg, value);
    }

    /// Total writes issued through [`RegisterIo`].
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    /// Start keeping every [`RegisterIo`] write in order, dropping any
    /// previous journal.
    pub fn record_writes(&self) {
        self.state.lock().journal = Some(Vec::new());
    }

    /// Writes recorded since [`record_writes`](Self::record_writes), oldest
    /// first. Recording stops.
    #[must_use]
    pub fn take_writes(&self) -> Vec<(Reg, u32)> {
        self.state.lock().journal.take().unwrap_or_default()
    }
}

impl RegisterIo for MemRegisterFile {
    fn read(&self, reg: Reg) -> u32 {
        self.get(reg)
    }

    fn write(&mut self, reg: Reg, value: u32) {
        let mut state = self.state.lock();
        state.writes += 1;
        if let Some(journal) = state.journal.as_mut() {
            journal.push((reg, value));
        }
        match regs::doorbell_counter(reg) {
            Some(counter) => {
                let owed = state.words.entry(counter).or_insert(0);
                *owed = owed.saturating_sub(value);
            }
            None => {
                state.words.insert(reg, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_reads_zero() {
        let file = MemRegisterFile::new();
        assert_eq!(file.read(regs::qid_ldb_infl_cnt(3)), 0);
    }

    #[test]
    fn test_clones_share_storage() {
        let file = MemRegisterFile::new();
        let mut handle = file.clone();
        handle.write(regs::ldb_qid_v(1), 1);
        assert_eq!(file.get(regs::ldb_qid_v(1)), 1);
        assert_eq!(file.write_count(), 1);
    }

    #[test]
    fn test_journal_keeps_write_order() {
        let file = MemRegisterFile::new();
        let mut handle = file.clone();
        handle.write(regs::ldb_qid_v(0), 1);
        file.record_writes();
        handle.write(regs::ldb_qid_v(2), 1);
        handle.write(regs::ldb_qid_v(1), 0);
        assert_eq!(
            file.take_writes(),
            vec![(regs::ldb_qid_v(2), 1), (regs::ldb_qid_v(1), 0)]
        );
        handle.write(regs::ldb_qid_v(3), 1);
        assert!(file.take_writes().is_empty());
    }

    #[test]
    fn test_completion_doorbell_retires_inflights() {
        let mut file = MemRegisterFile::new();
        file.set(regs::cq_ldb_infl_cnt(4), 5);
        file.write(regs::ldb_pp_complete(4), 3);
        assert_eq!(file.get(regs::cq_ldb_infl_cnt(4)), 2);
        file.write(regs::ldb_pp_complete(4), 10);
        assert_eq!(file.get(regs::cq_ldb_infl_cnt(4)), 0);
    }

    #[test]
    fn test_token_doorbells() {
        let mut file = MemRegisterFile::new();
        file.set(regs::cq_ldb_tkn_cnt(1), 8);
        file.set(regs::cq_dir_tkn_cnt(9), 2);
        file.write(regs::ldb_pp_token_return(1), 8);
        file.write(regs::dir_pp_token_return(9), 2);
        assert_eq!(file.get(regs::cq_ldb_tkn_cnt(1)), 0);
        assert_eq!(file.get(regs::cq_dir_tkn_cnt(9)), 0);
        assert_eq!(file.get(regs::dir_pp_token_return(9)), 0);
    }
}
