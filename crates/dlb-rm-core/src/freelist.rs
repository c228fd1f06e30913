//! Contiguous allocation window carved from a larger pool.

use serde::Serialize;

/// A `[base, bound)` window whose first `offset` entries have been handed out.
///
/// Allocation only ever advances `offset`; entries come back to the owning
/// pool all at once when the window is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Freelist {
    /// First entry of the window.
    pub base: u32,
    /// One past the last entry of the window.
    pub bound: u32,
    /// Entries already handed out.
    pub offset: u32,
}

impl Freelist {
    /// Window of `len` entries starting at `base`.
    #[must_use]
    pub fn new(base: u32, len: u32) -> Self {
        Self {
            base,
            bound: base + len,
            offset: 0,
        }
    }

    /// Size of the window.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.bound - self.base
    }

    /// Entries not yet handed out.
    #[must_use]
    pub fn available(&self) -> u32 {
        self.bound - self.base - self.offset
    }

    /// Take `n` entries, returning the first one, or `None` if the window is
    /// too small.
    pub fn alloc(&mut self, n: u32) -> Option<u32> {
        if n > self.available() {
            return None;
        }
        let start = self.base + self.offset;
        self.offset += n;
        Some(start)
    }

    /// Empty the window.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
