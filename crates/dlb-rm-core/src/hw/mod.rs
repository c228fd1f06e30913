//! Hardware register access.
//!
//! The resource manager never touches hardware directly; it goes through a
//! [`RegisterIo`] implementation covering two address spaces:
//!
//! - [`Space::Csr`]: configuration and status registers
//! - [`Space::Func`]: per-resource direct access (producer-port doorbells)
//!
//! Two implementations exist:
//! - [`MmioRegisters`]: memory-mapped PCI BARs of a real device
//! - [`MemRegisterFile`]: in-memory register file used for simulation and tests

mod mem;
mod mmio;
pub mod regs;

pub use mem::MemRegisterFile;
pub use mmio::MmioRegisters;

/// Register address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Space {
    /// Configuration and status registers.
    Csr,
    /// Per-resource direct-access window.
    Func,
}

/// A 32-bit register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg {
    /// Address space the register lives in.
    pub space: Space,
    /// Byte offset within the space, 4-byte aligned.
    pub offset: u32,
}

/// Aligned 32-bit word access to device registers.
pub trait RegisterIo: Send {
    /// Read a register.
    fn read(&self, reg: Reg) -> u32;

    /// Write a register.
    fn write(&mut self, reg: Reg, value: u32);

    /// Make preceding writes visible to the device.
    fn flush(&self) {}

    /// Read-modify-write: set `mask` bits.
    fn set_bits(&mut self, reg: Reg, mask: u32) {
        let value = self.read(reg);
        self.write(reg, value | mask);
    }

    /// Read-modify-write: clear `mask` bits.
    fn clear_bits(&mut self, reg: Reg, mask: u32) {
        let value = self.read(reg);
        self.write(reg, value & !mask);
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for Box<T> {
    fn read(&self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: Reg, value: u32) {
        (**self).write(reg, value);
    }

    fn flush(&self) {
        (**self).flush();
    }
}
