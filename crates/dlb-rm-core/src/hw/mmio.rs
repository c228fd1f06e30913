//! Memory-mapped register access to a real device.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use nix::libc;

use super::{Reg, RegisterIo, Space};
use crate::error::Result;

/// One mapped PCI BAR.
#[derive(Debug)]
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "BAR too large"))?;
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "empty BAR").into());
        }

        // SAFETY: fresh shared mapping of a resource file we hold open; the
        // kernel validates length and protection.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Self {
            ptr: ptr.cast::<u8>(),
            len,
        })
    }

    fn word(&self, offset: u32) -> Option<*mut u32> {
        let offset = offset as usize;
        if offset % 4 != 0 || offset + 4 > self.len {
            return None;
        }
        // SAFETY: offset + 4 is within the mapping and 4-byte aligned.
        Some(unsafe { self.ptr.add(offset) }.cast::<u32>())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped once.
        let ret = unsafe { libc::munmap(self.ptr.cast::<libc::c_void>(), self.len) };
        if ret < 0 {
            tracing::warn!(error = %io::Error::last_os_error(), "munmap of BAR failed");
        }
    }
}

/// Registers of a device reached through its PCI resource files.
#[derive(Debug)]
pub struct MmioRegisters {
    csr: Mapping,
    func: Mapping,
}

// SAFETY: the mappings are only accessed through volatile word operations and
// the device lock serializes all users.
unsafe impl Send for MmioRegisters {}

impl MmioRegisters {
    /// Map the CSR and function BARs from explicit resource files.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be opened or mapped.
    pub fn open(csr_path: impl AsRef<Path>, func_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            csr: Mapping::open(csr_path.as_ref())?,
            func: Mapping::open(func_path.as_ref())?,
        })
    }

    /// Map the BARs of the PCI device at `bdf` (e.g. `0000:6d:00.0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the device's resource files cannot be mapped.
    pub fn open_pci(bdf: &str) -> Result<Self> {
        let dir = Path::new("/sys/bus/pci/devices").join(bdf);
        tracing::debug!(bdf, "mapping device BARs");
        Self::open(dir.join("resource2"), dir.join("resource0"))
    }

    fn mapping(&self, space: Space) -> &Mapping {
        match space {
            Space::Csr => &self.csr,
            Space::Func => &self.func,
        }
    }
}

impl RegisterIo for MmioRegisters {
    fn read(&self, reg: Reg) -> u32 {
        match self.mapping(reg.space).word(reg.offset) {
            // SAFETY: word() bounds-checked and aligned the address.
            Some(ptr) => unsafe { ptr.read_volatile() },
            None => {
                tracing::error!(?reg, "register read outside BAR");
                u32::MAX
            }
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        match self.mapping(reg.space).word(reg.offset) {
            // SAFETY: word() bounds-checked and aligned the address.
            Some(ptr) => unsafe { ptr.write_volatile(value) },
            None => tracing::error!(?reg, value, "register write outside BAR"),
        }
    }

    fn flush(&self) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}
