//! Memory-mapped IO wrapper and the `/dev/mem` mapping it is built on.
//!
//! Grounded on the repeated `Mmio<T>` idiom elsewhere in this codebase
//! (`src/board/mmio.rs`, `kernel/src/board/uart.rs`): a thin pointer wrapper
//! that `Deref`s to a `tock_registers::register_structs!` block. There, the
//! address is a compile-time physical constant baked in by the linker; here,
//! since this runs in userspace rather than at EL1 with an identity map, the
//! address instead comes from `mmap()`-ing the peripheral's physical range
//! out of `/dev/mem`.

use crate::error::SamplerError;
use std::io;
use std::os::unix::io::AsRawFd;

/// Physical base address of the peripheral block on this SoC.
///
/// `dma-read.c` hard-codes the BCM2835/2711 "low peripheral" base; this
/// crate does the same rather than probing `/proc/device-tree`, matching
/// the scope of `spec.md`'s external collaborators (MMIO mapping is assumed
/// available, not auto-detected).
pub const PERI_PHYS_BASE: usize = 0x3F00_0000;

/// Bus-address alias for the same peripheral block, as seen by the DMA
/// engine rather than the CPU.
pub const PERI_BUS_BASE: u32 = 0x7E00_0000;

/// Memory-mapped IO wrapper.
///
/// # Safety invariant
/// `start_addr` must point to a valid, exclusively-owned mapping of at least
/// `size_of::<T>()` bytes for as long as this value exists.
pub struct Mmio<T> {
    start_addr: *mut T,
}

impl<T> Mmio<T> {
    /// Creates an MMIO wrapper at the given location.
    ///
    /// # Safety
    /// `start_addr` must be correct, mapped, and not aliased by any other
    /// live `Mmio` over the same range.
    pub const unsafe fn new(start_addr: *mut T) -> Self {
        Self { start_addr }
    }
}

impl<T> std::ops::Deref for Mmio<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: upheld by the constructor's invariant.
        unsafe { &*self.start_addr }
    }
}

// SAFETY: the pointee is a set of volatile MMIO registers; nothing about
// moving the handle between threads touches non-volatile state.
unsafe impl<T> Send for Mmio<T> {}

/// Opens `/dev/mem` and maps `size` bytes starting at `PERI_PHYS_BASE +
/// offset`, returning the mapping's base pointer.
///
/// The mapping is intentionally leaked for the process's lifetime: every
/// peripheral region here is used for as long as the sampler runs, and is
/// released implicitly when the process exits.
pub fn map_peripheral<T>(offset: usize) -> Result<*mut T, SamplerError> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/mem")
        .map_err(SamplerError::Mmio)?;

    let size = std::mem::size_of::<T>().max(crate::consts::PAGE_SIZE);
    // SAFETY: `file` stays open for the call; the kernel validates the
    // offset and length against `/dev/mem`'s bounds.
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            (PERI_PHYS_BASE + offset) as libc::off_t,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(SamplerError::Mmio(io::Error::last_os_error()));
    }

    Ok(addr.cast())
}
