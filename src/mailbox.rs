//! VideoCore mailbox property interface, used only to allocate and release
//! physically contiguous, L1-non-allocating ("coherent") memory for the
//! control-block and result rings (`spec.md` section 6, "External services
//! consumed").
//!
//! This workspace's other mailbox driver (`bootloader-loader/src/mailbox.rs`)
//! talks to the same property interface by writing request buffers directly
//! to the mailbox's memory-mapped registers, because it runs before Linux is
//! loaded. In userspace the kernel already owns that interface and exposes
//! it through `/dev/vcio`; the buffer layout (size, request/response code,
//! tag ID, tag value buffer size, tag request/response code, values, end
//! tag) is identical, only the transport differs. The `buffer!`-style
//! request structs below mirror that file's `buffer!` macro output.

use crate::error::SamplerError;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

/// Tag ID for allocating GPU memory.
const TAG_ALLOCATE_MEMORY: u32 = 0x0003_000C;
/// Tag ID for locking allocated memory to a bus address.
const TAG_LOCK_MEMORY: u32 = 0x0003_000D;
/// Tag ID for unlocking previously-locked memory.
const TAG_UNLOCK_MEMORY: u32 = 0x0003_000E;
/// Tag ID for releasing allocated memory.
const TAG_RELEASE_MEMORY: u32 = 0x0003_000F;

/// Memory is to be allocated such that it does not allocate into the L1
/// cache at all, matching `spec.md` section 4.1's requirement that the
/// arena be "L1-non-allocating".
const MEM_FLAG_DIRECT: u32 = 1 << 2;
const MEM_FLAG_COHERENT: u32 = 2 << 2;
const MEM_FLAG_L1_NONALLOCATING: u32 = MEM_FLAG_DIRECT | MEM_FLAG_COHERENT;

/// Handle returned by `mailbox_alloc`, opaque except for release purposes.
#[derive(Debug, Clone, Copy)]
pub struct MemHandle(u32);

/// A connection to the VideoCore firmware's property-tag interface.
pub struct Mailbox {
    file: File,
}

impl Mailbox {
    /// Opens `/dev/vcio`.
    pub fn open() -> Result<Self, SamplerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/vcio")
            .map_err(SamplerError::Mmio)?;
        Ok(Self { file })
    }

    /// Sends a single-tag property request and returns the tag's response
    /// values, overwriting `values` in place.
    ///
    /// The buffer layout follows the mailbox property-interface convention:
    /// `[size, code, tag, value_size, tag_code, values..., end_tag]`.
    fn send_tag(&self, tag: u32, values: &mut [u32]) -> Result<(), SamplerError> {
        let mut buffer = Vec::with_capacity(values.len() + 6);
        buffer.push(0); // overall size, patched below
        buffer.push(0); // request code: process request
        buffer.push(tag);
        #[allow(clippy::cast_possible_truncation)]
        buffer.push((values.len() * 4) as u32); // value buffer size
        buffer.push(0); // request/response code
        buffer.extend_from_slice(values);
        buffer.push(0); // end tag

        #[allow(clippy::cast_possible_truncation)]
        let total_len = (buffer.len() * 4) as u32;
        buffer[0] = total_len;

        // SAFETY: `buffer` is a valid, appropriately-sized property-message
        // buffer for the VideoCore mailbox ioctl, which both reads and
        // writes it in place.
        let result = unsafe { ioctl_property(self.file.as_raw_fd(), buffer.as_mut_ptr()) };
        if result < 0 {
            return Err(SamplerError::Mailbox("ioctl(IOCTL_MBOX_PROPERTY) failed"));
        }

        let response_code = buffer[4];
        if response_code & 0x8000_0000 == 0 {
            return Err(SamplerError::Mailbox("no response from VideoCore"));
        }
        if response_code == 0x8000_0001 {
            return Err(SamplerError::Mailbox("VideoCore rejected request"));
        }

        values.copy_from_slice(&buffer[5..5 + values.len()]);
        Ok(())
    }

    /// Allocates `size` bytes (already page-rounded by the caller) of
    /// coherent GPU memory and returns an opaque handle to it.
    pub fn alloc(&self, size: u32, align: u32) -> Result<MemHandle, SamplerError> {
        let mut values = [size, align, MEM_FLAG_L1_NONALLOCATING];
        self.send_tag(TAG_ALLOCATE_MEMORY, &mut values)?;
        let handle = values[0];
        if handle == 0 {
            return Err(SamplerError::Mailbox("allocation returned a null handle"));
        }
        Ok(MemHandle(handle))
    }

    /// Locks previously-allocated memory and returns its bus address.
    pub fn lock(&self, handle: MemHandle) -> Result<u32, SamplerError> {
        let mut values = [handle.0];
        self.send_tag(TAG_LOCK_MEMORY, &mut values)?;
        let bus_addr = values[0];
        if bus_addr == 0 {
            return Err(SamplerError::Mailbox(
                "lock returned a null bus address: could not allocate a contiguous block",
            ));
        }
        Ok(bus_addr)
    }

    /// Unlocks previously-locked memory. Errors are logged, not propagated,
    /// since this only ever runs during teardown.
    pub fn unlock(&self, handle: MemHandle) {
        let mut values = [handle.0];
        if let Err(err) = self.send_tag(TAG_UNLOCK_MEMORY, &mut values) {
            eprintln!("[WARN] failed to unlock coherent memory: {err}");
        }
    }

    /// Releases previously-allocated memory. Errors are logged, not
    /// propagated, since this only ever runs during teardown.
    pub fn free(&self, handle: MemHandle) {
        let mut values = [handle.0];
        if let Err(err) = self.send_tag(TAG_RELEASE_MEMORY, &mut values) {
            eprintln!("[WARN] failed to release coherent memory: {err}");
        }
    }
}

/// Converts a bus address (as returned by `lock`) to the physical address
/// `mmap()` needs, masking off the VideoCore's alias bits.
pub const fn bus_to_phys(bus_addr: u32) -> usize {
    (bus_addr & !0xC000_0000) as usize
}

/// Issues the mailbox property-interface ioctl.
///
/// # Safety
/// `buffer` must point to a property-message buffer of at least the size
/// encoded in its own first word, valid for the duration of the call.
unsafe fn ioctl_property(fd: std::os::unix::io::RawFd, buffer: *mut u32) -> i32 {
    /// `_IOWR(100, 0, char*)`, as defined by `linux/include/soc/bcm2835/vcio.h`
    /// (major 100, nr 0, a `char *`-sized payload).
    const IOCTL_MBOX_PROPERTY: libc::c_ulong = 0xC004_6400;
    // SAFETY: upheld by this function's contract.
    unsafe { libc::ioctl(fd, IOCTL_MBOX_PROPERTY, buffer) }
}
