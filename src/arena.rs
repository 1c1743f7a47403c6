//! Coherent memory arena (`spec.md` section 4.1): allocates the two
//! page-aligned, uncached regions backing the control-block ring and the
//! result ring, and exposes the branchless virt/bus address helpers the DMA
//! program builder and ring monitor both rely on.

use crate::consts::{
    CB_CNT, LEVELS_PER_PAGE, LEVEL_CNT, PADDINGS_PER_PAGE, PAGE_SIZE, RESULT_PAGE_CNT,
    TICKS_PER_PAGE, TICK_CNT,
};
use crate::error::SamplerError;
use crate::mailbox::{self, MemHandle, Mailbox};
use crate::peripherals::dma::ControlBlock;

/// Control blocks that fit in one page.
const CBS_PER_PAGE: u32 = (PAGE_SIZE / std::mem::size_of::<ControlBlock>()) as u32;

/// Pages needed to hold `CB_CNT` control blocks.
const CB_PAGE_CNT: u32 = (CB_CNT + CBS_PER_PAGE - 1) / CBS_PER_PAGE;

const _RESULT_PAGE_SIZE_CHECK: () = assert!(
    (TICKS_PER_PAGE + LEVELS_PER_PAGE + PADDINGS_PER_PAGE) as usize * 4 == PAGE_SIZE,
    "ticks + levels + padding must fill exactly one page"
);

/// One physically contiguous, L1-non-allocating allocation, mapped into
/// this process's address space. Freed exactly once, by [`Arena::free`].
struct Arena {
    virt_addr: *mut u8,
    bus_addr: u32,
    handle: MemHandle,
    size: usize,
}

impl Arena {
    /// Allocates, locks, and maps `size` bytes (rounded up to whole pages)
    /// of coherent memory via the mailbox property interface.
    fn alloc(mailbox: &Mailbox, size: usize) -> Result<Self, SamplerError> {
        let rounded = (size + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE;
        #[allow(clippy::cast_possible_truncation)]
        let handle = mailbox.alloc(rounded as u32, PAGE_SIZE as u32)?;
        let bus_addr = mailbox.lock(handle)?;

        let phys_addr = mailbox::bus_to_phys(bus_addr);
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/mem")
            .map_err(SamplerError::Mmio)?;
        // SAFETY: `phys_addr` names a physically contiguous region the
        // mailbox just locked for this process; the mapping is released by
        // `free` before the handle is unlocked/released.
        let virt_addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                rounded,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                std::os::unix::io::AsRawFd::as_raw_fd(&file),
                phys_addr as libc::off_t,
            )
        };
        if virt_addr == libc::MAP_FAILED {
            mailbox.unlock(handle);
            mailbox.free(handle);
            return Err(SamplerError::Mmio(std::io::Error::last_os_error()));
        }

        eprintln!(
            "[LOG] alloc: {rounded} bytes; {virt_addr:p} (bus=0x{bus_addr:08X}, phys=0x{phys_addr:08X})"
        );

        Ok(Self {
            virt_addr: virt_addr.cast(),
            bus_addr,
            handle,
            size: rounded,
        })
    }

    /// Unmaps, unlocks, and releases the allocation. Safe to call at most
    /// once per `Arena` — enforced by consuming `self`.
    fn free(self, mailbox: &Mailbox) {
        // SAFETY: `virt_addr`/`size` are exactly what `mmap` returned/was
        // given in `alloc`.
        unsafe {
            libc::munmap(self.virt_addr.cast(), self.size);
        }
        mailbox.unlock(self.handle);
        mailbox.free(self.handle);
    }
}

/// The two coherent arenas backing the sampling ring, plus the mailbox
/// connection needed to release them.
pub struct RingArenas {
    mailbox: Mailbox,
    cb_arena: Arena,
    result_arena: Arena,
}

impl RingArenas {
    /// Allocates the control-block ring (`CB_PAGE_CNT` pages) and the
    /// result ring (`RESULT_PAGE_CNT` pages).
    pub fn alloc() -> Result<Self, SamplerError> {
        let mailbox = Mailbox::open()?;
        let cb_arena = Arena::alloc(
            &mailbox,
            CB_PAGE_CNT as usize * std::mem::size_of::<[ControlBlock; CBS_PER_PAGE as usize]>(),
        )?;
        let result_arena = Arena::alloc(&mailbox, RESULT_PAGE_CNT as usize * PAGE_SIZE)?;
        Ok(Self {
            mailbox,
            cb_arena,
            result_arena,
        })
    }

    /// Virtual pointer to control block `i`. Caller must hold `i < CB_CNT`.
    pub fn cb_virt(&self, i: u32) -> *mut ControlBlock {
        debug_assert!(i < CB_CNT);
        // SAFETY: the arena holds `CB_PAGE_CNT * CBS_PER_PAGE >= CB_CNT`
        // contiguous control blocks; `i` is in range by the caller's
        // invariant.
        unsafe {
            self.cb_arena
                .virt_addr
                .cast::<ControlBlock>()
                .add(i as usize)
        }
    }

    /// Bus address of control block `i`. Caller must hold `i < CB_CNT`.
    pub fn cb_bus(&self, i: u32) -> u32 {
        debug_assert!(i < CB_CNT);
        self.cb_arena.bus_addr + i * std::mem::size_of::<ControlBlock>() as u32
    }

    /// Bus address of the first control block in the ring, past the end of
    /// the ring (exclusive): used by the monitor to check the channel's
    /// live CB address is still inside the ring.
    pub fn cb_base_bus(&self) -> u32 {
        self.cb_arena.bus_addr
    }

    /// Virtual pointer to `ticks[i]`, where `i` is a slot index in
    /// `[0, TICK_CNT)`.
    fn tick_virt(&self, i: u32) -> *mut u32 {
        debug_assert!(i < TICK_CNT);
        let page = i / TICKS_PER_PAGE;
        let index = i % TICKS_PER_PAGE;
        let page_base = self.result_arena.virt_addr as usize + page as usize * PAGE_SIZE;
        (page_base + index as usize * 4) as *mut u32
    }

    /// Bus address of `ticks[i]`.
    fn tick_bus(&self, i: u32) -> u32 {
        debug_assert!(i < TICK_CNT);
        let page = i / TICKS_PER_PAGE;
        let index = i % TICKS_PER_PAGE;
        self.result_arena.bus_addr + page * PAGE_SIZE as u32 + index * 4
    }

    /// Virtual pointer to `levels[i]`, where `i` is a level index in
    /// `[0, LEVEL_CNT)`.
    fn level_virt(&self, i: u32) -> *mut u32 {
        debug_assert!(i < LEVEL_CNT);
        let page = i / LEVELS_PER_PAGE;
        let index = i % LEVELS_PER_PAGE;
        let page_base = self.result_arena.virt_addr as usize + page as usize * PAGE_SIZE;
        // `levels[]` follows `ticks[TICKS_PER_PAGE]` within the page.
        (page_base + (TICKS_PER_PAGE + index) as usize * 4) as *mut u32
    }

    /// Bus address of `levels[i]`.
    pub fn level_bus(&self, i: u32) -> u32 {
        debug_assert!(i < LEVEL_CNT);
        let page = i / LEVELS_PER_PAGE;
        let index = i % LEVELS_PER_PAGE;
        self.result_arena.bus_addr + page * PAGE_SIZE as u32 + (TICKS_PER_PAGE + index) * 4
    }

    /// Reads `ticks[i]`. Only valid after the monitor has observed the
    /// channel advance past the tick CB that writes it.
    pub fn read_tick(&self, i: u32) -> u32 {
        // SAFETY: `tick_virt` computes an address within the mapped result
        // arena; the DMA engine only ever writes whole words here, so a
        // volatile read never tears.
        unsafe { self.tick_virt(i).read_volatile() }
    }

    /// Reads `levels[i]`. Only valid after the monitor has observed the
    /// channel advance past the pace CB paired with the level CB that
    /// writes it.
    pub fn read_level(&self, i: u32) -> u32 {
        // SAFETY: see `read_tick`.
        unsafe { self.level_virt(i).read_volatile() }
    }

    /// Frees both arenas and closes the mailbox connection. Idempotent:
    /// repeated calls after the first are no-ops (`spec.md` section 8,
    /// P5).
    pub fn free(self) {
        // `Arena::free` consumes its receiver, so double-free is rejected
        // at compile time by ownership rather than a runtime flag; a
        // `RingArenas` can only be freed once because this method consumes
        // `self`. `Lifecycle` (src/lifecycle.rs) enforces the "idempotent
        // teardown" property by only calling this once, guarded by an
        // `Option`.
        // Result pages first, then CB pages, per `spec.md` section 4.6.
        self.result_arena.free(&self.mailbox);
        self.cb_arena.free(&self.mailbox);
    }
}

impl crate::program::Ring for RingArenas {
    fn cb_bus(&self, i: u32) -> u32 {
        RingArenas::cb_bus(self, i)
    }
    fn tick_bus(&self, i: u32) -> u32 {
        RingArenas::tick_bus(self, i)
    }
    fn level_bus(&self, i: u32) -> u32 {
        RingArenas::level_bus(self, i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cb_per_page_and_page_count_match_spec() {
        assert_eq!(CBS_PER_PAGE, 128);
        assert_eq!(CB_PAGE_CNT, 316);
    }
}
