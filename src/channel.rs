//! DMA channel driver (`spec.md` section 4.4): starts and stops the channel
//! running the sampling program, and exposes the live control-block address
//! the ring monitor polls.

use crate::error::SamplerError;
use crate::mmio::Mmio;
use crate::peripherals::dma::{ChannelHeader, CONBLK_AD, CS, DMA_BASE, DMA_CHANNEL_STRIDE};
use std::thread::sleep;
use std::time::Duration;
use tock_registers::interfaces::{Readable, Writeable};

/// AXI priority given to both normal and panicking transactions. Modest and
/// fixed, since nothing else on the bus competes with a 4-byte-per-DREQ
/// transfer stream.
const CHANNEL_PRIORITY: u32 = 8;

/// A driver for one "full" DMA channel (channels 0-14 on the 2835, 0-10 on
/// the 2711; Lite channels cannot run this program since they lack 2D mode
/// support the engine otherwise ignores here, but more importantly are
/// absent on some revisions — the caller picks a channel number known to be
/// a full channel on their board).
pub struct Channel {
    registers: Mmio<ChannelHeader>,
}

impl Channel {
    /// Maps channel `index`'s header registers.
    ///
    /// All "full" channel headers (16 of them, 0x100 bytes apart) fit in one
    /// page starting at `DMA_BASE`, so — matching `dma-read.c`'s
    /// `map_peripheral(DMA_BASE, PAGE_SIZE)` — this maps that whole page
    /// once and indexes into it, rather than asking `mmap` for a
    /// channel-sized, non-page-aligned offset.
    pub fn open(index: u32) -> Result<Self, SamplerError> {
        let dma_base_ptr: *mut u8 = crate::mmio::map_peripheral(DMA_BASE)?;
        // SAFETY: `dma_base_ptr` is a fresh, page-sized mapping owned
        // exclusively by this value for the remainder of the process;
        // `index * DMA_CHANNEL_STRIDE` stays within that page for every
        // full DMA channel on this SoC.
        let ptr = unsafe { dma_base_ptr.add(index as usize * DMA_CHANNEL_STRIDE) };
        Ok(Self {
            registers: unsafe { Mmio::new(ptr.cast()) },
        })
    }

    /// Resets the channel, points it at the ring's first control block, and
    /// activates it. Idempotent with [`Channel::stop`]: calling `start`
    /// again after a `stop` restarts the program from the same address.
    pub fn start(&mut self, first_cb_bus: u32) {
        self.registers.cs.write(CS::ABORT::Abort);
        self.registers.cs.set(0);
        self.registers.cs.write(CS::RESET::Reset);
        self.registers.conblk_ad.set(0);
        self.registers
            .cs
            .write(CS::INTERRUPT_STATUS::Clear + CS::END_FLAG::Clear);

        self.registers
            .conblk_ad
            .write(CONBLK_AD::ADDR.val(first_cb_bus));

        self.registers.cs.write(
            CS::PANIC_PRIORITY.val(CHANNEL_PRIORITY)
                + CS::PRIORITY.val(CHANNEL_PRIORITY)
                + CS::DISDEBUG::Ignore
                + CS::WAIT_ON_WRITES::Wait
                + CS::ACTIVE::Active,
        );
    }

    /// Aborts the in-flight transfer and resets the channel. Safe to call
    /// even if the channel was never started, or was already stopped
    /// (`spec.md` section 8, P5).
    pub fn stop(&mut self) {
        self.registers.cs.write(CS::ABORT::Abort);
        sleep(Duration::from_micros(100));
        self.registers.cs.set(0);
        self.registers.cs.write(CS::RESET::Reset);
    }

    /// Reads the bus address of the control block currently (or most
    /// recently) executing.
    pub fn live_cb_bus(&self) -> u32 {
        self.registers.conblk_ad.read(CONBLK_AD::ADDR)
    }
}
