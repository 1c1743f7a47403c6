//! PWM peripheral: channel 1 is run in FIFO mode so that its DREQ paces the
//! DMA engine (`spec.md` section 4.2). The CPU only ever writes a handful of
//! configuration registers; sampling itself never touches the PWM again.

use crate::error::SamplerError;
use crate::mmio::Mmio;
use std::thread::sleep;
use std::time::Duration;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

/// Offset of the PWM block from the peripheral base.
pub const PWM_BASE: usize = 0x0020_C000;

/// Word offset of `FIF1` (the channel 1 FIFO input) within the PWM block.
const FIF1_WORD_OFFSET: u32 = 6;

/// Bus address of the PWM FIFO, usable as a DMA control block destination.
///
/// Only `0x7E00_0000` is OR'd in rather than added, per `spec.md` section
/// 6 — the low bits of the PWM block offset never overlap it, so this is
/// numerically identical to addition, but the OR form documents that the
/// top byte selects the bus-address alias rather than contributing to the
/// peripheral offset.
pub const fn pwm_fifo_bus_addr() -> u32 {
    (PWM_BASE as u32 + FIF1_WORD_OFFSET * 4) | 0x7E00_0000
}

register_bitfields! {
    u32,
    CTL [
        /// Clear the channel 1 FIFO. Self-clearing.
        CLRF1 OFFSET(6) NUMBITS(1) [
            Clear = 1,
        ],
        /// Channel 1 reads from the FIFO rather than `DAT1`.
        USEF1 OFFSET(5) NUMBITS(1) [
            Fifo = 1,
        ],
        /// Channel 1 serializer mode rather than PWM mode.
        MODE1 OFFSET(1) NUMBITS(1) [
            Serializer = 1,
        ],
        /// Channel 1 enable.
        PWEN1 OFFSET(0) NUMBITS(1) [
            Enable = 1,
        ]
    ],
    /// DMA configuration register.
    DMAC [
        /// Enable DMA requests from this peripheral.
        ENAB OFFSET(31) NUMBITS(1) [
            Enable = 1,
        ],
        /// Threshold, in words, below which a panic-priority DREQ is
        /// asserted.
        PANIC OFFSET(8) NUMBITS(8) [],
        /// Threshold, in words, below which a normal-priority DREQ is
        /// asserted.
        DREQ OFFSET(0) NUMBITS(8) []
    ]
}

register_structs! {
    Registers {
        (0x00 => ctl: ReadWrite<u32, CTL::Register>),
        (0x04 => sta: ReadWrite<u32>),
        (0x08 => dmac: ReadWrite<u32, DMAC::Register>),
        (0x0C => _unused0),
        (0x10 => rng1: ReadWrite<u32>),
        (0x14 => dat1: ReadWrite<u32>),
        (0x18 => fif1: ReadWrite<u32>),
        (0x1C => _unused1),
        (0x20 => rng2: ReadWrite<u32>),
        (0x24 => dat2: ReadWrite<u32>),
        (0x28 => @END),
    }
}

type RegisterBlock = Mmio<Registers>;

/// DREQ/panic thresholds, in FIFO words. Both set aggressively high per
/// `spec.md` section 4.2, so the DMA engine is serviced as soon as the FIFO
/// starts to drain.
const DMA_THRESHOLD: u32 = 15;

/// A driver for PWM channel 1, configured as a DREQ source.
pub struct Pwm {
    registers: RegisterBlock,
}

impl Pwm {
    /// Maps the PWM peripheral.
    pub fn open() -> Result<Self, SamplerError> {
        let ptr = crate::mmio::map_peripheral(PWM_BASE)?;
        // SAFETY: `ptr` is a fresh, page-sized mapping owned exclusively by
        // this value for the remainder of the process.
        Ok(Self {
            registers: unsafe { RegisterBlock::new(ptr) },
        })
    }

    /// Resets channel 1 and reconfigures it to emit one DREQ every
    /// `CLK_PERIOD_US` microseconds once its clock (configured separately
    /// via [`crate::peripherals::clock::PwmClock`]) is running.
    pub fn configure(&mut self) {
        self.registers.ctl.set(0);
        sleep(Duration::from_micros(10));
        self.registers.sta.set(u32::MAX);
        sleep(Duration::from_micros(10));

        // One FIFO word drains in exactly `CLK_PERIOD_US` microseconds at
        // the divided PLLD clock: 100 serial bits per microsecond of period.
        self.registers
            .rng1
            .set(100 * crate::consts::CLK_PERIOD_US);

        self.registers.dmac.write(
            DMAC::ENAB::Enable + DMAC::PANIC.val(DMA_THRESHOLD) + DMAC::DREQ.val(DMA_THRESHOLD),
        );
        sleep(Duration::from_micros(10));

        self.registers.ctl.write(CTL::CLRF1::Clear);
        sleep(Duration::from_micros(10));

        self.registers
            .ctl
            .write(CTL::USEF1::Fifo + CTL::MODE1::Serializer + CTL::PWEN1::Enable);
    }
}
