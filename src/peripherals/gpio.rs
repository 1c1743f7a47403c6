//! GPIO peripheral: only the level register is needed, and only as a DMA
//! source address — the CPU never reads it directly.

use crate::mmio::PERI_BUS_BASE;

/// Offset of the GPIO block from the peripheral base.
pub const GPIO_BASE: usize = 0x0020_0000;

/// Word offset of `GPLEV0` (pin level, pins 0-31) within the GPIO block.
const GPLEV0_WORD_OFFSET: u32 = 13;

/// Bus address of `GPLEV0`, suitable as a DMA control block source.
pub const fn gplev0_bus_addr() -> u32 {
    PERI_BUS_BASE + GPIO_BASE as u32 + GPLEV0_WORD_OFFSET * 4
}

/// Bits 28-31 of `GPLEV0` are reserved on this SoC; readers must mask them
/// off before comparing or reporting a level.
pub const GPLEV0_VALID_MASK: u32 = 0x0FFF_FFFF;
