//! Register definitions for the peripherals the DMA program touches.
//!
//! Each module defines the bus address of the register(s) it needs (for use
//! as a DMA source/destination) and, where the CPU itself must program the
//! peripheral directly (the clock manager, PWM, and DMA channel header), a
//! `tock_registers::register_structs!` block behind an [`crate::mmio::Mmio`].

pub mod clock;
pub mod dma;
pub mod gpio;
pub mod pwm;
pub mod systimer;
