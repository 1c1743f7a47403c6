//! DMA engine: the control block layout the program builder populates
//! (`spec.md` section 3, "Entities") and the per-channel header the channel
//! driver operates (`spec.md` section 4.4).
//!
//! The control block bitfield and register layout are carried over from this
//! workspace's other DMA driver (`bootloader-loader/src/dma.rs`), which
//! targets the DMA Lite engines used to pace UART transfers; this is the
//! same 8-word control block shape, used here with the "full" (non-Lite)
//! DMA engines' channel header, which only needs `CS` and `CONBLK_AD`.

use bitfield_struct::bitfield;
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

/// Offset of the DMA engine block from the peripheral base.
pub const DMA_BASE: usize = 0x0000_7000;

/// Byte stride between one channel's header and the next.
pub const DMA_CHANNEL_STRIDE: usize = 0x100;

register_bitfields! {
    u32,
    /// Per-channel Control and Status register.
    pub CS [
        /// Reset the channel. Self-clearing, write-only.
        RESET OFFSET(31) NUMBITS(1) [
            Reset = 1,
        ],
        /// Abort the in-flight transfer; the engine will load the next CB
        /// and attempt to continue. Self-clearing, write-only.
        ABORT OFFSET(30) NUMBITS(1) [
            Abort = 1,
        ],
        /// Ignore the debug pause signal.
        DISDEBUG OFFSET(29) NUMBITS(1) [
            Ignore = 1,
        ],
        /// Wait for outstanding AXI writes to complete before indicating
        /// transfer completion.
        WAIT_ON_WRITES OFFSET(28) NUMBITS(1) [
            Wait = 1,
        ],
        /// AXI priority used for panicking bus transactions.
        PANIC_PRIORITY OFFSET(20) NUMBITS(4) [],
        /// AXI priority used for normal bus transactions.
        PRIORITY OFFSET(16) NUMBITS(4) [],
        /// Sticky interrupt status flag; write 1 to clear.
        INTERRUPT_STATUS OFFSET(2) NUMBITS(1) [
            Clear = 1,
        ],
        /// Sticky end-of-transfer flag; write 1 to clear.
        END_FLAG OFFSET(1) NUMBITS(1) [
            Clear = 1,
        ],
        /// Activates the channel; self-clears when `NEXTCONBK` reaches
        /// zero.
        ACTIVE OFFSET(0) NUMBITS(1) [
            Active = 1,
        ]
    ],
    /// Control Block Address register; reading it returns the bus address
    /// of the CB currently being executed.
    pub CONBLK_AD [
        ADDR OFFSET(0) NUMBITS(32) []
    ]
}

register_structs! {
    pub ChannelHeader {
        (0x00 => pub cs: ReadWrite<u32, CS::Register>),
        (0x04 => pub conblk_ad: ReadWrite<u32, CONBLK_AD::Register>),
        (0x08 => @END),
    }
}

/// DMA control block "transfer info" field. Only the bits the sampling
/// program needs are set (`no_wide_bursts`, `wait_resp`, `dest_dreq`,
/// `permap`); the rest exist because the hardware register does.
#[bitfield(u32)]
pub struct TransferInfo {
    /// Generate an interrupt on completion. Unused: the channel is polled.
    inten: bool,
    tdmode: bool,
    _res0: bool,
    /// Wait for the AXI write response before proceeding. Set on every CB
    /// in the ring so a level write is durably visible before its paired
    /// pace CB starts (`spec.md` section 5, "Ordering guarantees").
    pub wait_resp: bool,
    dest_inc: bool,
    dest_width: bool,
    /// Gate destination writes on the peripheral mapped by `permap`. Set
    /// only on pace CBs.
    pub dest_dreq: bool,
    dest_ignore: bool,
    src_inc: bool,
    src_width: bool,
    src_dreq: bool,
    src_ignore: bool,
    #[bits(4)]
    burst_length: u8,
    /// Peripheral whose DREQ gates this transfer when `dest_dreq` is set.
    #[bits(5)]
    pub permap: u8,
    #[bits(5)]
    waits: u8,
    /// Don't issue wide writes as 2-beat AXI bursts. Set on every CB, since
    /// these are all single-word transfers where the wide-burst mode has
    /// no benefit.
    pub no_wide_bursts: bool,
    #[bits(5)]
    _res1: u8,
}

/// Peripheral mapping selecting PWM channel 1's DREQ line.
pub const PERIPHERAL_MAPPING_PWM: u8 = 5;

/// A single DMA control block: transfers `length` bytes from `src` to `dst`
/// (both bus addresses) and then jumps to `next_cb` (also a bus address).
///
/// Must be 32-byte aligned and exactly 32 bytes long (`spec.md` section 3).
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy)]
pub struct ControlBlock {
    pub info: TransferInfo,
    pub src: u32,
    pub dst: u32,
    pub length: u32,
    pub stride: u32,
    pub next_cb: u32,
    _reserved: [u32; 2],
}

impl ControlBlock {
    /// Builds a control block. `length` is always 4 in this program (one
    /// 32-bit register per transfer); `stride` is always 0 (no 2D mode).
    pub const fn new(info: TransferInfo, src: u32, dst: u32, next_cb: u32) -> Self {
        Self {
            info,
            src,
            dst,
            length: 4,
            stride: 0,
            next_cb,
            _reserved: [0; 2],
        }
    }
}

const _SIZE_CHECK: () = assert!(std::mem::size_of::<ControlBlock>() == 32);
const _ALIGN_CHECK: () = assert!(std::mem::align_of::<ControlBlock>() == 32);
