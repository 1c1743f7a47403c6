//! Error taxonomy for the sampler, per `spec.md` section 7.

use std::fmt;
use std::io;

/// Failures this crate can report. Setup failures (`Mailbox`, `Mmio`) occur
/// before the DMA channel is started and need no teardown beyond best-effort
/// unmap/free. Runtime invariant violations (`RingExited`,
/// `IndexOutOfRange`) are fatal: the caller must tear down and exit non-zero.
#[derive(Debug)]
pub enum SamplerError {
    /// The VideoCore property-interface mailbox refused a request, or
    /// returned a zero handle/bus address.
    Mailbox(&'static str),
    /// Opening or mapping `/dev/mem` failed.
    Mmio(io::Error),
    /// The DMA channel's live control-block address fell outside
    /// `[cb_base, cb_base + CB_CNT * sizeof(ControlBlock))`.
    RingExited {
        /// The offending bus address, as read from the channel header.
        cb_addr: u32,
        /// The monitor's `old_idx` at the time of detection.
        old_idx: u32,
    },
    /// A level index derived from a control-block position fell outside
    /// `[0, LEVEL_CNT)`.
    IndexOutOfRange {
        /// The offending index.
        index: u32,
        /// The monitor's `old_idx` at the time of detection.
        old_idx: u32,
    },
}

impl fmt::Display for SamplerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mailbox(msg) => write!(f, "mailbox request failed: {msg}"),
            Self::Mmio(err) => write!(f, "failed to map peripheral memory: {err}"),
            Self::RingExited { cb_addr, old_idx } => {
                write!(
                    f,
                    "DMA channel left the control-block ring at 0x{cb_addr:08X} (old_idx={old_idx})"
                )
            }
            Self::IndexOutOfRange { index, old_idx } => {
                write!(
                    f,
                    "derived level index {index} is out of range (old_idx={old_idx})"
                )
            }
        }
    }
}

impl std::error::Error for SamplerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Mmio(err) => Some(err),
            _ => None,
        }
    }
}
