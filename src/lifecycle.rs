//! Teardown and signal glue (`spec.md` section 4.6, section 9 "Global
//! lifecycle state" / "Signal handling"). Owns the process-wide resources
//! that must be released on every exit path: the channel and the two
//! coherent arenas backing it.

use crate::arena::RingArenas;
use crate::channel::Channel;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Duration;

/// Set by the signal handler, polled by the monitor loop.
static TERMINATED: AtomicBool = AtomicBool::new(false);

/// How long to wait after setting `TERMINATED` before tearing down memory,
/// giving an in-progress scan time to finish reading the ring.
const QUIESCE_DELAY: Duration = Duration::from_millis(10);

/// A reference to the atomic flag the monitor polls every scan.
pub fn terminated_flag() -> &'static AtomicBool {
    &TERMINATED
}

/// Installs the `SIGINT`/`SIGTERM` handlers. Must be called at most once;
/// the handler only ever sets `TERMINATED`, matching section 9's note that
/// no asynchronous cancellation of in-flight reads is required.
pub fn install_signal_handlers() {
    // SAFETY: `handle_terminate` only performs an atomic store, which is
    // async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, handle_terminate as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_terminate as libc::sighandler_t);
    }
}

extern "C" fn handle_terminate(_signum: libc::c_int) {
    TERMINATED.store(true, Ordering::Relaxed);
}

/// Owns the channel and arenas acquired during setup and releases them
/// exactly once, in the order section 4.6 requires: wait for the monitor
/// to quiesce, free result pages, then CB pages (so the DMA engine never
/// chases a freed control block), then abort and reset the channel.
///
/// Registered once at startup and called on every exit path (normal
/// completion, signal, or fatal error), so a single call site can't
/// forget a cleanup step.
#[derive(Default)]
pub struct Lifecycle {
    resources: RefCell<Option<(Channel, RingArenas)>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the resources to be released on `shutdown`.
    pub fn register(&self, channel: Channel, arenas: RingArenas) {
        *self.resources.borrow_mut() = Some((channel, arenas));
    }

    /// Tears down the registered channel and arenas, in the order
    /// `spec.md` section 4.6 specifies: wait for the monitor to quiesce,
    /// free result pages, then CB pages, then abort and reset the
    /// channel. Idempotent (`spec.md` section 8, P5): once resources have
    /// been taken by an earlier call, later calls are no-ops.
    pub fn shutdown(&self) {
        let Some((mut channel, arenas)) = self.resources.borrow_mut().take() else {
            return;
        };
        sleep(QUIESCE_DELAY);
        arenas.free();
        channel.stop();
    }
}
