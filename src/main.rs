//! GPIO sampler: drives a DMA ring that captures one GPIO pin's level every
//! `CLK_PERIOD_US` microseconds, paced entirely by hardware, and reports
//! transitions as they're observed.
//!
//! See `SPEC_FULL.md` for the full component breakdown; the high-level
//! flow is: allocate coherent memory, program the PWM clock as a DREQ
//! source, build the control-block ring, start the DMA channel, then
//! monitor the ring until a signal or a fixed duration elapses.

mod arena;
mod channel;
mod consts;
mod error;
mod lifecycle;
mod mailbox;
mod mmio;
mod monitor;
mod peripherals;
mod program;

use clap::Parser;
use error::SamplerError;
use lifecycle::Lifecycle;
use monitor::{println_transition, ChannelRing, Monitor};
use peripherals::clock::PwmClock;
use peripherals::pwm::Pwm;
use std::error::Error;
use std::time::{Duration, Instant};

/// Samples a GPIO pin's level every 5 microseconds via DMA, paced by the
/// PWM peripheral, and reports level changes to standard error.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// DMA channel to run the sampling program on. Any channel not
    /// reserved by the kernel's own DMA users is acceptable.
    #[arg(long, default_value_t = 6)]
    dma_channel: u32,

    /// If given, run for approximately this many seconds and then shut
    /// down cleanly instead of running until a signal.
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    lifecycle::install_signal_handlers();
    let lifecycle = Lifecycle::new();

    let result = run(&args, &lifecycle);
    lifecycle.shutdown();

    if let Err(err) = result {
        eprintln!("[FATAL] {err}");
        return Err(err.into());
    }
    Ok(())
}

fn run(args: &Args, lifecycle: &Lifecycle) -> Result<(), SamplerError> {
    eprintln!("[LOG] allocating coherent memory");
    let arenas = arena::RingArenas::alloc()?;

    eprintln!("[LOG] configuring PWM clock and FIFO");
    let mut pwm_clock = PwmClock::open()?;
    pwm_clock.configure();
    let mut pwm = Pwm::open()?;
    pwm.configure();

    eprintln!("[LOG] building control-block ring");
    // SAFETY: the arena owns `CB_CNT` contiguous, exclusively-mapped
    // control blocks that no other code writes to before the channel is
    // started below.
    let cb_slice =
        unsafe { std::slice::from_raw_parts_mut(arenas.cb_virt(0), consts::CB_CNT as usize) };
    program::build(&arenas, cb_slice);

    eprintln!("[LOG] starting DMA channel {}", args.dma_channel);
    let mut dma_channel = channel::Channel::open(args.dma_channel)?;
    dma_channel.start(arenas.cb_bus(0));

    let terminated = lifecycle::terminated_flag();
    let monitor_result = {
        let source = ChannelRing {
            channel: &dma_channel,
            arenas: &arenas,
        };
        let mut monitor = Monitor::new();

        match args.duration_secs {
            Some(secs) => {
                let deadline = Instant::now() + Duration::from_secs(secs);
                let mut result = Ok(());
                while Instant::now() < deadline
                    && !terminated.load(std::sync::atomic::Ordering::Relaxed)
                {
                    result = monitor.step(&source, |time, level| {
                        println_transition(time, level);
                    });
                    if result.is_err() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                result
            }
            None => monitor.run(&source, terminated),
        }
    };

    lifecycle.register(dma_channel, arenas);
    monitor_result
}
