//! Ring monitor (`spec.md` section 4.5): walks newly produced samples as
//! the DMA channel advances through the ring, emitting transitions with
//! synthesized timestamps. Runs entirely on the CPU; never waits on the DMA
//! engine beyond the poll interval.

use crate::channel::Channel;
use crate::consts::{CB_CNT, CLK_PERIOD_US, LEVELS_PER_TICK, LEVEL_CNT};
use crate::error::SamplerError;
use crate::peripherals::dma::ControlBlock;
use crate::peripherals::gpio::GPLEV0_VALID_MASK;
use crate::program::level_from_cb;
use crate::arena::RingArenas;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Duration;

/// Interval between ring scans.
const SCAN_INTERVAL: Duration = Duration::from_millis(5);

/// Everything the monitor needs to read from the DMA-visible world. Lets
/// the scan loop (`Monitor::step`) run against a plain in-memory stand-in
/// in tests, without touching `/dev/mem`.
pub trait SampleSource {
    /// Bus address the channel is currently (or most recently) executing.
    fn live_cb_bus(&self) -> u32;
    /// Bus address of control block 0, i.e. the start of the ring.
    fn cb_base_bus(&self) -> u32;
    /// Reads `ticks[idx]`.
    fn read_tick(&self, idx: u32) -> u32;
    /// Reads `levels[idx]`.
    fn read_level(&self, idx: u32) -> u32;
}

/// Binds a running channel to the arenas backing it, the combination the
/// monitor actually reads from at runtime.
pub struct ChannelRing<'a> {
    pub channel: &'a Channel,
    pub arenas: &'a RingArenas,
}

impl SampleSource for ChannelRing<'_> {
    fn live_cb_bus(&self) -> u32 {
        self.channel.live_cb_bus()
    }
    fn cb_base_bus(&self) -> u32 {
        self.arenas.cb_base_bus()
    }
    fn read_tick(&self, idx: u32) -> u32 {
        self.arenas.read_tick(idx)
    }
    fn read_level(&self, idx: u32) -> u32 {
        self.arenas.read_level(idx)
    }
}

/// The monitor's scan state: the next unobserved logical level index and
/// the last reported pin level, carried across scans.
pub struct Monitor {
    old_idx: u32,
    cur_level: u32,
    cur_time: u32,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            old_idx: 0,
            cur_level: 0,
            cur_time: 0,
        }
    }

    /// Runs one scan (`spec.md` section 4.5, steps 1-3): reads the
    /// channel's progress, validates it, and walks every level produced
    /// since the last scan, calling `on_transition(timestamp, level)` for
    /// each one whose level differs from the last reported one.
    pub fn step(
        &mut self,
        source: &impl SampleSource,
        mut on_transition: impl FnMut(u32, u32),
    ) -> Result<(), SamplerError> {
        let bus = source.live_cb_bus();
        let base = source.cb_base_bus();
        let ring_bytes = CB_CNT * std::mem::size_of::<ControlBlock>() as u32;

        if bus < base || bus >= base.wrapping_add(ring_bytes) {
            return Err(SamplerError::RingExited {
                cb_addr: bus,
                old_idx: self.old_idx,
            });
        }
        let i = (bus - base) / std::mem::size_of::<ControlBlock>() as u32;
        let cur_idx = level_from_cb(i);
        if cur_idx >= LEVEL_CNT {
            return Err(SamplerError::IndexOutOfRange {
                index: cur_idx,
                old_idx: self.old_idx,
            });
        }

        while self.old_idx != cur_idx {
            if self.old_idx % LEVELS_PER_TICK == 0 {
                self.cur_time = source.read_tick(self.old_idx / LEVELS_PER_TICK);
            }
            let level = source.read_level(self.old_idx) & GPLEV0_VALID_MASK;
            if level != self.cur_level {
                on_transition(self.cur_time, level);
                self.cur_level = level;
            }
            self.cur_time = self.cur_time.wrapping_add(CLK_PERIOD_US);
            self.old_idx = (self.old_idx + 1) % LEVEL_CNT;
        }
        Ok(())
    }

    /// Runs scans in a loop, sleeping `SCAN_INTERVAL` between them, until
    /// `terminated` is set or a scan reports an invariant violation. Every
    /// transition is written to standard error in the format external
    /// tooling parses (`spec.md` section 6).
    pub fn run(&mut self, source: &impl SampleSource, terminated: &AtomicBool) -> Result<(), SamplerError> {
        while !terminated.load(Ordering::Relaxed) {
            self.step(source, |time, level| {
                println_transition(time, level);
            })?;
            sleep(SCAN_INTERVAL);
        }
        Ok(())
    }
}

pub(crate) fn println_transition(time: u32, level: u32) {
    eprintln!("Level change @{time}: {level:08X}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::TICK_CNT;
    use std::cell::Cell;

    /// A `Vec`-backed stand-in for the channel header and result arenas.
    struct FakeSource {
        cb_base: u32,
        live_cb: Cell<u32>,
        ticks: Vec<u32>,
        levels: Vec<u32>,
    }

    impl FakeSource {
        fn new(levels: Vec<u32>) -> Self {
            assert_eq!(levels.len(), LEVEL_CNT as usize);
            let ticks = (0..TICK_CNT).map(|_| 0).collect();
            Self {
                cb_base: 0x1000_0000,
                live_cb: Cell::new(0x1000_0000),
                ticks,
                levels,
            }
        }

        /// Points the live CB register at the tick-or-pair position
        /// corresponding to logical level index `idx` having just
        /// completed (i.e. the channel is now at the tick CB of the next
        /// slot, or the pace CB of the pair after `idx`).
        fn set_live_idx(&mut self, idx: u32) {
            // Walk forward from idx until we find a ring position i with
            // level_from_cb(i) == idx, landing on the pace CB of the pair
            // that just finished (or the tick CB, for idx a slot boundary).
            for i in 0..CB_CNT {
                if level_from_cb(i) == idx && crate::program::within(i) % 2 == 0 {
                    self.live_cb
                        .set(self.cb_base + i * std::mem::size_of::<ControlBlock>() as u32);
                    return;
                }
            }
            panic!("no ring position maps to level index {idx}");
        }

        fn set_tick(&mut self, slot: u32, value: u32) {
            self.ticks[slot as usize] = value;
        }
    }

    impl SampleSource for FakeSource {
        fn live_cb_bus(&self) -> u32 {
            self.live_cb.get()
        }
        fn cb_base_bus(&self) -> u32 {
            self.cb_base
        }
        fn read_tick(&self, idx: u32) -> u32 {
            self.ticks[idx as usize]
        }
        fn read_level(&self, idx: u32) -> u32 {
            self.levels[idx as usize]
        }
    }

    fn emissions(source: &FakeSource) -> Vec<(u32, u32)> {
        let mut monitor = Monitor::new();
        let mut out = Vec::new();
        monitor.step(source, |t, l| out.push((t, l))).unwrap();
        out
    }

    #[test]
    fn steady_level_emits_once() {
        let mut source = FakeSource::new(vec![1; LEVEL_CNT as usize]);
        source.set_tick(0, 1_000);
        source.set_live_idx(LEVEL_CNT - 1);
        let out = emissions(&source);
        assert_eq!(out, vec![(1_000, 1)]);
    }

    #[test]
    fn single_rising_edge_at_75() {
        let mut levels = vec![0; LEVEL_CNT as usize];
        for v in levels.iter_mut().skip(75) {
            *v = 1;
        }
        let mut source = FakeSource::new(levels);
        source.set_tick(1, 2_000);
        source.set_live_idx(100);
        let out = emissions(&source);
        assert_eq!(out, vec![(2_000 + (75 - 50) * CLK_PERIOD_US, 1)]);
    }

    #[test]
    fn edge_at_slot_boundary_uses_new_ticks_entry() {
        let mut levels = vec![0; LEVEL_CNT as usize];
        for v in levels.iter_mut().skip(50) {
            *v = 1;
        }
        let mut source = FakeSource::new(levels);
        source.set_tick(1, 5_000);
        source.set_live_idx(60);
        let out = emissions(&source);
        assert_eq!(out, vec![(5_000, 1)]);
    }

    #[test]
    fn two_close_edges_both_timestamped_from_same_tick() {
        let mut levels = vec![0; LEVEL_CNT as usize];
        levels[100] = 1;
        levels[101] = 1;
        levels[102] = 0;
        let mut source = FakeSource::new(levels);
        source.set_tick(2, 9_000);
        source.set_live_idx(110);
        let out = emissions(&source);
        assert_eq!(
            out,
            vec![
                (9_000 + (100 - 100) * CLK_PERIOD_US, 1),
                (9_000 + (102 - 100) * CLK_PERIOD_US, 0),
            ]
        );
    }

    #[test]
    fn wraps_across_ring_end() {
        let mut levels = vec![0; LEVEL_CNT as usize];
        levels[LEVEL_CNT as usize - 1] = 1;
        let mut source = FakeSource::new(levels);
        let last_slot = TICK_CNT - 1;
        source.set_tick(last_slot, 7_000);
        source.set_tick(0, 42_000);

        // Prime state as if the monitor had already scanned up through the
        // last slot boundary (index 19950) and is mid-slot at 19997, the
        // same state continuous operation would have reached.
        let mut monitor = Monitor::new();
        monitor.old_idx = LEVEL_CNT - 3;
        monitor.cur_time = 7_000 + (LEVEL_CNT - 3 - last_slot * LEVELS_PER_TICK) * CLK_PERIOD_US;

        let mut out = Vec::new();
        source.set_live_idx(2);
        monitor.step(&source, |t, l| out.push((t, l))).unwrap();

        // 5 samples scanned (19997, 19998, 19999, 0, 1): one transition to
        // 1 before the wrap, one transition back to 0 right after it, with
        // `cur_time` reinitialized from `ticks[0]` at the crossing.
        assert_eq!(
            out,
            vec![
                (7_000 + (LEVEL_CNT - 1 - last_slot * LEVELS_PER_TICK) * CLK_PERIOD_US, 1),
                (42_000, 0),
            ]
        );
        assert_eq!(monitor.old_idx, 2);
    }

    #[test]
    fn invariant_violation_reports_bus_address() {
        let source = FakeSource::new(vec![0; LEVEL_CNT as usize]);
        source.live_cb.set(0xFFFF_FFFF);
        let mut monitor = Monitor::new();
        let err = monitor.step(&source, |_, _| {}).unwrap_err();
        match err {
            SamplerError::RingExited { cb_addr, old_idx } => {
                assert_eq!(cb_addr, 0xFFFF_FFFF);
                assert_eq!(old_idx, 0);
            }
            other => panic!("expected RingExited, got {other:?}"),
        }
    }
}
