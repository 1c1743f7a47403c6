//! DMA program builder (`spec.md` section 4.3): fills a `CB_CNT`-length
//! ring of control blocks that, once started, capture a system-timer tick
//! once per slot and `LEVELS_PER_TICK` GPIO level samples within it, paced
//! by the PWM FIFO's DREQ, with no CPU involvement after `start()`.
//!
//! The control-block sequence per slot is:
//! `[tick, level_0, pace_0, level_1, pace_1, ..., level_{n-1}, pace_{n-1}]`,
//! `n = LEVELS_PER_TICK`. `within(i) == 0` marks a tick CB; odd/even
//! positions thereafter alternate level/pace. [`level_from_cb`] inverts this
//! so the ring monitor can recover "which level index does this ring
//! position belong to" from a raw control-block index.

use crate::consts::{CB_CNT, CB_PER_SLOT, LEVELS_PER_TICK, LEVEL_CNT, TICK_CNT};
use crate::peripherals::dma::{ControlBlock, TransferInfo, PERIPHERAL_MAPPING_PWM};
use crate::peripherals::{gpio, pwm, systimer};

/// The bus addresses the program builder needs from a ring allocation.
/// Implemented by [`crate::arena::RingArenas`] for the real DMA-visible
/// ring, and by a plain `Vec`-backed stand-in in this module's tests.
pub trait Ring {
    /// Bus address of control block `i`.
    fn cb_bus(&self, i: u32) -> u32;
    /// Bus address of the tick slot `i` is written to.
    fn tick_bus(&self, i: u32) -> u32;
    /// Bus address of the level sample `i` is written to.
    fn level_bus(&self, i: u32) -> u32;
}

/// Ring position of the first control block in slot `slot`.
const fn slot_start(slot: u32) -> u32 {
    slot * CB_PER_SLOT
}

/// Which slot ring position `i` falls in.
pub const fn slot(i: u32) -> u32 {
    i / CB_PER_SLOT
}

/// Position of `i` within its slot, in `[0, CB_PER_SLOT)`.
pub const fn within(i: u32) -> u32 {
    i % CB_PER_SLOT
}

/// Recovers the number of level samples completed once the channel's live
/// control block reaches ring position `i`: `slot(i) * LEVELS_PER_TICK` at
/// a tick CB (nothing in this slot done yet), or
/// `slot(i) * LEVELS_PER_TICK + (within(i) - 1) / 2` at a level/pace CB
/// (`(within(i) - 1) / 2` pairs in this slot done so far). The level and
/// pace CB of a given pair both map to the same index, since the pair only
/// counts as "done" once the channel has moved past both.
pub const fn level_from_cb(i: u32) -> u32 {
    let s = slot(i);
    let w = within(i);
    if w == 0 {
        s * LEVELS_PER_TICK
    } else {
        s * LEVELS_PER_TICK + (w - 1) / 2
    }
}

/// Writes the full `CB_CNT`-length control-block ring into `cbs`, chained
/// cyclically through `ring`'s bus addresses. `cbs.len()` must equal
/// `CB_CNT`.
pub fn build(ring: &impl Ring, cbs: &mut [ControlBlock]) {
    assert_eq!(cbs.len(), CB_CNT as usize);

    let systimer_clo = systimer::clo_bus_addr();
    let gplev0 = gpio::gplev0_bus_addr();
    let pwm_fifo = pwm::pwm_fifo_bus_addr();
    // Arbitrary bus-addressable source for the pace transfer: the content
    // written into the PWM FIFO is never read back, so any word-sized bus
    // address works. Control block 0's own bus address is always valid and
    // needs no extra allocation.
    let pace_src = ring.cb_bus(0);

    for s in 0..TICK_CNT {
        let base = slot_start(s);

        let tick_info = TransferInfo::new()
            .with_wait_resp(true)
            .with_no_wide_bursts(true);
        cbs[base as usize] =
            ControlBlock::new(tick_info, systimer_clo, ring.tick_bus(s), ring.cb_bus(base + 1));

        for k in 0..LEVELS_PER_TICK {
            let level_pos = base + 1 + 2 * k;
            let pace_pos = level_pos + 1;
            let level_idx = s * LEVELS_PER_TICK + k;

            let level_info = TransferInfo::new()
                .with_wait_resp(true)
                .with_no_wide_bursts(true);
            cbs[level_pos as usize] = ControlBlock::new(
                level_info,
                gplev0,
                ring.level_bus(level_idx),
                ring.cb_bus(pace_pos),
            );

            let pace_info = TransferInfo::new()
                .with_wait_resp(true)
                .with_dest_dreq(true)
                .with_permap(PERIPHERAL_MAPPING_PWM)
                .with_no_wide_bursts(true);
            let next = ring.cb_bus((pace_pos + 1) % CB_CNT);
            cbs[pace_pos as usize] = ControlBlock::new(pace_info, pace_src, pwm_fifo, next);
        }
    }

    eprintln!(
        "[LOG] built control-block ring: {CB_CNT} control blocks, {TICK_CNT} ticks, {LEVEL_CNT} levels"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A `Vec`-backed ring whose bus addresses are just byte offsets from
    /// an arbitrary base, for exercising the chaining logic without real
    /// DMA-visible memory.
    struct FakeRing {
        cb_base: u32,
        tick_base: u32,
        level_base: u32,
    }

    impl Ring for FakeRing {
        fn cb_bus(&self, i: u32) -> u32 {
            self.cb_base + i * std::mem::size_of::<ControlBlock>() as u32
        }
        fn tick_bus(&self, i: u32) -> u32 {
            self.tick_base + i * 4
        }
        fn level_bus(&self, i: u32) -> u32 {
            self.level_base + i * 4
        }
    }

    fn built() -> Vec<ControlBlock> {
        let ring = FakeRing {
            cb_base: 0x1000_0000,
            tick_base: 0x2000_0000,
            level_base: 0x3000_0000,
        };
        let zero = TransferInfo::new();
        let mut cbs = vec![ControlBlock::new(zero, 0, 0, 0); CB_CNT as usize];
        build(&ring, &mut cbs);
        cbs
    }

    #[test]
    fn ring_is_closed() {
        // P1: following `next_cb` from any control block eventually returns
        // to control block 0.
        let cbs = built();
        let ring = FakeRing {
            cb_base: 0x1000_0000,
            tick_base: 0x2000_0000,
            level_base: 0x3000_0000,
        };
        let mut addr = cbs[0].next_cb;
        let mut steps = 1;
        while addr != ring.cb_bus(0) {
            let idx = (addr - ring.cb_bus(0)) / std::mem::size_of::<ControlBlock>() as u32;
            addr = cbs[idx as usize].next_cb;
            steps += 1;
            assert!(steps <= CB_CNT, "ring failed to close within CB_CNT steps");
        }
        assert_eq!(steps, CB_CNT);
    }

    #[test]
    fn slot_shape_is_tick_then_level_pace_pairs() {
        // P2
        let cbs = built();
        for s in 0..TICK_CNT {
            let base = slot_start(s) as usize;
            assert_eq!(within(base as u32), 0);
            assert_eq!(cbs[base].dst, 0x2000_0000 + s * 4);
            for k in 0..LEVELS_PER_TICK {
                let level_pos = base + 1 + 2 * k as usize;
                let pace_pos = level_pos + 1;
                assert_eq!(level_from_cb(level_pos as u32), s * LEVELS_PER_TICK + k);
                assert_eq!(level_from_cb(pace_pos as u32), s * LEVELS_PER_TICK + k);
                assert!(!cbs[level_pos].info.dest_dreq());
                assert!(cbs[pace_pos].info.dest_dreq());
            }
        }
    }

    #[test]
    fn length_and_flags_are_uniform() {
        // P3: every control block transfers exactly 4 bytes with no stride,
        // and waits for the AXI write response.
        let cbs = built();
        for cb in &cbs {
            assert_eq!(cb.length, 4);
            assert_eq!(cb.stride, 0);
            assert!(cb.info.wait_resp());
            assert!(cb.info.no_wide_bursts());
        }
    }

    #[test]
    fn level_from_cb_is_total_and_in_range() {
        // P4: the inverse mapping is defined and in-range for every ring
        // position, including tick CBs (`level_from_cb(tick_cb_of_slot(s))
        // == s * LEVELS_PER_TICK`).
        for i in 0..CB_CNT {
            let level = level_from_cb(i);
            assert!(level < crate::consts::LEVEL_CNT);
            if within(i) == 0 {
                assert_eq!(level, slot(i) * LEVELS_PER_TICK);
            }
        }
    }
}
