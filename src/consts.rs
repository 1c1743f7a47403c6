//! Tunable and derived constants for the sampling ring.
//!
//! See `spec.md` section 3 ("Data Model") for the derivation of each value.

/// Sample period, in microseconds. Fixed by the PWM clock divisor in
/// [`crate::peripherals::clock`]; changing this requires recomputing that
/// divisor too.
pub const CLK_PERIOD_US: u32 = 5;

/// Duration of the result ring, in milliseconds.
pub const BUFFER_MS: u32 = 100;

/// Timestamp captures per result page.
pub const TICKS_PER_PAGE: u32 = 20;

/// Level captures per result page.
pub const LEVELS_PER_PAGE: u32 = 1000;

/// Unused padding words per result page, to round it out to `PAGE_SIZE`.
pub const PADDINGS_PER_PAGE: u32 = 4;

/// MMU/VideoCore page size on the BCM2835/2711.
pub const PAGE_SIZE: usize = 4096;

/// Levels captured per tick, i.e. per slot.
pub const LEVELS_PER_TICK: u32 = LEVELS_PER_PAGE / TICKS_PER_PAGE;

/// Total number of level samples held in the ring.
pub const LEVEL_CNT: u32 = BUFFER_MS * 1000 / CLK_PERIOD_US;

/// Number of result pages needed to hold `LEVEL_CNT` levels.
pub const RESULT_PAGE_CNT: u32 = LEVEL_CNT / LEVELS_PER_PAGE;

/// Number of slots (and therefore tick captures) in the ring.
pub const TICK_CNT: u32 = RESULT_PAGE_CNT * TICKS_PER_PAGE;

/// Control blocks per slot: one tick capture, plus a (level, pace) pair per
/// sample in the slot.
pub const CB_PER_SLOT: u32 = 1 + 2 * LEVELS_PER_TICK;

/// Total number of control blocks in the ring.
pub const CB_CNT: u32 = TICK_CNT * CB_PER_SLOT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_constants_match_spec() {
        assert_eq!(LEVELS_PER_TICK, 50);
        assert_eq!(LEVEL_CNT, 20_000);
        assert_eq!(RESULT_PAGE_CNT, 20);
        assert_eq!(TICK_CNT, 400);
        assert_eq!(CB_PER_SLOT, 101);
        assert_eq!(CB_CNT, 40_400);
    }
}
