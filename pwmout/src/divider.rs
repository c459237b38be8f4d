//! Clock divider search for timers with a power-of-two prescaler.

/// Result of [`search_power_of_two`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivider {
    /// The prescaler exponent, the counter runs at `base_hz >> shift`.
    pub shift: u8,
    /// Number of counter ticks per period.
    pub counts: u32,
    /// Whether the requested period did not fit and got clamped to the longest one.
    pub saturated: bool,
}

impl ClockDivider {
    /// Returns the counter frequency for the given input clock.
    pub const fn resolution_hz(&self, base_hz: u32) -> u32 {
        base_hz >> self.shift
    }

    /// Returns the number of input clock cycles covered by one period.
    pub const fn cycles(&self) -> u64 {
        (self.counts as u64) << self.shift
    }
}

/// Finds the smallest prescaler exponent for which `cycles` input clock cycles fit into a
/// counter of `max_counts` ticks.
///
/// The smallest exponent gives the finest duty resolution for the period. The tick count is
/// rounded to the nearest tick and is never less than one. If the period does not fit even
/// with `max_shift`, the longest representable period is returned and
/// [`saturated`](ClockDivider::saturated) is set.
pub fn search_power_of_two(cycles: u64, max_counts: u32, max_shift: u8) -> ClockDivider {
    for shift in 0..=max_shift {
        let counts = (cycles + ((1u64 << shift) >> 1)) >> shift;
        if counts <= max_counts as u64 {
            return ClockDivider {
                shift,
                counts: (counts as u32).max(1),
                saturated: false,
            };
        }
    }
    ClockDivider {
        shift: max_shift,
        counts: max_counts,
        saturated: true,
    }
}
