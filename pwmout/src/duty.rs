//! Conversions between duty ratios, durations and timer ticks.

use crate::util::warn;

/// Microseconds per second.
pub const US_PER_SECOND: u64 = 1_000_000;

/// Clamps a requested duty ratio to `0.0..=1.0`.
///
/// NaN is treated as `0.0`.
pub fn clamp_duty(value: f32) -> f32 {
    if value.is_nan() {
        warn!("duty cycle is NaN, using 0.0");
        return 0.0;
    }
    if !(0.0..=1.0).contains(&value) {
        warn!(
            "duty cycle {} is out of range (expected a value between 0.0 and 1.0)",
            value
        );
    }
    value.clamp(0.0, 1.0)
}

/// Returns the number of ticks out of `total` that are high for `duty`.
///
/// Rounds half up and never returns more than `total`.
pub fn duty_to_ticks(duty: f32, total: u32) -> u32 {
    let duty = if duty.is_nan() { 0.0 } else { duty.clamp(0.0, 1.0) };
    let ticks = (duty as f64 * total as f64 + 0.5) as u64;
    ticks.min(total as u64) as u32
}

/// Returns the duty ratio of `ticks` high ticks out of `total`.
pub fn ticks_to_duty(ticks: u32, total: u32) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (ticks.min(total) as f64 / total as f64) as f32
}

/// Converts seconds to microseconds, truncating.
///
/// Negative and NaN inputs yield `0`, values that are too large saturate.
pub fn seconds_to_us(seconds: f32) -> u32 {
    (seconds * 1_000_000.0) as u32
}

/// Converts milliseconds to microseconds, saturating.
pub const fn ms_to_us(ms: u32) -> u32 {
    ms.saturating_mul(1000)
}

/// Returns the number of clock cycles of `clock_hz` that fit into `us` microseconds.
pub const fn us_to_cycles(us: u32, clock_hz: u32) -> u64 {
    us as u64 * clock_hz as u64 / US_PER_SECOND
}

/// Returns the duration of `cycles` clock cycles of `clock_hz` in microseconds, rounded to
/// the nearest microsecond.
pub const fn cycles_to_us(cycles: u64, clock_hz: u32) -> u32 {
    if clock_hz == 0 {
        return 0;
    }
    let us = (cycles * US_PER_SECOND + clock_hz as u64 / 2) / clock_hz as u64;
    if us > u32::MAX as u64 {
        u32::MAX
    } else {
        us as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(clamp_duty(1.5), 1.0);
        assert_eq!(clamp_duty(-0.2), 0.0);
        assert_eq!(clamp_duty(f32::NAN), 0.0);
        assert_eq!(clamp_duty(0.25), 0.25);
    }

    #[test]
    fn ticks_round_half_up() {
        assert_eq!(duty_to_ticks(0.5, 20_000), 10_000);
        assert_eq!(duty_to_ticks(0.5, 3), 2);
        assert_eq!(duty_to_ticks(1.0, 32_767), 32_767);
        assert_eq!(duty_to_ticks(0.0, 32_767), 0);
        assert_eq!(duty_to_ticks(2.0, 100), 100);
    }

    #[test]
    fn ratio_from_ticks() {
        assert_eq!(ticks_to_duty(5_000, 20_000), 0.25);
        assert_eq!(ticks_to_duty(7, 0), 0.0);
        assert_eq!(ticks_to_duty(30, 20), 1.0);
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(seconds_to_us(0.02), 20_000);
        assert_eq!(seconds_to_us(-1.0), 0);
        assert_eq!(seconds_to_us(f32::NAN), 0);
        assert_eq!(ms_to_us(20), 20_000);
        assert_eq!(ms_to_us(u32::MAX), u32::MAX);
        assert_eq!(us_to_cycles(1_000, 125_000_000), 125_000);
        assert_eq!(cycles_to_us(125_000, 125_000_000), 1_000);
        assert_eq!(cycles_to_us(3, 16_000_000), 0);
        assert_eq!(cycles_to_us(8, 16_000_000), 1);
    }
}
