//! A hardware abstraction layer for PWM outputs.
//!
//! Every supported microcontroller family implements the same small contract: claim a timer
//! channel for a pin, set the duty ratio, the period or the pulse width, and release the
//! channel again. The contract is expressed by the [`PwmOut`] and [`Target`] traits. The
//! family specific drivers live in their own crates (`pwmout_nrf`, `pwmout_rp`,
//! `pwmout_stm32`, `pwmout_efm32`) and the [`sim`] module provides a simulated target for
//! host tests.
//!
//! A newly initialised output runs with a period of 20 ms and a duty cycle of 0.
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![no_std]

pub mod c_api;
pub mod divider;
pub mod duty;
mod error;
mod pin;
pub mod pool;
pub mod sim;
pub mod util;

pub use error::Error;
pub use pin::{PinMap, PinName, pinmap_peripheral};

/// Period that [`Target::init`] configures.
pub const DEFAULT_PERIOD_US: u32 = 20_000;

/// A PWM output.
///
/// The duty ratio is a value between `0.0` and `1.0`; values outside of this range are
/// clamped. Changing the period keeps the duty ratio, changing the pulse width keeps the
/// period.
pub trait PwmOut {
    /// Sets the duty ratio.
    fn write(&mut self, percent: f32);

    /// Returns the current duty ratio.
    fn read(&self) -> f32;

    /// Sets the period in seconds.
    fn period(&mut self, seconds: f32) {
        self.period_us(duty::seconds_to_us(seconds));
    }

    /// Sets the period in milliseconds.
    fn period_ms(&mut self, ms: u32) {
        self.period_us(duty::ms_to_us(ms));
    }

    /// Sets the period in microseconds.
    fn period_us(&mut self, us: u32);

    /// Returns the period in microseconds that the timer actually produces.
    fn read_period_us(&self) -> u32;

    /// Sets the pulse width in seconds.
    fn pulsewidth(&mut self, seconds: f32) {
        self.pulsewidth_us(duty::seconds_to_us(seconds));
    }

    /// Sets the pulse width in milliseconds.
    fn pulsewidth_ms(&mut self, ms: u32) {
        self.pulsewidth_us(duty::ms_to_us(ms));
    }

    /// Sets the pulse width in microseconds.
    fn pulsewidth_us(&mut self, us: u32) {
        let period_us = self.read_period_us();
        if period_us == 0 {
            self.write(0.0);
        } else {
            self.write(us.min(period_us) as f32 / period_us as f32);
        }
    }

    /// Returns the pulse width in microseconds that the timer actually produces.
    fn read_pulsewidth_us(&self) -> u32;
}

/// A PWM output that can be claimed for a pin of a board.
pub trait Target<'d>: PwmOut + Sized {
    /// The board resources the output is created from.
    type Peripherals: ?Sized + 'd;

    /// Returns the pin table of the board.
    fn pinmap(peripherals: &'d Self::Peripherals) -> &'d [PinMap];

    /// Claims the PWM channel for `pin`.
    fn init(peripherals: &'d Self::Peripherals, pin: PinName) -> Result<Self, Error> {
        let map = pinmap_peripheral(pin, Self::pinmap(peripherals))
            .ok_or(Error::UnsupportedPin { pin })?;
        Self::init_direct(peripherals, map)
    }

    /// Claims the PWM channel described by a pin table entry.
    fn init_direct(peripherals: &'d Self::Peripherals, map: &PinMap) -> Result<Self, Error>;

    /// Stops the output and releases its channel.
    fn free(self);
}
