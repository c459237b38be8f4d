//! Raspberry Pi RP2040 support for the [`pwmout`] HAL.
//!
//! The RP2040 has 8 PWM slices with two channels each. GPIO `n` is driven by slice
//! `(n >> 1) & 7`, channel A for even and channel B for odd pins. Both channels of a slice
//! share the counter, so they share the period. Each slice divides `clk_sys` by an 8.4
//! fixed-point divider and wraps its 16-bit counter at TOP.
//!
//! The driver accesses the hardware through [`Registers`]. With the `rp2040` feature
//! [`Rp2040Registers`] implements it on top of [embassy-rp](https://docs.rs/embassy-rp).
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![no_std]

mod pwm;
#[cfg(feature = "rp2040")]
mod rp2040;

pub use pwm::{
    Channel, Config, MAX_DIVIDER, MIN_DIVIDER, PIN_MAP, Pwm, Registers, Slices,
    divider_to_fixed,
};
#[cfg(feature = "rp2040")]
pub use rp2040::Rp2040Registers;
