//! Nordic nRF support for the [`pwmout`] HAL.
//!
//! The nRF52 series has a dedicated PWM peripheral that plays duty cycle sequences from RAM,
//! see [`nrf52`]. The nRF51 series has no PWM peripheral, so [`nrf51`] generates the signal
//! with a shared timer whose compare events toggle the pins through GPIOTE and PPI.
//!
//! Both drivers access the hardware through a `Registers` trait. With the `nrf52840` feature
//! [`nrf52840::Nrf52840Registers`] implements it for the PWM peripherals of that chip on top
//! of [embassy-nrf](https://docs.rs/embassy-nrf).
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![no_std]

#[cfg(feature = "nrf51")]
pub mod nrf51;
#[cfg(feature = "nrf52")]
pub mod nrf52;
#[cfg(feature = "nrf52840")]
pub mod nrf52840;

/// Frequency of the high frequency clock feeding the timers and the PWM peripheral.
pub const HFCLK_HZ: u32 = 16_000_000;
