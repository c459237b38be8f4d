//! STM32 support for the [`pwmout`] HAL.
//!
//! Outputs are capture/compare channels of the general purpose and advanced timers. The
//! timer counts in steps of a whole number of microseconds: the prescaler starts at one tick
//! per microsecond and doubles until the period fits into the 16-bit auto-reload register.
//! All channels of a timer share its period.
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![no_std]

mod timer;

pub use timer::{
    CHANNELS_PER_TIMER, Config, Family, Pwm, Registers, Timers, function_channel,
    function_complementary, pwm_function,
};
