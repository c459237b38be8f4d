use crate::PinName;
use derive_more::{Display, Error};

/// Errors returned when claiming or configuring a PWM output.
///
/// The C interface treats all of these as fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The pin is not listed in the pin table of the target.
    #[display("pin {pin} does not support PWM output")]
    UnsupportedPin { pin: PinName },
    /// The timer channel behind the pin is already claimed by another output.
    #[display("PWM channel of pin {pin} is already in use")]
    ChannelInUse { pin: PinName },
    /// All PWM channels of the target are in use.
    #[display("all PWM channels are in use")]
    NoFreeChannel,
    /// The requested period can not be represented by the timer.
    #[display("out of range prescaler/period ({period_us} us)")]
    PeriodOutOfRange { period_us: u32 },
}
