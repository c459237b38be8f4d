//! Silicon Labs EFM32 support for the [`pwmout`] HAL.
//!
//! All outputs share one TIMER, so they share its period. The timer divides HFPERCLK by a
//! power of two (`1..=1024`) and wraps at TOP. Each output uses one of the three
//! compare/capture channels, routed to its pin through a ROUTE location.
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![no_std]

use pwmout::divider::search_power_of_two;
use pwmout::duty::{clamp_duty, cycles_to_us, duty_to_ticks, ticks_to_duty, us_to_cycles};
use pwmout::pool::ChannelPool;
use pwmout::util::{debug, warn};
use pwmout::{DEFAULT_PERIOD_US, Error, PinMap, PinName, PwmOut, Target};

/// Number of compare/capture channels of a TIMER.
pub const CHANNELS: usize = 3;

/// Largest exponent of the TIMER prescaler (`DIV1024`).
pub const MAX_PRESCALER_SHIFT: u8 = 10;

// TOP stays below 0xFFFF so that a compare value of TOP + 1 (always high) fits into CCV.
const MAX_COUNTS: u32 = 0xFFFF;

/// Encodes the `function` of a pin table entry from the ROUTE location and the channel.
pub const fn route(location: u8, channel: u8) -> u32 {
    (location as u32) << 8 | channel as u32
}

const fn route_channel(function: u32) -> u8 {
    (function & 0xFF) as u8
}

const fn route_location(function: u32) -> u8 {
    (function >> 8) as u8
}

/// Register access to the TIMER used for PWM.
pub trait Registers {
    /// Returns the pin table of the board, with `function` built by [`route`].
    fn pin_map(&self) -> &[PinMap];

    /// Writes CTRL.PRESC, the counter runs at `HFPERCLK >> shift`.
    fn set_prescaler(&self, shift: u8);

    fn prescaler(&self) -> u8;

    /// Writes TOPB so that the new TOP takes effect at the next overflow.
    fn set_top(&self, top: u16);

    fn top(&self) -> u16;

    /// Writes CCVB of `channel`.
    fn set_compare(&self, channel: u8, value: u16);

    fn compare(&self, channel: u8) -> u16;

    /// Puts `channel` into PWM mode and enables its pin at ROUTE `location`.
    fn enable_channel(&self, channel: u8, location: u8);

    fn disable_channel(&self, channel: u8);

    /// Configures `pin` as push-pull output, or disables it.
    fn set_pin_output(&self, pin: PinName, enabled: bool);

    fn start(&self);

    fn stop(&self);
}

/// Configuration of the shared TIMER.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Frequency of HFPERCLK.
    pub clock_hz: u32,
    /// The period the timer starts with.
    pub default_period_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clock_hz: 14_000_000,
            default_period_us: DEFAULT_PERIOD_US,
        }
    }
}

/// The TIMER shared by all PWM outputs.
pub struct PwmTimer<R> {
    registers: R,
    config: Config,
    pool: ChannelPool<CHANNELS>,
}

impl<R: Registers> PwmTimer<R> {
    pub const fn new(registers: R, config: Config) -> Self {
        Self {
            registers,
            config,
            pool: ChannelPool::new(),
        }
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    fn counts(&self) -> u32 {
        self.registers.top() as u32 + 1
    }

    fn duty(&self, channel: u8) -> f32 {
        ticks_to_duty(self.registers.compare(channel) as u32, self.counts())
    }

    fn set_duty(&self, channel: u8, duty: f32) {
        let compare = duty_to_ticks(duty, self.counts()).min(u16::MAX as u32);
        self.registers.set_compare(channel, compare as u16);
    }

    fn ticks_to_us(&self, ticks: u32) -> u32 {
        cycles_to_us(
            (ticks as u64) << self.registers.prescaler(),
            self.config.clock_hz,
        )
    }

    fn set_period(&self, us: u32) {
        let cycles = us_to_cycles(us, self.config.clock_hz);
        let divider = search_power_of_two(cycles, MAX_COUNTS, MAX_PRESCALER_SHIFT);
        if divider.saturated {
            warn!(
                "PWM period of {} us is too long, using the longest supported period",
                us
            );
        }

        let mut duties = [None; CHANNELS];
        for (channel, duty) in duties.iter_mut().enumerate() {
            if self.pool.is_taken(channel) {
                *duty = Some(self.duty(channel as u8));
            }
        }

        debug!(
            "pwm timer: prescaler=2^{} top={}",
            divider.shift,
            divider.counts - 1
        );
        self.registers.set_prescaler(divider.shift);
        self.registers.set_top((divider.counts - 1) as u16);
        for (channel, duty) in duties.into_iter().enumerate() {
            if let Some(duty) = duty {
                self.set_duty(channel as u8, duty);
            }
        }
    }
}

/// A PWM output on one compare/capture channel of the shared TIMER.
pub struct Pwm<'d, R> {
    timer: &'d PwmTimer<R>,
    pin: PinName,
    channel: u8,
}

impl<R> Pwm<'_, R> {
    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl<R: Registers> PwmOut for Pwm<'_, R> {
    fn write(&mut self, percent: f32) {
        self.timer.set_duty(self.channel, clamp_duty(percent));
    }

    fn read(&self) -> f32 {
        self.timer.duty(self.channel)
    }

    fn period_us(&mut self, us: u32) {
        self.timer.set_period(us);
    }

    fn read_period_us(&self) -> u32 {
        self.timer.ticks_to_us(self.timer.counts())
    }

    fn pulsewidth_us(&mut self, us: u32) {
        let shift = self.timer.registers.prescaler();
        let cycles = us_to_cycles(us, self.timer.config.clock_hz);
        let ticks = ((cycles + ((1u64 << shift) >> 1)) >> shift)
            .min(self.timer.counts() as u64)
            .min(u16::MAX as u64);
        self.timer
            .registers
            .set_compare(self.channel, ticks as u16);
    }

    fn read_pulsewidth_us(&self) -> u32 {
        self.timer
            .ticks_to_us(self.timer.registers.compare(self.channel) as u32)
    }
}

impl<'d, R: Registers + 'd> Target<'d> for Pwm<'d, R> {
    type Peripherals = PwmTimer<R>;

    fn pinmap(timer: &'d Self::Peripherals) -> &'d [PinMap] {
        timer.registers.pin_map()
    }

    fn init_direct(timer: &'d Self::Peripherals, map: &PinMap) -> Result<Self, Error> {
        let channel = route_channel(map.function);
        if channel as usize >= CHANNELS {
            return Err(Error::UnsupportedPin { pin: map.pin });
        }
        let running = timer.pool.available() < CHANNELS;
        if !timer.pool.acquire_index(channel as usize) {
            return Err(Error::ChannelInUse { pin: map.pin });
        }
        debug!("pwm channel {} claimed for pin {}", channel, map.pin);
        timer.registers.set_pin_output(map.pin, true);
        timer.registers.set_compare(channel, 0);
        if !running {
            timer.set_period(timer.config.default_period_us);
            timer.registers.start();
        }
        timer
            .registers
            .enable_channel(channel, route_location(map.function));
        Ok(Self {
            timer,
            pin: map.pin,
            channel,
        })
    }

    fn free(self) {
        self.timer.registers.set_compare(self.channel, 0);
        self.timer.registers.disable_channel(self.channel);
        self.timer.registers.set_pin_output(self.pin, false);
        self.timer.pool.release(self.channel as usize);
        if self.timer.pool.available() == CHANNELS {
            self.timer.registers.stop();
        }
    }
}
