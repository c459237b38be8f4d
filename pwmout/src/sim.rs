//! Simulated PWM target.
//!
//! The simulator keeps period and pulse width in microseconds and publishes them per pin,
//! which lets host code observe what a real output would produce.

use crate::duty::{clamp_duty, duty_to_ticks, ticks_to_duty};
use crate::pool::ChannelPool;
use crate::util::debug;
use crate::{DEFAULT_PERIOD_US, Error, PinMap, PinName, PwmOut, Target};
use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// The state of a simulated output pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SimOutput {
    pub pin: PinName,
    pub period_us: u32,
    pub pulse_us: u32,
}

/// A simulated board with `N` PWM slots.
///
/// The `peripheral` field of a pin table entry is the index of the slot driving the pin.
pub struct SimBoard<const N: usize> {
    pin_map: &'static [PinMap],
    pool: ChannelPool<N>,
    outputs: Mutex<CriticalSectionRawMutex, RefCell<[Option<SimOutput>; N]>>,
}

impl<const N: usize> SimBoard<N> {
    pub const fn new(pin_map: &'static [PinMap]) -> Self {
        Self {
            pin_map,
            pool: ChannelPool::new(),
            outputs: Mutex::new(RefCell::new([None; N])),
        }
    }

    /// Returns the signal currently generated on `pin`.
    pub fn output(&self, pin: PinName) -> Option<SimOutput> {
        self.outputs.lock(|outputs| {
            outputs
                .borrow()
                .iter()
                .flatten()
                .find(|output| output.pin == pin)
                .copied()
        })
    }

    fn publish(&self, slot: usize, output: Option<SimOutput>) {
        self.outputs
            .lock(|outputs| outputs.borrow_mut()[slot] = output);
    }
}

/// A PWM output of a [`SimBoard`].
pub struct SimPwm<'d, const N: usize> {
    board: &'d SimBoard<N>,
    slot: usize,
    pin: PinName,
    period_us: u32,
    pulse_us: u32,
}

impl<const N: usize> SimPwm<'_, N> {
    fn publish(&self) {
        self.board.publish(
            self.slot,
            Some(SimOutput {
                pin: self.pin,
                period_us: self.period_us,
                pulse_us: self.pulse_us,
            }),
        );
    }
}

impl<const N: usize> PwmOut for SimPwm<'_, N> {
    fn write(&mut self, percent: f32) {
        self.pulse_us = duty_to_ticks(clamp_duty(percent), self.period_us);
        self.publish();
    }

    fn read(&self) -> f32 {
        ticks_to_duty(self.pulse_us, self.period_us)
    }

    fn period_us(&mut self, us: u32) {
        let duty = self.read();
        self.period_us = us.max(1);
        self.pulse_us = duty_to_ticks(duty, self.period_us);
        self.publish();
    }

    fn read_period_us(&self) -> u32 {
        self.period_us
    }

    fn pulsewidth_us(&mut self, us: u32) {
        self.pulse_us = us.min(self.period_us);
        self.publish();
    }

    fn read_pulsewidth_us(&self) -> u32 {
        self.pulse_us
    }
}

impl<'d, const N: usize> Target<'d> for SimPwm<'d, N> {
    type Peripherals = SimBoard<N>;

    fn pinmap(peripherals: &'d Self::Peripherals) -> &'d [PinMap] {
        peripherals.pin_map
    }

    fn init_direct(board: &'d Self::Peripherals, map: &PinMap) -> Result<Self, Error> {
        let slot = map.peripheral as usize;
        if slot >= N {
            return Err(Error::UnsupportedPin { pin: map.pin });
        }
        if !board.pool.acquire_index(slot) {
            return Err(Error::ChannelInUse { pin: map.pin });
        }
        debug!("sim slot {} claimed for pin {}", slot, map.pin);
        let pwm = Self {
            board,
            slot,
            pin: map.pin,
            period_us: DEFAULT_PERIOD_US,
            pulse_us: 0,
        };
        pwm.publish();
        Ok(pwm)
    }

    fn free(self) {
        self.board.publish(self.slot, None);
        self.board.pool.release(self.slot);
    }
}
