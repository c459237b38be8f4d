//! Software PWM of the nRF51 series.
//!
//! The nRF51 has no PWM peripheral. One 16-bit TIMER is shared by [`CHANNELS`] outputs:
//! COMPARE[3] ends the period and clears the counter, COMPARE[i] ends the pulse of channel
//! `i`. Both events toggle the pin of the channel through a GPIOTE task connected by PPI, so
//! every output starts high at the beginning of a period and falls after its pulse width.
//!
//! Because the toggling is edge based, a new pulse width may only be committed at a period
//! boundary. While the timer runs, changes are staged and [`SoftPwmTimer::on_interrupt`]
//! commits them; it must be called from the COMPARE[3] interrupt of the timer. Duty ratios
//! of 0 and 1 have no edges and are produced by driving the pin as a plain GPIO.

use crate::HFCLK_HZ;
use core::cell::RefCell;
use core::sync::atomic::Ordering;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use portable_atomic::AtomicBool;
use pwmout::divider::search_power_of_two;
use pwmout::duty::{clamp_duty, cycles_to_us, duty_to_ticks, ticks_to_duty, us_to_cycles};
use pwmout::pool::ChannelPool;
use pwmout::util::{debug, warn};
use pwmout::{DEFAULT_PERIOD_US, Error, PinMap, PinName, PwmOut, Target};

/// Number of PWM outputs that share the timer.
pub const CHANNELS: usize = 3;

/// Compare register that defines the period.
pub const PERIOD_COMPARE: usize = 3;

/// Largest counter value of the 16-bit timer.
pub const MAX_COUNTER: u16 = 0xFFFF;

/// Largest value of the timer's PRESCALER register.
pub const MAX_PRESCALER: u8 = 9;

/// Register access to the timer, GPIOTE and PPI resources used for the software PWM.
pub trait Registers {
    /// Returns the pins that can be used as PWM outputs.
    fn pin_map(&self) -> &[PinMap];

    /// Sets the PRESCALER register, the timer counts at `16 MHz / 2^prescaler`.
    fn set_prescaler(&self, prescaler: u8);

    fn set_compare(&self, index: usize, value: u16);

    /// Starts the timer with the COMPARE[3] to CLEAR shortcut and the COMPARE[3] interrupt
    /// enabled.
    fn start(&self);

    fn stop(&self);

    /// Resets the counter to 0.
    fn clear(&self);

    /// Configures GPIOTE channel `channel` as a toggle task on `pin` with the given initial
    /// level and connects COMPARE[channel] and COMPARE[3] to it through PPI.
    fn connect_toggle(&self, channel: usize, pin: PinName, initial_high: bool);

    /// Disconnects the PPI channels of `channel` and releases its GPIOTE channel.
    fn disconnect_toggle(&self, channel: usize);

    /// Drives `pin` as a plain GPIO output.
    fn set_output(&self, pin: PinName, high: bool);
}

/// Configuration of a [`SoftPwmTimer`].
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// The period used when the first output is initialised.
    pub default_period_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_period_us: DEFAULT_PERIOD_US,
        }
    }
}

#[derive(Clone, Copy)]
struct Channel {
    pin: PinName,
    percent: f32,
    pulse: u16,
    toggling: bool,
    pending: bool,
}

struct State {
    prescaler: u8,
    counts: u16,
    running: bool,
    channels: [Option<Channel>; CHANNELS],
}

/// The timer shared by the software PWM outputs.
pub struct SoftPwmTimer<R> {
    registers: R,
    config: Config,
    pool: ChannelPool<CHANNELS>,
    state: Mutex<CriticalSectionRawMutex, RefCell<State>>,
    update_pending: AtomicBool,
}

impl<R: Registers> SoftPwmTimer<R> {
    pub const fn new(registers: R, config: Config) -> Self {
        Self {
            registers,
            config,
            pool: ChannelPool::new(),
            state: Mutex::new(RefCell::new(State {
                prescaler: 0,
                counts: MAX_COUNTER,
                running: false,
                channels: [None; CHANNELS],
            })),
            update_pending: AtomicBool::new(false),
        }
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// Commits staged pulse widths.
    ///
    /// Call this from the timer interrupt handler on the COMPARE[3] event.
    pub fn on_interrupt(&self) {
        if !self.update_pending.swap(false, Ordering::AcqRel) {
            return;
        }
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            for index in 0..CHANNELS {
                if let Some(channel) = state.channels[index].as_mut()
                    && channel.pending
                {
                    channel.pending = false;
                    self.commit(&mut state, index);
                }
            }
            self.update_running(&mut state);
        });
    }

    /// Writes the registers for the staged pulse width of channel `index`.
    fn commit(&self, state: &mut State, index: usize) {
        let counts = state.counts;
        let Some(channel) = state.channels[index].as_mut() else {
            return;
        };
        if channel.pulse == 0 || channel.pulse >= counts {
            if channel.toggling {
                self.registers.disconnect_toggle(index);
                channel.toggling = false;
            }
            self.registers.set_output(channel.pin, channel.pulse != 0);
        } else {
            self.registers.set_compare(index, channel.pulse);
            if !channel.toggling {
                self.registers.connect_toggle(index, channel.pin, true);
                channel.toggling = true;
            }
        }
    }

    /// Runs the timer exactly while at least one channel toggles.
    fn update_running(&self, state: &mut State) {
        let toggling = state.channels.iter().flatten().any(|channel| channel.toggling);
        if toggling && !state.running {
            self.registers.clear();
            self.registers.start();
            state.running = true;
        } else if !toggling && state.running {
            self.registers.stop();
            state.running = false;
        }
    }

    fn stage(&self, index: usize, percent: f32, pulse: Option<u16>) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let counts = state.counts;
            let running = state.running;
            let Some(channel) = state.channels[index].as_mut() else {
                return;
            };
            channel.percent = percent;
            channel.pulse = pulse.unwrap_or_else(|| duty_to_ticks(percent, counts as u32) as u16);
            if running {
                channel.pending = true;
                self.update_pending.store(true, Ordering::Release);
            } else {
                self.commit(&mut state, index);
                self.update_running(&mut state);
            }
        });
    }

    /// Changes the period of all outputs, each output keeps its duty ratio.
    ///
    /// The timer restarts, so the current period of all outputs is cut short.
    fn set_period(&self, us: u32) {
        let cycles = us_to_cycles(us, HFCLK_HZ);
        let divider = search_power_of_two(cycles, MAX_COUNTER as u32, MAX_PRESCALER);
        if divider.saturated {
            warn!(
                "PWM period of {} us is too long, using the longest supported period",
                us
            );
        }
        let counts = (divider.counts as u16).max(2);
        debug!("nrf51 pwm: prescaler={} counts={}", divider.shift, counts);
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            self.registers.stop();
            state.running = false;
            for index in 0..CHANNELS {
                if let Some(channel) = state.channels[index].as_mut()
                    && channel.toggling
                {
                    self.registers.disconnect_toggle(index);
                    channel.toggling = false;
                }
            }
            state.prescaler = divider.shift;
            state.counts = counts;
            self.registers.set_prescaler(divider.shift);
            self.registers.set_compare(PERIOD_COMPARE, counts);
            for index in 0..CHANNELS {
                if let Some(channel) = state.channels[index].as_mut() {
                    channel.pulse = duty_to_ticks(channel.percent, counts as u32) as u16;
                    channel.pending = false;
                    self.commit(&mut state, index);
                }
            }
            self.update_running(&mut state);
        });
    }

    fn with_channel<T>(&self, index: usize, f: impl FnOnce(&State, &Channel) -> T) -> Option<T> {
        self.state.lock(|state| {
            let state = state.borrow();
            let channel = state.channels[index].as_ref()?;
            Some(f(&state, channel))
        })
    }

    fn timing(&self) -> (u8, u16) {
        self.state.lock(|state| {
            let state = state.borrow();
            (state.prescaler, state.counts)
        })
    }
}

/// A software PWM output on the shared timer.
///
/// All outputs share the period: changing it on one output changes it on all of them.
pub struct Pwm<'d, R> {
    timer: &'d SoftPwmTimer<R>,
    channel: usize,
}

impl<R: Registers> Pwm<'_, R> {
    /// Returns the index of the GPIOTE and compare channel used by the output.
    pub fn channel(&self) -> usize {
        self.channel
    }
}

impl<R: Registers> PwmOut for Pwm<'_, R> {
    fn write(&mut self, percent: f32) {
        self.timer.stage(self.channel, clamp_duty(percent), None);
    }

    fn read(&self) -> f32 {
        self.timer
            .with_channel(self.channel, |_, channel| channel.percent)
            .unwrap_or(0.0)
    }

    fn period_us(&mut self, us: u32) {
        self.timer.set_period(us);
    }

    fn read_period_us(&self) -> u32 {
        let (prescaler, counts) = self.timer.timing();
        cycles_to_us((counts as u64) << prescaler, HFCLK_HZ)
    }

    fn pulsewidth_us(&mut self, us: u32) {
        let (prescaler, counts) = self.timer.timing();
        let ticks = us_to_cycles(us, HFCLK_HZ >> prescaler).min(counts as u64) as u16;
        let percent = ticks_to_duty(ticks as u32, counts as u32);
        self.timer.stage(self.channel, percent, Some(ticks));
    }

    fn read_pulsewidth_us(&self) -> u32 {
        self.timer
            .with_channel(self.channel, |state, channel| {
                cycles_to_us((channel.pulse as u64) << state.prescaler, HFCLK_HZ)
            })
            .unwrap_or(0)
    }
}

impl<'d, R: Registers + 'd> Target<'d> for Pwm<'d, R> {
    type Peripherals = SoftPwmTimer<R>;

    fn pinmap(timer: &'d Self::Peripherals) -> &'d [PinMap] {
        timer.registers.pin_map()
    }

    fn init_direct(timer: &'d Self::Peripherals, map: &PinMap) -> Result<Self, Error> {
        let channel = timer.pool.acquire().ok_or(Error::NoFreeChannel)?;
        debug!("nrf51 pwm channel {} claimed for pin {}", channel, map.pin);
        let first = timer.state.lock(|state| {
            let mut state = state.borrow_mut();
            let first = state.channels.iter().all(Option::is_none);
            state.channels[channel] = Some(Channel {
                pin: map.pin,
                percent: 0.0,
                pulse: 0,
                toggling: false,
                pending: false,
            });
            timer.commit(&mut state, channel);
            first
        });
        if first {
            timer.set_period(timer.config.default_period_us);
        }
        Ok(Self { timer, channel })
    }

    fn free(self) {
        self.timer.state.lock(|state| {
            let mut state = state.borrow_mut();
            if let Some(channel) = state.channels[self.channel].take() {
                if channel.toggling {
                    self.timer.registers.disconnect_toggle(self.channel);
                }
                self.timer.registers.set_output(channel.pin, false);
            }
            self.timer.update_running(&mut state);
        });
        self.timer.pool.release(self.channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static PIN_MAP: [PinMap; 4] = [
        PinMap::new(PinName(1), 0, 0),
        PinMap::new(PinName(2), 0, 0),
        PinMap::new(PinName(3), 0, 0),
        PinMap::new(PinName(4), 0, 0),
    ];

    #[derive(Default)]
    struct Timer {
        prescaler: u8,
        compare: [u16; 4],
        running: bool,
        toggles: [Option<PinName>; CHANNELS],
        levels: [Option<bool>; 8],
    }

    #[derive(Default)]
    struct MockRegisters {
        timer: RefCell<Timer>,
    }

    impl Registers for MockRegisters {
        fn pin_map(&self) -> &[PinMap] {
            &PIN_MAP
        }

        fn set_prescaler(&self, prescaler: u8) {
            assert!(!self.timer.borrow().running);
            self.timer.borrow_mut().prescaler = prescaler;
        }

        fn set_compare(&self, index: usize, value: u16) {
            self.timer.borrow_mut().compare[index] = value;
        }

        fn start(&self) {
            self.timer.borrow_mut().running = true;
        }

        fn stop(&self) {
            self.timer.borrow_mut().running = false;
        }

        fn clear(&self) {}

        fn connect_toggle(&self, channel: usize, pin: PinName, initial_high: bool) {
            assert!(initial_high);
            let mut timer = self.timer.borrow_mut();
            timer.toggles[channel] = Some(pin);
            timer.levels[pin.0 as usize] = None;
        }

        fn disconnect_toggle(&self, channel: usize) {
            self.timer.borrow_mut().toggles[channel] = None;
        }

        fn set_output(&self, pin: PinName, high: bool) {
            self.timer.borrow_mut().levels[pin.0 as usize] = Some(high);
        }
    }

    type TestPwm<'d> = Pwm<'d, MockRegisters>;

    fn timer() -> SoftPwmTimer<MockRegisters> {
        SoftPwmTimer::new(MockRegisters::default(), Config::default())
    }

    #[test]
    fn init_holds_pin_low() {
        let timer = timer();
        let pwm = TestPwm::init(&timer, PinName(1)).unwrap();
        let registers = timer.registers().timer.borrow();
        assert_eq!(registers.prescaler, 3);
        assert_eq!(registers.compare[PERIOD_COMPARE], 40_000);
        assert_eq!(registers.levels[1], Some(false));
        assert!(!registers.running);
        assert_eq!(pwm.read_period_us(), 20_000);
        assert_eq!(pwm.read(), 0.0);
    }

    #[test]
    fn write_starts_timer_when_idle() {
        let timer = timer();
        let mut pwm = TestPwm::init(&timer, PinName(1)).unwrap();
        pwm.write(0.5);
        let registers = timer.registers().timer.borrow();
        assert!(registers.running);
        assert_eq!(registers.compare[0], 20_000);
        assert_eq!(registers.toggles[0], Some(PinName(1)));
        drop(registers);
        assert_eq!(pwm.read_pulsewidth_us(), 10_000);
    }

    #[test]
    fn changes_are_committed_at_period_end() {
        let timer = timer();
        let mut pwm = TestPwm::init(&timer, PinName(1)).unwrap();
        pwm.write(0.5);
        pwm.write(0.25);
        assert_eq!(pwm.read(), 0.25);
        assert_eq!(timer.registers().timer.borrow().compare[0], 20_000);
        timer.on_interrupt();
        assert_eq!(timer.registers().timer.borrow().compare[0], 10_000);
        timer.on_interrupt();
        assert_eq!(timer.registers().timer.borrow().compare[0], 10_000);
    }

    #[test]
    fn full_duty_is_static() {
        let timer = timer();
        let mut pwm = TestPwm::init(&timer, PinName(2)).unwrap();
        pwm.write(0.5);
        pwm.write(1.5);
        assert_eq!(pwm.read(), 1.0);
        timer.on_interrupt();
        let registers = timer.registers().timer.borrow();
        assert_eq!(registers.toggles[0], None);
        assert_eq!(registers.levels[2], Some(true));
        assert!(!registers.running);
    }

    #[test]
    fn period_is_shared() {
        let timer = timer();
        let mut first = TestPwm::init(&timer, PinName(1)).unwrap();
        let mut second = TestPwm::init(&timer, PinName(2)).unwrap();
        first.write(0.5);
        second.write(0.25);
        second.period_us(1_000);
        assert_eq!(first.read_period_us(), 1_000);
        assert_eq!(first.read(), 0.5);
        let registers = timer.registers().timer.borrow();
        assert_eq!(registers.prescaler, 0);
        assert_eq!(registers.compare[PERIOD_COMPARE], 16_000);
        assert_eq!(registers.compare[0], 8_000);
        assert_eq!(registers.compare[1], 4_000);
        assert!(registers.running);
    }

    #[test]
    fn pulsewidth_keeps_period() {
        let timer = timer();
        let mut pwm = TestPwm::init(&timer, PinName(3)).unwrap();
        pwm.pulsewidth_us(1_500);
        assert_eq!(pwm.read_pulsewidth_us(), 1_500);
        assert_eq!(pwm.read_period_us(), 20_000);
        assert_eq!(pwm.read(), 0.075);
    }

    #[test]
    fn channels_are_pooled() {
        let timer = timer();
        let mut first = TestPwm::init(&timer, PinName(1)).unwrap();
        let _second = TestPwm::init(&timer, PinName(2)).unwrap();
        let _third = TestPwm::init(&timer, PinName(3)).unwrap();
        assert_eq!(
            TestPwm::init(&timer, PinName(4)).err(),
            Some(Error::NoFreeChannel)
        );
        first.write(0.5);
        let channel = first.channel();
        first.free();
        {
            let registers = timer.registers().timer.borrow();
            assert_eq!(registers.toggles[channel], None);
            assert_eq!(registers.levels[1], Some(false));
            assert!(!registers.running);
        }
        let fourth = TestPwm::init(&timer, PinName(4)).unwrap();
        assert_eq!(fourth.channel(), channel);
        assert_eq!(fourth.read_period_us(), 20_000);
    }
}
