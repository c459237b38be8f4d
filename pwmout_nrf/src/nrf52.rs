//! PWM peripheral of the nRF52 series.
//!
//! Each output occupies one PWM instance. The instance counts at `16 MHz / 2^n` up to
//! COUNTERTOP and plays a one-word sequence: the word holds the compare value and the falling
//! edge polarity flag, so the output is high for `compare` ticks of every period. After the
//! sequence ends the instance keeps generating its last word.

use crate::HFCLK_HZ;
use pwmout::divider::search_power_of_two;
use pwmout::duty::{clamp_duty, cycles_to_us, duty_to_ticks, ticks_to_duty, us_to_cycles};
use pwmout::pool::ChannelPool;
use pwmout::util::{debug, warn};
use pwmout::{DEFAULT_PERIOD_US, Error, PinMap, PinName, PwmOut, Target};

/// Largest value of the 15-bit COUNTERTOP register.
pub const MAX_PWM_COUNTERTOP: u16 = 0x7FFF;

/// Smallest value accepted by the COUNTERTOP register.
pub const MIN_PWM_COUNTERTOP: u16 = 3;

/// Sequence word flag: the first edge of a period is falling, i.e. the output starts high.
pub const POLARITY_FALLING_EDGE: u16 = 0x8000;

/// Largest exponent of the PRESCALER register, the counter runs at `16 MHz / 2^shift`.
pub const MAX_PRESCALER_SHIFT: u8 = 7;

/// Register access to the PWM instances of a board.
pub trait Registers {
    /// Returns the pins that can be routed to a PWM instance.
    fn pin_map(&self) -> &[PinMap];

    /// Routes output channel 0 of `instance` to `pin` and enables the instance.
    fn connect(&self, instance: usize, pin: PinName);

    /// Disables `instance` and disconnects its output.
    fn disconnect(&self, instance: usize);

    /// Sets up up-counting mode with the common decoder load, PRESCALER (as the exponent
    /// `shift`) and COUNTERTOP.
    fn configure(&self, instance: usize, shift: u8, countertop: u16);

    /// Starts playing `sequence`, replacing the sequence that is currently played.
    ///
    /// The implementation copies the words into memory that EasyDMA can read.
    fn play(&self, instance: usize, sequence: &[u16]);

    /// Stops the playback.
    fn stop(&self, instance: usize);
}

/// Configuration of a [`PwmBank`].
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// The period of a newly initialised output.
    pub default_period_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_period_us: DEFAULT_PERIOD_US,
        }
    }
}

/// The `N` PWM instances of a board.
pub struct PwmBank<R, const N: usize> {
    registers: R,
    pool: ChannelPool<N>,
    config: Config,
}

impl<R: Registers, const N: usize> PwmBank<R, N> {
    pub const fn new(registers: R, config: Config) -> Self {
        Self {
            registers,
            pool: ChannelPool::new(),
            config,
        }
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// Returns the number of PWM instances that are not claimed.
    pub fn available(&self) -> usize {
        self.pool.available()
    }
}

/// A PWM output driven by one PWM instance.
pub struct Pwm<'d, R, const N: usize> {
    bank: &'d PwmBank<R, N>,
    instance: usize,
    shift: u8,
    countertop: u16,
    compare: u16,
    percent: f32,
}

impl<'d, R: Registers, const N: usize> Pwm<'d, R, N> {
    /// Returns the index of the PWM instance.
    pub fn instance(&self) -> usize {
        self.instance
    }

    fn set_compare(&mut self, compare: u16) {
        self.compare = compare.min(self.countertop);
        self.bank
            .registers
            .play(self.instance, &[self.compare | POLARITY_FALLING_EDGE]);
    }

    fn set_period(&mut self, us: u32) {
        let cycles = us_to_cycles(us, HFCLK_HZ);
        let divider = search_power_of_two(cycles, MAX_PWM_COUNTERTOP as u32, MAX_PRESCALER_SHIFT);
        if divider.saturated {
            warn!(
                "PWM period of {} us is too long, using the longest supported period",
                us
            );
        }
        self.shift = divider.shift;
        self.countertop = (divider.counts as u16).max(MIN_PWM_COUNTERTOP);
        debug!(
            "pwm{}: prescaler=2^{} countertop={}",
            self.instance, self.shift, self.countertop
        );
        self.bank
            .registers
            .configure(self.instance, self.shift, self.countertop);
        self.set_compare(duty_to_ticks(self.percent, self.countertop as u32) as u16);
    }
}

impl<R: Registers, const N: usize> PwmOut for Pwm<'_, R, N> {
    fn write(&mut self, percent: f32) {
        self.percent = clamp_duty(percent);
        self.set_compare(duty_to_ticks(self.percent, self.countertop as u32) as u16);
    }

    fn read(&self) -> f32 {
        self.percent
    }

    fn period_us(&mut self, us: u32) {
        self.set_period(us);
    }

    fn read_period_us(&self) -> u32 {
        cycles_to_us((self.countertop as u64) << self.shift, HFCLK_HZ)
    }

    fn pulsewidth_us(&mut self, us: u32) {
        let ticks = us_to_cycles(us, HFCLK_HZ >> self.shift).min(self.countertop as u64);
        self.percent = ticks_to_duty(ticks as u32, self.countertop as u32);
        self.set_compare(ticks as u16);
    }

    fn read_pulsewidth_us(&self) -> u32 {
        cycles_to_us((self.compare as u64) << self.shift, HFCLK_HZ)
    }
}

impl<'d, R: Registers, const N: usize> Target<'d> for Pwm<'d, R, N>
where
    R: 'd,
{
    type Peripherals = PwmBank<R, N>;

    fn pinmap(bank: &'d Self::Peripherals) -> &'d [PinMap] {
        bank.registers.pin_map()
    }

    fn init_direct(bank: &'d Self::Peripherals, map: &PinMap) -> Result<Self, Error> {
        let instance = bank.pool.acquire().ok_or(Error::NoFreeChannel)?;
        debug!("pwm{} claimed for pin {}", instance, map.pin);
        bank.registers.connect(instance, map.pin);
        let mut pwm = Self {
            bank,
            instance,
            shift: 0,
            countertop: MAX_PWM_COUNTERTOP,
            compare: 0,
            percent: 0.0,
        };
        pwm.set_period(bank.config.default_period_us);
        Ok(pwm)
    }

    fn free(self) {
        self.bank.registers.stop(self.instance);
        self.bank.registers.disconnect(self.instance);
        self.bank.pool.release(self.instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    const INSTANCES: usize = 3;

    static PIN_MAP: [PinMap; 4] = [
        PinMap::new(PinName(13), 0, 0),
        PinMap::new(PinName(14), 0, 0),
        PinMap::new(PinName(15), 0, 0),
        PinMap::new(PinName(16), 0, 0),
    ];

    #[derive(Clone, Copy, Default)]
    struct Instance {
        pin: Option<PinName>,
        shift: Option<u8>,
        countertop: u16,
        word: Option<u16>,
    }

    #[derive(Default)]
    struct MockRegisters {
        instances: RefCell<[Instance; INSTANCES]>,
    }

    impl MockRegisters {
        fn instance(&self, index: usize) -> Instance {
            self.instances.borrow()[index]
        }
    }

    impl Registers for MockRegisters {
        fn pin_map(&self) -> &[PinMap] {
            &PIN_MAP
        }

        fn connect(&self, instance: usize, pin: PinName) {
            self.instances.borrow_mut()[instance].pin = Some(pin);
        }

        fn disconnect(&self, instance: usize) {
            self.instances.borrow_mut()[instance].pin = None;
        }

        fn configure(&self, instance: usize, shift: u8, countertop: u16) {
            let mut instances = self.instances.borrow_mut();
            instances[instance].shift = Some(shift);
            instances[instance].countertop = countertop;
        }

        fn play(&self, instance: usize, sequence: &[u16]) {
            assert_eq!(sequence.len(), 1);
            self.instances.borrow_mut()[instance].word = Some(sequence[0]);
        }

        fn stop(&self, instance: usize) {
            self.instances.borrow_mut()[instance].word = None;
        }
    }

    type TestPwm<'d> = Pwm<'d, MockRegisters, INSTANCES>;

    fn bank() -> PwmBank<MockRegisters, INSTANCES> {
        PwmBank::new(MockRegisters::default(), Config::default())
    }

    #[test]
    fn init_configures_default_period() {
        let bank = bank();
        let pwm = TestPwm::init(&bank, PinName(13)).unwrap();
        let instance = bank.registers().instance(pwm.instance());
        assert_eq!(instance.pin, Some(PinName(13)));
        assert_eq!(instance.shift, Some(4));
        assert_eq!(instance.countertop, 20_000);
        assert_eq!(instance.word, Some(POLARITY_FALLING_EDGE));
        assert_eq!(pwm.read(), 0.0);
        assert_eq!(pwm.read_period_us(), 20_000);
    }

    #[test]
    fn write_sets_sequence_word() {
        let bank = bank();
        let mut pwm = TestPwm::init(&bank, PinName(13)).unwrap();
        pwm.write(0.5);
        assert_eq!(pwm.read(), 0.5);
        assert_eq!(
            bank.registers().instance(0).word,
            Some(10_000 | POLARITY_FALLING_EDGE)
        );
        pwm.write(1.5);
        assert_eq!(pwm.read(), 1.0);
        assert_eq!(
            bank.registers().instance(0).word,
            Some(20_000 | POLARITY_FALLING_EDGE)
        );
        pwm.write(-0.2);
        assert_eq!(pwm.read(), 0.0);
    }

    #[test]
    fn period_keeps_duty() {
        let bank = bank();
        let mut pwm = TestPwm::init(&bank, PinName(14)).unwrap();
        pwm.write(0.5);
        pwm.period_us(1_000);
        let instance = bank.registers().instance(0);
        assert_eq!(instance.shift, Some(0));
        assert_eq!(instance.countertop, 16_000);
        assert_eq!(instance.word, Some(8_000 | POLARITY_FALLING_EDGE));
        assert_eq!(pwm.read(), 0.5);
        assert_eq!(pwm.read_period_us(), 1_000);
        assert_eq!(pwm.read_pulsewidth_us(), 500);
    }

    #[test]
    fn long_period_saturates() {
        let bank = bank();
        let mut pwm = TestPwm::init(&bank, PinName(14)).unwrap();
        pwm.period(1.0);
        let instance = bank.registers().instance(0);
        assert_eq!(instance.shift, Some(MAX_PRESCALER_SHIFT));
        assert_eq!(instance.countertop, MAX_PWM_COUNTERTOP);
        assert_eq!(pwm.read_period_us(), 262_136);
    }

    #[test]
    fn short_period_uses_minimum_countertop() {
        let bank = bank();
        let mut pwm = TestPwm::init(&bank, PinName(14)).unwrap();
        pwm.period_us(0);
        assert_eq!(bank.registers().instance(0).countertop, MIN_PWM_COUNTERTOP);
    }

    #[test]
    fn pulsewidth_keeps_period() {
        let bank = bank();
        let mut pwm = TestPwm::init(&bank, PinName(15)).unwrap();
        pwm.pulsewidth_us(1_500);
        assert_eq!(pwm.read_pulsewidth_us(), 1_500);
        assert_eq!(pwm.read_period_us(), 20_000);
        assert_eq!(pwm.read(), 0.075);
        pwm.pulsewidth_ms(30);
        assert_eq!(pwm.read_pulsewidth_us(), 20_000);
        assert_eq!(pwm.read(), 1.0);
    }

    #[test]
    fn instances_are_pooled() {
        let bank = bank();
        let first = TestPwm::init(&bank, PinName(13)).unwrap();
        let _second = TestPwm::init(&bank, PinName(14)).unwrap();
        let _third = TestPwm::init(&bank, PinName(15)).unwrap();
        assert_eq!(bank.available(), 0);
        assert_eq!(
            TestPwm::init(&bank, PinName(16)).err(),
            Some(Error::NoFreeChannel)
        );
        let instance = first.instance();
        first.free();
        assert_eq!(bank.registers().instance(instance).pin, None);
        assert_eq!(bank.registers().instance(instance).word, None);
        let fourth = TestPwm::init(&bank, PinName(16)).unwrap();
        assert_eq!(fourth.instance(), instance);
    }

    #[test]
    fn unsupported_pin() {
        let bank = bank();
        assert_eq!(
            TestPwm::init(&bank, PinName(40)).err(),
            Some(Error::UnsupportedPin { pin: PinName(40) })
        );
    }
}
