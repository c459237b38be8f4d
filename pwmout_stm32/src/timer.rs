use pwmout::duty::{clamp_duty, ticks_to_duty};
use pwmout::pool::ChannelPool;
use pwmout::util::{debug, warn};
use pwmout::{DEFAULT_PERIOD_US, Error, PinMap, PinName, PwmOut, Target};

/// Number of capture/compare channels of a timer.
pub const CHANNELS_PER_TIMER: usize = 4;

// ARR stays below 0xFFFF so that a compare value of ARR + 1 (always high) fits into CCRx.
const MAX_COUNTS: u32 = 0xFFFF;
const MAX_PRESCALER: u64 = 0xFFFF;
const COMPLEMENTARY: u32 = 1 << 8;

/// Encodes the `function` of a pin table entry.
///
/// `channel` is the capture/compare channel (`1..=4`). Complementary outputs (`CHxN`) set
/// `complementary`.
pub const fn pwm_function(channel: u8, complementary: bool) -> u32 {
    channel as u32 | if complementary { COMPLEMENTARY } else { 0 }
}

/// Returns the capture/compare channel encoded by [`pwm_function`].
pub const fn function_channel(function: u32) -> u8 {
    (function & 0xFF) as u8
}

/// Returns whether [`pwm_function`] encoded a complementary output.
pub const fn function_complementary(function: u32) -> bool {
    function & COMPLEMENTARY != 0
}

/// The STM32 series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Family {
    F0,
    F1,
    F2,
    F3,
    F4,
    F7,
    G0,
    G4,
    H7,
    L0,
    L1,
    L4,
    L5,
    U5,
    WB,
    WL,
}

impl Family {
    /// Whether a period that exceeds the prescaler range is an error rather than clamped.
    pub const fn rejects_long_periods(self) -> bool {
        matches!(self, Self::L1 | Self::L4)
    }
}

/// Register access to the timers of a board.
///
/// Channels are numbered `1..=4` like in the reference manuals.
pub trait Registers {
    /// Returns the pin table of the board.
    ///
    /// `peripheral` is the index of the timer, `function` is built with [`pwm_function`].
    fn pin_map(&self) -> &[PinMap];

    /// Returns the input clock of the timer's prescaler.
    fn timer_clock_hz(&self, timer: usize) -> u32;

    /// Writes the PSC register.
    fn set_prescaler(&self, timer: usize, value: u16);

    fn prescaler(&self, timer: usize) -> u16;

    /// Writes the ARR register.
    fn set_auto_reload(&self, timer: usize, value: u16);

    fn auto_reload(&self, timer: usize) -> u16;

    /// Writes the CCRx register.
    fn set_compare(&self, timer: usize, channel: u8, value: u16);

    fn compare(&self, timer: usize, channel: u8) -> u16;

    /// Sets up PWM mode 1 with preload and enables CCxE, or CCxNE for complementary outputs.
    fn enable_output(&self, timer: usize, channel: u8, complementary: bool);

    fn disable_output(&self, timer: usize, channel: u8, complementary: bool);

    /// Switches the pin to the alternate function of the pin table entry.
    fn connect(&self, map: &PinMap);

    /// Switches the pin back to an analog input.
    fn disconnect(&self, pin: PinName);

    /// Sets CEN (and MOE on advanced timers).
    fn start(&self, timer: usize);

    fn stop(&self, timer: usize);

    /// Sets UG so that PSC and ARR are loaded immediately.
    fn generate_update(&self, timer: usize);
}

/// Configuration of the timers.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub family: Family,
    /// The period of a newly started timer.
    pub default_period_us: u32,
}

impl Config {
    pub const fn new(family: Family) -> Self {
        Self {
            family,
            default_period_us: DEFAULT_PERIOD_US,
        }
    }
}

/// The timers of a board with `N` channel slots, [`CHANNELS_PER_TIMER`] per timer.
pub struct Timers<R, const N: usize> {
    registers: R,
    config: Config,
    pool: ChannelPool<N>,
}

impl<R: Registers, const N: usize> Timers<R, N> {
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

    fn slot(timer: usize, channel: u8) -> usize {
        timer * CHANNELS_PER_TIMER + channel as usize - 1
    }

    fn open_channels(&self, timer: usize) -> impl Iterator<Item = u8> + '_ {
        (1..=CHANNELS_PER_TIMER as u8).filter(move |&channel| {
            let slot = Self::slot(timer, channel);
            slot < N && self.pool.is_taken(slot)
        })
    }

    fn ticks_per_us(&self, timer: usize) -> u32 {
        (self.registers.timer_clock_hz(timer) / 1_000_000).max(1)
    }

    /// Returns the number of microseconds per counter tick.
    fn us_per_tick(&self, timer: usize) -> u32 {
        ((self.registers.prescaler(timer) as u32 + 1) / self.ticks_per_us(timer)).max(1)
    }

    fn counts(&self, timer: usize) -> u32 {
        self.registers.auto_reload(timer) as u32 + 1
    }

    fn set_pulse_us(&self, timer: usize, channel: u8, us: u32) {
        let compare = (us / self.us_per_tick(timer))
            .min(self.counts(timer))
            .min(u16::MAX as u32);
        self.registers.set_compare(timer, channel, compare as u16);
    }

    fn set_duty(&self, timer: usize, channel: u8, duty: f32) {
        let period_us = self.counts(timer) as u64 * self.us_per_tick(timer) as u64;
        let pulse_us = (period_us as f64 * duty as f64 + 0.5) as u32;
        self.set_pulse_us(timer, channel, pulse_us);
    }

    fn duty(&self, timer: usize, channel: u8) -> f32 {
        ticks_to_duty(
            self.registers.compare(timer, channel) as u32,
            self.counts(timer),
        )
    }

    fn set_period(&self, timer: usize, us: u32) -> Result<(), Error> {
        let ticks_per_us = self.ticks_per_us(timer) as u64;
        let mut us_per_tick: u32 = 1;
        while us / us_per_tick > 0xFFFF {
            us_per_tick *= 2;
        }
        let mut counts = (us / us_per_tick).max(1);
        if ticks_per_us * us_per_tick as u64 - 1 > MAX_PRESCALER {
            if self.config.family.rejects_long_periods() {
                return Err(Error::PeriodOutOfRange { period_us: us });
            }
            warn!(
                "PWM period of {} us is too long, using the longest supported period",
                us
            );
            us_per_tick = 1;
            while ticks_per_us * us_per_tick as u64 * 2 <= MAX_PRESCALER + 1 {
                us_per_tick *= 2;
            }
            counts = MAX_COUNTS;
        }

        let mut duties = [None; CHANNELS_PER_TIMER];
        for channel in self.open_channels(timer) {
            duties[channel as usize - 1] = Some(self.duty(timer, channel));
        }

        let prescaler = (ticks_per_us * us_per_tick as u64 - 1) as u16;
        let auto_reload = (counts - 1) as u16;
        debug!("tim{}: psc={} arr={}", timer, prescaler, auto_reload);
        self.registers.set_prescaler(timer, prescaler);
        self.registers.set_auto_reload(timer, auto_reload);
        for (index, duty) in duties.into_iter().enumerate() {
            if let Some(duty) = duty {
                self.set_duty(timer, index as u8 + 1, duty);
            }
        }
        self.registers.generate_update(timer);
        Ok(())
    }
}

/// A PWM output on one capture/compare channel of a timer.
pub struct Pwm<'d, R, const N: usize> {
    timers: &'d Timers<R, N>,
    pin: PinName,
    timer: usize,
    channel: u8,
    complementary: bool,
}

impl<R: Registers, const N: usize> Pwm<'_, R, N> {
    /// Returns the index of the timer.
    pub fn timer(&self) -> usize {
        self.timer
    }

    /// Returns the capture/compare channel (`1..=4`).
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Sets the period of the timer and keeps the duty cycle of all its open channels.
    ///
    /// Fails with [`Error::PeriodOutOfRange`] on families that reject periods beyond the
    /// prescaler range, the other families use the longest supported period instead.
    pub fn try_period_us(&mut self, us: u32) -> Result<(), Error> {
        self.timers.set_period(self.timer, us)
    }
}

impl<R: Registers, const N: usize> PwmOut for Pwm<'_, R, N> {
    fn write(&mut self, percent: f32) {
        self.timers
            .set_duty(self.timer, self.channel, clamp_duty(percent));
    }

    fn read(&self) -> f32 {
        self.timers.duty(self.timer, self.channel)
    }

    fn period_us(&mut self, us: u32) {
        if let Err(error) = self.try_period_us(us) {
            pwmout::util::panic!("{}", error);
        }
    }

    fn read_period_us(&self) -> u32 {
        self.timers.counts(self.timer) * self.timers.us_per_tick(self.timer)
    }

    fn pulsewidth_us(&mut self, us: u32) {
        self.timers.set_pulse_us(self.timer, self.channel, us);
    }

    fn read_pulsewidth_us(&self) -> u32 {
        self.timers.registers.compare(self.timer, self.channel) as u32
            * self.timers.us_per_tick(self.timer)
    }
}

impl<'d, R: Registers + 'd, const N: usize> Target<'d> for Pwm<'d, R, N> {
    type Peripherals = Timers<R, N>;

    fn pinmap(timers: &'d Self::Peripherals) -> &'d [PinMap] {
        timers.registers.pin_map()
    }

    fn init_direct(timers: &'d Self::Peripherals, map: &PinMap) -> Result<Self, Error> {
        let timer = map.peripheral as usize;
        let channel = function_channel(map.function);
        let complementary = function_complementary(map.function);
        if !(1..=CHANNELS_PER_TIMER as u8).contains(&channel)
            || Timers::<R, N>::slot(timer, channel) >= N
        {
            return Err(Error::UnsupportedPin { pin: map.pin });
        }
        let running = timers.open_channels(timer).next().is_some();
        if !timers.pool.acquire_index(Timers::<R, N>::slot(timer, channel)) {
            return Err(Error::ChannelInUse { pin: map.pin });
        }
        debug!("tim{} channel {} claimed for pin {}", timer, channel, map.pin);
        timers.registers.connect(map);
        timers.registers.set_compare(timer, channel, 0);
        if !running {
            if let Err(error) = timers.set_period(timer, timers.config.default_period_us) {
                timers.registers.disconnect(map.pin);
                timers.pool.release(Timers::<R, N>::slot(timer, channel));
                return Err(error);
            }
            timers.registers.start(timer);
        }
        timers
            .registers
            .enable_output(timer, channel, complementary);
        Ok(Self {
            timers,
            pin: map.pin,
            timer,
            channel,
            complementary,
        })
    }

    fn free(self) {
        let timers = self.timers;
        timers.registers.set_compare(self.timer, self.channel, 0);
        timers
            .registers
            .disable_output(self.timer, self.channel, self.complementary);
        timers.registers.disconnect(self.pin);
        timers
            .pool
            .release(Timers::<R, N>::slot(self.timer, self.channel));
        if timers.open_channels(self.timer).next().is_none() {
            timers.registers.stop(self.timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    const TIMERS: usize = 2;
    const SLOTS: usize = TIMERS * CHANNELS_PER_TIMER;

    const PA0: PinName = PinName(0x00);
    const PA1: PinName = PinName(0x01);
    const PA8: PinName = PinName(0x08);
    const PA9: PinName = PinName(0x09);
    const PA15: PinName = PinName(0x0F);
    const PB0: PinName = PinName(0x10);
    const PB13: PinName = PinName(0x1D);

    static PIN_MAP: [PinMap; 7] = [
        PinMap::new(PA8, 0, pwm_function(1, false)),
        PinMap::new(PA9, 0, pwm_function(2, false)),
        PinMap::new(PB13, 0, pwm_function(1, true)),
        PinMap::new(PA0, 1, pwm_function(1, false)),
        PinMap::new(PA1, 1, pwm_function(2, false)),
        PinMap::new(PA15, 1, pwm_function(5, false)),
        PinMap::new(PB0, 2, pwm_function(3, false)),
    ];

    #[derive(Clone, Copy, Default)]
    struct Timer {
        prescaler: u16,
        auto_reload: u16,
        compare: [u16; CHANNELS_PER_TIMER],
        outputs: [Option<bool>; CHANNELS_PER_TIMER],
        running: bool,
        updates: usize,
    }

    #[derive(Default)]
    struct MockRegisters {
        timers: RefCell<[Timer; TIMERS]>,
        connected: RefCell<[Option<PinName>; 8]>,
    }

    impl MockRegisters {
        fn timer(&self, timer: usize) -> Timer {
            self.timers.borrow()[timer]
        }

        fn is_connected(&self, pin: PinName) -> bool {
            self.connected.borrow().contains(&Some(pin))
        }
    }

    impl Registers for MockRegisters {
        fn pin_map(&self) -> &[PinMap] {
            &PIN_MAP
        }

        fn timer_clock_hz(&self, _timer: usize) -> u32 {
            80_000_000
        }

        fn set_prescaler(&self, timer: usize, value: u16) {
            self.timers.borrow_mut()[timer].prescaler = value;
        }

        fn prescaler(&self, timer: usize) -> u16 {
            self.timers.borrow()[timer].prescaler
        }

        fn set_auto_reload(&self, timer: usize, value: u16) {
            self.timers.borrow_mut()[timer].auto_reload = value;
        }

        fn auto_reload(&self, timer: usize) -> u16 {
            self.timers.borrow()[timer].auto_reload
        }

        fn set_compare(&self, timer: usize, channel: u8, value: u16) {
            self.timers.borrow_mut()[timer].compare[channel as usize - 1] = value;
        }

        fn compare(&self, timer: usize, channel: u8) -> u16 {
            self.timers.borrow()[timer].compare[channel as usize - 1]
        }

        fn enable_output(&self, timer: usize, channel: u8, complementary: bool) {
            self.timers.borrow_mut()[timer].outputs[channel as usize - 1] = Some(complementary);
        }

        fn disable_output(&self, timer: usize, channel: u8, _complementary: bool) {
            self.timers.borrow_mut()[timer].outputs[channel as usize - 1] = None;
        }

        fn connect(&self, map: &PinMap) {
            let mut connected = self.connected.borrow_mut();
            if let Some(slot) = connected.iter_mut().find(|pin| pin.is_none()) {
                *slot = Some(map.pin);
            }
        }

        fn disconnect(&self, pin: PinName) {
            let mut connected = self.connected.borrow_mut();
            if let Some(slot) = connected.iter_mut().find(|slot| **slot == Some(pin)) {
                *slot = None;
            }
        }

        fn start(&self, timer: usize) {
            self.timers.borrow_mut()[timer].running = true;
        }

        fn stop(&self, timer: usize) {
            self.timers.borrow_mut()[timer].running = false;
        }

        fn generate_update(&self, timer: usize) {
            self.timers.borrow_mut()[timer].updates += 1;
        }
    }

    type TestPwm<'d> = Pwm<'d, MockRegisters, SLOTS>;

    fn timers(family: Family) -> Timers<MockRegisters, SLOTS> {
        Timers::new(MockRegisters::default(), Config::new(family))
    }

    #[test]
    fn function_encoding() {
        let function = pwm_function(3, true);
        assert_eq!(function_channel(function), 3);
        assert!(function_complementary(function));
        assert!(!function_complementary(pwm_function(2, false)));
    }

    #[test]
    fn init_starts_timer_with_default_period() {
        let timers = timers(Family::L4);
        let pwm = TestPwm::init(&timers, PA0).unwrap();
        assert_eq!(pwm.timer(), 1);
        assert_eq!(pwm.channel(), 1);
        let timer = timers.registers().timer(1);
        assert_eq!(timer.prescaler, 79);
        assert_eq!(timer.auto_reload, 19_999);
        assert_eq!(timer.outputs[0], Some(false));
        assert!(timer.running);
        assert!(timer.updates > 0);
        assert!(timers.registers().is_connected(PA0));
        assert_eq!(pwm.read(), 0.0);
        assert_eq!(pwm.read_period_us(), 20_000);
    }

    #[test]
    fn write_sets_compare() {
        let timers = timers(Family::F4);
        let mut pwm = TestPwm::init(&timers, PA0).unwrap();
        pwm.write(0.25);
        assert_eq!(timers.registers().timer(1).compare[0], 5_000);
        assert_eq!(pwm.read(), 0.25);
        assert_eq!(pwm.read_pulsewidth_us(), 5_000);
        pwm.write(1.5);
        assert_eq!(pwm.read(), 1.0);
        pwm.write(-1.0);
        assert_eq!(pwm.read(), 0.0);
    }

    #[test]
    fn period_doubles_prescaler_and_keeps_duty() {
        let timers = timers(Family::F4);
        let mut pwm = TestPwm::init(&timers, PA0).unwrap();
        pwm.write(0.25);
        pwm.period_ms(100);
        let timer = timers.registers().timer(1);
        assert_eq!(timer.prescaler, 159);
        assert_eq!(timer.auto_reload, 49_999);
        assert_eq!(timer.compare[0], 12_500);
        assert_eq!(pwm.read(), 0.25);
        assert_eq!(pwm.read_period_us(), 100_000);
        assert_eq!(pwm.read_pulsewidth_us(), 25_000);
    }

    #[test]
    fn long_period_is_rejected() {
        let timers = timers(Family::L4);
        let mut pwm = TestPwm::init(&timers, PA1).unwrap();
        assert_eq!(
            pwm.try_period_us(40_000_000),
            Err(Error::PeriodOutOfRange {
                period_us: 40_000_000
            })
        );
        assert_eq!(timers.registers().timer(1).auto_reload, 19_999);
        assert_eq!(pwm.read_period_us(), 20_000);
    }

    #[test]
    #[should_panic]
    fn long_period_is_fatal() {
        let timers = timers(Family::L1);
        let mut pwm = TestPwm::init(&timers, PA1).unwrap();
        pwm.period(40.0);
    }

    #[test]
    fn long_period_saturates() {
        let timers = timers(Family::F4);
        let mut pwm = TestPwm::init(&timers, PA1).unwrap();
        pwm.period_us(40_000_000);
        let timer = timers.registers().timer(1);
        assert_eq!(timer.prescaler, 40_959);
        assert_eq!(timer.auto_reload, 0xFFFE);
        assert_eq!(pwm.read_period_us(), 33_553_920);
    }

    #[test]
    fn full_duty_at_longest_period() {
        let timers = timers(Family::F7);
        let mut pwm = TestPwm::init(&timers, PA1).unwrap();
        pwm.period_us(40_000_000);
        pwm.write(1.0);
        let timer = timers.registers().timer(1);
        assert!(timer.compare[1] as u32 > timer.auto_reload as u32);
        assert_eq!(pwm.read(), 1.0);
        assert_eq!(pwm.read_pulsewidth_us(), pwm.read_period_us());
    }

    #[test]
    fn channels_share_the_timer_period() {
        let timers = timers(Family::F4);
        let mut first = TestPwm::init(&timers, PA8).unwrap();
        first.period_us(1_000);
        let mut second = TestPwm::init(&timers, PA9).unwrap();
        assert_eq!(second.read_period_us(), 1_000);
        first.write(0.5);
        second.write(0.25);
        first.period_us(4_000);
        assert_eq!(second.read(), 0.25);
        assert_eq!(second.read_pulsewidth_us(), 1_000);
        assert_eq!(first.read_pulsewidth_us(), 2_000);
    }

    #[test]
    fn complementary_output() {
        let timers = timers(Family::G4);
        let pwm = TestPwm::init(&timers, PB13).unwrap();
        assert_eq!(timers.registers().timer(0).outputs[0], Some(true));
        assert_eq!(
            TestPwm::init(&timers, PA8).err(),
            Some(Error::ChannelInUse { pin: PA8 })
        );
        pwm.free();
        assert_eq!(timers.registers().timer(0).outputs[0], None);
        assert!(TestPwm::init(&timers, PA8).is_ok());
    }

    #[test]
    fn unsupported_pins() {
        let timers = timers(Family::F0);
        for pin in [PA15, PB0, PinName(0x42)] {
            assert_eq!(
                TestPwm::init(&timers, pin).err(),
                Some(Error::UnsupportedPin { pin })
            );
        }
    }

    #[test]
    fn pulsewidth_is_capped_at_period() {
        let timers = timers(Family::F4);
        let mut pwm = TestPwm::init(&timers, PA0).unwrap();
        pwm.pulsewidth_us(1_500);
        assert_eq!(pwm.read_pulsewidth_us(), 1_500);
        assert_eq!(pwm.read(), 0.075);
        pwm.pulsewidth_ms(30);
        assert_eq!(pwm.read_pulsewidth_us(), 20_000);
        assert_eq!(pwm.read(), 1.0);
    }

    #[test]
    fn last_free_stops_timer() {
        let timers = timers(Family::F4);
        let first = TestPwm::init(&timers, PA8).unwrap();
        let second = TestPwm::init(&timers, PA9).unwrap();
        first.free();
        assert!(timers.registers().timer(0).running);
        assert!(!timers.registers().is_connected(PA8));
        second.free();
        assert!(!timers.registers().timer(0).running);
        assert!(!timers.registers().is_connected(PA9));
    }
}
