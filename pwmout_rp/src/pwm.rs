use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use pwmout::duty::{US_PER_SECOND, clamp_duty, duty_to_ticks, ticks_to_duty, us_to_cycles};
use pwmout::pool::ChannelPool;
use pwmout::util::{debug, warn};
use pwmout::{DEFAULT_PERIOD_US, Error, PinMap, PinName, PwmOut, Target};

const SLICES: usize = 8;
const GPIO_COUNT: usize = 30;
// TOP stays below 0xFFFF so that a compare value of TOP + 1 (always high) fits into CC.
const MAX_COUNTS: u64 = 0xFFFF;

/// Smallest clock divider (1.0) in 8.4 fixed point.
pub const MIN_DIVIDER: u16 = 0x010;

/// Largest clock divider (255 + 15/16) in 8.4 fixed point.
pub const MAX_DIVIDER: u16 = 0xFFF;

/// Converts a clock divider to the 8.4 fixed-point format of the DIV register.
///
/// Rounds to the nearest sixteenth and clamps to [`MIN_DIVIDER`]..=[`MAX_DIVIDER`].
pub fn divider_to_fixed(divider: f32) -> u16 {
    if divider.is_nan() {
        return MIN_DIVIDER;
    }
    let fixed = divider * 16.0 + 0.5;
    if fixed <= MIN_DIVIDER as f32 {
        MIN_DIVIDER
    } else if fixed >= MAX_DIVIDER as f32 {
        MAX_DIVIDER
    } else {
        fixed as u16
    }
}

/// A channel of a PWM slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    A,
    B,
}

impl Channel {
    fn from_function(function: u32) -> Self {
        if function & 1 == 0 { Self::A } else { Self::B }
    }

    fn sibling(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

const fn pin_map() -> [PinMap; GPIO_COUNT + 1] {
    let mut map = [PinMap::END; GPIO_COUNT + 1];
    let mut pin = 0;
    while pin < GPIO_COUNT {
        let slice = (pin >> 1) & 7;
        map[pin] = PinMap::new(PinName(pin as u32), slice as u32, (pin & 1) as u32);
        pin += 1;
    }
    map
}

/// The PWM capable pins of the RP2040.
///
/// `peripheral` is the slice and `function` the channel (0 for A, 1 for B).
pub static PIN_MAP: [PinMap; GPIO_COUNT + 1] = pin_map();

/// Register access to the PWM slices.
pub trait Registers {
    /// Returns the pin table of the board, usually [`PIN_MAP`].
    fn pin_map(&self) -> &[PinMap] {
        &PIN_MAP
    }

    /// Writes the DIV register (8.4 fixed point).
    fn set_divider(&self, slice: usize, divider: u16);

    fn divider(&self, slice: usize) -> u16;

    fn set_top(&self, slice: usize, top: u16);

    fn top(&self, slice: usize) -> u16;

    fn set_compare(&self, slice: usize, channel: Channel, value: u16);

    fn compare(&self, slice: usize, channel: Channel) -> u16;

    /// Sets the EN bit of the slice's CSR register.
    fn set_enabled(&self, slice: usize, enabled: bool);

    /// Selects the PWM function for `pin` in the IO bank, or the null function.
    fn set_pin_function(&self, pin: PinName, pwm: bool);
}

/// Configuration of the PWM slices.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Frequency of `clk_sys`.
    pub clock_hz: u32,
    /// The period of a newly initialised slice.
    pub default_period_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clock_hz: 125_000_000,
            default_period_us: DEFAULT_PERIOD_US,
        }
    }
}

impl Config {
    /// Creates a configuration for the current frequency of `clk_sys`.
    #[cfg(feature = "rp2040")]
    pub fn from_clocks() -> Self {
        Self {
            clock_hz: embassy_rp::clocks::clk_sys_freq(),
            ..Self::default()
        }
    }
}

/// The PWM slices of the RP2040.
pub struct Slices<R> {
    registers: R,
    config: Config,
    pool: ChannelPool<{ SLICES * 2 }>,
    percent: Mutex<CriticalSectionRawMutex, RefCell<[f32; SLICES * 2]>>,
}

impl<R: Registers> Slices<R> {
    pub const fn new(registers: R, config: Config) -> Self {
        Self {
            registers,
            config,
            pool: ChannelPool::new(),
            percent: Mutex::new(RefCell::new([0.0; SLICES * 2])),
        }
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    fn cycles_to_ticks(&self, cycles: u64, divider: u16) -> u64 {
        (cycles * 16 + divider as u64 / 2) / divider as u64
    }

    fn ticks_to_us(&self, ticks: u64, divider: u16) -> u32 {
        let scale = self.config.clock_hz as u64 * 16;
        ((ticks * divider as u64 * US_PER_SECOND + scale / 2) / scale) as u32
    }

    fn set_percent(&self, slot: usize, percent: f32) {
        self.percent
            .lock(|values| values.borrow_mut()[slot] = percent);
    }

    fn percent(&self, slot: usize) -> f32 {
        self.percent.lock(|values| values.borrow()[slot])
    }

    /// Sets the period of `slice` and rescales the compare values of its open channels.
    fn set_period(&self, slice: usize, us: u32) {
        let cycles = us_to_cycles(us, self.config.clock_hz).max(1);
        let mut divider = divider_to_fixed(cycles as f32 / MAX_COUNTS as f32);
        while divider < MAX_DIVIDER && cycles * 16 > MAX_COUNTS * divider as u64 {
            divider += 1;
        }
        if cycles * 16 > MAX_COUNTS * divider as u64 {
            warn!(
                "PWM period of {} us is too long, using the longest supported period",
                us
            );
        }
        let counts = self.cycles_to_ticks(cycles, divider).clamp(1, MAX_COUNTS);
        let top = (counts - 1) as u16;
        debug!("pwm slice {}: div={} top={}", slice, divider, top);
        self.registers.set_divider(slice, divider);
        self.registers.set_top(slice, top);
        for channel in [Channel::A, Channel::B] {
            let slot = slice * 2 + channel.index();
            if self.pool.is_taken(slot) {
                let compare = duty_to_ticks(self.percent(slot), counts as u32);
                self.registers.set_compare(slice, channel, compare as u16);
            }
        }
    }
}

/// A PWM output on one channel of a slice.
pub struct Pwm<'d, R> {
    slices: &'d Slices<R>,
    pin: PinName,
    slice: usize,
    channel: Channel,
}

impl<R: Registers> Pwm<'_, R> {
    fn slot(&self) -> usize {
        self.slice * 2 + self.channel.index()
    }

    fn counts(&self) -> u32 {
        self.slices.registers.top(self.slice) as u32 + 1
    }

    pub fn slice(&self) -> usize {
        self.slice
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl<R: Registers> PwmOut for Pwm<'_, R> {
    fn write(&mut self, percent: f32) {
        let percent = clamp_duty(percent);
        self.slices.set_percent(self.slot(), percent);
        let compare = duty_to_ticks(percent, self.counts());
        self.slices
            .registers
            .set_compare(self.slice, self.channel, compare as u16);
    }

    fn read(&self) -> f32 {
        self.slices.percent(self.slot())
    }

    fn period_us(&mut self, us: u32) {
        self.slices.set_period(self.slice, us);
    }

    fn read_period_us(&self) -> u32 {
        let divider = self.slices.registers.divider(self.slice);
        self.slices.ticks_to_us(self.counts() as u64, divider)
    }

    fn pulsewidth_us(&mut self, us: u32) {
        let divider = self.slices.registers.divider(self.slice);
        let counts = self.counts();
        let cycles = us_to_cycles(us, self.slices.config.clock_hz);
        let compare = self
            .slices
            .cycles_to_ticks(cycles, divider)
            .min(counts as u64) as u32;
        self.slices
            .set_percent(self.slot(), ticks_to_duty(compare, counts));
        self.slices
            .registers
            .set_compare(self.slice, self.channel, compare as u16);
    }

    fn read_pulsewidth_us(&self) -> u32 {
        let divider = self.slices.registers.divider(self.slice);
        let compare = self.slices.registers.compare(self.slice, self.channel);
        self.slices.ticks_to_us(compare as u64, divider)
    }
}

impl<'d, R: Registers + 'd> Target<'d> for Pwm<'d, R> {
    type Peripherals = Slices<R>;

    fn pinmap(slices: &'d Self::Peripherals) -> &'d [PinMap] {
        slices.registers.pin_map()
    }

    fn init_direct(slices: &'d Self::Peripherals, map: &PinMap) -> Result<Self, Error> {
        let slice = map.peripheral as usize;
        if slice >= SLICES {
            return Err(Error::UnsupportedPin { pin: map.pin });
        }
        let channel = Channel::from_function(map.function);
        let pwm = Self {
            slices,
            pin: map.pin,
            slice,
            channel,
        };
        if !slices.pool.acquire_index(pwm.slot()) {
            return Err(Error::ChannelInUse { pin: map.pin });
        }
        debug!("pwm slice {} channel {} claimed for pin {}", slice, channel, map.pin);
        slices.set_percent(pwm.slot(), 0.0);
        slices.registers.set_compare(slice, channel, 0);
        let sibling = slice * 2 + channel.sibling().index();
        if !slices.pool.is_taken(sibling) {
            slices.set_period(slice, slices.config.default_period_us);
            slices.registers.set_enabled(slice, true);
        }
        slices.registers.set_pin_function(map.pin, true);
        Ok(pwm)
    }

    fn free(self) {
        self.slices
            .registers
            .set_compare(self.slice, self.channel, 0);
        self.slices.registers.set_pin_function(self.pin, false);
        let sibling = self.slice * 2 + self.channel.sibling().index();
        if !self.slices.pool.is_taken(sibling) {
            self.slices.registers.set_enabled(self.slice, false);
        }
        self.slices.pool.release(self.slot());
    }
}
