//! Register backend for the PWM peripherals of the nRF52840.

use crate::nrf52::Registers;
use embassy_nrf::pac;
use embassy_nrf::pac::pwm::vals;
use embassy_nrf::pwm::Prescaler;
use portable_atomic::{AtomicU16, Ordering, compiler_fence};
use pwmout::{PinMap, PinName};

/// Number of PWM instances.
pub const INSTANCES: usize = 4;

/// Longest sequence that [`Registers::play`] accepts, longer sequences are cut off.
pub const MAX_SEQUENCE_LEN: usize = 4;

const PWM: [pac::pwm::Pwm; INSTANCES] = [pac::PWM0, pac::PWM1, pac::PWM2, pac::PWM3];

const PSEL_DISCONNECTED: u32 = 1 << 31;
const PIN_CNF_OUTPUT: u32 = 0b11;
const PIN_CNF_DEFAULT: u32 = 0b10;

fn prescaler(shift: u8) -> Prescaler {
    match shift {
        0 => Prescaler::Div1,
        1 => Prescaler::Div2,
        2 => Prescaler::Div4,
        3 => Prescaler::Div8,
        4 => Prescaler::Div16,
        5 => Prescaler::Div32,
        6 => Prescaler::Div64,
        _ => Prescaler::Div128,
    }
}

fn port(pin: PinName) -> (pac::gpio::Gpio, usize) {
    let port = if pin.0 < 32 { pac::P0 } else { pac::P1 };
    (port, (pin.0 % 32) as usize)
}

/// The PWM0 to PWM3 peripherals of the nRF52840.
///
/// Place the [`PwmBank`](crate::nrf52::PwmBank) in a `static`: the sequence buffers live
/// inside this struct and are read by EasyDMA while a sequence plays.
pub struct Nrf52840Registers {
    pin_map: &'static [PinMap],
    sequences: [[AtomicU16; MAX_SEQUENCE_LEN]; INSTANCES],
}

impl Nrf52840Registers {
    pub const fn new(pin_map: &'static [PinMap]) -> Self {
        Self {
            pin_map,
            sequences: [const { [const { AtomicU16::new(0) }; MAX_SEQUENCE_LEN] }; INSTANCES],
        }
    }
}

impl Registers for Nrf52840Registers {
    fn pin_map(&self) -> &[PinMap] {
        self.pin_map
    }

    fn connect(&self, instance: usize, pin: PinName) {
        let (port, index) = port(pin);
        port.outclr().write(|w| w.0 = 1 << index);
        port.pin_cnf(index).write(|w| w.0 = PIN_CNF_OUTPUT);
        let r = PWM[instance];
        r.psel().out(0).write(|w| w.0 = pin.0);
        r.enable().write(|w| w.set_enable(true));
    }

    fn disconnect(&self, instance: usize) {
        let r = PWM[instance];
        let psel = r.psel().out(0).read().0;
        r.enable().write(|w| w.set_enable(false));
        r.psel().out(0).write(|w| w.0 = PSEL_DISCONNECTED);
        if psel & PSEL_DISCONNECTED == 0 {
            let (port, index) = port(PinName(psel & 0x3F));
            port.pin_cnf(index).write(|w| w.0 = PIN_CNF_DEFAULT);
        }
    }

    fn configure(&self, instance: usize, shift: u8, countertop: u16) {
        let r = PWM[instance];
        r.mode().write(|w| w.set_updown(vals::Updown::UP));
        r.prescaler()
            .write(|w| w.set_prescaler(vals::Prescaler::from_bits(prescaler(shift) as u8)));
        r.countertop().write(|w| w.set_countertop(countertop));
        r.decoder().write(|w| {
            w.set_load(vals::Load::COMMON);
            w.set_mode(vals::Mode::REFRESH_COUNT);
        });
        r.loop_().write(|w| w.set_cnt(vals::LoopCnt::DISABLED));
        r.seq(0).refresh().write(|w| w.0 = 0);
        r.seq(0).enddelay().write(|w| w.0 = 0);
    }

    fn play(&self, instance: usize, sequence: &[u16]) {
        let buffer = &self.sequences[instance];
        let len = sequence.len().min(MAX_SEQUENCE_LEN);
        for (slot, word) in buffer.iter().zip(&sequence[..len]) {
            slot.store(*word, Ordering::Relaxed);
        }
        compiler_fence(Ordering::SeqCst);
        let r = PWM[instance];
        r.seq(0).ptr().write_value(buffer.as_ptr() as u32);
        r.seq(0).cnt().write(|w| w.set_cnt(len as u16));
        r.tasks_seqstart(0).write_value(1);
    }

    fn stop(&self, instance: usize) {
        let r = PWM[instance];
        r.tasks_stop().write_value(1);
    }
}
