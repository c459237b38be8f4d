//! Register backend for the PWM slices of the RP2040.

use crate::pwm::{Channel, Registers};
use embassy_rp::pac;
use pwmout::PinName;

const FUNCSEL_PWM: u8 = 4;
const FUNCSEL_NULL: u8 = 0x1F;

/// The PWM block and IO bank 0 of the RP2040.
pub struct Rp2040Registers;

impl Registers for Rp2040Registers {
    fn set_divider(&self, slice: usize, divider: u16) {
        pac::PWM.ch(slice).div().write(|w| {
            w.set_int((divider >> 4) as u8);
            w.set_frac((divider & 0xF) as u8);
        });
    }

    fn divider(&self, slice: usize) -> u16 {
        let div = pac::PWM.ch(slice).div().read();
        (div.int() as u16) << 4 | div.frac() as u16
    }

    fn set_top(&self, slice: usize, top: u16) {
        pac::PWM.ch(slice).top().write(|w| w.set_top(top));
    }

    fn top(&self, slice: usize) -> u16 {
        pac::PWM.ch(slice).top().read().top()
    }

    fn set_compare(&self, slice: usize, channel: Channel, value: u16) {
        pac::PWM.ch(slice).cc().modify(|w| match channel {
            Channel::A => w.set_a(value),
            Channel::B => w.set_b(value),
        });
    }

    fn compare(&self, slice: usize, channel: Channel) -> u16 {
        let cc = pac::PWM.ch(slice).cc().read();
        match channel {
            Channel::A => cc.a(),
            Channel::B => cc.b(),
        }
    }

    fn set_enabled(&self, slice: usize, enabled: bool) {
        pac::PWM.ch(slice).csr().modify(|w| w.set_en(enabled));
    }

    fn set_pin_function(&self, pin: PinName, pwm: bool) {
        let funcsel = if pwm { FUNCSEL_PWM } else { FUNCSEL_NULL };
        pac::IO_BANK0
            .gpio(pin.0 as usize)
            .ctrl()
            .write(|w| w.set_funcsel(funcsel));
    }
}
