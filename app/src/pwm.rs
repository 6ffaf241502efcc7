use crate::hal;
use crate::hal::pac;
use crate::hal::time::Hertz;

use tactile::vibrate::VibrationOutput;

/// Two PWM outputs per vibration channel, driving an H-bridge.
///
/// Channel 1 uses TIM1 CH1/CH2, channel 2 TIM1 CH3/CH4, channel 3 TIM3
/// CH1/CH2 and channel 4 TIM3 CH3/CH4.
pub struct VibrationPwm {
    tim1: pac::TIM1,
    tim3: pac::TIM3,
    arr: u16,
}

impl VibrationPwm {
    pub fn new<T>(tim1: pac::TIM1, tim3: pac::TIM3, rcc: &mut hal::rcc::Rcc, frequency: T) -> Self
    where T: Into<Hertz>
    {
        let mut obj = Self {
            tim1,
            tim3,
            arr: 0,
        };
        obj.arr = obj.configure(frequency, rcc.clocks);
        obj
    }

    fn configure<T>(&mut self, frequency: T, clocks: hal::rcc::Clocks) -> u16
    where T: Into<Hertz>
    {
        let rcc = unsafe { pac::Peripherals::steal().RCC };

        rcc.apb1enr.modify(|_, w| w.tim3en().set_bit());
        rcc.apb1rstr.modify(|_, w| w.tim3rst().set_bit());
        rcc.apb1rstr.modify(|_, w| w.tim3rst().clear_bit());
        rcc.apb2enr.modify(|_, w| w.tim1en().set_bit());
        rcc.apb2rstr.modify(|_, w| w.tim1rst().set_bit());
        rcc.apb2rstr.modify(|_, w| w.tim1rst().clear_bit());

        let frequency = frequency.into().0;
        // If pclk is prescaled from hclk, the frequency fed into the timers is doubled
        let tclk = if clocks.hclk().0 == clocks.pclk().0 {
            clocks.pclk().0
        } else {
            clocks.pclk().0 * 2
        };
        let ticks = tclk / frequency;

        let psc = ((ticks - 1) / (1 << 16)) as u16;
        self.tim1.psc.write(|w| w.psc().bits(psc));
        self.tim3.psc.write(|w| w.psc().bits(psc));

        let arr = (ticks / (psc + 1) as u32) as u16;
        self.tim1.arr.write(|w| w.arr().bits(arr));
        self.tim3.arr.write(|w| w.arr().bits(arr));

        self.tim1.ccmr1_output().modify(|_, w| {
            w.oc1m().pwm_mode1()
            .oc2m().pwm_mode1()
            .oc1pe().enabled()
            .oc2pe().enabled()
        });
        self.tim1.ccmr2_output().modify(|_, w| {
            w.oc3m().pwm_mode1()
            .oc4m().pwm_mode1()
            .oc3pe().enabled()
            .oc4pe().enabled()
        });
        self.tim1.ccer.modify(|_, w| {
            w.cc1e().set_bit()
            .cc2e().set_bit()
            .cc3e().set_bit()
            .cc4e().set_bit()
        });
        self.tim1.bdtr.modify(|_, w| w.moe().enabled());

        self.tim3.ccmr1_output().modify(|_, w| {
            w.oc1m().pwm_mode1()
            .oc2m().pwm_mode1()
            .oc1pe().enabled()
            .oc2pe().enabled()
        });
        self.tim3.ccmr2_output().modify(|_, w| {
            w.oc3m().pwm_mode1()
            .oc4m().pwm_mode1()
            .oc3pe().enabled()
            .oc4pe().enabled()
        });
        self.tim3.ccer.modify(|_, w| {
            w.cc1e().set_bit()
            .cc2e().set_bit()
            .cc3e().set_bit()
            .cc4e().set_bit()
        });

        self.tim1.cr1.modify(|_, w| w.cen().set_bit());
        self.tim3.cr1.modify(|_, w| w.cen().set_bit());

        arr
    }

    /// Scale an 8 bit drive level to the timer's compare range
    fn duty(&self, value: u8) -> u16 {
        (value as u32 * self.arr as u32 / 255) as u16
    }
}

impl VibrationOutput for VibrationPwm {
    fn write(&mut self, channel: usize, pin1: u8, pin2: u8) {
        let (d1, d2) = (self.duty(pin1), self.duty(pin2));
        match channel {
            0 => {
                self.tim1.ccr1.write(|w| w.ccr().bits(d1));
                self.tim1.ccr2.write(|w| w.ccr().bits(d2));
            }
            1 => {
                self.tim1.ccr3.write(|w| w.ccr().bits(d1));
                self.tim1.ccr4.write(|w| w.ccr().bits(d2));
            }
            2 => {
                self.tim3.ccr1.write(|w| w.ccr().bits(d1));
                self.tim3.ccr2.write(|w| w.ccr().bits(d2));
            }
            3 => {
                self.tim3.ccr3.write(|w| w.ccr().bits(d1));
                self.tim3.ccr4.write(|w| w.ccr().bits(d2));
            }
            _ => (),
        }
    }
}
