#![no_main]
#![no_std]

use core::sync::atomic::{AtomicU32, Ordering};
use cortex_m_rt::{entry, exception};
use heapless::String;
use log::{info, warn};
use panic_halt as _;

use stm32f0xx_hal as hal;

use tactile::audio::{Player, TrackSource};
use tactile::config::OutputDest;
use tactile::{Command, Tactile, NUM_CHANNELS};

use crate::hal::pac;
use crate::hal::pac::interrupt;
use crate::hal::prelude::*;
use crate::hal::tsc::Tsc;
use crate::hal::rcc::Rcc;

use sense::{Baseline, SenseConfig};

mod pwm;
mod sense;
mod serial;

#[derive(Clone, Copy, Debug)]
struct TscSample {
    group: u8,
    sample: u8,
    channel: u8,
}

struct TouchSensing {
    tsc: Tsc,
    max_count: u16,
}

impl TouchSensing {
    pub fn new(tsc: pac::TSC, rcc: &mut Rcc) -> Self {
        let config = hal::tsc::Config {
            clock_prescale: None,
            max_count: Some(hal::tsc::MaxCount::U8191),
            charge_transfer_high: None,
            charge_transfer_low: None,
        };
        Self {
            tsc: Tsc::tsc(tsc, rcc, Some(config)),
            max_count: 8191,
        }
    }

    /// Acquire every electrode in one pass. Each must be in its own group.
    ///
    /// A group that doesn't finish before max count reads as `max_count + 1`.
    pub fn sample<const N: usize>(&mut self, electrodes: &[TscSample; N]) -> [u16; N] {
        // The HAL has no way to select several groups at once, so go to the registers
        let regs = unsafe { pac::Peripherals::steal().TSC };

        let mut iogcsr: u32 = 0;
        let mut ioscr: u32 = 0;
        let mut ioccr: u32 = 0;
        for e in electrodes {
            let io = (e.group - 1) * 4;
            iogcsr |= 1 << (e.group - 1);
            ioscr |= 1 << (io + e.sample - 1);
            ioccr |= 1 << (io + e.channel - 1);
        }
        regs.iogcsr.write(|w| unsafe { w.bits(iogcsr) });
        regs.ioscr.write(|w| unsafe { w.bits(ioscr) });
        regs.ioccr.write(|w| unsafe { w.bits(ioccr) });

        self.tsc.acquire().ok();

        let group_status = regs.iogcsr.read().bits() >> 16;
        let mut counts = [self.max_count + 1; N];
        for (count, e) in counts.iter_mut().zip(electrodes) {
            if group_status & (1 << (e.group - 1)) != 0 {
                *count = self.tsc.read_unchecked(e.group);
            }
        }
        counts
    }
}

/// Electrodes in channel order, one per TSC group so they sample together
static ELECTRODES: [TscSample; NUM_CHANNELS] = [
    TscSample { group: 1, sample: 2, channel: 1 }, // PA0, cap PA1
    TscSample { group: 2, sample: 2, channel: 1 }, // PA4, cap PA5
    TscSample { group: 5, sample: 2, channel: 1 }, // PB3, cap PB4
    TscSample { group: 6, sample: 2, channel: 1 }, // PB11, cap PB12
];

static SENSE_CONFIG: SenseConfig = SenseConfig {
    calibration_delay: 50,
    calibration_samples: 32,
    full_scale_counts: 400,
};

const SAMPLE_PERIOD_MS: u32 = 2;
const INACTIVITY_TIMEOUT_S: i32 = 120;

static TIME: AtomicU32 = AtomicU32::new(0);

/// This board has vibration outputs only. No track is ever found, and the
/// channels are configured not to ask for one.
struct NoAudio;

impl Player for NoAudio {
    fn play(&mut self, _channel: usize, _name: &str) {}
    fn pause(&mut self, _channel: usize) {}
    fn resume(&mut self, _channel: usize) {}
    fn stop(&mut self, _channel: usize) {}
    fn is_playing(&self, _channel: usize) -> bool {
        false
    }
    fn set_volume(&mut self, _channel: usize, _percent: u8) {}
}

impl TrackSource for NoAudio {
    fn track_name(&self, _channel: usize) -> Option<&str> {
        None
    }
    fn track_name_at(&self, _channel: usize, _index: usize) -> Option<&str> {
        None
    }
    fn num_files(&self, _channel: usize) -> usize {
        0
    }
}

/// Collect serial bytes into lines and queue the parsed commands
fn read_commands<P, T, V>(line: &mut String<32>, tactile: &mut Tactile<P, T, V>)
where
    P: Player,
    T: TrackSource,
    V: tactile::vibrate::VibrationOutput,
{
    while let Some(b) = serial::uart1::read_byte() {
        match b {
            b'\r' | b'\n' => {
                if line.is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        if let Err(e) = tactile.submit(command) {
                            warn!("{}: {}", line, e);
                        }
                    }
                    Err(e) => warn!("{}: {}", line, e),
                }
                line.clear();
            }
            _ => {
                if line.push(b as char).is_err() {
                    warn!("command line too long");
                    line.clear();
                }
            }
        }
    }
}

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();
    let cp = cortex_m::Peripherals::take().unwrap();

    let mut flash = dp.FLASH;
    let mut rcc = dp.RCC.configure().sysclk(48.mhz()).freeze(&mut flash);
    let gpioa = dp.GPIOA.split(&mut rcc);
    let gpiob = dp.GPIOB.split(&mut rcc);

    // A library requiring a critical section to set a gpio AF register is bad and I just won't.
    let fake_cs = unsafe { cortex_m::interrupt::CriticalSection::new() };

    // Touch electrodes and sample caps
    let _e1 = gpioa.pa0.into_alternate_af3(&fake_cs);
    let _e2 = gpioa.pa4.into_alternate_af3(&fake_cs);
    let _e3 = gpiob.pb3.into_alternate_af3(&fake_cs);
    let _e4 = gpiob.pb11.into_alternate_af3(&fake_cs);
    let _g1_cap = gpioa.pa1.into_alternate_af3(&fake_cs);
    let _g2_cap = gpioa.pa5.into_alternate_af3(&fake_cs);
    let _g5_cap = gpiob.pb4.into_alternate_af3(&fake_cs);
    let _g6_cap = gpiob.pb12.into_alternate_af3(&fake_cs);

    // Vibration H-bridge inputs
    let _v1_in1 = gpioa.pa8.into_alternate_af2(&fake_cs);
    let _v1_in2 = gpioa.pa9.into_alternate_af2(&fake_cs);
    let _v2_in1 = gpioa.pa10.into_alternate_af2(&fake_cs);
    let _v2_in2 = gpioa.pa11.into_alternate_af2(&fake_cs);
    let _v3_in1 = gpioa.pa6.into_alternate_af1(&fake_cs);
    let _v3_in2 = gpioa.pa7.into_alternate_af1(&fake_cs);
    let _v4_in1 = gpiob.pb0.into_alternate_af1(&fake_cs);
    let _v4_in2 = gpiob.pb1.into_alternate_af1(&fake_cs);

    let tx_pin = gpiob.pb6.into_alternate_af0(&fake_cs);
    let rx_pin = gpiob.pb7.into_alternate_af0(&fake_cs);
    let uart = hal::serial::Serial::usart1(dp.USART1, (tx_pin, rx_pin), 115200.bps(), &mut rcc);
    serial::uart1::init(uart, 4);
    serial::logger::init();

    let mut touch = TouchSensing::new(dp.TSC, &mut rcc);
    let mut baseline = Baseline::new(&SENSE_CONFIG);
    let vibration = pwm::VibrationPwm::new(dp.TIM1, dp.TIM3, &mut rcc, 20.khz());

    let mut syst = hal::timers::Timer::syst(cp.SYST, 1000.hz(), &mut rcc);
    syst.listen(&hal::timers::Event::TimeOut);

    // Untouched electrode noise is as good a seed as this board has
    let seed = touch
        .sample(&ELECTRODES)
        .iter()
        .fold(0u64, |acc, &c| acc << 16 | c as u64);

    let mut tactile = Tactile::new(NoAudio, NoAudio, vibration, seed);
    for channel in 1..=NUM_CHANNELS as i32 {
        tactile.set_output_destination(channel, OutputDest::Vibration, OutputDest::None);
    }
    tactile.set_inactivity_timeout(INACTIVITY_TIMEOUT_S);
    info!("tactile started, {} channels", NUM_CHANNELS);

    let mut line: String<32> = String::new();
    let mut last_sample = 0;

    loop {
        read_commands(&mut line, &mut tactile);

        let time = TIME.load(Ordering::Relaxed);
        if time.wrapping_sub(last_sample) < SAMPLE_PERIOD_MS {
            continue;
        }
        last_sample = time;

        let counts = touch.sample(&ELECTRODES);
        if let Some(raw) = baseline.push(counts) {
            tactile.tick(time, &raw);
        }
    }
}

#[exception]
fn SysTick() {
    let time = TIME.load(Ordering::Relaxed);
    TIME.store(time.wrapping_add(1), Ordering::Relaxed);
}
