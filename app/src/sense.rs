use log::info;
use tactile::{ADC_FULL_SCALE, NUM_CHANNELS};

pub struct SenseConfig {
    /// Samples discarded after power up, while the electrodes settle
    pub calibration_delay: u16,
    /// Samples averaged into the untouched reference
    pub calibration_samples: u16,
    /// Drop in charge transfer count that reads as full proximity
    pub full_scale_counts: u16,
}

#[derive(Clone, Copy, Debug)]
enum SenseState {
    Startup(u16),
    Calibrate(u16),
    Ready,
}

/// Converts TSC charge transfer counts into raw proximity readings, relative
/// to a reference taken at startup
pub struct Baseline<'a> {
    reference: [u32; NUM_CHANNELS],
    state: SenseState,
    config: &'a SenseConfig,
}

impl<'a> Baseline<'a> {
    pub fn new(config: &'a SenseConfig) -> Self {
        Self {
            reference: [0; NUM_CHANNELS],
            state: SenseState::Startup(config.calibration_delay),
            config,
        }
    }

    /// Process a new set of counts. Returns None until calibration is done.
    pub fn push(&mut self, counts: [u16; NUM_CHANNELS]) -> Option<[u16; NUM_CHANNELS]> {
        match self.state {
            SenseState::Startup(counter) => {
                self.state = if counter == 0 {
                    SenseState::Calibrate(self.config.calibration_samples)
                } else {
                    SenseState::Startup(counter - 1)
                };
                None
            }
            SenseState::Calibrate(counter) => {
                for i in 0..NUM_CHANNELS {
                    self.reference[i] += counts[i] as u32;
                }
                if counter <= 1 {
                    let n = self.config.calibration_samples.max(1) as u32;
                    for r in self.reference.iter_mut() {
                        *r /= n;
                    }
                    info!("sensor reference {:?}", self.reference);
                    self.state = SenseState::Ready;
                } else {
                    self.state = SenseState::Calibrate(counter - 1);
                }
                None
            }
            SenseState::Ready => Some(core::array::from_fn(|i| self.proximity(i, counts[i]))),
        }
    }

    fn proximity(&self, i: usize, count: u16) -> u16 {
        // More capacitance on the electrode means fewer transfers to fill the sample cap
        let delta = self.reference[i].saturating_sub(count as u32);
        let scaled = delta * ADC_FULL_SCALE as u32 / self.config.full_scale_counts.max(1) as u32;
        scaled.min(ADC_FULL_SCALE as u32) as u16
    }
}
