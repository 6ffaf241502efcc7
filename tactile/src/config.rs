//! Per-channel and whole-device configuration.
//!
//! Every setter clamps its input into range and keeps the cross-field
//! invariants: release threshold below touch threshold, proximity-as-volume
//! excluding fades, and proximity controlling either intensity or speed but
//! never both.

use log::{debug, warn};

use crate::channel_number;
use crate::error::Error;

/// Where a channel's sensor input comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSource {
    None,
    Touch,
    /// Sound level of an external audio input. Not classified by the touch loop.
    AudioIn,
}

/// Which actuator a channel drives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputDest {
    None,
    Audio,
    Vibration,
}

/// Vibration actuator construction, which selects the carrier waveform
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VibratorType {
    /// Eccentric mass motor, driven with constant polarity
    Motor,
    /// Linear resonant actuator, driven with an alternating square wave
    Linear,
}

/// How sensor readings are turned into actions, for the whole device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    /// Discrete touch / release edges start and stop channels
    Touch,
    /// Proximity continuously controls volume or vibration
    Proximity,
}

/// Settings shared by all channels
#[derive(Clone, Copy, Debug)]
pub struct DeviceConfig {
    /// Allow several channels to play at once
    pub multi_track: bool,
    pub input_mode: InputMode,
    /// Idle time after which every channel is reset. Zero disables the timeout.
    pub restart_timeout_ms: u32,
    /// Strength of the proximity low-pass filter, in samples. Zero disables it.
    pub averaging_strength: u16,
}

impl DeviceConfig {
    const fn default() -> Self {
        Self {
            multi_track: false,
            input_mode: InputMode::Touch,
            restart_timeout_ms: 0,
            averaging_strength: 200,
        }
    }

    pub fn set_inactivity_timeout(&mut self, seconds: i32) {
        let seconds = if seconds < 0 { 0 } else { seconds as u32 };
        self.restart_timeout_ms = seconds.saturating_mul(1000);
        debug!("inactivity timeout: {} ms", self.restart_timeout_ms);
    }

    pub fn set_averaging_strength(&mut self, samples: i32) {
        self.averaging_strength = samples.clamp(0, u16::MAX as i32) as u16;
        debug!("averaging strength: {}", self.averaging_strength);
    }
}

pub const DEFAULT_DEVICE_CONFIG: DeviceConfig = DeviceConfig::default();

pub const DEFAULT_TOUCH_THRESHOLD: f32 = 95.0;
pub const DEFAULT_RELEASE_THRESHOLD: f32 = 65.0;

/// Configuration of one sensor / actuator channel
#[derive(Clone, Copy, Debug)]
pub struct ChannelConfig {
    index: usize,

    pub use_audio_output: bool,
    pub use_vibration_output: bool,
    pub use_touch_input: bool,
    /// Sensor forced to zero, i.e. always released
    pub ignore: bool,
    /// Each touch toggles on / off instead of touch-to-hold
    pub touch_toggle_mode: bool,
    /// Release pauses the track, the next touch resumes it
    pub continue_track_mode: bool,
    /// Restart the track when it reaches its end
    pub loop_mode: bool,
    /// Pick a random track from the channel's directory
    pub use_random_tracks: bool,
    pub vibrator_type: VibratorType,

    touch_threshold: f32,
    release_threshold: f32,
    fade_in_ms: u32,
    fade_out_ms: u32,
    use_proximity_as_volume: bool,
    proximity_multiplier: f32,
    speed_multiplier_percent: i32,
    proximity_controls_intensity: bool,
    proximity_controls_speed: bool,
}

impl ChannelConfig {
    pub const fn new(index: usize) -> Self {
        Self {
            index,
            use_audio_output: true,
            use_vibration_output: true,
            use_touch_input: true,
            ignore: false,
            touch_toggle_mode: false,
            continue_track_mode: false,
            loop_mode: false,
            use_random_tracks: false,
            vibrator_type: VibratorType::Motor,
            touch_threshold: DEFAULT_TOUCH_THRESHOLD,
            release_threshold: DEFAULT_RELEASE_THRESHOLD,
            fade_in_ms: 0,
            fade_out_ms: 0,
            use_proximity_as_volume: false,
            proximity_multiplier: 1.0,
            speed_multiplier_percent: 100,
            proximity_controls_intensity: false,
            proximity_controls_speed: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn touch_threshold(&self) -> f32 {
        self.touch_threshold
    }

    pub fn release_threshold(&self) -> f32 {
        self.release_threshold
    }

    pub fn fade_in_ms(&self) -> u32 {
        self.fade_in_ms
    }

    pub fn fade_out_ms(&self) -> u32 {
        self.fade_out_ms
    }

    pub fn use_proximity_as_volume(&self) -> bool {
        self.use_proximity_as_volume
    }

    pub fn proximity_multiplier(&self) -> f32 {
        self.proximity_multiplier
    }

    pub fn speed_multiplier_percent(&self) -> i32 {
        self.speed_multiplier_percent
    }

    pub fn proximity_controls_intensity(&self) -> bool {
        self.proximity_controls_intensity
    }

    pub fn proximity_controls_speed(&self) -> bool {
        self.proximity_controls_speed
    }

    /// Set the hysteresis band, in percent.
    ///
    /// Touch is clamped to [1, 100]; release is clamped to [0, touch - 1].
    pub fn set_thresholds(&mut self, touch: f32, release: f32) {
        let touch = if touch > 100.0 {
            100.0
        } else if touch >= 1.0 {
            touch
        } else {
            // Also catches NaN
            1.0
        };
        let release = if release >= touch {
            touch - 1.0
        } else if release >= 0.0 {
            release
        } else {
            0.0
        };
        self.touch_threshold = touch;
        self.release_threshold = release;
        debug!(
            "{}: touch threshold {}, release threshold {}",
            channel_number(self.index),
            touch,
            release
        );
    }

    pub fn set_output_destination(&mut self, dest1: OutputDest, dest2: OutputDest) {
        self.use_audio_output = dest1 == OutputDest::Audio || dest2 == OutputDest::Audio;
        self.use_vibration_output =
            dest1 == OutputDest::Vibration || dest2 == OutputDest::Vibration;
    }

    pub fn set_input_source(&mut self, source: InputSource) {
        self.use_touch_input = source == InputSource::Touch;
    }

    pub fn set_fade_in_ms(&mut self, ms: i32) -> Result<(), Error> {
        self.fade_in_ms = self.checked_fade_time(ms)?;
        debug!("{}: fade-in {} ms", channel_number(self.index), self.fade_in_ms);
        Ok(())
    }

    pub fn set_fade_out_ms(&mut self, ms: i32) -> Result<(), Error> {
        self.fade_out_ms = self.checked_fade_time(ms)?;
        debug!("{}: fade-out {} ms", channel_number(self.index), self.fade_out_ms);
        Ok(())
    }

    fn checked_fade_time(&self, ms: i32) -> Result<u32, Error> {
        if ms > 0 && self.use_proximity_as_volume {
            warn!(
                "{}: proximity-as-volume is incompatible with fading, fade time ignored",
                channel_number(self.index)
            );
            return Err(Error::ProximityVolumeConflict {
                channel: channel_number(self.index),
            });
        }
        Ok(if ms < 0 { 0 } else { ms as u32 })
    }

    /// Let proximity control the volume. Turning this on disables fading.
    pub fn set_proximity_as_volume(&mut self, on: bool) {
        self.use_proximity_as_volume = on;
        if on {
            self.fade_in_ms = 0;
            self.fade_out_ms = 0;
        }
    }

    /// Gain applied to the filtered reading. 1.0 is no amplification.
    pub fn set_proximity_multiplier(&mut self, m: f32) {
        self.proximity_multiplier = if m >= 0.0 { m } else { 0.0 };
    }

    pub fn set_proximity_controls_intensity(&mut self, on: bool) {
        self.proximity_controls_intensity = on;
        if on {
            self.proximity_controls_speed = false;
            self.speed_multiplier_percent = 100;
        }
    }

    /// Let proximity speed up (or slow down) the vibration envelope.
    ///
    /// `multiplier_percent` is the speedup at full proximity: 50 plays the
    /// envelope up to 1.5x as fast, -50 down to half speed, -100 stops it.
    pub fn set_proximity_controls_speed(&mut self, on: bool, multiplier_percent: i32) {
        if on {
            self.proximity_controls_intensity = false;
            self.proximity_controls_speed = true;
            self.speed_multiplier_percent = multiplier_percent.clamp(-100, 1000);
        } else {
            self.proximity_controls_speed = false;
            self.speed_multiplier_percent = 100;
        }
    }

    /// Engine speed multiplier for the given proximity percentage
    pub fn speed_for_proximity(&self, proximity: f32) -> i32 {
        let speed = self.speed_multiplier_percent as f32 / 100.0 * proximity;
        if speed >= 0.0 {
            (speed + 0.5) as i32
        } else {
            (speed - 0.5) as i32
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn test_threshold_clamps() {
        let mut c = ChannelConfig::new(0);

        c.set_thresholds(150.0, 200.0);
        assert_eq!(c.touch_threshold(), 100.0);
        assert_eq!(c.release_threshold(), 99.0);

        c.set_thresholds(-5.0, -1.0);
        assert_eq!(c.touch_threshold(), 1.0);
        assert_eq!(c.release_threshold(), 0.0);

        c.set_thresholds(80.0, 40.0);
        assert_eq!(c.touch_threshold(), 80.0);
        assert_eq!(c.release_threshold(), 40.0);
        assert!(c.release_threshold() < c.touch_threshold());
    }

    #[test]
    fn test_fade_conflicts_with_proximity_volume() {
        let mut c = ChannelConfig::new(2);
        c.set_fade_in_ms(500).unwrap();
        c.set_fade_out_ms(-10).unwrap();
        assert_eq!(c.fade_in_ms(), 500);
        assert_eq!(c.fade_out_ms(), 0, "negative fade time not clamped");

        c.set_proximity_as_volume(true);
        assert_eq!(c.fade_in_ms(), 0, "proximity-as-volume must zero fade times");

        assert_eq!(
            c.set_fade_out_ms(300),
            Err(Error::ProximityVolumeConflict { channel: 3 })
        );
        assert_eq!(c.fade_out_ms(), 0, "rejected setter changed state");

        // Zero does not conflict
        assert!(c.set_fade_in_ms(0).is_ok());
    }

    #[test]
    fn test_intensity_and_speed_exclusive() {
        let mut c = ChannelConfig::new(0);
        c.set_proximity_controls_speed(true, 50);
        assert!(c.proximity_controls_speed());
        assert_eq!(c.speed_multiplier_percent(), 50);

        c.set_proximity_controls_intensity(true);
        assert!(c.proximity_controls_intensity());
        assert!(!c.proximity_controls_speed());
        assert_eq!(c.speed_multiplier_percent(), 100);

        c.set_proximity_controls_speed(true, 5000);
        assert!(!c.proximity_controls_intensity());
        assert_eq!(c.speed_multiplier_percent(), 1000);
    }

    #[test]
    fn test_speed_for_proximity() {
        let mut c = ChannelConfig::new(0);
        c.set_proximity_controls_speed(true, 50);
        assert_eq!(c.speed_for_proximity(100.0), 50);
        assert_eq!(c.speed_for_proximity(33.0), 17);

        c.set_proximity_controls_speed(true, -100);
        assert_eq!(c.speed_for_proximity(100.0), -100);
    }

    #[test]
    fn test_output_destination() {
        let mut c = ChannelConfig::new(0);
        c.set_output_destination(OutputDest::Vibration, OutputDest::None);
        assert!(!c.use_audio_output);
        assert!(c.use_vibration_output);
        c.set_output_destination(OutputDest::Audio, OutputDest::Vibration);
        assert!(c.use_audio_output && c.use_vibration_output);
    }

    #[test]
    fn test_device_config() {
        let mut d = DEFAULT_DEVICE_CONFIG;
        d.set_inactivity_timeout(30);
        assert_eq!(d.restart_timeout_ms, 30_000);
        d.set_inactivity_timeout(-1);
        assert_eq!(d.restart_timeout_ms, 0);
        d.set_averaging_strength(-4);
        assert_eq!(d.averaging_strength, 0);
    }
}
