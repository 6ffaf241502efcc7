//! The channel coordinator.
//!
//! [`Tactile`] owns the configuration and every engine, and is ticked once per
//! pass of the host's polling loop with the newest raw sensor samples. Each
//! tick it
//!
//! 1. applies commands queued since the previous tick,
//! 2. filters the sensors,
//! 3. runs the touch loop or the proximity loop, depending on the input mode,
//! 4. advances volume fades and vibration envelopes,
//! 5. checks the inactivity timeout.
//!
//! All setters take 1-based channel numbers, as used on the command line and
//! in the logs.

use core::str::FromStr;

use heapless::spsc::Queue;
use log::{debug, error, info};

use crate::audio::{AudioPlayer, Player, TrackSource};
use crate::config::{
    ChannelConfig, DeviceConfig, InputMode, InputSource, OutputDest, VibratorType,
    DEFAULT_DEVICE_CONFIG,
};
use crate::error::Error;
use crate::sensor::{Sensors, TouchReport};
use crate::vibrate::{VibrationEngine, VibrationOutput};
use crate::{
    channel_index, channel_number, elapsed, Millis, TouchEdge, TouchStatus, NUM_CHANNELS,
};

/// Queue slots for commands between ticks. One slot is reserved by the queue.
pub const COMMAND_QUEUE_LEN: usize = 16;

/// A request from outside the control loop, applied at the next tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start { channel: i32 },
    Stop { channel: i32 },
    StopAll,
    SetVolume { channel: i32, percent: i32 },
    SetVibrationIntensity { channel: i32, percent: i32 },
}

/// Parse a command line such as `start 2` or `volume 1 40`
impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut words = s.split_whitespace();
        let verb = words.next().ok_or(Error::InvalidCommand)?;
        let mut number = || -> Result<i32, Error> {
            words
                .next()
                .and_then(|w| w.parse().ok())
                .ok_or(Error::InvalidCommand)
        };

        let command = match verb {
            "start" => Command::Start { channel: number()? },
            "stop" => Command::Stop { channel: number()? },
            "stopall" => Command::StopAll,
            "volume" => {
                let channel = number()?;
                Command::SetVolume { channel, percent: number()? }
            }
            "intensity" => {
                let channel = number()?;
                Command::SetVibrationIntensity { channel, percent: number()? }
            }
            _ => return Err(Error::InvalidCommand),
        };
        Ok(command)
    }
}

pub struct Tactile<P, T, V> {
    channels: [ChannelConfig; NUM_CHANNELS],
    device: DeviceConfig,
    sensors: Sensors,
    audio: AudioPlayer<P, T>,
    vibration: VibrationEngine<V>,
    /// Channels claimed by a touch, a proximity crossing or a start command
    playing: [bool; NUM_CHANNELS],
    last_action_time: Millis,
    commands: Queue<Command, COMMAND_QUEUE_LEN>,
}

impl<P: Player, T: TrackSource, V: VibrationOutput> Tactile<P, T, V> {
    /// `seed` initializes the random track selection
    pub fn new(player: P, tracks: T, output: V, seed: u64) -> Self {
        Self {
            channels: core::array::from_fn(ChannelConfig::new),
            device: DEFAULT_DEVICE_CONFIG,
            sensors: Sensors::new(),
            audio: AudioPlayer::new(player, tracks, seed),
            vibration: VibrationEngine::new(output),
            playing: [false; NUM_CHANNELS],
            last_action_time: 0,
            commands: Queue::new(),
        }
    }

    /// Queue a command for the next tick
    pub fn submit(&mut self, command: Command) -> Result<(), Error> {
        self.commands.enqueue(command).map_err(|_| Error::QueueFull)
    }

    /// Run one pass of the control loop.
    ///
    /// raw: newest sample of every sensor, full scale [`crate::ADC_FULL_SCALE`]
    pub fn tick(&mut self, now: Millis, raw: &[u16; NUM_CHANNELS]) {
        self.run_commands(now);
        self.sensors.push(raw, &self.channels, self.device.averaging_strength);

        match self.device.input_mode {
            InputMode::Touch => self.touch_loop(now),
            InputMode::Proximity => self.proximity_loop(now),
        }

        self.audio.do_timer_tasks(now);
        self.vibration.tick(now);
        self.check_inactivity(now);
    }

    fn run_commands(&mut self, now: Millis) {
        while let Some(command) = self.commands.dequeue() {
            debug!("command {:?}", command);
            match command {
                Command::Start { channel } => {
                    let ch = channel_index(channel);
                    if !self.playing[ch] {
                        self.start_channel(ch, now);
                    }
                    self.last_action_time = now;
                }
                Command::Stop { channel } => {
                    let ch = channel_index(channel);
                    if self.playing[ch] {
                        self.stop_channel(ch, now);
                    }
                    self.last_action_time = now;
                }
                Command::StopAll => {
                    self.stop_all();
                }
                Command::SetVolume { channel, percent } => self.set_volume(channel, percent),
                Command::SetVibrationIntensity { channel, percent } => {
                    self.set_vibration_intensity(channel, percent)
                }
            }
        }
    }

    fn touch_loop(&mut self, now: Millis) {
        let report = self.sensors.classify(&self.channels, now);
        // A held sensor is activity too, so holding never times out
        if report.num_touched() > 0 || report.num_changed > 0 {
            self.last_action_time = now;
        }
        if report.num_changed > 0 {
            self.arbitrate(&report, now);
        }

        for ch in 0..NUM_CHANNELS {
            if self.playing[ch] {
                let c = self.channels[ch];
                self.apply_proximity(
                    ch,
                    c.use_proximity_as_volume(),
                    c.proximity_controls_intensity(),
                    c.proximity_controls_speed(),
                );
            }
        }
    }

    /// Releases go first so a channel freed this tick can hand over to a
    /// channel touched in the same tick.
    fn arbitrate(&mut self, report: &TouchReport, now: Millis) {
        for ch in 0..NUM_CHANNELS {
            if report.edges[ch] == TouchEdge::NewRelease && self.playing[ch] {
                self.stop_channel(ch, now);
            }
        }

        if self.device.multi_track {
            for ch in 0..NUM_CHANNELS {
                if report.edges[ch] == TouchEdge::NewTouch && !self.playing[ch] {
                    self.start_channel(ch, now);
                }
            }
        } else if !self.playing.iter().any(|p| *p) {
            // Lowest channel wins
            let eligible = (0..NUM_CHANNELS).find(|&ch| report.status[ch] == TouchStatus::Touched);
            if let Some(ch) = eligible {
                self.start_channel(ch, now);
            }
        }
    }

    fn proximity_loop(&mut self, now: Millis) {
        let follows_sensor = |c: &ChannelConfig| c.use_touch_input && !c.ignore;

        // In single-track mode only the closest sensor is followed; lowest channel on a tie
        let leader = if self.device.multi_track {
            None
        } else {
            let mut best: Option<(usize, f32)> = None;
            for ch in 0..NUM_CHANNELS {
                let p = self.sensors.proximity(ch);
                if follows_sensor(&self.channels[ch]) && best.map_or(true, |(_, b)| p > b) {
                    best = Some((ch, p));
                }
            }
            best.map(|(ch, _)| ch)
        };

        if let Some(leader) = leader {
            for ch in 0..NUM_CHANNELS {
                if ch != leader && self.playing[ch] {
                    self.stop_channel(ch, now);
                    self.last_action_time = now;
                }
            }
        }

        for ch in 0..NUM_CHANNELS {
            let c = self.channels[ch];
            if !follows_sensor(&c) || leader.is_some_and(|l| l != ch) {
                continue;
            }

            let p = self.sensors.proximity(ch);
            if p >= c.touch_threshold() {
                self.last_action_time = now;
                if !self.playing[ch] {
                    self.start_channel(ch, now);
                }
            } else if p < c.release_threshold() && self.playing[ch] {
                self.stop_channel(ch, now);
                self.last_action_time = now;
            }

            if self.playing[ch] {
                let speed = c.proximity_controls_speed();
                self.apply_proximity(ch, true, !speed, speed);
            }
        }
    }

    fn apply_proximity(&mut self, ch: usize, volume: bool, intensity: bool, speed: bool) {
        let p = self.sensors.proximity(ch);
        let percent = (p + 0.5) as i32;
        if volume {
            self.audio.set_volume(ch, percent);
        }
        if intensity {
            self.vibration.set_intensity(ch, percent);
        }
        if speed {
            let multiplier = self.channels[ch].speed_for_proximity(p);
            self.vibration.set_speed_multiplier(ch, multiplier);
        }
    }

    fn start_channel(&mut self, ch: usize, now: Millis) {
        let c = self.channels[ch];
        info!("{}: start", channel_number(ch));

        if c.use_audio_output {
            if c.continue_track_mode && self.audio.is_paused(ch) {
                self.audio.resume_track(ch, now);
            } else {
                if !c.continue_track_mode {
                    self.audio.cancel_fades(ch);
                }
                if let Err(e) = self.audio.start_track(ch, now) {
                    error!("{}", e);
                }
            }
        }
        if c.use_vibration_output {
            if let Err(e) = self.vibration.start(ch, now) {
                error!("{}", e);
            }
        }
        self.playing[ch] = true;
    }

    fn stop_channel(&mut self, ch: usize, now: Millis) {
        let c = self.channels[ch];
        info!("{}: stop", channel_number(ch));

        if c.use_audio_output {
            if c.continue_track_mode && self.audio.is_playing(ch) {
                self.audio.pause_track(ch, now);
            } else {
                self.audio.stop_track(ch, now);
            }
        }
        if self.vibration.is_playing(ch) {
            self.vibration.stop(ch);
        }
        self.playing[ch] = false;
    }

    /// Stop every channel at once, without fades, and forget paused positions.
    ///
    /// Returns the number of channels that had anything to stop.
    pub fn stop_all(&mut self) -> usize {
        let active = (0..NUM_CHANNELS)
            .filter(|&ch| {
                self.playing[ch] || self.audio.is_playing(ch) || self.vibration.is_playing(ch)
            })
            .count();
        if active == 0 {
            return 0;
        }

        self.audio.cancel_all();
        for ch in 0..NUM_CHANNELS {
            if self.vibration.is_playing(ch) {
                self.vibration.stop(ch);
            }
            self.playing[ch] = false;
        }
        info!("stopped {} channels", active);
        active
    }

    fn check_inactivity(&mut self, now: Millis) {
        let timeout = self.device.restart_timeout_ms;
        if timeout == 0 || elapsed(now, self.last_action_time) <= timeout {
            return;
        }
        if self.stop_all() > 0 {
            info!("inactivity timeout after {} ms", timeout);
        }
        self.last_action_time = now;
    }

    fn sync_fade_times(&mut self, ch: usize) {
        let c = &self.channels[ch];
        self.audio.set_fade_times(ch, c.fade_in_ms(), c.fade_out_ms());
    }

    // Whole device

    pub fn set_multi_track_mode(&mut self, on: bool) {
        self.device.multi_track = on;
    }

    pub fn set_input_mode(&mut self, mode: InputMode) {
        debug!("input mode {:?}", mode);
        self.device.input_mode = mode;
    }

    /// Reset every channel after this many seconds without a touch. 0 disables.
    pub fn set_inactivity_timeout(&mut self, seconds: i32) {
        self.device.set_inactivity_timeout(seconds);
    }

    pub fn set_averaging_strength(&mut self, samples: i32) {
        self.device.set_averaging_strength(samples);
    }

    // Sensing

    pub fn set_touch_release_thresholds(&mut self, channel: i32, touch: f32, release: f32) {
        self.channels[channel_index(channel)].set_thresholds(touch, release);
    }

    pub fn set_all_touch_release_thresholds(&mut self, touch: f32, release: f32) {
        for channel in 1..=NUM_CHANNELS as i32 {
            self.set_touch_release_thresholds(channel, touch, release);
        }
    }

    pub fn set_proximity_multiplier(&mut self, channel: i32, multiplier: f32) {
        self.channels[channel_index(channel)].set_proximity_multiplier(multiplier);
    }

    pub fn set_ignore(&mut self, channel: i32, on: bool) {
        self.channels[channel_index(channel)].ignore = on;
    }

    pub fn set_input_source(&mut self, channel: i32, source: InputSource) {
        self.channels[channel_index(channel)].set_input_source(source);
    }

    pub fn set_output_destination(&mut self, channel: i32, dest1: OutputDest, dest2: OutputDest) {
        self.channels[channel_index(channel)].set_output_destination(dest1, dest2);
    }

    // Playback modes

    pub fn set_touch_toggle_mode(&mut self, channel: i32, on: bool) {
        self.channels[channel_index(channel)].touch_toggle_mode = on;
    }

    pub fn set_all_touch_toggle_mode(&mut self, on: bool) {
        for channel in 1..=NUM_CHANNELS as i32 {
            self.set_touch_toggle_mode(channel, on);
        }
    }

    pub fn set_continue_track_mode(&mut self, channel: i32, on: bool) {
        self.channels[channel_index(channel)].continue_track_mode = on;
    }

    pub fn set_all_continue_track_mode(&mut self, on: bool) {
        for channel in 1..=NUM_CHANNELS as i32 {
            self.set_continue_track_mode(channel, on);
        }
    }

    pub fn set_loop_mode(&mut self, channel: i32, on: bool) {
        let ch = channel_index(channel);
        self.channels[ch].loop_mode = on;
        self.audio.set_loop_mode(ch, on);
    }

    pub fn set_all_loop_mode(&mut self, on: bool) {
        for channel in 1..=NUM_CHANNELS as i32 {
            self.set_loop_mode(channel, on);
        }
    }

    pub fn set_random_tracks(&mut self, channel: i32, on: bool) {
        let ch = channel_index(channel);
        self.channels[ch].use_random_tracks = on;
        self.audio.set_random_tracks(ch, on);
    }

    pub fn set_all_random_tracks(&mut self, on: bool) {
        for channel in 1..=NUM_CHANNELS as i32 {
            self.set_random_tracks(channel, on);
        }
    }

    // Sound

    pub fn set_volume(&mut self, channel: i32, percent: i32) {
        self.audio.set_volume(channel_index(channel), percent);
    }

    pub fn set_all_volume(&mut self, percent: i32) {
        for channel in 1..=NUM_CHANNELS as i32 {
            self.set_volume(channel, percent);
        }
    }

    pub fn set_fade_in_time(&mut self, channel: i32, ms: i32) -> Result<(), Error> {
        let ch = channel_index(channel);
        self.channels[ch].set_fade_in_ms(ms)?;
        self.sync_fade_times(ch);
        Ok(())
    }

    pub fn set_fade_out_time(&mut self, channel: i32, ms: i32) -> Result<(), Error> {
        let ch = channel_index(channel);
        self.channels[ch].set_fade_out_ms(ms)?;
        self.sync_fade_times(ch);
        Ok(())
    }

    /// Returns the first conflict. Channels without one are still updated.
    pub fn set_all_fade_in_time(&mut self, ms: i32) -> Result<(), Error> {
        let mut result = Ok(());
        for channel in 1..=NUM_CHANNELS as i32 {
            result = result.and(self.set_fade_in_time(channel, ms));
        }
        result
    }

    pub fn set_all_fade_out_time(&mut self, ms: i32) -> Result<(), Error> {
        let mut result = Ok(());
        for channel in 1..=NUM_CHANNELS as i32 {
            result = result.and(self.set_fade_out_time(channel, ms));
        }
        result
    }

    /// Let proximity set the volume while the channel plays. Disables fading.
    pub fn set_proximity_as_volume(&mut self, channel: i32, on: bool) {
        let ch = channel_index(channel);
        self.channels[ch].set_proximity_as_volume(on);
        self.sync_fade_times(ch);
    }

    // Vibration

    pub fn set_vibration_intensity(&mut self, channel: i32, percent: i32) {
        self.vibration.set_intensity(channel_index(channel), percent);
    }

    pub fn set_vibration_envelope(&mut self, channel: i32, name: &str) -> Result<(), Error> {
        self.vibration.set_envelope(channel_index(channel), name)
    }

    /// Load an envelope from its text definition. A `frequency` in the
    /// definition becomes the channel's vibration frequency.
    pub fn set_vibration_envelope_definition(
        &mut self,
        channel: i32,
        name: &str,
        text: &str,
    ) -> Result<(), Error> {
        self.vibration.set_envelope_definition(channel_index(channel), name, text)
    }

    pub fn override_envelope_duration(&mut self, channel: i32, ms: i32) -> Result<(), Error> {
        self.vibration.override_duration(channel_index(channel), ms)
    }

    pub fn override_envelope_repeats(&mut self, channel: i32, repeats: bool) -> Result<(), Error> {
        self.vibration.override_repeats(channel_index(channel), repeats)
    }

    pub fn set_vibration_frequency(&mut self, channel: i32, hz: i32) {
        self.vibration.set_frequency(channel_index(channel), hz);
    }

    pub fn set_vibration_speed(&mut self, channel: i32, percent: i32) {
        self.vibration.set_speed_multiplier(channel_index(channel), percent);
    }

    pub fn set_vibrator_type(&mut self, channel: i32, vibrator_type: VibratorType) {
        let ch = channel_index(channel);
        self.channels[ch].vibrator_type = vibrator_type;
        self.vibration.set_vibrator_type(ch, vibrator_type);
    }

    pub fn set_proximity_controls_intensity(&mut self, channel: i32, on: bool) {
        let ch = channel_index(channel);
        let was_speed = self.channels[ch].proximity_controls_speed();
        self.channels[ch].set_proximity_controls_intensity(on);
        if was_speed && on {
            self.vibration.set_speed_multiplier(ch, 0);
        }
    }

    /// Let proximity scale the envelope speed, up to `multiplier_percent` at
    /// full proximity
    pub fn set_proximity_controls_speed(&mut self, channel: i32, on: bool, multiplier_percent: i32) {
        let ch = channel_index(channel);
        self.channels[ch].set_proximity_controls_speed(on, multiplier_percent);
        if !on {
            self.vibration.set_speed_multiplier(ch, 0);
        }
    }

    // Inspection

    pub fn channel_config(&self, channel: i32) -> &ChannelConfig {
        &self.channels[channel_index(channel)]
    }

    pub fn device_config(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn audio(&self) -> &AudioPlayer<P, T> {
        &self.audio
    }

    pub fn vibration(&self) -> &VibrationEngine<V> {
        &self.vibration
    }

    pub fn is_playing(&self, channel: i32) -> bool {
        self.playing[channel_index(channel)]
    }

    /// Classified status, before toggle processing
    pub fn touch_status(&self, channel: i32) -> TouchStatus {
        self.sensors.status(channel_index(channel))
    }

    pub fn proximity(&self, channel: i32) -> f32 {
        self.sensors.proximity(channel_index(channel))
    }

    pub fn actual_volume(&self, channel: i32) -> u8 {
        self.audio.actual_volume(channel_index(channel))
    }

    pub fn vibration_intensity(&self, channel: i32) -> u8 {
        self.vibration.actual_intensity(channel_index(channel))
    }

    pub fn track_name(&self, channel: i32) -> Option<&str> {
        self.audio.track_name(channel_index(channel))
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::mock::{MockPlayer, MockTracks, MockVibration};

    type TestTactile = Tactile<MockPlayer, MockTracks, MockVibration>;

    const ON: u16 = 1024;
    const OFF: u16 = 0;

    fn with_tracks(tracks: MockTracks) -> TestTactile {
        let mut t = Tactile::new(MockPlayer::default(), tracks, MockVibration::default(), 1);
        // Unfiltered, so each sample classifies immediately
        t.set_averaging_strength(0);
        t
    }

    fn tactile() -> TestTactile {
        with_tracks(MockTracks::default())
    }

    fn player(t: &TestTactile) -> &MockPlayer {
        t.audio().player()
    }

    #[test]
    fn test_single_track_tie_break() {
        let mut t = tactile();
        t.tick(0, &[OFF, OFF, ON, ON]);
        assert!(t.is_playing(3), "lowest touched channel not started");
        assert!(!t.is_playing(4), "two channels started in single-track mode");
        assert_eq!(player(&t).playing[2].as_deref(), Some("T3.WAV"));
        assert_eq!(player(&t).playing[3], None);
        assert!(t.vibration().is_playing(2));
        assert!(!t.vibration().is_playing(3));
    }

    #[test]
    fn test_release_before_touch() {
        let mut t = tactile();
        t.tick(0, &[ON, OFF, OFF, OFF]);
        assert!(t.is_playing(1));

        t.tick(10, &[OFF, ON, OFF, OFF]);
        assert!(!t.is_playing(1));
        assert!(t.is_playing(2), "handover took more than one tick");
        assert_eq!(player(&t).playing[0], None);
        assert_eq!(player(&t).playing[1].as_deref(), Some("T2.WAV"));
        assert_eq!(t.vibration().output().last(0), Some((0, 0)));
    }

    #[test]
    fn test_single_track_waits_for_release() {
        let mut t = tactile();
        t.tick(0, &[ON, OFF, OFF, OFF]);
        t.tick(10, &[ON, ON, OFF, OFF]);
        assert!(!t.is_playing(2), "second channel started while first plays");

        // Channel 2 is still held when channel 1 lets go
        t.tick(20, &[OFF, ON, OFF, OFF]);
        assert!(t.is_playing(2));
    }

    #[test]
    fn test_multi_track() {
        let mut t = tactile();
        t.set_multi_track_mode(true);
        t.tick(0, &[ON, OFF, ON, OFF]);
        assert!(t.is_playing(1) && t.is_playing(3));
        t.tick(10, &[ON, ON, OFF, OFF]);
        assert!(t.is_playing(1) && t.is_playing(2));
        assert!(!t.is_playing(3));
    }

    #[test]
    fn test_toggle_mode() {
        let mut t = tactile();
        t.set_touch_toggle_mode(1, true);
        t.tick(0, &[ON, OFF, OFF, OFF]);
        assert!(t.is_playing(1));
        t.tick(10, &[OFF, OFF, OFF, OFF]);
        assert!(t.is_playing(1), "release stopped a toggled channel");
        t.tick(20, &[ON, OFF, OFF, OFF]);
        assert!(!t.is_playing(1), "second touch did not toggle off");
        t.tick(30, &[OFF, OFF, OFF, OFF]);
        assert!(!t.is_playing(1));
        assert_eq!(player(&t).plays[0], 1);
    }

    #[test]
    fn test_continue_track_mode() {
        let mut t = tactile();
        t.set_continue_track_mode(1, true);
        t.tick(0, &[ON, OFF, OFF, OFF]);
        t.tick(10, &[OFF, OFF, OFF, OFF]);
        assert!(player(&t).paused[0], "release did not pause");
        assert!(t.audio().is_paused(0));

        t.tick(20, &[ON, OFF, OFF, OFF]);
        assert!(player(&t).audible(0));
        assert_eq!(player(&t).plays[0], 1, "track restarted instead of resumed");
        assert_eq!(player(&t).resumes[0], 1);
    }

    #[test]
    fn test_restart_cancels_fade_out() {
        let mut t = tactile();
        t.set_fade_out_time(1, 1000).unwrap();
        t.tick(0, &[ON, OFF, OFF, OFF]);
        assert_eq!(t.actual_volume(1), 100);

        t.tick(100, &[OFF, OFF, OFF, OFF]);
        t.tick(350, &[OFF, OFF, OFF, OFF]);
        assert_eq!(t.actual_volume(1), 75);
        assert!(player(&t).playing[0].is_some(), "stopped before the fade-out ended");

        t.tick(400, &[ON, OFF, OFF, OFF]);
        assert_eq!(player(&t).plays[0], 2);
        assert_eq!(t.actual_volume(1), 100, "restart inherited the fade-out");
    }

    #[test]
    fn test_inactivity_when_idle() {
        let mut t = tactile();
        t.set_inactivity_timeout(1);
        t.tick(0, &[OFF; NUM_CHANNELS]);
        t.tick(5000, &[OFF; NUM_CHANNELS]);
        assert_eq!(player(&t).stops, [0; NUM_CHANNELS], "timeout fired while idle");
        assert!(t.vibration().output().writes.is_empty());
        assert_eq!(t.stop_all(), 0);
    }

    #[test]
    fn test_inactivity_timeout() {
        let mut t = tactile();
        t.set_inactivity_timeout(1);
        t.submit(Command::Start { channel: 1 }).unwrap();
        t.tick(0, &[OFF; NUM_CHANNELS]);
        t.tick(1000, &[OFF; NUM_CHANNELS]);
        assert!(t.is_playing(1), "timeout fired early");

        t.tick(1001, &[OFF; NUM_CHANNELS]);
        assert!(!t.is_playing(1));
        assert_eq!(player(&t).playing[0], None);
        assert!(!t.vibration().is_playing(0));
    }

    #[test]
    fn test_held_channel_survives_timeout() {
        let mut t = tactile();
        t.set_inactivity_timeout(1);
        for now in (0..=3000).step_by(100) {
            t.tick(now, &[ON, OFF, OFF, OFF]);
            assert!(t.is_playing(1), "held channel stopped at {} ms", now);
        }

        // Let go, and the channel stops on release, not on the timeout
        t.tick(3100, &[OFF; NUM_CHANNELS]);
        assert!(!t.is_playing(1));
        assert_eq!(player(&t).stops[0], 1);
    }

    #[test]
    fn test_toggled_channel_times_out() {
        let mut t = tactile();
        t.set_inactivity_timeout(1);
        t.set_touch_toggle_mode(1, true);
        t.tick(0, &[ON, OFF, OFF, OFF]);
        // Letting go leaves the channel toggled on but is no longer activity
        t.tick(100, &[OFF; NUM_CHANNELS]);
        t.tick(1000, &[OFF; NUM_CHANNELS]);
        assert!(t.is_playing(1));

        t.tick(1001, &[OFF; NUM_CHANNELS]);
        assert!(!t.is_playing(1), "toggled-on channel never timed out");
    }

    #[test]
    fn test_threshold_clamp() {
        let mut t = tactile();
        t.set_touch_release_thresholds(1, 150.0, 200.0);
        assert_eq!(t.channel_config(1).touch_threshold(), 100.0);
        assert_eq!(t.channel_config(1).release_threshold(), 99.0);

        t.set_all_touch_release_thresholds(50.0, 20.0);
        assert_eq!(t.channel_config(4).touch_threshold(), 50.0);
        // Out of range channel numbers clamp to the nearest channel
        t.set_touch_release_thresholds(9, 60.0, 10.0);
        assert_eq!(t.channel_config(4).touch_threshold(), 60.0);
    }

    #[test]
    fn test_proximity_as_volume() {
        let mut t = tactile();
        t.set_proximity_as_volume(1, true);
        assert_eq!(
            t.set_fade_in_time(1, 100),
            Err(Error::ProximityVolumeConflict { channel: 1 })
        );

        t.tick(0, &[ON, OFF, OFF, OFF]);
        assert_eq!(t.actual_volume(1), 100);
        // 900 / 1024 is within the hysteresis band
        t.tick(10, &[900, OFF, OFF, OFF]);
        assert!(t.is_playing(1));
        assert_eq!(t.actual_volume(1), 88);
        assert_eq!(player(&t).volume[0], 88);
    }

    #[test]
    fn test_proximity_controls_vibration() {
        let mut t = tactile();
        t.set_proximity_controls_intensity(1, true);
        t.tick(0, &[ON, OFF, OFF, OFF]);
        t.tick(10, &[900, OFF, OFF, OFF]);
        // 88% of the square envelope's full point
        assert_eq!(t.vibration_intensity(1), 113);

        t.set_proximity_controls_speed(1, true, 50);
        assert!(!t.channel_config(1).proximity_controls_intensity());
        t.tick(20, &[ON, OFF, OFF, OFF]);
        assert_eq!(t.vibration().speed_multiplier(0), 50);

        t.set_proximity_controls_speed(1, false, 0);
        assert_eq!(t.vibration().speed_multiplier(0), 0);
    }

    #[test]
    fn test_proximity_mode() {
        let mut t = tactile();
        t.set_input_mode(InputMode::Proximity);
        t.tick(0, &[ON, 500, OFF, OFF]);
        assert!(t.is_playing(1));
        assert!(!t.is_playing(2));
        assert_eq!(t.actual_volume(1), 100);

        t.tick(10, &[800, OFF, OFF, OFF]);
        assert!(t.is_playing(1));
        assert_eq!(t.actual_volume(1), 78);

        t.tick(20, &[100, OFF, OFF, OFF]);
        assert!(!t.is_playing(1));
        assert_eq!(player(&t).playing[0], None);
    }

    #[test]
    fn test_proximity_mode_single_track() {
        let mut t = tactile();
        t.set_input_mode(InputMode::Proximity);
        t.tick(0, &[ON, ON, OFF, OFF]);
        assert!(t.is_playing(1), "tie not given to the lowest channel");
        assert!(!t.is_playing(2), "two channels playing in single-track mode");

        // Channel 2 comes closer than channel 1 and takes over
        t.tick(10, &[700, ON, OFF, OFF]);
        assert!(!t.is_playing(1));
        assert!(t.is_playing(2));
        assert_eq!(player(&t).playing[0], None);
        assert_eq!((1..=4).filter(|&ch| t.is_playing(ch)).count(), 1);

        t.set_multi_track_mode(true);
        t.tick(20, &[ON, ON, OFF, OFF]);
        assert!(t.is_playing(1) && t.is_playing(2));
    }

    #[test]
    fn test_proximity_mode_continue_track() {
        let mut t = tactile();
        t.set_input_mode(InputMode::Proximity);
        t.set_continue_track_mode(1, true);
        t.tick(0, &[ON, OFF, OFF, OFF]);
        t.tick(10, &[100, OFF, OFF, OFF]);
        assert!(!t.is_playing(1));
        assert!(player(&t).paused[0], "dropping below release did not pause");

        t.tick(20, &[ON, OFF, OFF, OFF]);
        assert!(t.is_playing(1));
        assert!(player(&t).audible(0));
        assert_eq!(player(&t).pauses[0], 1);
        assert_eq!(player(&t).resumes[0], 1);
        assert_eq!(player(&t).plays[0], 1, "track restarted instead of resumed");
    }

    #[test]
    fn test_missing_track_keeps_running() {
        let mut tracks = MockTracks::default();
        tracks.names[0] = None;
        let mut t = with_tracks(tracks);

        t.tick(0, &[ON, OFF, OFF, OFF]);
        assert_eq!(player(&t).plays[0], 0);
        assert!(t.vibration().is_playing(0), "vibration skipped because the track is missing");
        t.tick(10, &[OFF, OFF, OFF, OFF]);
        assert!(!t.vibration().is_playing(0));
    }

    #[test]
    fn test_output_destination() {
        let mut t = tactile();
        t.set_output_destination(1, OutputDest::Vibration, OutputDest::None);
        t.set_output_destination(2, OutputDest::Audio, OutputDest::None);
        t.set_multi_track_mode(true);

        t.tick(0, &[ON, ON, OFF, OFF]);
        assert_eq!(player(&t).plays[0], 0);
        assert!(t.vibration().is_playing(0));
        assert_eq!(player(&t).plays[1], 1);
        assert!(!t.vibration().is_playing(1));
    }

    #[test]
    fn test_input_source() {
        let mut t = tactile();
        t.set_input_source(1, InputSource::AudioIn);
        t.set_ignore(2, true);
        t.tick(0, &[ON, ON, OFF, OFF]);
        assert!(!t.is_playing(1));
        assert!(!t.is_playing(2));
        assert_eq!(t.proximity(2), 0.0);
    }

    #[test]
    fn test_commands() {
        let mut t = tactile();
        t.submit(Command::Start { channel: 2 }).unwrap();
        assert!(!t.is_playing(2), "command applied before the tick");
        t.tick(0, &[OFF; NUM_CHANNELS]);
        assert!(t.is_playing(2));

        t.submit(Command::SetVolume { channel: 2, percent: 150 }).unwrap();
        t.submit(Command::SetVibrationIntensity { channel: 2, percent: 50 }).unwrap();
        t.tick(10, &[OFF; NUM_CHANNELS]);
        assert_eq!(t.actual_volume(2), 100);
        assert_eq!(t.vibration_intensity(2), 64);

        t.submit(Command::StopAll).unwrap();
        t.tick(20, &[OFF; NUM_CHANNELS]);
        assert!(!t.is_playing(2));
    }

    #[test]
    fn test_command_queue_full() {
        let mut t = tactile();
        for _ in 0..COMMAND_QUEUE_LEN - 1 {
            t.submit(Command::StopAll).unwrap();
        }
        assert_eq!(t.submit(Command::StopAll), Err(Error::QueueFull));
        t.tick(0, &[OFF; NUM_CHANNELS]);
        assert!(t.submit(Command::StopAll).is_ok());
    }

    #[test]
    fn test_parse_command() {
        assert_eq!("start 2".parse::<Command>(), Ok(Command::Start { channel: 2 }));
        assert_eq!(" stop  4 ".parse::<Command>(), Ok(Command::Stop { channel: 4 }));
        assert_eq!("stopall".parse::<Command>(), Ok(Command::StopAll));
        assert_eq!("volume 1 40".parse::<Command>(), Ok(Command::SetVolume { channel: 1, percent: 40 }));
        assert_eq!(
            "intensity 3 -5".parse::<Command>(),
            Ok(Command::SetVibrationIntensity { channel: 3, percent: -5 })
        );
        assert_eq!("volume 1".parse::<Command>(), Err(Error::InvalidCommand));
        assert_eq!("jump 1".parse::<Command>(), Err(Error::InvalidCommand));
        assert_eq!("".parse::<Command>(), Err(Error::InvalidCommand));
    }

    #[test]
    fn test_envelope_definition_sets_frequency() {
        let mut t = tactile();
        let text = "soundLength: 0.5\nfrequency: 100\nintensities:\n100\n0\n";
        t.set_vibration_envelope_definition(1, "buzz", text).unwrap();
        assert_eq!(t.vibration().period_ms(0), 10);
        assert_eq!(t.vibration().envelope(0).unwrap().msec_per_point(), 250);

        assert!(t.set_vibration_envelope(1, "wobble").is_err());
        t.tick(0, &[ON, OFF, OFF, OFF]);
        assert!(t.is_playing(1));
        assert!(!t.vibration().is_playing(0), "vibration started without an envelope");
    }
}
