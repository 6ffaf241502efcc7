//! Recording stand-ins for the hardware collaborators, used by the unit tests

use crate::audio::{Player, TrackSource};
use crate::vibrate::VibrationOutput;
use crate::NUM_CHANNELS;

#[derive(Default)]
pub struct MockPlayer {
    pub playing: [Option<String>; NUM_CHANNELS],
    pub paused: [bool; NUM_CHANNELS],
    pub volume: [u8; NUM_CHANNELS],
    pub plays: [usize; NUM_CHANNELS],
    pub stops: [usize; NUM_CHANNELS],
    pub pauses: [usize; NUM_CHANNELS],
    pub resumes: [usize; NUM_CHANNELS],
}

impl MockPlayer {
    /// Simulate the track reaching its end
    pub fn finish(&mut self, channel: usize) {
        self.playing[channel] = None;
        self.paused[channel] = false;
    }

    /// Playing and not paused
    pub fn audible(&self, channel: usize) -> bool {
        self.playing[channel].is_some() && !self.paused[channel]
    }
}

impl Player for MockPlayer {
    fn play(&mut self, channel: usize, name: &str) {
        self.playing[channel] = Some(name.to_string());
        self.paused[channel] = false;
        self.plays[channel] += 1;
    }

    fn pause(&mut self, channel: usize) {
        self.paused[channel] = true;
        self.pauses[channel] += 1;
    }

    fn resume(&mut self, channel: usize) {
        self.paused[channel] = false;
        self.resumes[channel] += 1;
    }

    fn stop(&mut self, channel: usize) {
        self.playing[channel] = None;
        self.paused[channel] = false;
        self.stops[channel] += 1;
    }

    fn is_playing(&self, channel: usize) -> bool {
        self.playing[channel].is_some()
    }

    fn set_volume(&mut self, channel: usize, percent: u8) {
        self.volume[channel] = percent;
    }
}

/// Track names per channel, plus a directory of random tracks
pub struct MockTracks {
    pub names: [Option<&'static str>; NUM_CHANNELS],
    pub directory: Vec<&'static str>,
}

impl Default for MockTracks {
    fn default() -> Self {
        Self {
            names: [Some("T1.WAV"), Some("T2.WAV"), Some("T3.WAV"), Some("T4.WAV")],
            directory: Vec::new(),
        }
    }
}

impl TrackSource for MockTracks {
    fn track_name(&self, channel: usize) -> Option<&str> {
        self.names[channel]
    }

    fn track_name_at(&self, _channel: usize, index: usize) -> Option<&str> {
        self.directory.get(index).copied()
    }

    fn num_files(&self, _channel: usize) -> usize {
        self.directory.len()
    }
}

#[derive(Default)]
pub struct MockVibration {
    /// Every write, in order
    pub writes: Vec<(usize, u8, u8)>,
}

impl MockVibration {
    /// Most recent pin values written to a channel
    pub fn last(&self, channel: usize) -> Option<(u8, u8)> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.0 == channel)
            .map(|w| (w.1, w.2))
    }
}

impl VibrationOutput for MockVibration {
    fn write(&mut self, channel: usize, pin1: u8, pin2: u8) {
        self.writes.push((channel, pin1, pin2));
    }
}
