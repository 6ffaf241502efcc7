//! Time based volume ramps.
//!
//! Each channel has a target volume and an actual volume. Starting or resuming
//! a track ramps the actual volume up to the target over the fade-in time;
//! stopping or pausing ramps it down to zero over the fade-out time, and only
//! then is the player physically stopped or paused.
//!
//! A ramp that begins part way, because it interrupts a ramp in the other
//! direction, runs for a proportionally shorter time. That effective duration
//! is captured when the ramp starts, and the elapsed time is pushed forward by
//! the difference so the interpolation carries on from the current volume.

use log::{debug, trace};

use crate::audio::Player;
use crate::{channel_number, elapsed, Millis, NUM_CHANNELS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeDirection {
    In,
    Out,
}

/// Start / stop bookkeeping for one channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackPhase {
    /// Nothing in flight
    Idle,
    /// Started or resumed at the given time
    Started { at: Millis },
    /// Stop or pause requested at the given time
    Stopped { at: Millis },
}

#[derive(Clone, Copy, Debug)]
pub struct PlaybackFadeState {
    pub target_volume: u8,
    pub actual_volume: u8,
    pub phase: PlaybackPhase,
    /// Effective duration of the fade-in currently in flight
    pub this_fade_in_ms: u32,
    /// Effective duration of the fade-out currently in flight
    pub this_fade_out_ms: u32,
    pub is_paused: bool,
}

impl PlaybackFadeState {
    const fn new() -> Self {
        Self {
            target_volume: 100,
            actual_volume: 0,
            phase: PlaybackPhase::Idle,
            this_fade_in_ms: 0,
            this_fade_out_ms: 0,
            is_paused: false,
        }
    }
}

pub struct FadeEngine {
    states: [PlaybackFadeState; NUM_CHANNELS],
    fade_in_ms: [u32; NUM_CHANNELS],
    fade_out_ms: [u32; NUM_CHANNELS],
}

impl Default for FadeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FadeEngine {
    pub const fn new() -> Self {
        Self {
            states: [PlaybackFadeState::new(); NUM_CHANNELS],
            fade_in_ms: [0; NUM_CHANNELS],
            fade_out_ms: [0; NUM_CHANNELS],
        }
    }

    pub fn state(&self, ch: usize) -> &PlaybackFadeState {
        &self.states[ch]
    }

    pub fn set_fade_times(&mut self, ch: usize, fade_in_ms: u32, fade_out_ms: u32) {
        self.fade_in_ms[ch] = fade_in_ms;
        self.fade_out_ms[ch] = fade_out_ms;
    }

    pub fn is_paused(&self, ch: usize) -> bool {
        self.states[ch].is_paused
    }

    pub fn set_paused(&mut self, ch: usize, paused: bool) {
        self.states[ch].is_paused = paused;
    }

    /// Set the target volume in percent. Without a fade-in it applies at once.
    pub fn set_volume<P: Player>(&mut self, ch: usize, percent: i32, player: &mut P) {
        let percent = clamp_percent(percent);
        self.states[ch].target_volume = percent;
        if self.fade_in_ms[ch] == 0 {
            self.set_actual(ch, percent, player);
        }
    }

    fn set_actual<P: Player>(&mut self, ch: usize, percent: u8, player: &mut P) {
        self.states[ch].actual_volume = percent;
        player.set_volume(ch, percent);
    }

    /// Duration of a ramp from the current actual volume, in the given direction
    pub fn effective_fade_ms(&self, ch: usize, direction: FadeDirection) -> u32 {
        let s = &self.states[ch];
        let target = s.target_volume as u64;
        if target == 0 {
            return 0;
        }
        let actual = (s.actual_volume as u64).min(target);
        let (configured, delta) = match direction {
            FadeDirection::In => (self.fade_in_ms[ch], target - actual),
            FadeDirection::Out => (self.fade_out_ms[ch], actual),
        };
        (configured as u64 * delta / target) as u32
    }

    /// Begin a ramp for a start / resume (`In`) or a stop / pause (`Out`).
    ///
    /// Returns false when fading is disabled in that direction. The volume has
    /// then been applied immediately, and for `Out` the caller must stop or
    /// pause the player itself.
    pub fn start_fade<P: Player>(
        &mut self,
        ch: usize,
        direction: FadeDirection,
        now: Millis,
        player: &mut P,
    ) -> bool {
        match direction {
            FadeDirection::In => {
                self.states[ch].phase = PlaybackPhase::Started { at: now };
                if self.fade_in_ms[ch] == 0 {
                    let target = self.states[ch].target_volume;
                    self.set_actual(ch, target, player);
                    return false;
                }
                self.states[ch].this_fade_in_ms = self.effective_fade_ms(ch, FadeDirection::In);
            }
            FadeDirection::Out => {
                self.states[ch].phase = PlaybackPhase::Stopped { at: now };
                if self.fade_out_ms[ch] == 0 {
                    self.set_actual(ch, 0, player);
                    return false;
                }
                self.states[ch].this_fade_out_ms = self.effective_fade_ms(ch, FadeDirection::Out);
            }
        }
        true
    }

    /// Drop any ramp in flight and silence the channel
    pub fn cancel_fades<P: Player>(&mut self, ch: usize, player: &mut P) {
        self.states[ch].phase = PlaybackPhase::Idle;
        self.set_actual(ch, 0, player);
    }

    /// Mark a track that reached its end as idle
    pub fn track_ended(&mut self, ch: usize) {
        self.states[ch].phase = PlaybackPhase::Idle;
    }

    /// Advance every channel's ramp. Call once per loop tick.
    pub fn tick<P: Player>(&mut self, now: Millis, player: &mut P) {
        for ch in 0..NUM_CHANNELS {
            self.tick_channel(ch, now, player);
        }
    }

    fn tick_channel<P: Player>(&mut self, ch: usize, now: Millis, player: &mut P) {
        let s = self.states[ch];
        let target = s.target_volume as u64;
        let actual = s.actual_volume as u64;
        let fade_in = self.fade_in_ms[ch];
        let fade_out = self.fade_out_ms[ch];

        match s.phase {
            PlaybackPhase::Started { at }
                if fade_in != 0 && actual < target && player.is_playing(ch) =>
            {
                // A shorter effective time means this ramp took over part way
                let t = elapsed(now, at) as u64 + fade_in.saturating_sub(s.this_fade_in_ms) as u64;
                let volume = (target * t / fade_in as u64).min(target);
                if volume > actual {
                    trace!("{}: fade-in, volume {}", channel_number(ch), volume);
                    self.set_actual(ch, volume as u8, player);
                }
            }
            PlaybackPhase::Stopped { at }
                if fade_out != 0 && actual > 0 && player.is_playing(ch) =>
            {
                let t = elapsed(now, at) as u64 + fade_out.saturating_sub(s.this_fade_out_ms) as u64;
                let volume = target.saturating_sub(target * t / fade_out as u64);
                if volume < actual {
                    trace!("{}: fade-out, volume {}", channel_number(ch), volume);
                    self.set_actual(ch, volume as u8, player);

                    // The stop or pause only takes effect once the ramp is done
                    if volume == 0 {
                        if s.is_paused {
                            player.pause(ch);
                            debug!("{}: fade-out done, track paused", channel_number(ch));
                        } else {
                            player.stop(ch);
                            debug!("{}: fade-out done, track stopped", channel_number(ch));
                        }
                        self.states[ch].phase = PlaybackPhase::Idle;
                    }
                }
            }
            PlaybackPhase::Stopped { .. } if !player.is_playing(ch) => {
                // The track ended on its own during the fade-out
                debug!("{}: track ended during fade-out", channel_number(ch));
                self.states[ch].phase = PlaybackPhase::Idle;
            }
            _ => (),
        }
    }
}

pub(crate) fn clamp_percent(percent: i32) -> u8 {
    if percent != percent.clamp(0, 100) {
        debug!("percent {} out of range", percent);
    }
    percent.clamp(0, 100) as u8
}
