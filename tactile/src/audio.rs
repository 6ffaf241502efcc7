//! Track playback on top of the fade engine.
//!
//! The sound hardware and the track storage are reached through the
//! [`Player`] and [`TrackSource`] traits. [`AudioPlayer`] decides which track
//! to play, keeps the pause / resume bookkeeping, restarts looping tracks, and
//! hands every volume change to the [`FadeEngine`].

use log::{debug, error, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::Error;
use crate::fade::{FadeDirection, FadeEngine, PlaybackPhase};
use crate::{channel_number, elapsed, Millis, NUM_CHANNELS};

/// The player doesn't reliably report that it is playing for a few
/// milliseconds after a start.
const END_OF_TRACK_GRACE_MS: Millis = 50;

/// Attempts at picking a random track different from the previous one
const RANDOM_TRACK_TRIES: usize = 30;

/// Per-channel sound output.
///
/// A paused track still counts as playing. Resuming a track that is not
/// paused must be harmless.
pub trait Player {
    fn play(&mut self, channel: usize, name: &str);
    fn pause(&mut self, channel: usize);
    fn resume(&mut self, channel: usize);
    fn stop(&mut self, channel: usize);
    fn is_playing(&self, channel: usize) -> bool;
    /// Volume in percent, [0, 100]
    fn set_volume(&mut self, channel: usize, percent: u8);
}

/// Track storage. Indices are only stable between enumerations.
pub trait TrackSource {
    /// The channel's own track
    fn track_name(&self, channel: usize) -> Option<&str>;
    /// A track from the channel's directory of random tracks
    fn track_name_at(&self, channel: usize, index: usize) -> Option<&str>;
    fn num_files(&self, channel: usize) -> usize;
}

pub struct AudioPlayer<P, T> {
    player: P,
    tracks: T,
    fade: FadeEngine,
    loop_mode: [bool; NUM_CHANNELS],
    random_tracks: [bool; NUM_CHANNELS],
    last_random_track: [Option<usize>; NUM_CHANNELS],
    rng: SmallRng,
}

impl<P: Player, T: TrackSource> AudioPlayer<P, T> {
    pub fn new(player: P, tracks: T, seed: u64) -> Self {
        Self {
            player,
            tracks,
            fade: FadeEngine::new(),
            loop_mode: [false; NUM_CHANNELS],
            random_tracks: [false; NUM_CHANNELS],
            last_random_track: [None; NUM_CHANNELS],
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    pub fn tracks(&self) -> &T {
        &self.tracks
    }

    pub fn fade(&self) -> &FadeEngine {
        &self.fade
    }

    pub fn track_name(&self, ch: usize) -> Option<&str> {
        self.tracks.track_name(ch)
    }

    pub fn set_volume(&mut self, ch: usize, percent: i32) {
        self.fade.set_volume(ch, percent, &mut self.player);
    }

    pub fn set_fade_times(&mut self, ch: usize, fade_in_ms: u32, fade_out_ms: u32) {
        self.fade.set_fade_times(ch, fade_in_ms, fade_out_ms);
    }

    pub fn set_loop_mode(&mut self, ch: usize, on: bool) {
        self.loop_mode[ch] = on;
    }

    pub fn set_random_tracks(&mut self, ch: usize, on: bool) {
        self.random_tracks[ch] = on;
    }

    pub fn is_playing(&self, ch: usize) -> bool {
        self.player.is_playing(ch)
    }

    pub fn is_paused(&self, ch: usize) -> bool {
        self.fade.is_paused(ch)
    }

    pub fn actual_volume(&self, ch: usize) -> u8 {
        self.fade.state(ch).actual_volume
    }

    /// Start the channel's track from the beginning
    pub fn start_track(&mut self, ch: usize, now: Millis) -> Result<(), Error> {
        if self.random_tracks[ch] {
            self.start_random_track(ch)?;
        } else {
            let name = self.tracks.track_name(ch).ok_or(Error::NoTrack {
                channel: channel_number(ch),
            })?;
            self.player.play(ch, name);
            debug!("{}: start track {}", channel_number(ch), name);
        }
        self.fade.set_paused(ch, false);
        self.fade.start_fade(ch, FadeDirection::In, now, &mut self.player);
        Ok(())
    }

    fn start_random_track(&mut self, ch: usize) -> Result<(), Error> {
        let missing = Error::NoTrack { channel: channel_number(ch) };
        let num_files = self.tracks.num_files(ch);
        if num_files == 0 {
            return Err(missing);
        }

        // Avoid replaying the last random track
        let mut index = self.rng.gen_range(0..num_files);
        for _ in 0..RANDOM_TRACK_TRIES {
            if num_files == 1 || Some(index) != self.last_random_track[ch] {
                break;
            }
            index = self.rng.gen_range(0..num_files);
        }
        self.last_random_track[ch] = Some(index);

        let name = self.tracks.track_name_at(ch, index).ok_or(missing)?;
        self.player.play(ch, name);
        debug!("{}: start random track {} ({})", channel_number(ch), name, index);
        Ok(())
    }

    /// Stop the track. With a fade-out, the player stops when the ramp ends.
    pub fn stop_track(&mut self, ch: usize, now: Millis) {
        self.fade.set_paused(ch, false);
        if !self.fade.start_fade(ch, FadeDirection::Out, now, &mut self.player) {
            self.player.stop(ch);
        }
        debug!("{}: stop", channel_number(ch));
    }

    /// Pause the track so it can be resumed where it left off
    pub fn pause_track(&mut self, ch: usize, now: Millis) {
        self.fade.set_paused(ch, true);
        if !self.fade.start_fade(ch, FadeDirection::Out, now, &mut self.player) {
            self.player.pause(ch);
        }
        debug!("{}: pause", channel_number(ch));
    }

    pub fn resume_track(&mut self, ch: usize, now: Millis) {
        self.player.resume(ch);
        self.fade.set_paused(ch, false);
        self.fade.start_fade(ch, FadeDirection::In, now, &mut self.player);
        debug!("{}: resume", channel_number(ch));
    }

    pub fn cancel_fades(&mut self, ch: usize) {
        self.fade.cancel_fades(ch, &mut self.player);
    }

    /// Stop every playing or paused track, forgetting pause positions.
    ///
    /// Returns the number of channels that were stopped.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for ch in 0..NUM_CHANNELS {
            if self.player.is_playing(ch) {
                self.player.stop(ch);
                cancelled += 1;
            }
            self.fade.set_paused(ch, false);
            self.fade.cancel_fades(ch, &mut self.player);
        }
        cancelled
    }

    /// Run the volume ramps and notice tracks that reached their end
    pub fn do_timer_tasks(&mut self, now: Millis) {
        self.fade.tick(now, &mut self.player);

        for ch in 0..NUM_CHANNELS {
            let PlaybackPhase::Started { at } = self.fade.state(ch).phase else {
                continue;
            };
            if elapsed(now, at) <= END_OF_TRACK_GRACE_MS || self.player.is_playing(ch) {
                continue;
            }
            if self.loop_mode[ch] {
                info!("{}: end of track, looping", channel_number(ch));
                if let Err(e) = self.start_track(ch, now) {
                    error!("{}", e);
                    self.fade.track_ended(ch);
                }
            } else {
                info!("{}: end of track", channel_number(ch));
                self.fade.track_ended(ch);
            }
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::mock::{MockPlayer, MockTracks};

    fn audio() -> AudioPlayer<MockPlayer, MockTracks> {
        AudioPlayer::new(MockPlayer::default(), MockTracks::default(), 7)
    }

    #[test]
    fn test_start_stop() {
        let mut a = audio();
        a.start_track(1, 0).unwrap();
        assert_eq!(a.player().playing[1].as_deref(), Some("T2.WAV"));
        assert_eq!(a.actual_volume(1), 100);

        a.stop_track(1, 10);
        assert!(!a.is_playing(1));
        assert_eq!(a.actual_volume(1), 0);
    }

    #[test]
    fn test_missing_track_is_noop() {
        let mut a = audio();
        a.tracks.names[2] = None;
        assert_eq!(a.start_track(2, 0), Err(Error::NoTrack { channel: 3 }));
        assert!(!a.is_playing(2));
        assert_eq!(a.fade().state(2).phase, PlaybackPhase::Idle, "missing track left state armed");
    }

    #[test]
    fn test_pause_resume() {
        let mut a = audio();
        a.start_track(0, 0).unwrap();
        a.pause_track(0, 100);
        assert!(a.is_paused(0));
        assert!(a.player().paused[0]);

        a.resume_track(0, 200);
        assert!(!a.is_paused(0));
        assert!(a.player().audible(0));
        assert_eq!(a.player().plays[0], 1, "resume restarted the track");
    }

    #[test]
    fn test_resume_during_fade_out() {
        let mut a = audio();
        a.set_fade_times(0, 1000, 1000);
        a.set_volume(0, 100);
        a.start_track(0, 0).unwrap();
        a.do_timer_tasks(1000);
        assert_eq!(a.actual_volume(0), 100);

        a.pause_track(0, 2000);
        a.do_timer_tasks(2500);
        assert_eq!(a.actual_volume(0), 50);
        assert!(!a.player().paused[0], "paused before fade-out finished");

        a.resume_track(0, 2600);
        a.do_timer_tasks(2600);
        assert_eq!(a.actual_volume(0), 50, "resume reset the volume");
        a.do_timer_tasks(3100);
        assert_eq!(a.actual_volume(0), 100);
    }

    #[test]
    fn test_end_of_track_and_loop() {
        let mut a = audio();
        a.start_track(0, 0).unwrap();
        a.player_mut().finish(0);

        // Within the grace period nothing happens
        a.do_timer_tasks(40);
        assert_eq!(a.fade().state(0).phase, PlaybackPhase::Started { at: 0 });

        a.do_timer_tasks(60);
        assert_eq!(a.fade().state(0).phase, PlaybackPhase::Idle);
        assert_eq!(a.player().plays[0], 1);

        a.set_loop_mode(0, true);
        a.start_track(0, 100).unwrap();
        a.player_mut().finish(0);
        a.do_timer_tasks(200);
        assert_eq!(a.player().plays[0], 3, "looping track not restarted");
        assert!(a.is_playing(0));
    }

    #[test]
    fn test_random_track_avoids_repeat() {
        let mut a = audio();
        a.tracks.directory = vec!["A.WAV", "B.WAV", "C.WAV"];
        a.set_random_tracks(3, true);

        let mut last: Option<String> = None;
        for i in 0..20 {
            a.start_track(3, i * 10).unwrap();
            let name = a.player().playing[3].clone();
            assert!(name.is_some());
            assert_ne!(name, last, "random track repeated");
            last = name;
        }
    }

    #[test]
    fn test_random_track_empty_directory() {
        let mut a = audio();
        a.set_random_tracks(0, true);
        assert!(a.start_track(0, 0).is_err());
        assert!(!a.is_playing(0));
    }

    #[test]
    fn test_cancel_all() {
        let mut a = audio();
        assert_eq!(a.cancel_all(), 0, "nothing playing, nothing to cancel");

        a.start_track(0, 0).unwrap();
        a.start_track(2, 0).unwrap();
        a.pause_track(2, 10);
        assert_eq!(a.cancel_all(), 2);
        assert!(!a.is_paused(2), "pause position survived cancel");
        assert_eq!(a.cancel_all(), 0);
    }
}
