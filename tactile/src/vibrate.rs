//! Vibration envelope playback and carrier generation.
//!
//! While a channel is playing, its envelope advances one point every
//! `msec_per_point` milliseconds (scaled by the speed multiplier) and wraps
//! around at the end. The point's intensity is multiplied by the channel's
//! overall intensity to give the output magnitude.
//!
//! A motor vibrator is driven with that magnitude at constant polarity. A
//! linear vibrator needs an alternating drive, so the two pins swap polarity
//! every half period of the vibration frequency, independently of the
//! envelope's point rate.

use log::{debug, error};

use crate::config::VibratorType;
use crate::envelope::VibrationEnvelope;
use crate::error::Error;
use crate::fade::clamp_percent;
use crate::{channel_number, elapsed, Millis, NUM_CHANNELS};

pub const DEFAULT_VIBRATION_FREQUENCY: i32 = 180;
pub const MIN_VIBRATION_FREQUENCY: i32 = 20;
pub const MAX_VIBRATION_FREQUENCY: i32 = 400;
pub const DEFAULT_ENVELOPE: &str = "square";

/// Largest actual intensity; envelope point and overall intensity both at 100%
pub const MAX_ACTUAL_INTENSITY: u8 = 128;

/// Raw two-pin drive for each vibration channel. Zero on both pins is off.
pub trait VibrationOutput {
    fn write(&mut self, channel: usize, pin1: u8, pin2: u8);
}

/// Runtime state of one channel's envelope playback
#[derive(Clone, Copy, Debug, Default)]
pub struct VibrationPlaybackState {
    pub is_playing: bool,
    pub index_in_envelope: usize,
    pub start_time_for_point: Millis,
    pub start_time_for_carrier_cycle: Millis,
    /// true for the first half of the carrier cycle
    pub carrier_polarity: bool,
    pub actual_intensity: u8,
}

struct ChannelVibration {
    envelope: Option<VibrationEnvelope>,
    vibrator_type: VibratorType,
    period_ms: u32,
    intensity: u8,
    speed_multiplier_percent: i32,
    state: VibrationPlaybackState,
    last_write: Option<(u8, u8)>,
}

impl ChannelVibration {
    fn new() -> Self {
        Self {
            envelope: VibrationEnvelope::builtin(DEFAULT_ENVELOPE).ok(),
            vibrator_type: VibratorType::Motor,
            period_ms: period_for(DEFAULT_VIBRATION_FREQUENCY),
            intensity: 100,
            speed_multiplier_percent: 0,
            state: VibrationPlaybackState::default(),
            last_write: None,
        }
    }

    fn current_point(&self) -> u8 {
        self.envelope
            .as_ref()
            .map(|e| e.point(self.state.index_in_envelope))
            .unwrap_or(0)
    }

    /// Combine an envelope point with the overall intensity, both in percent
    fn actual_intensity(&self, point: u8) -> u8 {
        let product = point as u32 * self.intensity as u32 * MAX_ACTUAL_INTENSITY as u32;
        ((product + 5000) / 10000) as u8
    }

    fn pins(&self) -> (u8, u8) {
        let i = self.state.actual_intensity;
        match self.vibrator_type {
            VibratorType::Motor => (i.saturating_mul(2), 0),
            VibratorType::Linear if self.state.carrier_polarity => (127 + i, 128 - i),
            VibratorType::Linear => (128 - i, 127 + i),
        }
    }
}

fn period_for(frequency: i32) -> u32 {
    let f = frequency as u32;
    (1000 + f / 2) / f
}

pub struct VibrationEngine<V> {
    output: V,
    channels: [ChannelVibration; NUM_CHANNELS],
}

impl<V: VibrationOutput> VibrationEngine<V> {
    pub fn new(output: V) -> Self {
        Self {
            output,
            channels: core::array::from_fn(|_| ChannelVibration::new()),
        }
    }

    pub fn output(&self) -> &V {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut V {
        &mut self.output
    }

    pub fn state(&self, ch: usize) -> &VibrationPlaybackState {
        &self.channels[ch].state
    }

    pub fn envelope(&self, ch: usize) -> Option<&VibrationEnvelope> {
        self.channels[ch].envelope.as_ref()
    }

    pub fn is_playing(&self, ch: usize) -> bool {
        self.channels[ch].state.is_playing
    }

    pub fn actual_intensity(&self, ch: usize) -> u8 {
        self.channels[ch].state.actual_intensity
    }

    pub fn period_ms(&self, ch: usize) -> u32 {
        self.channels[ch].period_ms
    }

    pub fn speed_multiplier(&self, ch: usize) -> i32 {
        self.channels[ch].speed_multiplier_percent
    }

    /// Assign a built-in envelope. An unknown name leaves the channel without one.
    pub fn set_envelope(&mut self, ch: usize, name: &str) -> Result<(), Error> {
        match VibrationEnvelope::builtin(name) {
            Ok(envelope) => {
                debug!(
                    "{}: envelope {}, {} points, {} ms per point",
                    channel_number(ch),
                    envelope.name(),
                    envelope.number_of_points(),
                    envelope.msec_per_point()
                );
                self.channels[ch].envelope = Some(envelope);
                Ok(())
            }
            Err(e) => {
                error!("{}: vibration envelope {} not found", channel_number(ch), name);
                self.channels[ch].envelope = None;
                Err(e)
            }
        }
    }

    /// Assign an envelope from a text definition. A definition that fails to
    /// parse leaves the current envelope in place.
    pub fn set_envelope_definition(&mut self, ch: usize, name: &str, text: &str) -> Result<(), Error> {
        let definition = VibrationEnvelope::parse(name, text).map_err(|e| {
            error!("{}: envelope definition {}: {}", channel_number(ch), name, e);
            e
        })?;
        self.channels[ch].envelope = Some(definition.envelope);
        if let Some(frequency) = definition.frequency {
            self.set_frequency(ch, frequency);
        }
        Ok(())
    }

    /// Change the cycle duration of this channel's copy of its envelope
    pub fn override_duration(&mut self, ch: usize, msec: i32) -> Result<(), Error> {
        let envelope = self.channels[ch]
            .envelope
            .as_mut()
            .ok_or(Error::NoEnvelope { channel: channel_number(ch) })?;
        envelope.set_duration(msec);
        Ok(())
    }

    pub fn override_repeats(&mut self, ch: usize, repeats: bool) -> Result<(), Error> {
        let envelope = self.channels[ch]
            .envelope
            .as_mut()
            .ok_or(Error::NoEnvelope { channel: channel_number(ch) })?;
        envelope.set_repeats(repeats);
        Ok(())
    }

    pub fn set_vibrator_type(&mut self, ch: usize, vibrator_type: VibratorType) {
        self.channels[ch].vibrator_type = vibrator_type;
        self.channels[ch].last_write = None;
    }

    /// Carrier frequency of a linear vibrator, clamped to [20, 400] Hz
    pub fn set_frequency(&mut self, ch: usize, frequency: i32) {
        let clamped = frequency.clamp(MIN_VIBRATION_FREQUENCY, MAX_VIBRATION_FREQUENCY);
        if clamped != frequency {
            debug!("{}: vibration frequency {} clamped to {}", channel_number(ch), frequency, clamped);
        }
        self.channels[ch].period_ms = period_for(clamped);
    }

    /// Overall intensity in percent, multiplied into every envelope point
    pub fn set_intensity(&mut self, ch: usize, percent: i32) {
        let c = &mut self.channels[ch];
        c.intensity = clamp_percent(percent);
        if c.state.is_playing {
            c.state.actual_intensity = c.actual_intensity(c.current_point());
        }
    }

    /// Speed up the envelope clock. 0 is no change, 100 twice as fast, -50 half.
    pub fn set_speed_multiplier(&mut self, ch: usize, percent: i32) {
        self.channels[ch].speed_multiplier_percent = percent.clamp(-99, 1000);
    }

    pub fn start(&mut self, ch: usize, now: Millis) -> Result<(), Error> {
        let c = &mut self.channels[ch];
        if c.envelope.is_none() {
            c.state.is_playing = false;
            return Err(Error::NoEnvelope { channel: channel_number(ch) });
        }

        c.state = VibrationPlaybackState {
            is_playing: true,
            index_in_envelope: 0,
            start_time_for_point: now,
            start_time_for_carrier_cycle: now,
            carrier_polarity: true,
            actual_intensity: 0,
        };
        c.state.actual_intensity = c.actual_intensity(c.current_point());
        c.last_write = None;
        self.write_output(ch);
        Ok(())
    }

    /// Stop at once and switch the output off
    pub fn stop(&mut self, ch: usize) {
        let c = &mut self.channels[ch];
        c.state.is_playing = false;
        c.state.actual_intensity = 0;
        c.last_write = Some((0, 0));
        self.output.write(ch, 0, 0);
    }

    /// Advance envelopes and carriers. Call once per loop tick.
    pub fn tick(&mut self, now: Millis) {
        for ch in 0..NUM_CHANNELS {
            if !self.channels[ch].state.is_playing {
                continue;
            }
            self.advance_envelope(ch, now);
            self.advance_carrier(ch, now);
            self.write_output(ch);
        }
    }

    fn advance_envelope(&mut self, ch: usize, now: Millis) {
        let c = &mut self.channels[ch];
        let (num_points, msec_per_point) = match c.envelope.as_ref() {
            Some(e) => (e.number_of_points(), e.msec_per_point()),
            None => return,
        };

        let point_elapsed = elapsed(now, c.state.start_time_for_point) as u64;
        let adjusted = point_elapsed * (100 + c.speed_multiplier_percent) as u64 / 100;
        if adjusted <= msec_per_point as u64 {
            return;
        }

        // Envelopes always wrap; `repeats` only matters to whoever authored it
        c.state.index_in_envelope += 1;
        if c.state.index_in_envelope >= num_points {
            c.state.index_in_envelope = 0;
        }
        c.state.actual_intensity = c.actual_intensity(c.current_point());
        c.state.start_time_for_point = now;
    }

    fn advance_carrier(&mut self, ch: usize, now: Millis) {
        let c = &mut self.channels[ch];
        if c.vibrator_type != VibratorType::Linear {
            return;
        }
        let cycle = elapsed(now, c.state.start_time_for_carrier_cycle);
        if cycle <= c.period_ms / 2 {
            c.state.carrier_polarity = true;
        } else if cycle <= c.period_ms {
            c.state.carrier_polarity = false;
        } else {
            c.state.start_time_for_carrier_cycle = now;
            c.state.carrier_polarity = true;
        }
    }

    /// Write the pins if the drive changed since the last write
    fn write_output(&mut self, ch: usize) {
        let pins = self.channels[ch].pins();
        if self.channels[ch].last_write != Some(pins) {
            self.channels[ch].last_write = Some(pins);
            self.output.write(ch, pins.0, pins.1);
        }
    }
}
