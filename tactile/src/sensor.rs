//! Proximity filtering and touch classification.
//!
//! Raw sensor samples pass through a single-pole low-pass filter, are scaled
//! to a percentage, and are then classified as touched or released using
//! separate touch and release thresholds. The band between the two thresholds
//! holds the previous status, so a reading hovering near one threshold does not
//! chatter.

use log::debug;

use crate::config::ChannelConfig;
use crate::{Millis, TouchEdge, TouchStatus, ADC_FULL_SCALE, NUM_CHANNELS};

/// Exponential smoothing of one channel's raw readings
#[derive(Clone, Copy, Debug, Default)]
pub struct ProximityFilter {
    pub filtered: f32,
}

impl ProximityFilter {
    pub const fn new() -> Self {
        Self { filtered: 0.0 }
    }

    /// Push a new raw sample and return the proximity in percent, [0, 100].
    ///
    /// strength: averaging strength `k` in samples, 0 passes samples through
    /// multiplier: gain applied after filtering
    pub fn push(&mut self, raw: u16, strength: u16, multiplier: f32) -> f32 {
        let value = if strength > 0 {
            let k = strength as f32;
            self.filtered = (self.filtered * (k - 1.0) + raw as f32) / k;
            self.filtered
        } else {
            raw as f32
        };

        let percent = value * multiplier * 100.0 / ADC_FULL_SCALE as f32;
        if percent > 100.0 {
            100.0
        } else if percent >= 0.0 {
            percent
        } else {
            0.0
        }
    }
}

/// Touch / release classifier for one channel
#[derive(Clone, Copy, Debug)]
pub struct TouchClassifier {
    /// Status from the thresholds, before any toggle processing
    pub status: TouchStatus,
    /// Toggled status, used only in toggle mode
    pub pseudo_status: TouchStatus,
    /// Time of the last real edge
    pub last_action: Millis,
}

impl Default for TouchClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TouchClassifier {
    pub const fn new() -> Self {
        Self {
            status: TouchStatus::Released,
            pseudo_status: TouchStatus::Released,
            last_action: 0,
        }
    }

    /// Classify a proximity reading.
    ///
    /// Returns the reported status and edge. In toggle mode a release is never
    /// reported, and each new touch alternately reports a touch and a release.
    pub fn classify(
        &mut self,
        proximity: f32,
        touch_threshold: f32,
        release_threshold: f32,
        toggle: bool,
        now: Millis,
    ) -> (TouchStatus, TouchEdge) {
        let status = if proximity >= touch_threshold {
            TouchStatus::Touched
        } else if proximity < release_threshold {
            TouchStatus::Released
        } else {
            self.status
        };

        let edge = match (self.status, status) {
            (TouchStatus::Released, TouchStatus::Touched) => TouchEdge::NewTouch,
            (TouchStatus::Touched, TouchStatus::Released) => TouchEdge::NewRelease,
            _ => TouchEdge::NoChange,
        };
        if edge != TouchEdge::NoChange {
            self.last_action = now;
        }
        // Remember the real status; toggle mode below only alters what's reported
        self.status = status;

        if !toggle {
            return (status, edge);
        }

        match edge {
            TouchEdge::NewTouch => {
                if self.pseudo_status.is_touched() {
                    self.pseudo_status = TouchStatus::Released;
                    (TouchStatus::Released, TouchEdge::NewRelease)
                } else {
                    self.pseudo_status = TouchStatus::Touched;
                    (TouchStatus::Touched, TouchEdge::NewTouch)
                }
            }
            _ => (self.pseudo_status, TouchEdge::NoChange),
        }
    }
}

/// Result of one classification pass over all channels
#[derive(Clone, Copy, Debug)]
pub struct TouchReport {
    /// Reported status, after toggle processing
    pub status: [TouchStatus; NUM_CHANNELS],
    /// Physical status from the thresholds alone
    pub touched: [bool; NUM_CHANNELS],
    pub edges: [TouchEdge; NUM_CHANNELS],
    pub proximity: [f32; NUM_CHANNELS],
    /// Number of reported (not suppressed) edges
    pub num_changed: usize,
}

impl TouchReport {
    /// Sensors a finger is on right now. A toggled-on channel that was let go
    /// doesn't count.
    pub fn num_touched(&self) -> usize {
        self.touched.iter().filter(|t| **t).count()
    }
}

/// Filters and classifiers for every channel
pub struct Sensors {
    filters: [ProximityFilter; NUM_CHANNELS],
    classifiers: [TouchClassifier; NUM_CHANNELS],
    proximity: [f32; NUM_CHANNELS],
}

impl Default for Sensors {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensors {
    pub const fn new() -> Self {
        Self {
            filters: [ProximityFilter::new(); NUM_CHANNELS],
            classifiers: [TouchClassifier::new(); NUM_CHANNELS],
            proximity: [0.0; NUM_CHANNELS],
        }
    }

    /// Filter a new set of raw samples. Returns proximity percent per channel.
    pub fn push(
        &mut self,
        raw: &[u16; NUM_CHANNELS],
        channels: &[ChannelConfig; NUM_CHANNELS],
        strength: u16,
    ) -> [f32; NUM_CHANNELS] {
        for ch in 0..NUM_CHANNELS {
            let p = self.filters[ch].push(raw[ch], strength, channels[ch].proximity_multiplier());
            self.proximity[ch] = if channels[ch].ignore { 0.0 } else { p };
        }
        self.proximity
    }

    /// Classify the most recent proximity readings
    pub fn classify(&mut self, channels: &[ChannelConfig; NUM_CHANNELS], now: Millis) -> TouchReport {
        let mut report = TouchReport {
            status: [TouchStatus::Released; NUM_CHANNELS],
            touched: [false; NUM_CHANNELS],
            edges: [TouchEdge::NoChange; NUM_CHANNELS],
            proximity: self.proximity,
            num_changed: 0,
        };

        for ch in 0..NUM_CHANNELS {
            let config = &channels[ch];
            let p = if config.use_touch_input { self.proximity[ch] } else { 0.0 };
            let (status, edge) = self.classifiers[ch].classify(
                p,
                config.touch_threshold(),
                config.release_threshold(),
                config.touch_toggle_mode,
                now,
            );
            report.status[ch] = status;
            report.touched[ch] = self.classifiers[ch].status.is_touched();
            report.edges[ch] = edge;
            if edge != TouchEdge::NoChange {
                report.num_changed += 1;
            }
        }

        if report.num_changed > 0 && log::log_enabled!(log::Level::Debug) {
            let mut summary = [b'r'; NUM_CHANNELS];
            for ch in 0..NUM_CHANNELS {
                summary[ch] = match (report.edges[ch], report.status[ch]) {
                    (TouchEdge::NewTouch, _) => b'T',
                    (TouchEdge::NewRelease, _) => b'R',
                    (_, TouchStatus::Touched) => b't',
                    (_, TouchStatus::Released) => b'r',
                };
            }
            debug!(
                "sensors: {} changed, {}",
                report.num_changed,
                core::str::from_utf8(&summary).unwrap_or("?")
            );
        }

        report
    }

    pub fn proximity(&self, ch: usize) -> f32 {
        self.proximity[ch]
    }

    pub fn status(&self, ch: usize) -> TouchStatus {
        self.classifiers[ch].status
    }
}
