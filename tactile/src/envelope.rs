//! Vibration intensity envelopes.
//!
//! An envelope is a named sequence of intensity points (0-100%) played back
//! over `msec_total` milliseconds, one cycle at a time. Envelopes come from the
//! built-in catalog or from a text definition:
//!
//! ```text
//! soundLength: 1.5
//! frequency: 150
//! numPoints: 3
//! intensities:
//! 100
//! 50
//! 0
//! ```

use heapless::{String, Vec};
use log::{debug, warn};

use crate::error::Error;

pub const MAX_ENVELOPE_POINTS: usize = 128;
pub const MAX_ENVELOPE_NAME: usize = 24;
/// Longest envelope cycle accepted by [`VibrationEnvelope::set_duration`]
pub const MAX_ENVELOPE_MS: u32 = 100_000;

struct BuiltinEnvelope {
    name: &'static str,
    msec_total: u32,
    points: &'static [u8],
}

static BUILTIN_ENVELOPES: [BuiltinEnvelope; 5] = [
    BuiltinEnvelope {
        name: "continuous",
        msec_total: 0,
        points: &[100],
    },
    BuiltinEnvelope {
        name: "square",
        msec_total: 1000,
        points: &[100, 0],
    },
    BuiltinEnvelope {
        name: "sawtooth",
        msec_total: 1000,
        points: &[
            100, 96, 92, 88, 84, 80, 76, 72, 68, 64, 60, 56, 52, 48, 44, 40, 36, 32, 28, 24, 20,
            16, 12, 8, 4, 0, 4, 8, 12, 16, 20, 24, 28, 32, 36, 40, 44, 48, 52, 56, 60, 64, 68, 72,
            76, 80, 84, 88, 92, 96,
        ],
    },
    BuiltinEnvelope {
        name: "pulse",
        msec_total: 1000,
        points: &[100, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    },
    BuiltinEnvelope {
        name: "pulse-fade",
        msec_total: 2200,
        points: &[
            78, 100, 100, 100, 100, 100, 96, 89, 84, 78, 73, 71, 66, 61, 58, 54, 49, 46, 42, 40,
            38, 36, 34, 32, 30, 28, 26, 23, 21, 19, 18, 16, 14, 12, 11, 10, 9, 7, 5, 4, 3, 2, 1, 0,
        ],
    },
];

/// Names of the built-in envelopes
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTIN_ENVELOPES.iter().map(|e| e.name)
}

#[derive(Clone, Debug, PartialEq)]
pub struct VibrationEnvelope {
    name: String<MAX_ENVELOPE_NAME>,
    points: Vec<u8, MAX_ENVELOPE_POINTS>,
    msec_total: u32,
    msec_per_point: u32,
    repeats: bool,
}

/// A parsed envelope definition
#[derive(Clone, Debug, PartialEq)]
pub struct EnvelopeDefinition {
    pub envelope: VibrationEnvelope,
    /// Carrier frequency requested by the definition, in Hz
    pub frequency: Option<i32>,
}

impl VibrationEnvelope {
    /// Build an envelope. Points above 100 are clamped; an empty point list
    /// becomes a single full-intensity point.
    pub fn new(name: &str, points: &[u8], msec_total: u32, repeats: bool) -> Self {
        let mut envelope = Self {
            name: truncated_name(name),
            points: Vec::new(),
            msec_total,
            msec_per_point: 0,
            repeats,
        };
        for &p in points.iter().take(MAX_ENVELOPE_POINTS) {
            // Capacity checked by take()
            let _ = envelope.points.push(p.min(100));
        }
        if points.len() > MAX_ENVELOPE_POINTS {
            warn!("envelope {}: truncated to {} points", name, MAX_ENVELOPE_POINTS);
        }
        if envelope.points.is_empty() {
            let _ = envelope.points.push(100);
        }
        envelope.update_msec_per_point();
        envelope
    }

    /// Look up a built-in envelope by name
    pub fn builtin(name: &str) -> Result<Self, Error> {
        BUILTIN_ENVELOPES
            .iter()
            .find(|e| e.name == name)
            .map(|e| Self::new(e.name, e.points, e.msec_total, true))
            .ok_or(Error::UnknownEnvelope)
    }

    /// Parse a text definition: `key: value` header lines (`soundLength` in
    /// seconds, `frequency` in Hz, `numPoints`), an optional `intensities:`
    /// line, then one intensity per line up to the first blank line.
    pub fn parse(name: &str, text: &str) -> Result<EnvelopeDefinition, Error> {
        let mut sound_length: f32 = 0.0;
        let mut frequency: Option<i32> = None;
        let mut declared_points: Option<i32> = None;
        let mut points: Vec<u8, MAX_ENVELOPE_POINTS> = Vec::new();
        let mut in_body = false;

        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            let invalid = Error::InvalidDefinition { line: i + 1 };

            if !in_body {
                if line.is_empty() {
                    continue;
                }
                if let Some((key, value)) = line.split_once(':') {
                    let value = value.trim();
                    match key.trim() {
                        "soundLength" => sound_length = value.parse().map_err(|_| invalid)?,
                        "frequency" => frequency = Some(value.parse().map_err(|_| invalid)?),
                        "numPoints" => declared_points = Some(value.parse().map_err(|_| invalid)?),
                        "intensities" => in_body = true,
                        other => debug!("envelope {}: ignoring key {}", name, other),
                    }
                    continue;
                }
                // A bare number starts the intensities
                in_body = true;
            }

            if line.is_empty() {
                break;
            }
            let intensity: i32 = line.parse().map_err(|_| invalid)?;
            if points.push(intensity.clamp(0, 100) as u8).is_err() {
                warn!("envelope {}: more than {} points, rest ignored", name, MAX_ENVELOPE_POINTS);
                break;
            }
        }

        if let Some(declared) = declared_points {
            if declared != points.len() as i32 {
                warn!(
                    "envelope {}: numPoints {} doesn't match {} intensity values",
                    name,
                    declared,
                    points.len()
                );
            }
        }

        let msec_total = if sound_length > 0.0 {
            (sound_length * 1000.0 + 0.5) as u32
        } else {
            0
        };

        Ok(EnvelopeDefinition {
            envelope: Self::new(name, &points, msec_total, true),
            frequency,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number_of_points(&self) -> usize {
        self.points.len()
    }

    pub fn point(&self, index: usize) -> u8 {
        self.points.get(index).copied().unwrap_or(0)
    }

    pub fn msec_total(&self) -> u32 {
        self.msec_total
    }

    pub fn msec_per_point(&self) -> u32 {
        self.msec_per_point
    }

    pub fn repeats(&self) -> bool {
        self.repeats
    }

    /// Override the cycle duration, clamped to [1, MAX_ENVELOPE_MS]
    pub fn set_duration(&mut self, msec: i32) {
        self.msec_total = msec.clamp(1, MAX_ENVELOPE_MS as i32) as u32;
        self.update_msec_per_point();
    }

    pub fn set_repeats(&mut self, repeats: bool) {
        self.repeats = repeats;
    }

    fn update_msec_per_point(&mut self) {
        let n = self.points.len() as u32;
        self.msec_per_point = (self.msec_total + n / 2) / n;
    }
}

fn truncated_name(name: &str) -> String<MAX_ENVELOPE_NAME> {
    let mut s = String::new();
    for c in name.chars() {
        if s.push(c).is_err() {
            break;
        }
    }
    s
}
