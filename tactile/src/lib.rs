#![cfg_attr(not(test), no_std)]

//! Control core for a multi-channel touch / sound / vibration device.
//!
//! Each channel pairs a proximity sensor with a sound player and a vibration
//! actuator. The [`coordinator::Tactile`] object is ticked from a single
//! polling loop; it filters the sensors, classifies touches, arbitrates which
//! channels may play, and drives volume fades and vibration envelopes against
//! the millisecond clock supplied by the host.
//!
//! Hardware is reached only through the collaborator traits
//! [`audio::Player`], [`audio::TrackSource`] and [`vibrate::VibrationOutput`].

pub mod audio;
pub mod config;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod fade;
pub mod sensor;
pub mod vibrate;

#[cfg(test)]
pub(crate) mod mock;

pub use coordinator::{Command, Tactile};
pub use error::Error;

/// Number of sensor / actuator channels on the device
pub const NUM_CHANNELS: usize = 4;

/// Full scale of a raw proximity sample
pub const ADC_FULL_SCALE: u16 = 1024;

/// Monotonic millisecond timestamp. Wraps after ~49 days.
pub type Millis = u32;

/// Milliseconds from `since` to `now`, tolerant of counter wraparound
pub fn elapsed(now: Millis, since: Millis) -> Millis {
    now.wrapping_sub(since)
}

/// Convert a 1-based channel number, as used by the command surface and the
/// E1..En track directories, into an internal index.
///
/// Out of range numbers are clamped to the nearest channel.
pub fn channel_index(number: i32) -> usize {
    let index = if number < 1 {
        0
    } else if number as usize > NUM_CHANNELS {
        NUM_CHANNELS - 1
    } else {
        number as usize - 1
    };
    if index as i32 + 1 != number {
        log::debug!("channel {} out of range, using {}", number, index + 1);
    }
    index
}

/// Inverse of [`channel_index`], for log output
pub fn channel_number(index: usize) -> usize {
    index + 1
}

/// Classified state of one sensor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchStatus {
    Released,
    Touched,
}

impl TouchStatus {
    pub fn is_touched(&self) -> bool {
        *self == TouchStatus::Touched
    }
}

/// Change in [`TouchStatus`] since the previous tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchEdge {
    NoChange,
    NewTouch,
    NewRelease,
}
