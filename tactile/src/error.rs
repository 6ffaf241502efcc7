use thiserror::Error;

/// Failures reported by the control core.
///
/// None of these are fatal. The coordinator logs them and carries on with the
/// next tick; out-of-range inputs are clamped rather than reported here.
/// Channels are carried as 1-based numbers so they read the same as the logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("no track available for channel {channel}")]
    NoTrack { channel: usize },
    #[error("no vibration envelope assigned to channel {channel}")]
    NoEnvelope { channel: usize },
    #[error("unknown vibration envelope")]
    UnknownEnvelope,
    #[error("invalid envelope definition at line {line}")]
    InvalidDefinition { line: usize },
    #[error("fade time conflicts with proximity-as-volume on channel {channel}")]
    ProximityVolumeConflict { channel: usize },
    #[error("command queue full")]
    QueueFull,
    #[error("unrecognized command")]
    InvalidCommand,
}
