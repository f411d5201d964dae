// Error type shared by the whole crate.
//
// Only programmer errors and outer-surface failures (config files, chord
// text) are errors here. Missing candidates, refused database entries and
// partial coverage are ordinary outcomes and never surface as `Err`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TilingError>;

#[derive(Error, Debug)]
pub enum TilingError {
    /// Pattern sizes outside 1..=4, or min > max.
    #[error("invalid size bounds: {min}..={max} (sizes must lie in 1..=4)")]
    InvalidSizeBounds { min: usize, max: usize },

    /// A strategy or store parameter that must be positive was not.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A placement was added over an unusable or already covered bar.
    #[error("placement over bars {from}..={to} is not usable-and-free")]
    PlacementConflict { from: usize, to: usize },

    /// Chord symbol or chord chart text that could not be parsed.
    #[error("chord parse error: {0}")]
    ChordParse(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
