//! Error taxonomy (spec §7). Every variant's `Display` text is exactly the
//! one-line message the dispatcher forwards on the owning FIFO with a
//! negative code (§6), so callers can do `format!("{}", err)` and write it
//! straight to the wire.

use thiserror::Error;

/// Raised while reading/validating a `KEY=VALUE` config file (§6, §7:
/// Configuration). Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config error: missing required key {key} in {file}")]
    MissingKey { file: String, key: String },

    #[error("Config error: key {key} in {file} has invalid value {value:?}: {reason}")]
    InvalidValue {
        file: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Config error: impossible geometry: {0}")]
    ImpossibleGeometry(String),

    #[error("Config error: cannot read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raised by the axis transport (§4.1, §7: Transport). Fatal after one
/// retry -- the process is expected to be respawned by a supervisor.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport error: couldn't open {address}: {reason}")]
    Open { address: String, reason: String },

    #[error("Transport error: write to {address} failed: {reason}")]
    Write { address: String, reason: String },

    #[error("Transport error: read from {address} failed: {reason}")]
    Read { address: String, reason: String },
}

/// Raised when a requested geometry violates soft limits or the dome
/// interference envelope (§4.5, §7: Geometry). Non-fatal -- the dispatcher
/// reports and stays in its current state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Error: {axis} hits negative limit")]
    NegativeLimit { axis: &'static str },

    #[error("Error: {axis} hits positive limit")]
    PositiveLimit { axis: &'static str },

    #[error("Error: hits positive azimuth limit inside dome")]
    PositiveAzLimitInDome,

    #[error("Error: hits negative azimuth limit inside dome")]
    NegativeAzLimitInDome,

    #[error("Error: hits positive altitude limit inside dome")]
    PositiveAltLimitInDome,

    #[error("Error: hits negative altitude limit inside dome")]
    NegativeAltLimitInDome,
}

/// Raised by `axisMotionCheck`/`axisLimitCheck` (§4.3, §7: Axis motion).
/// Stops all axes (fast) and drops the activity to STOPPED.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AxisMotionError {
    #[error("Motion controller {axis} stuck: no progress toward goal")]
    Stuck { axis: &'static str },

    #[error("Motion controller {axis} hit an unexpected limit")]
    UnexpectedLimit { axis: &'static str },
}

/// Host vs. controller clock drift exceeded `MAXJITTER` (§4.4, §7: Clock
/// drift). Fatal for the current track.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Motion controller clock drift exceeds {limit_secs} sec")]
pub struct ClockDriftError {
    pub limit_secs: f64,
    pub observed_secs: f64,
}

/// Homing timed out or the switch never triggered (§4.3, §7: Homing).
/// Leaves the axis `is_homed` cleared.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HomingError {
    #[error("{axis} homing timed out")]
    Timeout { axis: &'static str },

    #[error("{axis} lost homing switch")]
    Lost { axis: &'static str },
}

/// Unified error for the dispatcher's message-handling path.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    AxisMotion(#[from] AxisMotionError),
    #[error(transparent)]
    ClockDrift(#[from] ClockDriftError),
    #[error(transparent)]
    Homing(#[from] HomingError),
}

/// Top-level error for the supervisor binary's startup sequence (config
/// load, transport open, fifo setup), folding in plain I/O failures that
/// never reach the dispatcher's own error taxonomy.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
