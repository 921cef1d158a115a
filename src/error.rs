//! Error types for the monitoring core.
//!
//! One enum per concern: rejected inputs, port failures, manual dose
//! refusals and configuration problems.  All of them are `Copy` so they
//! can be queued between the pipeline, the effect worker and the alarm
//! timers without allocation.  The binary wraps them in `anyhow`.

use core::fmt;

use crate::fsm::ProtocolKind;
use crate::sensors::Timestamp;

// ---------------------------------------------------------------------------
// Input errors
// ---------------------------------------------------------------------------

/// A rejected input.  The pipeline keeps its prior state and carries on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputError {
    /// Sample timestamp is not strictly after the last accepted one.
    OutOfOrder {
        previous: Timestamp,
        received: Timestamp,
    },
    /// Glucose value is NaN or infinite.
    NonFiniteGlucose,
    /// A threshold field could not be parsed as a number.
    MalformedThreshold(&'static str),
    /// A sample arrived while no monitoring session was running.
    NoActiveSession,
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder { previous, received } => {
                write!(f, "sample at {received} is not after {previous}")
            }
            Self::NonFiniteGlucose => write!(f, "glucose value is not finite"),
            Self::MalformedThreshold(field) => write!(f, "malformed threshold: {field}"),
            Self::NoActiveSession => write!(f, "no active monitoring session"),
        }
    }
}

impl std::error::Error for InputError {}

// ---------------------------------------------------------------------------
// Port failures
// ---------------------------------------------------------------------------

/// Which external port failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Notification,
    Actuator,
    Alarm,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notification => write!(f, "notification"),
            Self::Actuator => write!(f, "actuator"),
            Self::Alarm => write!(f, "alarm"),
        }
    }
}

/// Error value returned by port implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// The device or channel is not connected.
    Unavailable,
    /// The call reached the device and failed.
    Failed(&'static str),
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

impl std::error::Error for PortError {}

/// A port failure attributed to the protocol whose side effect failed.
///
/// Never retried by the core and never reverses the protocol transition
/// that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortFailure {
    pub port: PortKind,
    pub protocol: ProtocolKind,
    pub error: PortError,
}

impl fmt::Display for PortFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} port {} for {}", self.port, self.error, self.protocol)
    }
}

impl std::error::Error for PortFailure {}

// ---------------------------------------------------------------------------
// Manual dose errors
// ---------------------------------------------------------------------------

/// Why a manual glucagon delivery did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoseError {
    /// The severe protocol owns the pump.
    ProtocolActive,
    /// A delivery is already running.
    InFlight,
    /// No pump is attached.
    NoActuator,
    /// The pump refused to start.  Reported under the severe protocol,
    /// which owns the actuator.
    Actuator(PortFailure),
    /// The auto-stop timer could not be started; the motor was switched
    /// back off.
    Timer,
}

impl fmt::Display for DoseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolActive => write!(f, "severe protocol is running, use its controls"),
            Self::InFlight => write!(f, "a delivery is already in progress"),
            Self::NoActuator => write!(f, "no pump attached"),
            Self::Actuator(failure) => write!(f, "{failure}"),
            Self::Timer => write!(f, "cannot start delivery timer"),
        }
    }
}

impl std::error::Error for DoseError {}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric field is NaN or infinite.
    NonFinite(&'static str),
    /// A field that must be strictly positive is not.
    NonPositive(&'static str),
    /// A field exceeds the largest value the pipeline supports.
    OutOfRange(&'static str),
    /// The valid glucose range has `min >= max`.
    InvertedRange,
    /// Stored config failed deserialization.
    Corrupted,
    /// Underlying storage could not be read or written.
    Io,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite(field) => write!(f, "{field} is not finite"),
            Self::NonPositive(field) => write!(f, "{field} must be positive"),
            Self::OutOfRange(field) => write!(f, "{field} is out of range"),
            Self::InvertedRange => write!(f, "valid range minimum is not below maximum"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}
