//! Shared state and identity types
//!
//! Controller families and the small state machines tracked by a stage
//! session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported controller families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerFamily {
    /// ITK Corvus Eco, three axes, micrometre line protocol
    Corvus,
    /// Newport SMC100 single-axis controllers on a shared bus
    Smc100,
    /// New Scale Technologies M3-FS focus module
    M3fs,
    /// Pololu Tic stepper controller over USB
    Tic,
    /// GRBL-based CNC router
    Grbl,
    /// Physik Instrumente GCS controllers on a daisy chain
    Pi,
}

impl ControllerFamily {
    /// Every supported family
    pub const ALL: [ControllerFamily; 6] = [
        Self::Corvus,
        Self::Smc100,
        Self::M3fs,
        Self::Tic,
        Self::Grbl,
        Self::Pi,
    ];

    /// True for families reached through USB control transfers
    pub fn uses_usb(&self) -> bool {
        matches!(self, Self::Tic)
    }
}

impl Default for ControllerFamily {
    fn default() -> Self {
        Self::Grbl
    }
}

impl fmt::Display for ControllerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corvus => write!(f, "Corvus"),
            Self::Smc100 => write!(f, "SMC100"),
            Self::M3fs => write!(f, "M3-FS"),
            Self::Tic => write!(f, "Tic"),
            Self::Grbl => write!(f, "GRBL"),
            Self::Pi => write!(f, "PI"),
        }
    }
}

impl FromStr for ControllerFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "").as_str() {
            "corvus" => Ok(Self::Corvus),
            "smc100" => Ok(Self::Smc100),
            "m3fs" => Ok(Self::M3fs),
            "tic" => Ok(Self::Tic),
            "grbl" | "cnc" => Ok(Self::Grbl),
            "pi" => Ok(Self::Pi),
            _ => Err(format!("Unknown controller family: {}", s)),
        }
    }
}

/// Connection state of a stage session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Homing state of a stage session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HomingState {
    /// Not homed since connect, or the last homing attempt failed
    #[default]
    Unknown,
    /// Homing sequence in progress
    Homing,
    /// Homing completed
    Homed,
}

/// Last observed motion state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotionState {
    #[default]
    Idle,
    Moving,
}

/// What a move command does after the target is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionPolicy {
    /// Block until the controller reports idle
    WaitUntilIdle,
    /// Return as soon as the command is acknowledged
    FireAndForget,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

impl fmt::Display for HomingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Homing => write!(f, "Homing"),
            Self::Homed => write!(f, "Homed"),
        }
    }
}
