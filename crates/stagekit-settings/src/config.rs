//! Configuration and settings management for StageKit
//!
//! A configuration describes one stage: its controller family, how to reach
//! it, the family-specific options and optional overrides of the family
//! defaults. Files are JSON or TOML, chosen by extension, and live in the
//! platform configuration directory unless a path is given.

use crate::error::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use stagekit_core::ControllerFamily;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "stagekit";
const CONFIG_FILE: &str = "config.toml";

/// Overrides of the family's default time bounds, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Bound on a single command/reply exchange
    pub response_ms: u64,
    /// Bound on a complete homing sequence
    pub homing_ms: u64,
    /// Bound on waiting for a move to finish
    pub motion_ms: u64,
    /// Delay between busy polls
    pub poll_interval_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            response_ms: 1000,
            homing_ms: 60_000,
            motion_ms: 60_000,
            poll_interval_ms: 50,
        }
    }
}

/// How to reach and configure one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Controller family
    pub family: ControllerFamily,
    /// Serial port path; discovered from the USB identity when unset
    pub port: Option<String>,
    /// USB serial number used to pick one of several identical devices
    pub serial_number: Option<String>,
    /// Baud rate override for serial families
    pub baud_rate: Option<u32>,
    /// Bus or daisy-chain addresses, one per axis (SMC100, PI)
    pub addresses: Vec<u8>,
    /// Number of driven axes (GRBL)
    pub axes: Option<usize>,
    /// Motor steps per user unit (Tic)
    pub steps_per_unit: f64,
    /// Home towards the positive end instead of the negative one (Tic, PI)
    pub home_forward: bool,
    /// Re-enable the joystick after connecting (Corvus)
    pub joystick: bool,
    /// Firmware versions accepted in addition to the known ones (M3-FS)
    pub extra_firmware_versions: Vec<String>,
    /// Lower software travel limit per axis
    pub minimums: Option<Vec<f64>>,
    /// Upper software travel limit per axis
    pub maximums: Option<Vec<f64>>,
    /// Time bound overrides; family defaults when unset
    pub timeouts: Option<TimeoutSettings>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            family: ControllerFamily::default(),
            port: None,
            serial_number: None,
            baud_rate: None,
            addresses: Vec::new(),
            axes: None,
            steps_per_unit: 1.0,
            home_forward: false,
            joystick: true,
            extra_firmware_versions: Vec::new(),
            minimums: None,
            maximums: None,
            timeouts: None,
        }
    }
}

impl StageSettings {
    /// Settings for `family` with every option at its default
    pub fn for_family(family: ControllerFamily) -> Self {
        let addresses = match family {
            ControllerFamily::Smc100 | ControllerFamily::Pi => vec![1],
            _ => Vec::new(),
        };
        Self {
            family,
            addresses,
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Number of axes these settings describe, when known without a device
    pub fn axis_count(&self) -> Option<usize> {
        match self.family {
            ControllerFamily::Corvus => Some(3),
            ControllerFamily::M3fs | ControllerFamily::Tic => Some(1),
            ControllerFamily::Smc100 | ControllerFamily::Pi => Some(self.addresses.len()),
            ControllerFamily::Grbl => Some(self.axes.unwrap_or(3)),
        }
    }

    /// Validate the stage section
    pub fn validate(&self) -> SettingsResult<()> {
        if self.baud_rate == Some(0) {
            return Err(SettingsError::invalid("stage.baud_rate", "must be > 0"));
        }
        if self.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(SettingsError::invalid("stage.port", "must not be empty"));
        }

        match self.family {
            ControllerFamily::Smc100 | ControllerFamily::Pi if self.addresses.is_empty() => {
                return Err(SettingsError::invalid(
                    "stage.addresses",
                    format!("{} needs at least one address", self.family),
                ));
            }
            ControllerFamily::Grbl => {
                if let Some(axes) = self.axes {
                    if !(1..=3).contains(&axes) {
                        return Err(SettingsError::invalid("stage.axes", "must be 1 to 3"));
                    }
                }
            }
            ControllerFamily::Tic => {
                if !(self.steps_per_unit.is_finite() && self.steps_per_unit > 0.0) {
                    return Err(SettingsError::invalid("stage.steps_per_unit", "must be > 0"));
                }
            }
            _ => {}
        }

        if let Some(timeouts) = &self.timeouts {
            let bounds = [
                ("stage.timeouts.response_ms", timeouts.response_ms),
                ("stage.timeouts.homing_ms", timeouts.homing_ms),
                ("stage.timeouts.motion_ms", timeouts.motion_ms),
            ];
            if let Some((key, _)) = bounds.iter().find(|(_, value)| *value == 0) {
                return Err(SettingsError::invalid(*key, "must be > 0"));
            }
        }

        self.validate_limits()
    }

    fn validate_limits(&self) -> SettingsResult<()> {
        let axes = self.axis_count();
        for (key, limit) in [
            ("stage.minimums", &self.minimums),
            ("stage.maximums", &self.maximums),
        ] {
            let Some(limit) = limit else { continue };
            if let Some(axes) = axes {
                if limit.len() != axes {
                    return Err(SettingsError::invalid(
                        key,
                        format!("expected {} values, got {}", axes, limit.len()),
                    ));
                }
            }
            if limit.iter().any(|v| !v.is_finite()) {
                return Err(SettingsError::invalid(key, "values must be finite"));
            }
        }

        if let (Some(min), Some(max)) = (&self.minimums, &self.maximums) {
            if let Some(axis) = min.iter().zip(max).position(|(lo, hi)| lo > hi) {
                return Err(SettingsError::invalid(
                    "stage.minimums",
                    format!("axis {} minimum is above its maximum", axis),
                ));
            }
        }
        Ok(())
    }
}

/// Logging preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    /// The stage to drive
    #[serde(default)]
    pub stage: StageSettings,
    /// Logging preferences
    #[serde(default)]
    pub logging: LoggingSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(SettingsError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location: `<config dir>/stagekit/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".into())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)?;
        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };
        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when no
    /// file exists there
    pub fn load_or_default() -> SettingsResult<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;
        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        self.stage.validate()?;
        if self.logging.level.trim().is_empty() {
            return Err(SettingsError::invalid("logging.level", "must not be empty"));
        }
        Ok(())
    }
}
