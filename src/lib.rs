//! # StageKit
//!
//! Uniform control of motorized stages from several vendors:
//! - ITK Corvus Eco, Newport SMC100, New Scale M3-FS and PI GCS controllers
//!   over serial lines
//! - Pololu Tic stepper controllers over USB control transfers
//! - GRBL based CNC routers used as XYZ stages
//!
//! ## Architecture
//!
//! StageKit is organized as a workspace with multiple crates:
//!
//! 1. **stagekit-core** - Vector, units, autofocus, state enums, errors
//! 2. **stagekit-communication** - Transports, protocol adapters, the Stage façade
//! 3. **stagekit-settings** - Configuration files and validation
//! 4. **stagekit** - Building stages from configuration, discovery, logging

pub use stagekit_communication::{
    find_port, list_ports, Adapter, ControlTransport, Corvus, FamilyProfile, FlowControl, Grbl,
    HomingDirection, Link, M3fs, MockControlTransport, MockTransport, Pi, SerialParity,
    SerialPortInfo, SerialSettings, SerialTransport, Smc100, Stage, StageProtocol, StageTimeouts,
    StreamChannel, Tic, Transport,
};

#[cfg(feature = "usb")]
pub use stagekit_communication::{list_usb_devices, UsbDeviceInfo, UsbTransport};

pub use stagekit_core::{
    Autofocus, ConnectionError, ConnectionState, ControllerFamily, CountScale, Error, FocusError,
    HomingState, MotionPolicy, MotionState, Plane, Result, StageError, Vector,
    VectorError,
};

pub use stagekit_settings::{
    Config, LoggingSettings, SettingsError, StageSettings, TimeoutSettings,
};

use std::time::Duration;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support, INFO otherwise
pub fn init_logging() -> anyhow::Result<()> {
    init_logging_with(&LoggingSettings::default())
}

/// Initialize logging from the logging section of a configuration
///
/// `RUST_LOG` still takes precedence over the configured level.
pub fn init_logging_with(settings: &LoggingSettings) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)?,
    };

    if settings.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .pretty();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Protocol adapter described by `settings`
pub fn build_adapter(settings: &StageSettings) -> Result<Adapter> {
    let adapter: Adapter = match settings.family {
        ControllerFamily::Corvus => Corvus::new().with_joystick(settings.joystick).into(),
        ControllerFamily::Smc100 => Smc100::new(settings.addresses.clone())?.into(),
        ControllerFamily::M3fs => settings
            .extra_firmware_versions
            .iter()
            .fold(M3fs::new(), |adapter, version| {
                adapter.with_supported_version(version.clone())
            })
            .into(),
        ControllerFamily::Tic => {
            let direction = if settings.home_forward {
                HomingDirection::Forward
            } else {
                HomingDirection::Reverse
            };
            Tic::new()
                .with_steps_per_unit(settings.steps_per_unit)
                .with_homing_direction(direction)
                .into()
        }
        ControllerFamily::Grbl => match settings.axes {
            Some(axes) => Grbl::with_axes(axes)?.into(),
            None => Grbl::new().into(),
        },
        ControllerFamily::Pi => Pi::new(settings.addresses.clone())?
            .with_forward_reference(settings.home_forward)
            .into(),
    };
    Ok(adapter)
}

/// Time bounds for `settings`: the overrides if given, else the family's
pub fn stage_timeouts(settings: &StageSettings) -> StageTimeouts {
    match &settings.timeouts {
        Some(t) => StageTimeouts::new(
            Duration::from_millis(t.response_ms),
            Duration::from_millis(t.homing_ms),
            Duration::from_millis(t.motion_ms),
        )
        .with_poll_interval(Duration::from_millis(t.poll_interval_ms)),
        None => FamilyProfile::for_family(settings.family).timeouts,
    }
}

/// Serial line settings for `port`, the family defaults with the configured
/// baud rate override applied
pub fn serial_settings(
    settings: &StageSettings,
    port: impl Into<String>,
) -> Result<SerialSettings> {
    let profile = FamilyProfile::for_family(settings.family);
    let defaults = profile.serial.ok_or_else(|| ConnectionError::InvalidParameters {
        reason: format!("{} is not a serial controller", settings.family),
    })?;
    let mut line = defaults.settings(port);
    if let Some(baud_rate) = settings.baud_rate {
        line.baud_rate = baud_rate;
    }
    Ok(line)
}

/// Serial port for `settings`: the configured one, else the single port
/// matching the family's USB identity and serial number
pub fn resolve_port(settings: &StageSettings) -> Result<String> {
    if let Some(port) = &settings.port {
        return Ok(port.clone());
    }
    let ids = FamilyProfile::for_family(settings.family).usb_ids;
    let port = find_port(
        ids.map(|(vid, _)| vid),
        ids.map(|(_, pid)| pid),
        settings.serial_number.as_deref(),
    )?;
    tracing::info!("Using {} for the {} stage", port, settings.family);
    Ok(port)
}

/// Unopened transport for `settings`
pub fn build_link(settings: &StageSettings) -> Result<Link> {
    if settings.family.uses_usb() {
        return usb_link(settings);
    }
    let port = resolve_port(settings)?;
    Ok(Link::stream(SerialTransport::new(serial_settings(settings, port)?)))
}

#[cfg(feature = "usb")]
fn usb_link(settings: &StageSettings) -> Result<Link> {
    let profile = FamilyProfile::for_family(settings.family);
    let (vid, pid) = profile.usb_ids.ok_or_else(|| ConnectionError::InvalidParameters {
        reason: format!("{} has no USB identity", settings.family),
    })?;
    Ok(Link::control(UsbTransport::new(
        vid,
        pid,
        settings.serial_number.clone(),
    )))
}

#[cfg(not(feature = "usb"))]
fn usb_link(settings: &StageSettings) -> Result<Link> {
    Err(ConnectionError::InvalidParameters {
        reason: format!("{} needs USB support, built without the usb feature", settings.family),
    }
    .into())
}

/// Connect a stage described by `settings` over an existing link
///
/// Applies the configured timeouts and travel limits before connecting.
pub fn open_stage_on(settings: &StageSettings, link: Link) -> Result<Stage> {
    settings.validate()?;
    let mut stage =
        Stage::new(build_adapter(settings)?, link).with_timeouts(stage_timeouts(settings));
    stage.set_minimums(settings.minimums.clone().map(Vector::new).transpose()?)?;
    stage.set_maximums(settings.maximums.clone().map(Vector::new).transpose()?)?;
    stage.connect()?;
    Ok(stage)
}

/// Build, open and connect the stage described by `settings`
pub fn open_stage(settings: &StageSettings) -> Result<Stage> {
    settings.validate()?;
    open_stage_on(settings, build_link(settings)?)
}

/// Result of trying one candidate transport
#[derive(Debug)]
pub struct ProbeOutcome {
    /// Port name or USB serial number of the candidate
    pub candidate: String,
    pub result: Result<()>,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Try to connect on each candidate, using `make_link` to build its transport
pub fn probe_candidates(
    settings: &StageSettings,
    candidates: &[String],
    mut make_link: impl FnMut(&str) -> Result<Link>,
) -> Vec<ProbeOutcome> {
    candidates
        .iter()
        .map(|candidate| {
            let result = make_link(candidate)
                .and_then(|link| open_stage_on(settings, link))
                .map(|mut stage| stage.disconnect());
            match &result {
                Ok(()) => tracing::info!("{} stage answers on {}", settings.family, candidate),
                Err(e) => tracing::debug!("No {} stage on {}: {}", settings.family, candidate, e),
            }
            ProbeOutcome {
                candidate: candidate.clone(),
                result,
            }
        })
        .collect()
}

/// Try every transport that could reach the stage described by `settings`
///
/// Serial families try the configured port, or every candidate port
/// matching the family's USB identity. USB families try every matching
/// device.
pub fn probe(settings: &StageSettings) -> Result<Vec<ProbeOutcome>> {
    if settings.family.uses_usb() {
        return probe_usb(settings);
    }
    let candidates: Vec<String> = match &settings.port {
        Some(port) => vec![port.clone()],
        None => {
            let ids = FamilyProfile::for_family(settings.family).usb_ids;
            list_ports()?
                .into_iter()
                .filter(|p| {
                    p.matches(
                        ids.map(|(vid, _)| vid),
                        ids.map(|(_, pid)| pid),
                        settings.serial_number.as_deref(),
                    )
                })
                .map(|p| p.port_name)
                .collect()
        }
    };
    Ok(probe_candidates(settings, &candidates, |port| {
        Ok(Link::stream(SerialTransport::new(serial_settings(settings, port)?)))
    }))
}

#[cfg(feature = "usb")]
fn probe_usb(settings: &StageSettings) -> Result<Vec<ProbeOutcome>> {
    let (vid, pid) = FamilyProfile::for_family(settings.family)
        .usb_ids
        .ok_or_else(|| ConnectionError::InvalidParameters {
            reason: format!("{} has no USB identity", settings.family),
        })?;
    let candidates: Vec<String> = list_usb_devices(vid, pid)?
        .into_iter()
        .filter_map(|device| device.serial_number)
        .filter(|sn| settings.serial_number.as_ref().is_none_or(|wanted| wanted == sn))
        .collect();
    Ok(probe_candidates(settings, &candidates, |serial_number| {
        Ok(Link::control(UsbTransport::new(vid, pid, Some(serial_number.to_string()))))
    }))
}

#[cfg(not(feature = "usb"))]
fn probe_usb(settings: &StageSettings) -> Result<Vec<ProbeOutcome>> {
    usb_link(settings).map(|_| Vec::new())
}
