//! Serial port transport
//!
//! Provides port enumeration and a [`Transport`] over the `serialport`
//! crate. Every controller family declares its own line settings; see
//! [`crate::protocols::FamilyProfile`].

use super::Transport;
use serde::{Deserialize, Serialize};
use stagekit_core::{ConnectionError, Error, Result};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB FTDI Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    /// True when every given identity field matches
    pub fn matches(&self, vid: Option<u16>, pid: Option<u16>, serial_number: Option<&str>) -> bool {
        vid.is_none_or(|v| self.vid == Some(v))
            && pid.is_none_or(|p| self.pid == Some(p))
            && serial_number.is_none_or(|s| self.serial_number.as_deref() == Some(s))
    }
}

/// List serial ports that may host a stage controller
///
/// Only USB-serial, ACM and COM style ports are reported:
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => Ok(ports
            .iter()
            .filter(|port| is_candidate_port(&port.port_name))
            .map(|port| {
                let info = SerialPortInfo::new(&port.port_name, port_description(port));
                match &port.port_type {
                    serialport::SerialPortType::UsbPort(usb) => {
                        let mut info = info.with_usb_ids(usb.vid, usb.pid);
                        if let Some(mfg) = &usb.manufacturer {
                            info = info.with_manufacturer(mfg);
                        }
                        if let Some(serial) = &usb.serial_number {
                            info = info.with_serial_number(serial);
                        }
                        info
                    }
                    _ => info,
                }
            })
            .collect()),
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(Error::other(format!("Failed to enumerate ports: {}", e)))
        }
    }
}

/// Find the single port matching a USB identity
///
/// Fails when no port, or more than one port, matches.
pub fn find_port(
    vid: Option<u16>,
    pid: Option<u16>,
    serial_number: Option<&str>,
) -> Result<String> {
    let matching: Vec<SerialPortInfo> = list_ports()?
        .into_iter()
        .filter(|p| p.matches(vid, pid, serial_number))
        .collect();
    match matching.as_slice() {
        [only] => Ok(only.port_name.clone()),
        [] => Err(ConnectionError::PortNotFound {
            port: describe_identity(vid, pid, serial_number),
        }
        .into()),
        many => Err(Error::other(format!(
            "{} ports match {}, select one explicitly",
            many.len(),
            describe_identity(vid, pid, serial_number)
        ))),
    }
}

fn describe_identity(vid: Option<u16>, pid: Option<u16>, serial_number: Option<&str>) -> String {
    format!(
        "vid={} pid={} serial={}",
        vid.map_or("*".to_string(), |v| format!("{:04x}", v)),
        pid.map_or("*".to_string(), |p| format!("{:04x}", p)),
        serial_number.unwrap_or("*")
    )
}

fn is_candidate_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// Line settings for a serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: SerialParity,
    pub stop_bits: u8,
    pub flow_control: FlowControl,
}

impl SerialSettings {
    /// 8N1 without flow control
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: 8,
            parity: SerialParity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
        }
    }

    pub fn with_stop_bits(mut self, stop_bits: u8) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    fn builder(&self) -> Result<serialport::SerialPortBuilder> {
        let data_bits = match self.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => return Err(invalid(format!("Invalid data bits: {}", other))),
        };
        let stop_bits = match self.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => return Err(invalid(format!("Invalid stop bits: {}", other))),
        };
        let parity = match self.parity {
            SerialParity::None => serialport::Parity::None,
            SerialParity::Even => serialport::Parity::Even,
            SerialParity::Odd => serialport::Parity::Odd,
        };
        let flow_control = match self.flow_control {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        };

        Ok(serialport::new(&self.port, self.baud_rate)
            .timeout(Duration::from_millis(10))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control))
    }
}

fn invalid(reason: String) -> Error {
    ConnectionError::InvalidParameters { reason }.into()
}

/// Serial port transport
pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Transport for `settings`; the port is not opened until [`Transport::open`]
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }

    fn lost(&mut self, e: impl std::fmt::Display) -> Error {
        tracing::warn!("Serial port {} failed: {}", self.settings.port, e);
        self.port = None;
        ConnectionError::ConnectionLost {
            reason: format!("{}: {}", self.settings.port, e),
        }
        .into()
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        match self.settings.builder()?.open() {
            Ok(port) => {
                tracing::info!(
                    "Opened serial port {} at {} baud",
                    self.settings.port,
                    self.settings.baud_rate
                );
                self.port = Some(port);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", self.settings.port, e);
                Err(match e.kind() {
                    serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
                        port: self.settings.port.clone(),
                    },
                    _ => ConnectionError::FailedToOpen {
                        port: self.settings.port.clone(),
                        reason: e.to_string(),
                    },
                }
                .into())
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!("Closed serial port {}", self.settings.port);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        let result = port.write_all(data).and_then(|_| port.flush());
        result.map_err(|e| self.lost(e))
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port_mut()?;
        let result = port
            .set_timeout(timeout.max(Duration::from_millis(1)))
            .map_err(io::Error::from)
            .and_then(|_| port.read(buf));
        match result {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(self.lost(e)),
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        let port = self.port_mut()?;
        let result = port.clear(serialport::ClearBuffer::Input);
        result.map_err(|e| self.lost(e))
    }

    fn name(&self) -> String {
        self.settings.port.clone()
    }
}
