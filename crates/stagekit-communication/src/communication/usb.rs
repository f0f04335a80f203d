//! USB control-transfer transport
//!
//! Talks to devices that expose a vendor control interface instead of a
//! virtual serial port. Built on `rusb` and only compiled with the `usb`
//! feature.

use super::ControlTransport;
use rusb::{Device, DeviceHandle, GlobalContext, UsbContext};
use stagekit_core::{ConnectionError, Error, Result};
use std::time::Duration;

const DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(200);

/// Information about a connected USB device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub vid: u16,
    pub pid: u16,
    pub bus: u8,
    pub address: u8,
    /// Serial number string, if the device reports one
    pub serial_number: Option<String>,
}

/// List connected devices with the given vendor and product ids
pub fn list_usb_devices(vid: u16, pid: u16) -> Result<Vec<UsbDeviceInfo>> {
    let devices = rusb::devices().map_err(|e| {
        tracing::error!("Failed to enumerate USB devices: {}", e);
        Error::other(format!("Failed to enumerate USB devices: {}", e))
    })?;

    Ok(devices
        .iter()
        .filter(|device| matches_ids(device, vid, pid))
        .map(|device| UsbDeviceInfo {
            vid,
            pid,
            bus: device.bus_number(),
            address: device.address(),
            serial_number: read_serial_number(&device),
        })
        .collect())
}

fn matches_ids<T: UsbContext>(device: &Device<T>, vid: u16, pid: u16) -> bool {
    device
        .device_descriptor()
        .map(|desc| desc.vendor_id() == vid && desc.product_id() == pid)
        .unwrap_or(false)
}

fn read_serial_number<T: UsbContext>(device: &Device<T>) -> Option<String> {
    let desc = device.device_descriptor().ok()?;
    let handle = device.open().ok()?;
    let language = handle.read_languages(DESCRIPTOR_TIMEOUT).ok()?.into_iter().next()?;
    handle
        .read_serial_number_string(language, &desc, DESCRIPTOR_TIMEOUT)
        .ok()
}

/// Map a `rusb` failure onto the shared error taxonomy
pub fn map_usb_error(e: rusb::Error, timeout: Duration) -> Error {
    match e {
        rusb::Error::Timeout => Error::timeout(timeout.as_millis() as u64),
        rusb::Error::Pipe => Error::device_fault(0, "control request stalled by the device"),
        rusb::Error::Overflow => {
            Error::protocol("device sent more data than requested", Vec::new())
        }
        rusb::Error::NoDevice | rusb::Error::Io | rusb::Error::Interrupted => {
            Error::connection_lost(e.to_string())
        }
        other => ConnectionError::IoError {
            reason: other.to_string(),
        }
        .into(),
    }
}

/// Vendor control-transfer transport for one USB device
pub struct UsbTransport {
    vid: u16,
    pid: u16,
    serial_number: Option<String>,
    handle: Option<DeviceHandle<GlobalContext>>,
}

impl UsbTransport {
    /// Transport for the first device matching `vid`/`pid` and, if given,
    /// `serial_number`. The device is not opened until
    /// [`ControlTransport::open`].
    pub fn new(vid: u16, pid: u16, serial_number: Option<String>) -> Self {
        Self {
            vid,
            pid,
            serial_number,
            handle: None,
        }
    }

    fn handle(&self) -> Result<&DeviceHandle<GlobalContext>> {
        self.handle
            .as_ref()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }

    fn fail(&mut self, e: rusb::Error, timeout: Duration) -> Error {
        let err = map_usb_error(e, timeout);
        if err.is_connection_error() {
            tracing::warn!("{} lost: {}", self.name(), e);
            self.handle = None;
        }
        err
    }
}

impl ControlTransport for UsbTransport {
    fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let devices = rusb::devices().map_err(|e| ConnectionError::FailedToOpen {
            port: self.name(),
            reason: e.to_string(),
        })?;

        for device in devices.iter() {
            if !matches_ids(&device, self.vid, self.pid) {
                continue;
            }
            if let Some(wanted) = &self.serial_number {
                if read_serial_number(&device).as_deref() != Some(wanted.as_str()) {
                    continue;
                }
            }
            let handle = device.open().map_err(|e| {
                tracing::warn!("Failed to open {}: {}", self.name(), e);
                ConnectionError::FailedToOpen {
                    port: self.name(),
                    reason: e.to_string(),
                }
            })?;
            tracing::info!(
                "Opened USB device {} on bus {} address {}",
                self.name(),
                device.bus_number(),
                device.address()
            );
            self.handle = Some(handle);
            return Ok(());
        }

        Err(ConnectionError::DeviceNotFound {
            vid: self.vid,
            pid: self.pid,
        }
        .into())
    }

    fn close(&mut self) {
        if self.handle.take().is_some() {
            tracing::info!("Closed USB device {}", self.name());
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        let result = self
            .handle()?
            .write_control(request_type, request, value, index, data, timeout);
        result.map_err(|e| self.fail(e, timeout))
    }

    fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let result = self
            .handle()?
            .read_control(request_type, request, value, index, buf, timeout);
        result.map_err(|e| self.fail(e, timeout))
    }

    fn name(&self) -> String {
        match &self.serial_number {
            Some(serial) => format!("usb:{:04x}:{:04x}:{}", self.vid, self.pid, serial),
            None => format!("usb:{:04x}:{:04x}", self.vid, self.pid),
        }
    }
}
