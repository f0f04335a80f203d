//! Transport layer
//!
//! Byte-level links to controllers. Two shapes exist:
//! - [`Transport`]: a byte stream with bounded reads (serial ports)
//! - [`ControlTransport`]: vendor control transfers (USB devices)
//!
//! A [`Link`] owns exactly one of them for the lifetime of a stage session.

pub mod framing;
pub mod mock;
pub mod serial;
#[cfg(feature = "usb")]
pub mod usb;

pub use framing::{StreamChannel, TextLine};

use stagekit_core::{ConnectionError, Result};
use std::time::Duration;

/// Byte-stream transport
pub trait Transport: Send {
    /// Acquire the underlying device
    fn open(&mut self) -> Result<()>;

    /// Release the underlying device. Idempotent.
    fn close(&mut self);

    /// True while the device is held
    fn is_open(&self) -> bool;

    /// Write every byte of `data`
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever is available, waiting at most `timeout`
    ///
    /// Returns `Ok(0)` when nothing arrived in time. Transport failures are
    /// connection errors.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Discard bytes received but not yet read
    fn clear_input(&mut self) -> Result<()>;

    /// Human-readable name for logs
    fn name(&self) -> String;
}

/// USB vendor control-transfer transport
pub trait ControlTransport: Send {
    /// Acquire the underlying device
    fn open(&mut self) -> Result<()>;

    /// Release the underlying device. Idempotent.
    fn close(&mut self);

    /// True while the device is held
    fn is_open(&self) -> bool;

    /// Host-to-device transfer, returns the number of bytes written
    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Device-to-host transfer, returns the number of bytes read into `buf`
    fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Human-readable name for logs
    fn name(&self) -> String;
}

/// The transport owned by a stage session
pub enum Link {
    /// Byte stream with a framing buffer
    Stream(StreamChannel),
    /// Control-transfer device
    Control(Box<dyn ControlTransport>),
}

impl Link {
    /// Wrap a byte-stream transport
    pub fn stream(transport: impl Transport + 'static) -> Self {
        Self::Stream(StreamChannel::new(Box::new(transport)))
    }

    /// Wrap a control-transfer transport
    pub fn control(transport: impl ControlTransport + 'static) -> Self {
        Self::Control(Box::new(transport))
    }

    pub fn open(&mut self) -> Result<()> {
        match self {
            Self::Stream(channel) => channel.open(),
            Self::Control(transport) => transport.open(),
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Stream(channel) => channel.close(),
            Self::Control(transport) => transport.close(),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Self::Stream(channel) => channel.is_open(),
            Self::Control(transport) => transport.is_open(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Stream(channel) => channel.name(),
            Self::Control(transport) => transport.name(),
        }
    }

    /// Drop buffered input, used before re-issuing a status query
    pub fn resync(&mut self) -> Result<()> {
        match self {
            Self::Stream(channel) => channel.flush_input(),
            Self::Control(_) => Ok(()),
        }
    }

    /// The byte-stream channel, for line and frame protocols
    pub fn channel(&mut self) -> Result<&mut StreamChannel> {
        match self {
            Self::Stream(channel) => Ok(channel),
            Self::Control(transport) => Err(ConnectionError::InvalidParameters {
                reason: format!("{} is not a byte-stream transport", transport.name()),
            }
            .into()),
        }
    }

    /// The control-transfer device, for USB protocols
    pub fn control_transport(&mut self) -> Result<&mut dyn ControlTransport> {
        match self {
            Self::Control(transport) => Ok(transport.as_mut()),
            Self::Stream(channel) => Err(ConnectionError::InvalidParameters {
                reason: format!("{} is not a control-transfer transport", channel.name()),
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => write!(f, "Link::Stream({})", self.name()),
            Self::Control(_) => write!(f, "Link::Control({})", self.name()),
        }
    }
}
