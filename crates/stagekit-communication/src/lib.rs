//! # StageKit Communication
//!
//! Transports, controller protocol adapters and the [`Stage`] façade.
//! Supports serial ports for line and frame protocols and, with the `usb`
//! feature, USB vendor control transfers.

pub mod communication;
pub mod protocols;
pub mod stage;

pub use communication::{
    mock::{MockControlTransport, MockTransport},
    serial::{
        find_port, list_ports, FlowControl, SerialParity, SerialPortInfo, SerialSettings,
        SerialTransport,
    },
    ControlTransport, Link, StreamChannel, Transport,
};

#[cfg(feature = "usb")]
pub use communication::usb::{list_usb_devices, UsbDeviceInfo, UsbTransport};

pub use protocols::{
    Adapter, Corvus, FamilyProfile, Grbl, HomingDirection, M3fs, Pi, Smc100, StageProtocol,
    StageTimeouts, Tic,
};
pub use stage::Stage;
