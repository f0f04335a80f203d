//! Controller protocol adapters
//!
//! Each supported controller family gets one adapter translating the
//! uniform capability set (handshake, home, read position, move, busy
//! query) into that family's command and reply grammar. Stopping, zeroing
//! the coordinates and relative moves are optional: families without a
//! command for them report [`Error::unsupported`], and relative moves fall
//! back to an absolute move from the current position. The set of families
//! is closed, so adapters are gathered in the [`Adapter`] enum rather than
//! behind trait objects.
//!
//! Adapters hold per-session configuration only (addresses, scales, homing
//! direction). They never cache positions; that is the stage's job.

pub mod corvus;
pub mod grbl;
pub mod m3fs;
pub mod pi;
pub mod smc100;
pub mod tic;

pub use corvus::Corvus;
pub use grbl::Grbl;
pub use m3fs::M3fs;
pub use pi::Pi;
pub use smc100::Smc100;
pub use tic::{HomingDirection, Tic};

use crate::communication::serial::{FlowControl, SerialSettings};
use crate::communication::Link;
use serde::{Deserialize, Serialize};
use stagekit_core::{ControllerFamily, Error, MotionPolicy, Result, Vector};
use std::time::{Duration, Instant};

/// Time bounds for blocking stage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    /// Bound on a single command/reply exchange
    pub response: Duration,
    /// Bound on a complete homing sequence
    pub homing: Duration,
    /// Bound on waiting for a move to finish
    pub motion: Duration,
    /// Delay between busy polls
    pub poll_interval: Duration,
}

impl StageTimeouts {
    pub fn new(response: Duration, homing: Duration, motion: Duration) -> Self {
        Self {
            response,
            homing,
            motion,
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
    }
}

/// Serial line defaults of a family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialDefaults {
    pub baud_rate: u32,
    pub stop_bits: u8,
    pub flow_control: FlowControl,
}

impl SerialDefaults {
    /// Line settings for `port` using these defaults
    pub fn settings(&self, port: impl Into<String>) -> SerialSettings {
        SerialSettings::new(port, self.baud_rate)
            .with_stop_bits(self.stop_bits)
            .with_flow_control(self.flow_control)
    }
}

/// Static description of a controller family
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyProfile {
    pub family: ControllerFamily,
    /// Line settings, for serial families
    pub serial: Option<SerialDefaults>,
    /// Vendor and product id, for USB families
    pub usb_ids: Option<(u16, u16)>,
    pub timeouts: StageTimeouts,
    pub motion_policy: MotionPolicy,
    /// The position query is read-only and may be re-issued once after a
    /// resynchronization
    pub retry_status_query: bool,
}

impl FamilyProfile {
    pub fn corvus() -> Self {
        Self {
            family: ControllerFamily::Corvus,
            serial: Some(SerialDefaults {
                baud_rate: 57_600,
                stop_bits: 1,
                flow_control: FlowControl::None,
            }),
            usb_ids: None,
            timeouts: StageTimeouts::default(),
            motion_policy: MotionPolicy::FireAndForget,
            retry_status_query: true,
        }
    }

    pub fn smc100() -> Self {
        Self {
            family: ControllerFamily::Smc100,
            serial: Some(SerialDefaults {
                baud_rate: 57_600,
                stop_bits: 1,
                flow_control: FlowControl::Software,
            }),
            usb_ids: None,
            timeouts: StageTimeouts::default(),
            motion_policy: MotionPolicy::FireAndForget,
            retry_status_query: true,
        }
    }

    pub fn m3fs() -> Self {
        Self {
            family: ControllerFamily::M3fs,
            serial: Some(SerialDefaults {
                baud_rate: 250_000,
                stop_bits: 2,
                flow_control: FlowControl::None,
            }),
            usb_ids: None,
            timeouts: StageTimeouts::new(
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ),
            motion_policy: MotionPolicy::WaitUntilIdle,
            retry_status_query: true,
        }
    }

    pub fn tic() -> Self {
        Self {
            family: ControllerFamily::Tic,
            serial: None,
            usb_ids: Some((tic::VENDOR_ID, tic::PRODUCT_ID)),
            timeouts: StageTimeouts::new(
                Duration::from_millis(500),
                Duration::from_secs(60),
                Duration::from_secs(60),
            )
            .with_poll_interval(Duration::from_millis(100)),
            motion_policy: MotionPolicy::FireAndForget,
            retry_status_query: false,
        }
    }

    pub fn grbl() -> Self {
        Self {
            family: ControllerFamily::Grbl,
            serial: Some(SerialDefaults {
                baud_rate: 115_200,
                stop_bits: 1,
                flow_control: FlowControl::None,
            }),
            usb_ids: None,
            timeouts: StageTimeouts::new(
                Duration::from_secs(1),
                Duration::from_secs(120),
                Duration::from_secs(120),
            ),
            motion_policy: MotionPolicy::FireAndForget,
            retry_status_query: true,
        }
    }

    pub fn pi() -> Self {
        Self {
            family: ControllerFamily::Pi,
            serial: Some(SerialDefaults {
                baud_rate: 115_200,
                stop_bits: 1,
                flow_control: FlowControl::None,
            }),
            usb_ids: Some((pi::VENDOR_ID, pi::PRODUCT_ID)),
            timeouts: StageTimeouts::default(),
            motion_policy: MotionPolicy::FireAndForget,
            retry_status_query: true,
        }
    }

    pub fn for_family(family: ControllerFamily) -> Self {
        match family {
            ControllerFamily::Corvus => Self::corvus(),
            ControllerFamily::Smc100 => Self::smc100(),
            ControllerFamily::M3fs => Self::m3fs(),
            ControllerFamily::Tic => Self::tic(),
            ControllerFamily::Grbl => Self::grbl(),
            ControllerFamily::Pi => Self::pi(),
        }
    }
}

/// Capability set every controller family implements
///
/// All exchanges are synchronous: one command in flight, every wait bounded
/// by `timeouts`.
pub trait StageProtocol: Send {
    fn family(&self) -> ControllerFamily;

    /// Number of axes, which is the dimension of every position
    fn axis_count(&self) -> usize;

    /// Verify the controller answers as expected and configure it
    fn handshake(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()>;

    /// Run the homing sequence and return once it completed
    fn home(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()>;

    /// Read the current position
    fn query_position(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<Vector>;

    /// Send a move to `target`, whose dimension is already checked
    fn move_to(&mut self, link: &mut Link, target: &Vector, timeouts: &StageTimeouts)
        -> Result<()>;

    /// True while the controller reports motion
    fn query_motion(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<bool>;

    /// Stop any motion in progress
    fn stop(&mut self, _link: &mut Link, _timeouts: &StageTimeouts) -> Result<()> {
        Err(Error::unsupported(self.family(), "stop"))
    }

    /// Make the current position the origin of the stage coordinates
    fn set_origin(&mut self, _link: &mut Link, _timeouts: &StageTimeouts) -> Result<()> {
        Err(Error::unsupported(self.family(), "set_origin"))
    }

    /// Send a move by `offset`, whose dimension is already checked
    fn move_relative(
        &mut self,
        link: &mut Link,
        offset: &Vector,
        timeouts: &StageTimeouts,
    ) -> Result<()> {
        let target = self.query_position(link, timeouts)?.checked_add(offset)?;
        self.move_to(link, &target, timeouts)
    }
}

/// One adapter per supported controller family
#[derive(Debug, Clone)]
pub enum Adapter {
    Corvus(Corvus),
    Smc100(Smc100),
    M3fs(M3fs),
    Tic(Tic),
    Grbl(Grbl),
    Pi(Pi),
}

macro_rules! dispatch {
    ($self:expr, $adapter:ident => $body:expr) => {
        match $self {
            Adapter::Corvus($adapter) => $body,
            Adapter::Smc100($adapter) => $body,
            Adapter::M3fs($adapter) => $body,
            Adapter::Tic($adapter) => $body,
            Adapter::Grbl($adapter) => $body,
            Adapter::Pi($adapter) => $body,
        }
    };
}

impl Adapter {
    /// Static description of this adapter's family
    pub fn profile(&self) -> FamilyProfile {
        FamilyProfile::for_family(self.family())
    }
}

impl StageProtocol for Adapter {
    fn family(&self) -> ControllerFamily {
        dispatch!(self, a => a.family())
    }

    fn axis_count(&self) -> usize {
        dispatch!(self, a => a.axis_count())
    }

    fn handshake(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        dispatch!(self, a => a.handshake(link, timeouts))
    }

    fn home(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        dispatch!(self, a => a.home(link, timeouts))
    }

    fn query_position(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<Vector> {
        dispatch!(self, a => a.query_position(link, timeouts))
    }

    fn move_to(
        &mut self,
        link: &mut Link,
        target: &Vector,
        timeouts: &StageTimeouts,
    ) -> Result<()> {
        dispatch!(self, a => a.move_to(link, target, timeouts))
    }

    fn query_motion(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<bool> {
        dispatch!(self, a => a.query_motion(link, timeouts))
    }

    fn stop(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        dispatch!(self, a => a.stop(link, timeouts))
    }

    fn set_origin(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        dispatch!(self, a => a.set_origin(link, timeouts))
    }

    fn move_relative(
        &mut self,
        link: &mut Link,
        offset: &Vector,
        timeouts: &StageTimeouts,
    ) -> Result<()> {
        dispatch!(self, a => a.move_relative(link, offset, timeouts))
    }
}

macro_rules! impl_from_adapter {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Adapter {
                fn from(adapter: $variant) -> Self {
                    Adapter::$variant(adapter)
                }
            }
        )*
    };
}

impl_from_adapter!(Corvus, Smc100, M3fs, Tic, Grbl, Pi);

/// Poll `done` every `poll_interval` until it returns true
///
/// Fails with a timeout once `timeout` has elapsed. Errors from `done`
/// end the wait immediately.
pub fn poll_until(
    what: &str,
    timeout: Duration,
    poll_interval: Duration,
    mut done: impl FnMut() -> Result<bool>,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if done()? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            tracing::warn!("{} did not finish within {}ms", what, timeout.as_millis());
            return Err(Error::timeout(timeout.as_millis() as u64));
        }
        std::thread::sleep(poll_interval);
    }
}

/// Parse a decimal reply field
pub(crate) fn parse_f64(field: &str, raw: &str) -> Result<f64> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::protocol(format!("'{}' is not a number", field.trim()), raw.as_bytes()))
}
