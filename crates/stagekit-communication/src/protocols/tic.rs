//! Pololu Tic stepper motor controller over USB
//!
//! The Tic exposes a vendor control interface. Commands are OUT transfers
//! whose request code is the command and whose value/index words carry the
//! argument; variables are read back with IN transfers. Positions are
//! microsteps, scaled to user units by a configurable steps-per-unit.

use super::{poll_until, StageProtocol, StageTimeouts};
use crate::communication::{ControlTransport, Link};
use serde::{Deserialize, Serialize};
use stagekit_core::{ControllerFamily, CountScale, Error, Result, Vector};
use std::time::Duration;

pub const VENDOR_ID: u16 = 0x1FFB;
pub const PRODUCT_ID: u16 = 0x00B5;

const REQUEST_OUT: u8 = 0x40;
const REQUEST_IN: u8 = 0xC0;

/// Homing flag in the misc flags variable
const MISC_HOMING_ACTIVE: u8 = 1 << 4;

/// Error status bits that only mean the motor is not driven yet
const ERROR_INTENTIONALLY_DEENERGIZED: u16 = 1 << 0;
const ERROR_SAFE_START_VIOLATION: u16 = 1 << 7;

/// Command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TicCommand {
    ExitSafeStart = 0x83,
    Energize = 0x85,
    HaltAndHold = 0x89,
    GoHome = 0x97,
    GetVariable = 0xA1,
    SetTargetPosition = 0xE0,
}

/// Readable variables as (offset, size, signed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicVariable {
    OperationState,
    MiscFlags,
    ErrorStatus,
    TargetPosition,
    CurrentPosition,
}

impl TicVariable {
    fn layout(self) -> (u16, usize, bool) {
        match self {
            Self::OperationState => (0x00, 1, false),
            Self::MiscFlags => (0x01, 1, false),
            Self::ErrorStatus => (0x02, 2, false),
            Self::TargetPosition => (0x0A, 4, true),
            Self::CurrentPosition => (0x22, 4, true),
        }
    }
}

/// Direction of the homing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomingDirection {
    #[default]
    Reverse = 0,
    Forward = 1,
}

/// Operation states reported once the controller is up
const VALID_OPERATION_STATES: [u8; 6] = [0, 2, 4, 6, 8, 10];

/// Decode a little-endian variable of `size` bytes
pub fn decode_variable(bytes: &[u8], signed: bool) -> i64 {
    let mut value: i64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        value |= (b as i64) << (8 * i);
    }
    let bits = 8 * bytes.len() as u32;
    if signed && bits > 0 && bits < 64 && value & (1 << (bits - 1)) != 0 {
        value -= 1i64 << bits;
    }
    value
}

/// Split a 32-bit argument into the (value, index) words of a transfer
pub fn split_32(data: i32) -> (u16, u16) {
    let raw = data as u32;
    ((raw & 0xFFFF) as u16, (raw >> 16) as u16)
}

/// Describe the error status bits that block motion, if any
pub fn blocking_errors(status: u16) -> Option<String> {
    const NAMES: [&str; 10] = [
        "intentionally de-energized",
        "motor driver error",
        "low VIN",
        "kill switch active",
        "required input invalid",
        "serial error",
        "command timeout",
        "safe start violation",
        "ERR line high",
        "encoder skip",
    ];
    let blocking = status & !(ERROR_INTENTIONALLY_DEENERGIZED | ERROR_SAFE_START_VIOLATION);
    if blocking == 0 {
        return None;
    }
    let names: Vec<String> = (0..16)
        .filter(|bit| blocking & (1 << bit) != 0)
        .map(|bit| match NAMES.get(bit) {
            Some(name) => name.to_string(),
            None => format!("bit {}", bit),
        })
        .collect();
    Some(names.join(", "))
}

/// Tic adapter (single axis)
#[derive(Debug, Clone)]
pub struct Tic {
    scale: CountScale,
    homing_direction: HomingDirection,
}

impl Default for Tic {
    fn default() -> Self {
        Self::new()
    }
}

impl Tic {
    /// Adapter exchanging raw steps, homing in reverse
    pub fn new() -> Self {
        Self {
            scale: CountScale::new(1.0),
            homing_direction: HomingDirection::Reverse,
        }
    }

    pub fn with_steps_per_unit(mut self, steps_per_unit: f64) -> Self {
        self.scale = CountScale::per_unit(steps_per_unit);
        self
    }

    pub fn with_homing_direction(mut self, direction: HomingDirection) -> Self {
        self.homing_direction = direction;
        self
    }

    pub fn scale(&self) -> CountScale {
        self.scale
    }

    fn quick(
        device: &mut dyn ControlTransport,
        command: TicCommand,
        timeout: Duration,
    ) -> Result<()> {
        tracing::debug!("Tic quick {:?}", command);
        device.control_out(REQUEST_OUT, command as u8, 0, 0, &[], timeout)?;
        Ok(())
    }

    fn write_7(
        device: &mut dyn ControlTransport,
        command: TicCommand,
        data: u8,
        timeout: Duration,
    ) -> Result<()> {
        tracing::debug!("Tic {:?} {}", command, data);
        device.control_out(REQUEST_OUT, command as u8, (data & 0x7F) as u16, 0, &[], timeout)?;
        Ok(())
    }

    fn write_32(
        device: &mut dyn ControlTransport,
        command: TicCommand,
        data: i32,
        timeout: Duration,
    ) -> Result<()> {
        tracing::debug!("Tic {:?} {}", command, data);
        let (value, index) = split_32(data);
        device.control_out(REQUEST_OUT, command as u8, value, index, &[], timeout)?;
        Ok(())
    }

    fn variable(
        device: &mut dyn ControlTransport,
        variable: TicVariable,
        timeout: Duration,
    ) -> Result<i64> {
        let (offset, size, signed) = variable.layout();
        let mut buf = [0u8; 4];
        let n = device.control_in(
            REQUEST_IN,
            TicCommand::GetVariable as u8,
            0,
            offset,
            &mut buf[..size],
            timeout,
        )?;
        if n != size {
            return Err(Error::protocol(
                format!("{:?} returned {} of {} bytes", variable, n, size),
                buf[..n].to_vec(),
            ));
        }
        Ok(decode_variable(&buf[..size], signed))
    }

    fn check_errors(device: &mut dyn ControlTransport, timeout: Duration) -> Result<()> {
        let status = Self::variable(device, TicVariable::ErrorStatus, timeout)? as u16;
        match blocking_errors(status) {
            Some(description) => Err(Error::device_fault(status as u32, description)),
            None => Ok(()),
        }
    }

    fn homing_active(device: &mut dyn ControlTransport, timeout: Duration) -> Result<bool> {
        let flags = Self::variable(device, TicVariable::MiscFlags, timeout)? as u8;
        Ok(flags & MISC_HOMING_ACTIVE != 0)
    }
}

impl StageProtocol for Tic {
    fn family(&self) -> ControllerFamily {
        ControllerFamily::Tic
    }

    fn axis_count(&self) -> usize {
        1
    }

    fn handshake(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let device = link.control_transport()?;
        Self::quick(device, TicCommand::Energize, timeouts.response)?;
        Self::quick(device, TicCommand::ExitSafeStart, timeouts.response)?;
        let state = Self::variable(device, TicVariable::OperationState, timeouts.response)?;
        if !VALID_OPERATION_STATES.contains(&(state as u8)) {
            return Err(Error::handshake(format!("unknown operation state {}", state)));
        }
        tracing::debug!("Tic energized, operation state {}", state);
        Ok(())
    }

    fn home(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let device = link.control_transport()?;
        Self::check_errors(device, timeouts.response)?;
        Self::write_7(device, TicCommand::GoHome, self.homing_direction as u8, timeouts.response)?;
        poll_until("Tic homing", timeouts.homing, timeouts.poll_interval, || {
            if !Self::homing_active(device, timeouts.response)? {
                return Ok(true);
            }
            // A safe start latch would otherwise stall the homing run.
            Self::quick(device, TicCommand::ExitSafeStart, timeouts.response)?;
            Ok(false)
        })
    }

    fn query_position(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<Vector> {
        let steps = Self::variable(
            link.control_transport()?,
            TicVariable::CurrentPosition,
            timeouts.response,
        )?;
        Vector::new(vec![self.scale.from_counts(steps as i32)])
    }

    fn move_to(
        &mut self,
        link: &mut Link,
        target: &Vector,
        timeouts: &StageTimeouts,
    ) -> Result<()> {
        let steps = self.scale.to_counts(target.x()?)?;
        let device = link.control_transport()?;
        Self::check_errors(device, timeouts.response)?;
        Self::write_32(device, TicCommand::SetTargetPosition, steps, timeouts.response)
    }

    fn query_motion(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<bool> {
        let device = link.control_transport()?;
        if Self::homing_active(device, timeouts.response)? {
            return Ok(true);
        }
        let current = Self::variable(device, TicVariable::CurrentPosition, timeouts.response)?;
        let target = Self::variable(device, TicVariable::TargetPosition, timeouts.response)?;
        Ok(current != target)
    }

    /// Halt and hold: the target becomes the current position.
    fn stop(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        Self::quick(link.control_transport()?, TicCommand::HaltAndHold, timeouts.response)
    }
}
