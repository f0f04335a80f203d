//! Physik Instrumente controllers speaking GCS
//!
//! Each axis is a daisy-chained controller with its own address. Queries
//! are `{addr} CMD?` and are answered `0 {addr} payload`; a payload line
//! ending in a space continues on the next line. Plain commands are not
//! acknowledged, errors are read back with `ERR?`.

use super::{parse_f64, poll_until, StageProtocol, StageTimeouts};
use crate::communication::{Link, StreamChannel};
use stagekit_core::{ControllerFamily, Error, Result, Vector};
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

pub const VENDOR_ID: u16 = 0x1A72;
pub const PRODUCT_ID: u16 = 0x1007;

/// Valid daisy-chain addresses
pub const ADDRESS_RANGE: RangeInclusive<u8> = 1..=16;

/// Single-character motion status request
const REQUEST_MOTION: u8 = 0x05;

const ERROR_POS_OUT_OF_LIMITS: i32 = 7;
const ERROR_STOPPED_BY_COMMAND: i32 = 10;
const ERROR_SOFT_LIMIT_OUT_OF_RANGE: i32 = 27;

/// Describe a GCS controller error code
pub fn describe_error(code: i32) -> &'static str {
    match code {
        0 => "No error",
        1 => "Parameter syntax error",
        2 => "Unknown command",
        3 => "Command length out of limits or command buffer overrun",
        4 => "Error while scanning",
        5 => "Unallowable move attempted on unreferenced axis, or move attempted with servo off",
        6 => "Parameter for SGA not valid",
        7 => "Position out of limits",
        8 => "Velocity out of limits",
        10 => "Controller was stopped by command",
        15 => "Invalid axis identifier",
        17 => "Parameter out of range",
        23 => "Illegal axis",
        24 => "Incorrect number of parameters",
        25 => "Invalid floating point number",
        26 => "Parameter missing",
        27 => "Soft limit out of range",
        31 => "Axis has no reference sensor",
        32 => "Axis has no limit switch",
        34 => "Command not allowed for selected stage",
        45 => "Referencing failed",
        49 => "Move to limit switch failed",
        52 => "Controller detected communication error",
        53 => "MOV! motion still in progress",
        54 => "Unknown parameter",
        63 => "Initialization still in progress",
        64 => "Parameter is read-only",
        66 => "Voltage out of limits",
        _ => "Unknown controller error",
    }
}

/// Shared error for a non-zero `ERR?` code
pub fn error_code(address: u8, code: i32) -> Error {
    let message = format!("axis {}: error {} ({})", address, code, describe_error(code));
    match code {
        ERROR_POS_OUT_OF_LIMITS | ERROR_SOFT_LIMIT_OUT_OF_RANGE => {
            Error::out_of_range_code(code.unsigned_abs(), message)
        }
        _ => Error::device_fault(code.unsigned_abs(), message),
    }
}

/// Wire bytes of a query
pub fn encode_query(address: u8, command: &str) -> Vec<u8> {
    format!("{} {}?\n", address, command).into_bytes()
}

/// Wire bytes of an unacknowledged command
pub fn encode_command(address: u8, command: &str) -> Vec<u8> {
    format!("{} {}\n", address, command).into_bytes()
}

/// Wire bytes of the motion status request, which has no terminator
pub fn encode_motion_request(address: u8) -> Vec<u8> {
    let mut bytes = format!("{} ", address).into_bytes();
    bytes.push(REQUEST_MOTION);
    bytes
}

/// Check the `0 {addr}` header of a reply line and return its payload
pub fn decode_reply(line: &str, address: u8) -> Result<&str> {
    let mut parts = line.splitn(3, ' ');
    let target = parts.next().and_then(|p| p.parse::<u8>().ok());
    let source = parts.next().and_then(|p| p.parse::<u8>().ok());
    match (target, source, parts.next()) {
        (Some(0), Some(source), Some(payload)) if source == address => Ok(payload),
        _ => Err(Error::protocol(
            format!("expected a reply '0 {} payload'", address),
            line.as_bytes(),
        )),
    }
}

/// Decode a `POS?` payload of the form `1=value`
pub fn decode_position(payload: &str) -> Result<f64> {
    match payload.trim().split_once('=') {
        Some(("1", value)) => parse_f64(value, payload),
        _ => Err(Error::protocol("expected '1=<position>'", payload.as_bytes())),
    }
}

/// PI GCS adapter, one axis per address
#[derive(Debug, Clone)]
pub struct Pi {
    addresses: Vec<u8>,
    reference_forward: bool,
}

impl Pi {
    /// Adapter for the controllers at `addresses`, in axis order
    pub fn new(addresses: Vec<u8>) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::out_of_range("at least one controller address is required"));
        }
        if let Some(bad) = addresses.iter().find(|a| !ADDRESS_RANGE.contains(*a)) {
            return Err(Error::out_of_range(format!(
                "PI address {} outside {:?}",
                bad, ADDRESS_RANGE
            )));
        }
        Ok(Self {
            addresses,
            reference_forward: false,
        })
    }

    /// Reference against the positive limit switch instead of the negative one
    pub fn with_forward_reference(mut self, forward: bool) -> Self {
        self.reference_forward = forward;
        self
    }

    pub fn addresses(&self) -> &[u8] {
        &self.addresses
    }

    fn read_reply_line(channel: &mut StreamChannel, timeout: Duration) -> Result<String> {
        let raw = channel.read_until(b"\n", timeout)?;
        String::from_utf8(raw)
            .map_err(|e| Error::protocol("reply is not valid UTF-8", e.into_bytes()))
    }

    /// Send a query and collect the payload lines of its reply
    fn query(
        channel: &mut StreamChannel,
        address: u8,
        command: &str,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        channel.send(&encode_query(address, command))?;
        let deadline = Instant::now() + timeout;
        let mut payloads = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(timeout.as_millis() as u64));
            }
            let line = Self::read_reply_line(channel, remaining)?;
            let continued = line.ends_with(" \n");
            let text = line.trim_end_matches(['\r', '\n']).trim_end();
            payloads.push(decode_reply(text, address)?.trim().to_string());
            if !continued {
                return Ok(payloads);
            }
        }
    }

    fn single(
        channel: &mut StreamChannel,
        address: u8,
        command: &str,
        timeout: Duration,
    ) -> Result<String> {
        let mut payloads = Self::query(channel, address, command, timeout)?;
        match payloads.len() {
            1 => Ok(payloads.remove(0)),
            n => Err(Error::protocol(
                format!("{} expected one reply line, got {}", command, n),
                payloads.join("\n").into_bytes(),
            )),
        }
    }

    /// Read and clear the last error code of `address`
    fn read_error(channel: &mut StreamChannel, address: u8, timeout: Duration) -> Result<i32> {
        let payload = Self::single(channel, address, "ERR", timeout)?;
        payload
            .parse::<i32>()
            .map_err(|_| Error::protocol("error code is not an integer", payload.as_bytes()))
    }

    fn check_error(channel: &mut StreamChannel, address: u8, timeout: Duration) -> Result<()> {
        match Self::read_error(channel, address, timeout)? {
            0 => Ok(()),
            code => Err(error_code(address, code)),
        }
    }

    fn axis_moving(channel: &mut StreamChannel, address: u8, timeout: Duration) -> Result<bool> {
        channel.send(&encode_motion_request(address))?;
        let line = Self::read_reply_line(channel, timeout)?;
        let payload = decode_reply(line.trim(), address)?;
        Ok(payload.trim() != "0")
    }
}

impl StageProtocol for Pi {
    fn family(&self) -> ControllerFamily {
        ControllerFamily::Pi
    }

    fn axis_count(&self) -> usize {
        self.addresses.len()
    }

    fn handshake(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let channel = link.channel()?;
        for &address in &self.addresses {
            let idn = Self::query(channel, address, "*IDN", timeouts.response)?.join(" ");
            if idn.is_empty() {
                return Err(Error::handshake(format!(
                    "axis {} sent an empty identification",
                    address
                )));
            }
            tracing::info!("PI axis {}: {}", address, idn);
        }
        Ok(())
    }

    fn home(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let channel = link.channel()?;
        let reference = if self.reference_forward { "FPL 1" } else { "FNL 1" };
        for &address in &self.addresses {
            channel.send(&encode_command(address, "SVO 1 1"))?;
            channel.send(&encode_command(address, reference))?;
            Self::check_error(channel, address, timeouts.response)?;
        }
        poll_until("PI referencing", timeouts.homing, timeouts.poll_interval, || {
            self.query_motion(link, timeouts).map(|moving| !moving)
        })
    }

    fn query_position(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<Vector> {
        let channel = link.channel()?;
        let positions = self
            .addresses
            .iter()
            .map(|&address| {
                let payload = Self::single(channel, address, "POS", timeouts.response)?;
                decode_position(&payload)
            })
            .collect::<Result<Vec<f64>>>()?;
        Vector::new(positions)
    }

    fn move_to(
        &mut self,
        link: &mut Link,
        target: &Vector,
        timeouts: &StageTimeouts,
    ) -> Result<()> {
        let channel = link.channel()?;
        for (&address, value) in self.addresses.iter().zip(target.iter()) {
            channel.send(&encode_command(address, &format!("MOV 1 {}", value)))?;
            Self::check_error(channel, address, timeouts.response)?;
        }
        Ok(())
    }

    fn query_motion(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<bool> {
        let channel = link.channel()?;
        for &address in &self.addresses {
            if Self::axis_moving(channel, address, timeouts.response)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Halt every axis; the controller then latches "stopped by command",
    /// which is read back and cleared here.
    fn stop(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let channel = link.channel()?;
        for &address in &self.addresses {
            channel.send(&encode_command(address, "STP"))?;
        }
        for &address in &self.addresses {
            match Self::read_error(channel, address, timeouts.response)? {
                0 | ERROR_STOPPED_BY_COMMAND => {}
                code => return Err(error_code(address, code)),
            }
        }
        Ok(())
    }
}
