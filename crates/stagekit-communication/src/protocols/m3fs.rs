//! New Scale Technologies M3-FS focus module
//!
//! Framed ASCII protocol: commands are `<NN data>\r` with a two-digit
//! command id, replies are `<NN data>\r` echoing that id. Positions are
//! closed-loop encoder counts of 0.5 µm, carried as big-endian signed
//! hexadecimal.

use super::{StageProtocol, StageTimeouts};
use crate::communication::{Link, StreamChannel};
use stagekit_core::{ControllerFamily, CountScale, Error, Result, Vector};
use std::time::Duration;

/// Encoder resolution in micrometres per count
pub const RESOLUTION_UM: f64 = 0.5;

/// Firmware versions known to speak this protocol
pub const SUPPORTED_VERSIONS: &[&str] = &["4.7.3"];

/// Motor status bit set while the motor is running
const STATUS_RUNNING: u32 = 1 << 2;

/// Command ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    ReadFirmwareVersion = 1,
    MoveToTarget = 8,
    ClosedLoopStatus = 10,
}

/// Decoded closed-loop status (command 10)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedLoopStatus {
    pub motor_status: u32,
    pub position: i32,
    pub error: i32,
}

impl ClosedLoopStatus {
    pub fn is_moving(&self) -> bool {
        self.motor_status & STATUS_RUNNING != 0
    }
}

/// Wire bytes of a command
pub fn encode_command(command: Command, data: Option<&str>) -> Vec<u8> {
    match data {
        Some(data) => format!("<{:02} {}>\r", command as u8, data),
        None => format!("<{:02}>\r", command as u8),
    }
    .into_bytes()
}

/// Hex argument of a move to `counts`
pub fn encode_target(counts: i32) -> String {
    format!("{:08x}", counts)
}

/// Validate a raw reply frame and return its `NN data` body
pub fn decode_frame(raw: &[u8]) -> Result<&str> {
    let inner = raw
        .strip_prefix(b"<")
        .and_then(|rest| rest.strip_suffix(b">\r"))
        .ok_or_else(|| Error::protocol("reply is not framed as <...>\\r", raw))?;
    if inner.iter().any(|&b| b == b'\r' || b == b'<' || b == b'>') {
        return Err(Error::protocol("reply frame contains a delimiter", raw));
    }
    std::str::from_utf8(inner).map_err(|_| Error::protocol("reply is not valid UTF-8", raw))
}

/// Check the command id of a reply body and return its data, if any
pub fn split_reply(body: &str, command: Command) -> Result<Option<&str>> {
    let id = body
        .get(..2)
        .and_then(|id| id.parse::<u8>().ok())
        .ok_or_else(|| Error::protocol("reply has no command id", body.as_bytes()))?;
    if id != command as u8 {
        return Err(Error::protocol(
            format!("reply to command {:02} answers {:02}", command as u8, id),
            body.as_bytes(),
        ));
    }
    match &body[2..] {
        "" => Ok(None),
        rest => rest
            .strip_prefix(' ')
            .map(Some)
            .ok_or_else(|| Error::protocol("missing separator after command id", body.as_bytes())),
    }
}

/// Hex digits of the status word, position and position error fields
const STATUS_FIELD_WIDTHS: [usize; 3] = [6, 8, 8];

/// Decode a big-endian two's complement hex field of exactly `width` digits
fn decode_hex_field(field: &str, width: usize, signed: bool, raw: &str) -> Result<i64> {
    if field.len() != width || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::protocol(
            format!("expected {} hex digits, got '{}'", width, field),
            raw.as_bytes(),
        ));
    }
    let value = i64::from_str_radix(field, 16)
        .map_err(|_| Error::protocol(format!("bad hex field '{}'", field), raw.as_bytes()))?;
    let bits = width as u32 * 4;
    if signed && value & (1 << (bits - 1)) != 0 {
        Ok(value - (1i64 << bits))
    } else {
        Ok(value)
    }
}

/// Decode the data of a closed-loop status reply, `SSSSSS PPPPPPPP EEEEEEEE`
pub fn decode_status(data: &str) -> Result<ClosedLoopStatus> {
    let fields: Vec<&str> = data.split(' ').collect();
    if fields.len() != STATUS_FIELD_WIDTHS.len() {
        return Err(Error::protocol(
            format!("expected 3 status fields, got {}", fields.len()),
            data.as_bytes(),
        ));
    }
    let [status, position, error] = STATUS_FIELD_WIDTHS;
    Ok(ClosedLoopStatus {
        motor_status: decode_hex_field(fields[0], status, false, data)? as u32,
        position: decode_hex_field(fields[1], position, true, data)? as i32,
        error: decode_hex_field(fields[2], error, true, data)? as i32,
    })
}

/// M3-FS adapter (single axis)
#[derive(Debug, Clone)]
pub struct M3fs {
    scale: CountScale,
    supported_versions: Vec<String>,
}

impl Default for M3fs {
    fn default() -> Self {
        Self::new()
    }
}

impl M3fs {
    pub fn new() -> Self {
        Self {
            scale: CountScale::new(RESOLUTION_UM),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Accept an additional firmware version during the handshake
    pub fn with_supported_version(mut self, version: impl Into<String>) -> Self {
        self.supported_versions.push(version.into());
        self
    }

    pub fn scale(&self) -> CountScale {
        self.scale
    }

    fn command(
        channel: &mut StreamChannel,
        command: Command,
        data: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<String>> {
        channel.send(&encode_command(command, data))?;
        let raw = channel.read_until(b"\r", timeout)?;
        let body = decode_frame(&raw)?;
        Ok(split_reply(body, command)?.map(str::to_string))
    }

    fn closed_loop_status(
        channel: &mut StreamChannel,
        timeout: Duration,
    ) -> Result<ClosedLoopStatus> {
        let data = Self::command(channel, Command::ClosedLoopStatus, None, timeout)?
            .ok_or_else(|| Error::protocol("status reply without data", b"<10>\r".to_vec()))?;
        decode_status(&data)
    }

    fn is_supported(&self, version_reply: &str) -> bool {
        self.supported_versions
            .iter()
            .any(|v| version_reply == format!("1 VER {} M3-FS", v))
    }
}

impl StageProtocol for M3fs {
    fn family(&self) -> ControllerFamily {
        ControllerFamily::M3fs
    }

    fn axis_count(&self) -> usize {
        1
    }

    fn handshake(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let channel = link.channel()?;
        let reply = Self::command(channel, Command::ReadFirmwareVersion, None, timeouts.response)?
            .unwrap_or_default();
        if !self.is_supported(&reply) {
            return Err(Error::handshake(format!("unsupported firmware '{}'", reply)));
        }
        tracing::info!("M3-FS firmware: {}", reply);
        Ok(())
    }

    /// The module references its encoder at power-up, so homing only checks
    /// that the closed loop answers.
    fn home(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let status = Self::closed_loop_status(link.channel()?, timeouts.response)?;
        tracing::debug!("M3-FS closed loop at {} counts", status.position);
        Ok(())
    }

    fn query_position(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<Vector> {
        let status = Self::closed_loop_status(link.channel()?, timeouts.response)?;
        Vector::new(vec![self.scale.from_counts(status.position)])
    }

    fn move_to(
        &mut self,
        link: &mut Link,
        target: &Vector,
        timeouts: &StageTimeouts,
    ) -> Result<()> {
        let counts = self.scale.to_counts(target.x()?)?;
        Self::command(
            link.channel()?,
            Command::MoveToTarget,
            Some(&encode_target(counts)),
            timeouts.response,
        )?;
        Ok(())
    }

    fn query_motion(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<bool> {
        Ok(Self::closed_loop_status(link.channel()?, timeouts.response)?.is_moving())
    }
}
