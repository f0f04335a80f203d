//! GRBL based CNC routers
//!
//! Line protocol at 115200 baud. Commands end in LF and are acknowledged
//! by `ok` or `error:<n>`; the controller may interleave status reports,
//! bracketed messages and alarms. Positions are millimetres in machine
//! coordinates.

pub mod error_decoder;
pub mod response_parser;
pub mod status_parser;

pub use response_parser::GrblResponse;
pub use status_parser::{MachineState, StatusReport};

use super::{StageProtocol, StageTimeouts};
use crate::communication::{Link, StreamChannel};
use stagekit_core::{ControllerFamily, Error, Result, Vector};
use std::time::{Duration, Instant};

/// Realtime soft-reset byte
const SOFT_RESET: u8 = 0x18;

const UNLOCK_HINT: &str = "[MSG:'$H'|'$X' to unlock]";
const UNLOCKED: &str = "[MSG:Caution: Unlocked]";

const AXIS_LETTERS: [char; 3] = ['X', 'Y', 'Z'];

/// Rapid move to an absolute target
pub fn encode_move(target: &[f64]) -> String {
    let words: Vec<String> = target
        .iter()
        .zip(AXIS_LETTERS)
        .map(|(value, letter)| format!("{}{}", letter, value))
        .collect();
    format!("G0 {}", words.join(" "))
}

/// Zero the work coordinates of the first `axes` axes at the current position
pub fn encode_origin(axes: usize) -> String {
    let words: Vec<String> = AXIS_LETTERS
        .iter()
        .take(axes)
        .map(|letter| format!("{}0", letter))
        .collect();
    format!("G92 {}", words.join(" "))
}

/// GRBL adapter for one to three axes
#[derive(Debug, Clone)]
pub struct Grbl {
    axes: usize,
    /// Last work coordinate offset reported by the controller
    work_offset: Option<Vec<f64>>,
}

impl Default for Grbl {
    fn default() -> Self {
        Self {
            axes: AXIS_LETTERS.len(),
            work_offset: None,
        }
    }
}

impl Grbl {
    /// Three-axis adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter driving the first `axes` axes
    pub fn with_axes(axes: usize) -> Result<Self> {
        if axes == 0 || axes > AXIS_LETTERS.len() {
            return Err(Error::out_of_range(format!(
                "GRBL drives 1 to {} axes, not {}",
                AXIS_LETTERS.len(),
                axes
            )));
        }
        Ok(Self {
            axes,
            work_offset: None,
        })
    }

    fn send_line(channel: &mut StreamChannel, command: &str) -> Result<()> {
        channel.send_str(&format!("{}\n", command))
    }

    /// Read lines until `ok`, returning the lines read before it
    ///
    /// Status reports and echoes of `command` are skipped. `error:` and
    /// `ALARM:` replies end the exchange with the matching error.
    fn read_until_ok(
        channel: &mut StreamChannel,
        command: &str,
        timeout: Duration,
    ) -> Result<Vec<String>> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(timeout.as_millis() as u64));
            }
            let line = channel.read_line(remaining)?;
            match response_parser::parse_line(&line)? {
                None | Some(GrblResponse::Status(_)) => {}
                Some(GrblResponse::Ok) => return Ok(lines),
                Some(GrblResponse::Error(code)) => return Err(error_decoder::error_reply(code)),
                Some(GrblResponse::Alarm(code)) => return Err(error_decoder::alarm_report(code)),
                Some(GrblResponse::Text(text)) if text == command => {}
                Some(_) => lines.push(line),
            }
        }
    }

    /// Request and read one status report
    pub fn status(
        &mut self,
        channel: &mut StreamChannel,
        timeout: Duration,
    ) -> Result<StatusReport> {
        // Realtime command, no line terminator.
        channel.send(b"?")?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(timeout.as_millis() as u64));
            }
            let line = channel.read_line(remaining)?;
            match response_parser::parse_line(&line)? {
                Some(GrblResponse::Status(report)) => {
                    if let Some(wco) = &report.wco {
                        self.work_offset = Some(wco.clone());
                    }
                    return Ok(report);
                }
                Some(GrblResponse::Alarm(code)) => return Err(error_decoder::alarm_report(code)),
                Some(GrblResponse::Text(_)) | Some(GrblResponse::Welcome(_)) => {
                    return Err(Error::protocol("expected a status report", line.as_bytes()));
                }
                _ => {}
            }
        }
    }

    /// Soft-reset handshake, unlocking the controller if it asks for it
    fn reset_and_unlock(channel: &mut StreamChannel, timeout: Duration) -> Result<()> {
        channel.flush_input()?;
        channel.send(&[SOFT_RESET])?;
        channel.send(b"\n")?;
        let lines = Self::read_until_ok(channel, "", timeout)?;

        let banner = lines.first().map(String::as_str).unwrap_or_default();
        if !response_parser::is_welcome(banner) {
            return Err(Error::handshake(format!("unexpected banner '{}'", banner)));
        }
        tracing::info!("{}", banner);

        if lines.iter().any(|line| line == UNLOCK_HINT) {
            tracing::warn!("GRBL is locked, unlocking with $X");
            Self::send_line(channel, "$X")?;
            let reply = Self::read_until_ok(channel, "$X", timeout)?;
            if !reply.iter().any(|line| line == UNLOCKED) {
                return Err(Error::handshake("GRBL did not confirm the unlock"));
            }
        }
        Ok(())
    }
}

impl StageProtocol for Grbl {
    fn family(&self) -> ControllerFamily {
        ControllerFamily::Grbl
    }

    fn axis_count(&self) -> usize {
        self.axes
    }

    fn handshake(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        self.work_offset = None;
        Self::reset_and_unlock(link.channel()?, timeouts.response)
    }

    fn home(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let channel = link.channel()?;
        Self::send_line(channel, "$H")?;
        Self::read_until_ok(channel, "$H", timeouts.homing)?;
        Ok(())
    }

    fn query_position(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<Vector> {
        let report = self.status(link.channel()?, timeouts.response)?;
        let position = report
            .machine_position(self.work_offset.as_deref())
            .ok_or_else(|| {
                Error::protocol("status report without a usable position", report.raw.as_bytes())
            })?;
        if position.len() < self.axes {
            return Err(Error::protocol(
                format!("status report has {} coordinates", position.len()),
                report.raw.as_bytes(),
            ));
        }
        Vector::new(&position[..self.axes])
    }

    fn move_to(
        &mut self,
        link: &mut Link,
        target: &Vector,
        timeouts: &StageTimeouts,
    ) -> Result<()> {
        let channel = link.channel()?;
        let command = encode_move(target.as_slice());
        Self::send_line(channel, &command)?;
        Self::read_until_ok(channel, &command, timeouts.response)?;
        Ok(())
    }

    fn query_motion(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<bool> {
        Ok(self.status(link.channel()?, timeouts.response)?.state.is_moving())
    }

    /// Positions stay in machine coordinates, so this only shifts the work
    /// coordinate system. The cached work offset is stale afterwards; GRBL
    /// reports the new one with the next status report.
    fn set_origin(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let channel = link.channel()?;
        let command = encode_origin(self.axes);
        Self::send_line(channel, &command)?;
        Self::read_until_ok(channel, &command, timeouts.response)?;
        self.work_offset = None;
        Ok(())
    }
}
