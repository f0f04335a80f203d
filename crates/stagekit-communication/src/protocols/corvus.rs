//! ITK Corvus Eco controller
//!
//! Space-terminated reverse-Polish commands ("1 -1 setunit"), CR LF
//! terminated replies. Commands without a result produce no reply, but a
//! controller in echo mode repeats every command line. Positions are
//! exchanged in micrometres on three axes.

use super::{parse_f64, poll_until, StageProtocol, StageTimeouts};
use crate::communication::{Link, StreamChannel, TextLine};
use stagekit_core::{ControllerFamily, Error, Result, Vector};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const AXES: usize = 3;

/// `setunit` code for micrometres
const UNIT_MICROMETER: i32 = 1;

/// Busy bit of the `st` status word
const STATUS_BUSY: u32 = 1;

/// Commands remembered while waiting for their echo
const ECHO_WINDOW: usize = 16;

/// Corvus Eco adapter
#[derive(Debug, Clone)]
pub struct Corvus {
    joystick: bool,
    /// Commands sent since the last reply, oldest first
    unanswered: VecDeque<String>,
}

impl Default for Corvus {
    fn default() -> Self {
        Self::new()
    }
}

impl Corvus {
    /// Adapter that re-enables the joystick after connecting
    pub fn new() -> Self {
        Self {
            joystick: true,
            unanswered: VecDeque::new(),
        }
    }

    pub fn with_joystick(mut self, enabled: bool) -> Self {
        self.joystick = enabled;
        self
    }

    fn send(&mut self, channel: &mut StreamChannel, command: &str) -> Result<()> {
        channel.send(&encode_command(command))?;
        if self.unanswered.len() == ECHO_WINDOW {
            self.unanswered.pop_front();
        }
        self.unanswered.push_back(command.to_string());
        Ok(())
    }

    /// Send a command and return its reply line
    ///
    /// Lines repeating a command sent since the previous reply are echoes
    /// and are skipped. Echoes arrive in order, so one match also accounts
    /// for every command sent before it.
    fn query(
        &mut self,
        channel: &mut StreamChannel,
        command: &str,
        timeout: Duration,
    ) -> Result<TextLine> {
        self.send(channel, command)?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout(timeout.as_millis() as u64));
            }
            let line = channel.read_text_line(b"\r\n", remaining)?;
            if line.text.is_empty() {
                continue;
            }
            if let Some(echoed) = self.unanswered.iter().position(|c| *c == line.text) {
                self.unanswered.drain(..=echoed);
                continue;
            }
            self.unanswered.clear();
            return Ok(line);
        }
    }
}

/// Wire bytes of a command
pub fn encode_command(command: &str) -> Vec<u8> {
    format!("{} ", command).into_bytes()
}

/// Absolute move command for a three-axis target
pub fn encode_move(target: &Vector) -> Result<String> {
    encode_triplet(target, "move")
}

/// Relative move command for a three-axis offset
pub fn encode_relative_move(offset: &Vector) -> Result<String> {
    encode_triplet(offset, "rmove")
}

fn encode_triplet(values: &Vector, command: &str) -> Result<String> {
    values.check_dim(AXES)?;
    Ok(format!("{} {} {} {}", values.x()?, values.y()?, values.z()?, command))
}

/// Decode a `p` reply
pub fn decode_position(line: &str) -> Result<Vector> {
    let values = line
        .split_whitespace()
        .map(|field| parse_f64(field, line))
        .collect::<Result<Vec<f64>>>()?;
    if values.len() != AXES {
        return Err(Error::protocol(
            format!("expected {} coordinates, got {}", AXES, values.len()),
            line.as_bytes(),
        ));
    }
    Vector::new(values)
}

/// Decode a `st` reply into its busy flag
pub fn decode_status(line: &str) -> Result<bool> {
    let status = line
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::protocol("status is not an integer", line.as_bytes()))?;
    Ok(status & STATUS_BUSY != 0)
}

impl StageProtocol for Corvus {
    fn family(&self) -> ControllerFamily {
        ControllerFamily::Corvus
    }

    fn axis_count(&self) -> usize {
        AXES
    }

    fn handshake(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        self.unanswered.clear();
        let channel = link.channel()?;
        self.send(channel, "3 setdim")?;
        self.send(channel, &format!("{} -1 setunit", UNIT_MICROMETER))?;

        // Moving with an unexpected unit would be off by orders of magnitude.
        let units = self.query(channel, "-1 getunit", timeouts.response)?;
        let codes: Vec<&str> = units.text.split_whitespace().collect();
        if codes.is_empty() || codes.iter().any(|c| c.parse::<i32>() != Ok(UNIT_MICROMETER)) {
            return Err(Error::handshake(format!(
                "axes did not switch to micrometres, getunit returned '{}'",
                units.text
            )));
        }

        if self.joystick {
            self.send(channel, "1 j")?;
        }
        tracing::debug!("Corvus configured for {} axes in micrometres", AXES);
        Ok(())
    }

    fn home(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        self.send(link.channel()?, "cal")?;
        poll_until("Corvus calibration", timeouts.homing, timeouts.poll_interval, || {
            self.query_motion(link, timeouts).map(|moving| !moving)
        })
    }

    fn query_position(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<Vector> {
        let line = self.query(link.channel()?, "p", timeouts.response)?;
        decode_position(&line.text).map_err(|e| e.with_frame(&line.frame))
    }

    fn move_to(
        &mut self,
        link: &mut Link,
        target: &Vector,
        _timeouts: &StageTimeouts,
    ) -> Result<()> {
        let command = encode_move(target)?;
        let channel = link.channel()?;
        self.send(channel, "3 setdim")?;
        self.send(channel, &command)
    }

    fn query_motion(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<bool> {
        let line = self.query(link.channel()?, "st", timeouts.response)?;
        decode_status(&line.text).map_err(|e| e.with_frame(&line.frame))
    }

    fn set_origin(&mut self, link: &mut Link, _timeouts: &StageTimeouts) -> Result<()> {
        self.send(link.channel()?, "0 0 0 setpos")
    }

    fn move_relative(
        &mut self,
        link: &mut Link,
        offset: &Vector,
        _timeouts: &StageTimeouts,
    ) -> Result<()> {
        let command = encode_relative_move(offset)?;
        let channel = link.channel()?;
        self.send(channel, "3 setdim")?;
        self.send(channel, &command)
    }
}
