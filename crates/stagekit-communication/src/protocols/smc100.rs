//! Newport SMC100 controllers
//!
//! One single-axis controller per address on a shared RS-485 bus. Commands
//! are `{address}{mnemonic}{argument}` followed by CR LF; replies repeat the
//! address and mnemonic as a header. Each axis of a stage maps to one
//! address.

use super::{parse_f64, poll_until, StageProtocol, StageTimeouts};
use crate::communication::{Link, StreamChannel, TextLine};
use stagekit_core::{ControllerFamily, Error, Result, Vector};
use std::fmt;
use std::time::Duration;

/// Valid controller addresses
pub const ADDRESS_RANGE: std::ops::RangeInclusive<u8> = 1..=31;

/// Controller state reported by `TS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    NotReferenced(u8),
    Configuration,
    Homing,
    Moving,
    Ready(u8),
    Disable(u8),
    Jogging(u8),
}

impl ControllerState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x0A..=0x11 => Some(Self::NotReferenced(code)),
            0x14 => Some(Self::Configuration),
            0x1E | 0x1F => Some(Self::Homing),
            0x28 => Some(Self::Moving),
            0x32..=0x35 => Some(Self::Ready(code)),
            0x3C..=0x3E => Some(Self::Disable(code)),
            0x46 | 0x47 => Some(Self::Jogging(code)),
            _ => None,
        }
    }

    pub fn is_referenced(&self) -> bool {
        !matches!(self, Self::NotReferenced(_))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_moving(&self) -> bool {
        matches!(self, Self::Moving | Self::Homing | Self::Jogging(_))
    }
}

/// Positioner error bits reported by `TS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionerErrors(pub u16);

impl PositionerErrors {
    pub const NEGATIVE_END_OF_RUN: u16 = 1 << 0;
    pub const POSITIVE_END_OF_RUN: u16 = 1 << 1;
    pub const PEAK_CURRENT_LIMIT: u16 = 1 << 2;
    pub const RMS_CURRENT_LIMIT: u16 = 1 << 3;
    pub const SHORT_CIRCUIT: u16 = 1 << 4;
    pub const FOLLOWING_ERROR: u16 = 1 << 5;
    pub const HOMING_TIMEOUT: u16 = 1 << 6;
    pub const WRONG_STAGE: u16 = 1 << 7;
    pub const DC_VOLTAGE_TOO_LOW: u16 = 1 << 8;
    pub const OUTPUT_POWER_EXCEEDED: u16 = 1 << 9;

    pub fn contains(&self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PositionerErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 10] = [
            "negative end of run",
            "positive end of run",
            "peak current limit",
            "RMS current limit",
            "short circuit",
            "following error",
            "homing time-out",
            "wrong ESP stage",
            "DC voltage too low",
            "80W output power exceeded",
        ];
        let active: Vec<&str> = NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
            .collect();
        if active.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", active.join(", "))
        }
    }
}

/// Decoded `TS` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorAndState {
    pub errors: PositionerErrors,
    pub state: ControllerState,
}

/// Decode the payload of a `TS` reply: 4 hex digits of error bits followed
/// by 2 hex digits of state
pub fn decode_error_and_state(payload: &str) -> Result<ErrorAndState> {
    let bad = |reason: &str| Error::protocol(reason.to_string(), payload.as_bytes());
    if payload.len() != 6 || !payload.is_ascii() {
        return Err(bad("TS payload must be 6 hex digits"));
    }
    let errors = u16::from_str_radix(&payload[..4], 16).map_err(|_| bad("bad error bits"))?;
    let code = u8::from_str_radix(&payload[4..], 16).map_err(|_| bad("bad state code"))?;
    let state = ControllerState::from_code(code).ok_or_else(|| bad("unknown state code"))?;
    Ok(ErrorAndState {
        errors: PositionerErrors(errors),
        state,
    })
}

/// Describe a `TE` command error code
pub fn describe_command_error(code: char) -> &'static str {
    match code {
        '@' => "No error",
        'A' => "Unknown message code or floating point controller address",
        'B' => "Controller address not correct",
        'C' => "Parameter missing or out of range",
        'D' => "Command not allowed",
        'E' => "Home sequence already started",
        'F' => "ESP stage name unknown",
        'G' => "Displacement out of limits",
        'H' => "Command not allowed in NOT REFERENCED state",
        'I' => "Command not allowed in CONFIGURATION state",
        'J' => "Command not allowed in DISABLE state",
        'K' => "Command not allowed in READY state",
        'L' => "Command not allowed in HOMING state",
        'M' => "Command not allowed in MOVING state",
        'N' => "Current position out of software limit",
        'S' => "Communication time-out",
        'U' => "Error during EEPROM access",
        'V' => "Error during command execution",
        'W' => "Command not allowed for PP version",
        'X' => "Command not allowed for CC version",
        _ => "Unknown command error",
    }
}

/// Wire bytes of a command for one address
pub fn encode_command(address: u8, command: &str) -> Vec<u8> {
    format!("{}{}\r\n", address, command).into_bytes()
}

/// Strip and check the `{address}{mnemonic}` header of a reply
pub fn strip_header<'a>(reply: &'a str, address: u8, mnemonic: &str) -> Result<&'a str> {
    let header = format!("{}{}", address, mnemonic);
    reply.strip_prefix(header.as_str()).ok_or_else(|| {
        Error::protocol(
            format!("reply does not start with '{}'", header),
            reply.as_bytes(),
        )
    })
}

/// SMC100 adapter for one or more daisy-chained controllers
#[derive(Debug, Clone)]
pub struct Smc100 {
    addresses: Vec<u8>,
}

impl Smc100 {
    /// Adapter for the controllers at `addresses`, one axis each
    pub fn new(addresses: Vec<u8>) -> Result<Self> {
        if addresses.is_empty() {
            return Err(Error::other("SMC100 needs at least one controller address"));
        }
        if let Some(bad) = addresses.iter().find(|a| !ADDRESS_RANGE.contains(*a)) {
            return Err(Error::other(format!(
                "SMC100 address {} outside {}..={}",
                bad,
                ADDRESS_RANGE.start(),
                ADDRESS_RANGE.end()
            )));
        }
        Ok(Self { addresses })
    }

    pub fn addresses(&self) -> &[u8] {
        &self.addresses
    }

    fn query(
        channel: &mut StreamChannel,
        address: u8,
        mnemonic: &str,
        timeout: Duration,
    ) -> Result<TextLine> {
        channel.send(&encode_command(address, &format!("{}?", mnemonic)))?;
        Self::response(channel, address, mnemonic, timeout)
    }

    /// Read one reply and strip its header; the text is the payload
    fn response(
        channel: &mut StreamChannel,
        address: u8,
        mnemonic: &str,
        timeout: Duration,
    ) -> Result<TextLine> {
        let line = channel.read_text_line(b"\n", timeout)?;
        let payload = strip_header(&line.text, address, mnemonic)
            .map_err(|e| e.with_frame(&line.frame))?
            .to_string();
        Ok(TextLine {
            text: payload,
            frame: line.frame,
        })
    }

    fn error_and_state(
        channel: &mut StreamChannel,
        address: u8,
        timeout: Duration,
    ) -> Result<ErrorAndState> {
        let reply = Self::query(channel, address, "TS", timeout)?;
        decode_error_and_state(&reply.text).map_err(|e| e.with_frame(&reply.frame))
    }

    /// Read the `TE` command error of `address` and map it
    fn check_command_error(
        channel: &mut StreamChannel,
        address: u8,
        timeout: Duration,
    ) -> Result<()> {
        let reply = Self::query(channel, address, "TE", timeout)?;
        let mut chars = reply.text.chars();
        let code = match (chars.next(), chars.next()) {
            (Some(code), None) => code,
            _ => return Err(Error::protocol("TE payload must be one letter", reply.frame)),
        };
        match code {
            '@' => Ok(()),
            'C' | 'G' | 'N' => Err(Error::out_of_range_code(
                code as u32,
                format!("controller {}: {}", address, describe_command_error(code)),
            )),
            other => Err(Error::device_fault(
                other as u32,
                format!("controller {}: {}", address, describe_command_error(other)),
            )),
        }
    }

    /// Send `{mnemonic}{value}` to every address, then read back each
    /// command error
    fn send_per_axis(
        &self,
        channel: &mut StreamChannel,
        mnemonic: &str,
        values: &Vector,
        timeout: Duration,
    ) -> Result<()> {
        for (&address, value) in self.addresses.iter().zip(values.iter()) {
            channel.send(&encode_command(address, &format!("{}{}", mnemonic, value)))?;
        }
        for &address in &self.addresses {
            Self::check_command_error(channel, address, timeout)?;
        }
        Ok(())
    }
}

impl StageProtocol for Smc100 {
    fn family(&self) -> ControllerFamily {
        ControllerFamily::Smc100
    }

    fn axis_count(&self) -> usize {
        self.addresses.len()
    }

    fn handshake(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let channel = link.channel()?;
        // Reading TS clears latched errors, which otherwise block every
        // command (for instance after a stage swap).
        for &address in &self.addresses {
            let status = Self::error_and_state(channel, address, timeouts.response)?;
            tracing::debug!(
                "SMC100 {} state {:?}, errors: {}",
                address,
                status.state,
                status.errors
            );
        }
        Ok(())
    }

    fn home(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<()> {
        let channel = link.channel()?;
        for &address in &self.addresses {
            let status = Self::error_and_state(channel, address, timeouts.response)?;
            if !status.state.is_referenced() {
                tracing::info!("SMC100 {} searching home", address);
                channel.send(&encode_command(address, "OR"))?;
            }
        }

        let addresses = &self.addresses;
        poll_until("SMC100 home search", timeouts.homing, timeouts.poll_interval, || {
            for &address in addresses {
                let status = Self::error_and_state(channel, address, timeouts.response)?;
                if status.errors.contains(PositionerErrors::HOMING_TIMEOUT)
                    && !status.state.is_referenced()
                {
                    return Err(Error::device_fault(
                        PositionerErrors::HOMING_TIMEOUT as u32,
                        format!("controller {}: {}", address, status.errors),
                    ));
                }
                if !status.state.is_ready() {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }

    fn query_position(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<Vector> {
        let channel = link.channel()?;
        // Send every query before reading any reply to hide bus latency.
        for &address in &self.addresses {
            channel.send(&encode_command(address, "TP?"))?;
        }
        let mut values = Vec::with_capacity(self.addresses.len());
        for &address in &self.addresses {
            let reply = Self::response(channel, address, "TP", timeouts.response)?;
            let value =
                parse_f64(&reply.text, &reply.text).map_err(|e| e.with_frame(&reply.frame))?;
            values.push(value);
        }
        Vector::new(values)
    }

    fn move_to(
        &mut self,
        link: &mut Link,
        target: &Vector,
        timeouts: &StageTimeouts,
    ) -> Result<()> {
        self.send_per_axis(link.channel()?, "PA", target, timeouts.response)
    }

    fn query_motion(&mut self, link: &mut Link, timeouts: &StageTimeouts) -> Result<bool> {
        let channel = link.channel()?;
        for &address in &self.addresses {
            if Self::error_and_state(channel, address, timeouts.response)?
                .state
                .is_moving()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn stop(&mut self, link: &mut Link, _timeouts: &StageTimeouts) -> Result<()> {
        let channel = link.channel()?;
        for &address in &self.addresses {
            channel.send(&encode_command(address, "ST"))?;
        }
        Ok(())
    }

    fn move_relative(
        &mut self,
        link: &mut Link,
        offset: &Vector,
        timeouts: &StageTimeouts,
    ) -> Result<()> {
        self.send_per_axis(link.channel()?, "PR", offset, timeouts.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_addresses() {
        assert!(Smc100::new(vec![]).is_err());
        assert!(Smc100::new(vec![0]).is_err());
        assert!(Smc100::new(vec![32]).is_err());
        assert_eq!(Smc100::new(vec![1, 2]).unwrap().axis_count(), 2);
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command(1, "TP?"), b"1TP?\r\n");
        assert_eq!(encode_command(12, "PA-1.5"), b"12PA-1.5\r\n");
        assert_eq!(encode_command(3, "ST"), b"3ST\r\n");
    }

    #[test]
    fn test_strip_header() {
        assert_eq!(strip_header("1TP12.5", 1, "TP").unwrap(), "12.5");
        let err = strip_header("2TP12.5", 1, "TP").unwrap_err();
        assert!(err.is_protocol_error());
        assert_eq!(err.raw_bytes(), Some(&b"2TP12.5"[..]));
    }

    #[test]
    fn test_decode_error_and_state() {
        let status = decode_error_and_state("000033").unwrap();
        assert!(status.errors.is_empty());
        assert_eq!(status.state, ControllerState::Ready(0x33));
        assert!(status.state.is_ready());

        let status = decode_error_and_state("00400A").unwrap();
        assert!(status.errors.contains(PositionerErrors::HOMING_TIMEOUT));
        assert!(!status.state.is_referenced());
        assert_eq!(status.errors.to_string(), "homing time-out");

        assert_eq!(
            decode_error_and_state("000028").unwrap().state,
            ControllerState::Moving
        );
        assert!(decode_error_and_state("00001E").unwrap().state.is_moving());
    }

    #[test]
    fn test_decode_error_and_state_rejects_bad_payloads() {
        assert!(decode_error_and_state("0033").unwrap_err().is_protocol_error());
        assert!(decode_error_and_state("0000ZZ").unwrap_err().is_protocol_error());
        assert!(decode_error_and_state("000099").unwrap_err().is_protocol_error());
    }

    #[test]
    fn test_describe_command_error() {
        assert_eq!(describe_command_error('G'), "Displacement out of limits");
        assert_eq!(describe_command_error('?'), "Unknown command error");
    }
}
