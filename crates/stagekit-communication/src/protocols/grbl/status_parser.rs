//! GRBL status reports
//!
//! Parses the `<State|MPos:x,y,z|...>` line answered to a `?` request.

use crate::protocols::parse_f64;
use stagekit_core::{Error, Result};
use std::str::FromStr;

/// Machine state field of a status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Run,
    Hold,
    Jog,
    Alarm,
    Door,
    Check,
    Home,
    Sleep,
}

impl MachineState {
    /// States in which the axes may be moving
    pub fn is_moving(&self) -> bool {
        matches!(self, Self::Run | Self::Home | Self::Jog)
    }
}

impl FromStr for MachineState {
    type Err = Error;

    /// Parses the state name, ignoring a `:<substate>` suffix
    fn from_str(s: &str) -> Result<Self> {
        let name = s.split(':').next().unwrap_or_default();
        match name {
            "Idle" => Ok(Self::Idle),
            "Run" => Ok(Self::Run),
            "Hold" => Ok(Self::Hold),
            "Jog" => Ok(Self::Jog),
            "Alarm" => Ok(Self::Alarm),
            "Door" => Ok(Self::Door),
            "Check" => Ok(Self::Check),
            "Home" => Ok(Self::Home),
            "Sleep" => Ok(Self::Sleep),
            _ => Err(Error::protocol(format!("unknown machine state '{}'", s), s.as_bytes())),
        }
    }
}

/// Fields of a status report relevant to stage control
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: MachineState,
    /// Machine position
    pub mpos: Option<Vec<f64>>,
    /// Work position
    pub wpos: Option<Vec<f64>>,
    /// Work coordinate offset, only sent every few reports
    pub wco: Option<Vec<f64>>,
    /// The report line as received
    pub raw: String,
}

impl StatusReport {
    /// Machine position, from `MPos` or from `WPos + WCO`
    ///
    /// `fallback_wco` is used when the report carries `WPos` without `WCO`.
    pub fn machine_position(&self, fallback_wco: Option<&[f64]>) -> Option<Vec<f64>> {
        if let Some(mpos) = &self.mpos {
            return Some(mpos.clone());
        }
        let wpos = self.wpos.as_ref()?;
        let wco = self.wco.as_deref().or(fallback_wco)?;
        Some(wpos.iter().zip(wco).map(|(w, o)| w + o).collect())
    }
}

fn parse_coordinates(field: &str, line: &str) -> Result<Vec<f64>> {
    field.split(',').map(|value| parse_f64(value, line)).collect()
}

/// Parse a complete `<...>` status line
pub fn parse_status_report(line: &str) -> Result<StatusReport> {
    let body = line
        .trim()
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .ok_or_else(|| Error::protocol("status report is not enclosed in <>", line.as_bytes()))?;

    let mut fields = body.split('|');
    let state = fields
        .next()
        .unwrap_or_default()
        .parse::<MachineState>()
        .map_err(|_| Error::protocol("unknown machine state", line.as_bytes()))?;

    let mut report = StatusReport {
        state,
        mpos: None,
        wpos: None,
        wco: None,
        raw: line.trim().to_string(),
    };
    for field in fields {
        if let Some(coords) = field.strip_prefix("MPos:") {
            report.mpos = Some(parse_coordinates(coords, line)?);
        } else if let Some(coords) = field.strip_prefix("WPos:") {
            report.wpos = Some(parse_coordinates(coords, line)?);
        } else if let Some(coords) = field.strip_prefix("WCO:") {
            report.wco = Some(parse_coordinates(coords, line)?);
        }
    }
    Ok(report)
}
