//! GRBL reply lines
//!
//! Classifies the lines a GRBL controller sends: acknowledgements, errors,
//! alarms, status reports, the welcome banner and bracketed messages.

use super::status_parser::{parse_status_report, StatusReport};
use stagekit_core::{Error, Result};

/// One classified reply line
#[derive(Debug, Clone, PartialEq)]
pub enum GrblResponse {
    Ok,
    Error(u8),
    Alarm(u8),
    Status(StatusReport),
    /// Startup banner, `Grbl 1.1h ['$' for help]`
    Welcome(String),
    /// Bracketed feedback, `[MSG:...]`
    Message(String),
    /// Anything else, such as a command echo
    Text(String),
}

/// Welcome banner prefix and suffix
const WELCOME_PREFIX: &str = "Grbl ";
const WELCOME_SUFFIX: &str = "['$' for help]";

/// Classify a reply line
///
/// Returns `None` for blank lines. Status reports are fully parsed, so a
/// malformed one is a protocol error.
pub fn parse_line(line: &str) -> Result<Option<GrblResponse>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line == "ok" {
        return Ok(Some(GrblResponse::Ok));
    }
    if let Some(code) = line.strip_prefix("error:") {
        return parse_code(code, line).map(|code| Some(GrblResponse::Error(code)));
    }
    if let Some(code) = line
        .strip_prefix("ALARM:")
        .or_else(|| line.strip_prefix("alarm:"))
    {
        return parse_code(code, line).map(|code| Some(GrblResponse::Alarm(code)));
    }
    if line.starts_with('<') {
        return parse_status_report(line).map(|report| Some(GrblResponse::Status(report)));
    }
    if line.starts_with('[') && line.ends_with(']') {
        return Ok(Some(GrblResponse::Message(line.to_string())));
    }
    if is_welcome(line) {
        return Ok(Some(GrblResponse::Welcome(line.to_string())));
    }
    Ok(Some(GrblResponse::Text(line.to_string())))
}

fn parse_code(code: &str, line: &str) -> Result<u8> {
    code.trim()
        .parse::<u8>()
        .map_err(|_| Error::protocol(format!("bad code '{}'", code), line.as_bytes()))
}

/// True for the startup banner
pub fn is_welcome(line: &str) -> bool {
    line.starts_with(WELCOME_PREFIX) && line.ends_with(WELCOME_SUFFIX)
}
