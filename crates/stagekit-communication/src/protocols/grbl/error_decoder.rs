//! GRBL error and alarm codes
//!
//! Maps the numeric codes of `error:<n>` and `ALARM:<n>` replies to
//! readable messages and onto the shared error taxonomy.

use stagekit_core::Error;

/// Error code for a jog target beyond machine travel
pub const ERROR_TRAVEL_EXCEEDED: u8 = 15;

/// Alarm codes for limit violations
pub const ALARM_HARD_LIMIT: u8 = 1;
pub const ALARM_SOFT_LIMIT: u8 = 2;

/// Describe a GRBL error code
pub fn decode_error(code: u8) -> String {
    let text = match code {
        1 => "Expected a command letter",
        2 => "Bad or missing number format",
        3 => "Unsupported '$' system command",
        4 => "Negative value for a positive-only parameter",
        5 => "Homing cycle is disabled in the settings",
        6 => "Step pulse shorter than 3 µs",
        7 => "EEPROM read failed, defaults restored",
        8 => "'$' command used while not idle",
        9 => "G-code locked out during alarm or jog",
        10 => "Soft limits require homing to be enabled",
        11 => "Line length exceeded",
        12 => "Setting exceeds the maximum step rate",
        13 => "Safety door opened",
        14 => "Startup line exceeds EEPROM capacity",
        15 => "Target exceeds machine travel",
        16 => "Invalid jog command",
        17 => "Laser mode requires PWM output",
        20 => "Unsupported or invalid g-code command",
        21 => "Modal group violation",
        22 => "Undefined feed rate",
        23 => "Command requires an integer value",
        24 => "Two commands require axis words",
        25 => "Repeated g-code word",
        26 => "No axis words in a command that requires them",
        27 => "Line number out of range",
        28 => "Missing P or L value",
        29 => "Unsupported work coordinate system",
        30 => "G53 requires G0 or G1 motion mode",
        31 => "Unused axis words while G80 is active",
        32 => "Arc without axis words in the selected plane",
        33 => "Invalid motion target",
        34 => "Arc radius computation failed",
        35 => "Arc offset word missing",
        36 => "Unused g-code words in block",
        37 => "Tool length offset on a non-configured axis",
        38 => "Tool number out of range",
        _ => return format!("Unknown error code {}", code),
    };
    text.to_string()
}

/// Describe a GRBL alarm code
pub fn decode_alarm(code: u8) -> String {
    let text = match code {
        1 => "Hard limit triggered, position likely lost",
        2 => "Soft limit, target exceeds machine travel",
        3 => "Reset while in motion, position likely lost",
        4 => "Probe not in the expected initial state",
        5 => "Probe did not make contact",
        6 => "Homing reset during the cycle",
        7 => "Safety door opened during homing",
        8 => "Homing failed to clear the limit switch",
        9 => "Homing could not find the limit switch",
        _ => return format!("Unknown alarm code {}", code),
    };
    text.to_string()
}

/// Shared error for an `error:<n>` reply
pub fn error_reply(code: u8) -> Error {
    match code {
        ERROR_TRAVEL_EXCEEDED => {
            Error::out_of_range_code(code as u32, format!("error:{} {}", code, decode_error(code)))
        }
        _ => Error::device_fault(code as u32, format!("error:{} {}", code, decode_error(code))),
    }
}

/// Shared error for an `ALARM:<n>` report
pub fn alarm_report(code: u8) -> Error {
    match code {
        ALARM_HARD_LIMIT | ALARM_SOFT_LIMIT => {
            Error::out_of_range_code(code as u32, format!("ALARM:{} {}", code, decode_alarm(code)))
        }
        _ => Error::device_fault(code as u32, format!("ALARM:{} {}", code, decode_alarm(code))),
    }
}
