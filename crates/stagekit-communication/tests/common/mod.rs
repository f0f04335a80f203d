#![allow(dead_code)]
//! Simulated controllers for the integration tests
//!
//! Each simulator is a responder closure over shared state, plugged into a
//! mock transport. Tests keep the state handle to script faults and to
//! inspect what the device saw.

use parking_lot::Mutex;
use stagekit_communication::communication::mock::{ControlRequest, MockControlHandle, MockHandle};
use stagekit_communication::{
    Adapter, Link, MockControlTransport, MockTransport, Stage, StageTimeouts,
};
use stagekit_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub type Shared<T> = Arc<Mutex<T>>;

/// Short bounds so failing waits end quickly
pub fn fast_timeouts() -> StageTimeouts {
    StageTimeouts::new(
        Duration::from_millis(50),
        Duration::from_millis(500),
        Duration::from_millis(500),
    )
    .with_poll_interval(Duration::from_millis(1))
}

pub fn stream_stage(adapter: impl Into<Adapter>, mock: MockTransport) -> (Stage, MockHandle) {
    let handle = mock.handle();
    let stage = Stage::new(adapter, Link::stream(mock)).with_timeouts(fast_timeouts());
    (stage, handle)
}

pub fn control_stage(
    adapter: impl Into<Adapter>,
    mock: MockControlTransport,
) -> (Stage, MockControlHandle) {
    let handle = mock.handle();
    let stage = Stage::new(adapter, Link::control(mock)).with_timeouts(fast_timeouts());
    (stage, handle)
}

fn command_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

// ---------------------------------------------------------------- Corvus

pub struct CorvusSim {
    pub position: [f64; 3],
    /// Reply to `-1 getunit`
    pub units: String,
    /// `st` polls reporting busy after a move or calibration
    pub busy_polls: usize,
    pub move_polls: usize,
    pub calibration_polls: usize,
    /// Answer `p` with this instead of the position
    pub position_reply: Option<Vec<u8>>,
    /// Echo every command before answering
    pub echo: bool,
    pub joystick: bool,
}

impl Default for CorvusSim {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            units: "1 1 1".to_string(),
            busy_polls: 0,
            move_polls: 2,
            calibration_polls: 3,
            position_reply: None,
            echo: false,
            joystick: false,
        }
    }
}

pub fn corvus_device(sim: Shared<CorvusSim>) -> MockTransport {
    MockTransport::with_responder("corvus-sim", move |bytes| {
        let mut sim = sim.lock();
        let command = command_text(bytes);
        let mut reply = Vec::new();
        let tokens: Vec<&str> = command.split_whitespace().collect();
        match tokens.as_slice() {
            ["-1", "getunit"] => reply.extend_from_slice(format!("{}\r\n", sim.units).as_bytes()),
            ["p"] => match &sim.position_reply {
                Some(raw) => reply.extend_from_slice(raw),
                None => {
                    let [x, y, z] = sim.position;
                    reply.extend_from_slice(format!("{} {} {}\r\n", x, y, z).as_bytes());
                }
            },
            ["st"] => {
                let busy = sim.busy_polls > 0;
                sim.busy_polls = sim.busy_polls.saturating_sub(1);
                reply.extend_from_slice(if busy { b"1\r\n" } else { b"0\r\n" });
            }
            ["cal"] => {
                sim.position = [0.0; 3];
                sim.busy_polls = sim.calibration_polls;
            }
            ["1", "j"] => sim.joystick = true,
            [x, y, z, "move"] => {
                sim.position = parse_triplet(x, y, z);
                sim.busy_polls = sim.move_polls;
            }
            [x, y, z, "rmove"] => {
                let offset = parse_triplet(x, y, z);
                for (value, delta) in sim.position.iter_mut().zip(offset) {
                    *value += delta;
                }
                sim.busy_polls = sim.move_polls;
            }
            [x, y, z, "setpos"] => sim.position = parse_triplet(x, y, z),
            _ => {}
        }
        if sim.echo {
            let mut echoed = format!("{}\r\n", command).into_bytes();
            echoed.extend(reply);
            return echoed;
        }
        reply
    })
}

fn parse_triplet(x: &str, y: &str, z: &str) -> [f64; 3] {
    [
        x.parse().unwrap_or(f64::NAN),
        y.parse().unwrap_or(f64::NAN),
        z.parse().unwrap_or(f64::NAN),
    ]
}

// ---------------------------------------------------------------- SMC100

pub const SMC_NOT_REFERENCED: u8 = 0x0A;
pub const SMC_HOMING: u8 = 0x1E;
pub const SMC_MOVING: u8 = 0x28;
pub const SMC_READY: u8 = 0x32;

pub struct SmcAxis {
    pub position: f64,
    pub state: u8,
    pub errors: u16,
    pub busy_polls: usize,
    pub last_error: char,
}

impl Default for SmcAxis {
    fn default() -> Self {
        Self {
            position: 0.0,
            state: SMC_NOT_REFERENCED,
            errors: 0,
            busy_polls: 0,
            last_error: '@',
        }
    }
}

pub struct Smc100Sim {
    pub axes: BTreeMap<u8, SmcAxis>,
    /// Travel of every axis, symmetric around zero
    pub travel: f64,
    /// Homing ends not referenced with the homing time-out bit set
    pub homing_fails: bool,
}

impl Smc100Sim {
    pub fn new(addresses: &[u8]) -> Self {
        Self {
            axes: addresses.iter().map(|&a| (a, SmcAxis::default())).collect(),
            travel: 25.0,
            homing_fails: false,
        }
    }
}

pub fn smc100_device(sim: Shared<Smc100Sim>) -> MockTransport {
    MockTransport::with_responder("smc100-sim", move |bytes| {
        let mut sim = sim.lock();
        let command = command_text(bytes);
        let digits = command.chars().take_while(|c| c.is_ascii_digit()).count();
        let Ok(address) = command[..digits].parse::<u8>() else {
            return Vec::new();
        };
        let body = command[digits..].to_string();
        let travel = sim.travel;
        let homing_fails = sim.homing_fails;
        let Some(axis) = sim.axes.get_mut(&address) else {
            return Vec::new();
        };

        if body == "TS?" {
            if axis.busy_polls > 0 {
                axis.busy_polls -= 1;
            } else if axis.state == SMC_MOVING {
                axis.state = SMC_READY;
            } else if axis.state == SMC_HOMING {
                if homing_fails {
                    axis.state = SMC_NOT_REFERENCED;
                    axis.errors |= 1 << 6;
                } else {
                    axis.state = SMC_READY;
                    axis.position = 0.0;
                }
            }
            format!("{}TS{:04X}{:02X}\r\n", address, axis.errors, axis.state).into_bytes()
        } else if body == "TP?" {
            format!("{}TP{}\r\n", address, axis.position).into_bytes()
        } else if body == "TE?" {
            let code = std::mem::replace(&mut axis.last_error, '@');
            format!("{}TE{}\r\n", address, code).into_bytes()
        } else if body == "OR" {
            axis.state = SMC_HOMING;
            axis.busy_polls = 2;
            Vec::new()
        } else if body == "ST" {
            if axis.state == SMC_MOVING {
                axis.state = SMC_READY;
            }
            axis.busy_polls = 0;
            Vec::new()
        } else if let Some((relative, value)) = body
            .strip_prefix("PA")
            .map(|v| (false, v))
            .or_else(|| body.strip_prefix("PR").map(|v| (true, v)))
        {
            let target = value
                .parse::<f64>()
                .map(|v| if relative { axis.position + v } else { v });
            match target {
                Ok(v) if v.abs() <= travel => {
                    axis.position = v;
                    axis.state = SMC_MOVING;
                    axis.busy_polls = 1;
                }
                _ => axis.last_error = 'C',
            }
            Vec::new()
        } else {
            axis.last_error = 'A';
            Vec::new()
        }
    })
}

// ---------------------------------------------------------------- M3-FS

pub struct M3fsSim {
    pub counts: i32,
    pub busy_polls: usize,
    pub move_polls: usize,
    pub version: String,
}

impl Default for M3fsSim {
    fn default() -> Self {
        Self {
            counts: 0,
            busy_polls: 0,
            move_polls: 2,
            version: "4.7.3".to_string(),
        }
    }
}

pub fn m3fs_device(sim: Shared<M3fsSim>) -> MockTransport {
    MockTransport::with_responder("m3fs-sim", move |bytes| {
        let mut sim = sim.lock();
        let command = command_text(bytes);
        let inner = command.trim_start_matches('<').trim_end_matches('>');
        match inner.split_once(' ') {
            None if inner == "01" => format!("<01 1 VER {} M3-FS>\r", sim.version).into_bytes(),
            None if inner == "10" => {
                let status: u32 = if sim.busy_polls > 0 { 0x000004 } else { 0 };
                sim.busy_polls = sim.busy_polls.saturating_sub(1);
                format!("<10 {:06x} {:08x} {:08x}>\r", status, sim.counts, 0).into_bytes()
            }
            Some(("08", target)) => match u32::from_str_radix(target, 16) {
                Ok(raw) => {
                    sim.counts = raw as i32;
                    sim.busy_polls = sim.move_polls;
                    b"<08>\r".to_vec()
                }
                Err(_) => Vec::new(),
            },
            _ => Vec::new(),
        }
    })
}

// ---------------------------------------------------------------- Tic

pub struct TicSim {
    pub current: i32,
    pub target: i32,
    pub operation_state: u8,
    pub error_status: u16,
    pub homing_polls: usize,
    /// Current-position reads before the motor reaches its target
    pub move_polls: usize,
    pub moving_reads: usize,
    pub last_home_direction: Option<u16>,
}

impl Default for TicSim {
    fn default() -> Self {
        Self {
            current: 0,
            target: 0,
            operation_state: 10,
            error_status: 1 | (1 << 7),
            homing_polls: 0,
            move_polls: 2,
            moving_reads: 0,
            last_home_direction: None,
        }
    }
}

fn tic_respond(sim: &mut TicSim, request: &ControlRequest) -> Result<Vec<u8>> {
    match (request.request_type, request.request) {
        (0x40, 0x85) => sim.error_status &= !1,
        (0x40, 0x83) => sim.error_status &= !(1 << 7),
        (0x40, 0x89) => sim.target = sim.current,
        (0x40, 0x97) => {
            sim.homing_polls = 3;
            sim.last_home_direction = Some(request.value);
        }
        (0x40, 0xE0) => {
            sim.target = (request.value as u32 | ((request.index as u32) << 16)) as i32;
            sim.moving_reads = sim.move_polls;
        }
        (0xC0, 0xA1) => {
            let bytes = match request.index {
                0x00 => vec![sim.operation_state],
                0x01 => {
                    let homing = sim.homing_polls > 0;
                    if homing {
                        sim.homing_polls -= 1;
                        if sim.homing_polls == 0 {
                            sim.current = 0;
                            sim.target = 0;
                        }
                    }
                    vec![if homing { 1 << 4 } else { 0 }]
                }
                0x02 => sim.error_status.to_le_bytes().to_vec(),
                0x0A => sim.target.to_le_bytes().to_vec(),
                0x22 => {
                    if sim.moving_reads > 0 {
                        sim.moving_reads -= 1;
                    } else {
                        sim.current = sim.target;
                    }
                    sim.current.to_le_bytes().to_vec()
                }
                _ => return Err(Error::protocol("unknown variable", Vec::new())),
            };
            return Ok(bytes.into_iter().take(request.length).collect());
        }
        _ => {}
    }
    Ok(Vec::new())
}

pub fn tic_device(sim: Shared<TicSim>) -> MockControlTransport {
    MockControlTransport::with_responder("tic-sim", move |request| {
        tic_respond(&mut sim.lock(), request)
    })
}

// ---------------------------------------------------------------- GRBL

pub struct GrblSim {
    pub position: [f64; 3],
    pub locked: bool,
    pub unlock_confirms: bool,
    pub banner: String,
    pub busy_polls: usize,
    /// Largest coordinate magnitude before a soft-limit alarm
    pub travel: f64,
    /// Report `WPos` and `WCO` instead of `MPos`
    pub work_offset: Option<[f64; 3]>,
    pub echo: bool,
    /// Last `G92` line received
    pub origin_command: Option<String>,
}

impl Default for GrblSim {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            locked: false,
            unlock_confirms: true,
            banner: "Grbl 1.1h ['$' for help]".to_string(),
            busy_polls: 0,
            travel: 200.0,
            work_offset: None,
            echo: false,
            origin_command: None,
        }
    }
}

fn grbl_status(sim: &mut GrblSim) -> String {
    let state = if sim.busy_polls > 0 {
        sim.busy_polls -= 1;
        "Run"
    } else if sim.locked {
        "Alarm"
    } else {
        "Idle"
    };
    let [x, y, z] = sim.position;
    match sim.work_offset {
        None => format!("<{}|MPos:{:.3},{:.3},{:.3}|FS:0,0>\r\n", state, x, y, z),
        Some([ox, oy, oz]) => format!(
            "<{}|WPos:{:.3},{:.3},{:.3}|FS:0,0|WCO:{:.3},{:.3},{:.3}>\r\n",
            state,
            x - ox,
            y - oy,
            z - oz,
            ox,
            oy,
            oz
        ),
    }
}

pub fn grbl_device(sim: Shared<GrblSim>) -> MockTransport {
    MockTransport::with_responder("grbl-sim", move |bytes| {
        let mut sim = sim.lock();
        if bytes == [0x18u8].as_slice() {
            let mut reply = format!("\r\n{}\r\n", sim.banner);
            if sim.locked {
                reply.push_str("[MSG:'$H'|'$X' to unlock]\r\n");
            }
            return reply.into_bytes();
        }
        if bytes == b"?".as_slice() {
            return grbl_status(&mut sim).into_bytes();
        }
        let command = command_text(bytes);
        let mut reply = String::new();
        if sim.echo && !command.is_empty() {
            reply.push_str(&format!("{}\r\n", command));
        }
        if command.is_empty() {
            reply.push_str("ok\r\n");
        } else if command == "$X" {
            sim.locked = false;
            if sim.unlock_confirms {
                reply.push_str("[MSG:Caution: Unlocked]\r\n");
            }
            reply.push_str("ok\r\n");
        } else if command == "$H" {
            sim.position = [0.0; 3];
            sim.locked = false;
            reply.push_str("ok\r\n");
        } else if command.starts_with("G92 ") {
            sim.origin_command = Some(command.clone());
            reply.push_str("ok\r\n");
        } else if let Some(words) = command.strip_prefix("G0 ") {
            let mut target = sim.position;
            for word in words.split_whitespace() {
                let (letter, value) = word.split_at(1);
                let index = match letter {
                    "X" => 0,
                    "Y" => 1,
                    "Z" => 2,
                    _ => return b"error:20\r\n".to_vec(),
                };
                match value.parse::<f64>() {
                    Ok(v) => target[index] = v,
                    Err(_) => return b"error:2\r\n".to_vec(),
                }
            }
            if sim.locked {
                reply.push_str("error:9\r\n");
            } else if target.iter().any(|v| v.abs() > sim.travel) {
                reply.push_str("ALARM:2\r\n");
                sim.locked = true;
            } else {
                sim.position = target;
                sim.busy_polls = 2;
                reply.push_str("ok\r\n");
            }
        } else {
            reply.push_str("error:20\r\n");
        }
        reply.into_bytes()
    })
}

// ---------------------------------------------------------------- PI

pub struct PiAxis {
    pub position: f64,
    pub busy_polls: usize,
    pub error: i32,
}

pub struct PiSim {
    pub axes: BTreeMap<u8, PiAxis>,
    pub travel: f64,
}

impl PiSim {
    pub fn new(addresses: &[u8]) -> Self {
        Self {
            axes: addresses
                .iter()
                .map(|&a| {
                    (
                        a,
                        PiAxis {
                            position: 5.0,
                            busy_polls: 0,
                            error: 0,
                        },
                    )
                })
                .collect(),
            travel: 25.0,
        }
    }
}

pub fn pi_device(sim: Shared<PiSim>) -> MockTransport {
    MockTransport::with_responder("pi-sim", move |bytes| {
        let mut sim = sim.lock();
        let travel = sim.travel;
        let text = String::from_utf8_lossy(bytes).to_string();
        let Some((address, rest)) = text.split_once(' ') else {
            return Vec::new();
        };
        let Ok(address) = address.parse::<u8>() else {
            return Vec::new();
        };
        let Some(axis) = sim.axes.get_mut(&address) else {
            return Vec::new();
        };

        if rest == "\x05" {
            let moving = axis.busy_polls > 0;
            axis.busy_polls = axis.busy_polls.saturating_sub(1);
            return format!("0 {} {}\n", address, if moving { 1 } else { 0 }).into_bytes();
        }
        match rest.trim_end() {
            "*IDN?" => format!(
                "0 {} (c)2015 Physik Instrumente (PI) GmbH & Co. KG, C-663.12, 0, 1.0\n",
                address
            )
            .into_bytes(),
            "POS?" => format!("0 {} 1={}\n", address, axis.position).into_bytes(),
            "ERR?" => {
                let code = std::mem::replace(&mut axis.error, 0);
                format!("0 {} {}\n", address, code).into_bytes()
            }
            "SVO 1 1" => Vec::new(),
            "STP" => {
                axis.busy_polls = 0;
                axis.error = 10;
                Vec::new()
            }
            "FNL 1" => {
                axis.position = -travel;
                axis.busy_polls = 2;
                Vec::new()
            }
            "FPL 1" => {
                axis.position = travel;
                axis.busy_polls = 2;
                Vec::new()
            }
            other => {
                match other.strip_prefix("MOV 1 ").map(str::parse::<f64>) {
                    Some(Ok(v)) if v.abs() <= travel => {
                        axis.position = v;
                        axis.busy_polls = 1;
                    }
                    Some(Ok(_)) => axis.error = 7,
                    _ => axis.error = 2,
                }
                Vec::new()
            }
        }
    })
}
