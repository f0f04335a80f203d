mod common;

use common::{grbl_device, stream_stage, GrblSim};
use parking_lot::Mutex;
use stagekit_communication::{Grbl, Stage};
use stagekit_core::{HomingState, Vector};
use std::sync::Arc;

fn setup(grbl: Grbl, sim: GrblSim) -> (Stage, Arc<Mutex<GrblSim>>) {
    let sim = Arc::new(Mutex::new(sim));
    let (stage, _handle) = stream_stage(grbl, grbl_device(Arc::clone(&sim)));
    (stage, sim)
}

#[test]
fn test_connect_soft_resets() {
    let sim = Arc::new(Mutex::new(GrblSim::default()));
    let (mut stage, handle) = stream_stage(Grbl::new(), grbl_device(Arc::clone(&sim)));
    stage.connect().unwrap();

    assert!(stage.is_connected());
    assert_eq!(handle.written(), vec![vec![0x18], b"\n".to_vec()]);
}

#[test]
fn test_connect_unlocks_alarmed_controller() {
    let (mut stage, sim) = setup(
        Grbl::new(),
        GrblSim {
            locked: true,
            ..Default::default()
        },
    );
    stage.connect().unwrap();
    assert!(!sim.lock().locked);
}

#[test]
fn test_unconfirmed_unlock_fails_handshake() {
    let (mut stage, _sim) = setup(
        Grbl::new(),
        GrblSim {
            locked: true,
            unlock_confirms: false,
            ..Default::default()
        },
    );
    assert!(stage.connect().unwrap_err().is_handshake_error());
    assert!(!stage.is_connected());
}

#[test]
fn test_wrong_banner_fails_handshake() {
    let (mut stage, _sim) = setup(
        Grbl::new(),
        GrblSim {
            banner: "Marlin 2.0".to_string(),
            ..Default::default()
        },
    );
    assert!(stage.connect().unwrap_err().is_handshake_error());
}

#[test]
fn test_home_and_position() {
    let (mut stage, _sim) = setup(
        Grbl::new(),
        GrblSim {
            position: [12.0, 34.5, -6.25],
            ..Default::default()
        },
    );
    stage.connect().unwrap();
    assert_eq!(stage.position().unwrap(), Vector::from([12.0, 34.5, -6.25]));

    stage.home().unwrap();
    assert_eq!(stage.homing_state(), HomingState::Homed);
    assert_eq!(stage.position().unwrap(), Vector::from([0.0, 0.0, 0.0]));
}

#[test]
fn test_move_and_wait() {
    let (mut stage, sim) = setup(Grbl::new(), GrblSim::default());
    stage.connect().unwrap();

    stage.set_position(&Vector::from([10.0, 20.0, 1.5])).unwrap();
    assert!(stage.is_moving().unwrap());
    stage.wait_move_finished().unwrap();
    assert!(!stage.is_moving().unwrap());
    assert_eq!(sim.lock().position, [10.0, 20.0, 1.5]);
    assert_eq!(stage.position().unwrap(), Vector::from([10.0, 20.0, 1.5]));
}

#[test]
fn test_echo_is_ignored() {
    let (mut stage, _sim) = setup(
        Grbl::new(),
        GrblSim {
            echo: true,
            ..Default::default()
        },
    );
    stage.connect().unwrap();
    stage.move_to(&Vector::from([1.0, 2.0, 3.0]), true).unwrap();
    assert_eq!(stage.position().unwrap(), Vector::from([1.0, 2.0, 3.0]));
}

#[test]
fn test_soft_limit_alarm_is_out_of_range() {
    let (mut stage, sim) = setup(Grbl::new(), GrblSim::default());
    stage.connect().unwrap();

    let err = stage.set_position(&Vector::from([500.0, 0.0, 0.0])).unwrap_err();
    assert!(err.is_out_of_range());
    assert_eq!(err.device_code(), Some(2));
    assert!(sim.lock().locked);

    // Alarm lock rejects further motion until unlocked
    let err = stage.set_position(&Vector::from([1.0, 0.0, 0.0])).unwrap_err();
    assert!(err.is_device_fault());
    assert_eq!(err.device_code(), Some(9));
    assert!(err.to_string().contains("error:9"));
    assert!(stage.is_connected());
}

#[test]
fn test_work_position_uses_offset() {
    let (mut stage, _sim) = setup(
        Grbl::new(),
        GrblSim {
            position: [15.0, 25.0, 5.0],
            work_offset: Some([10.0, 10.0, 0.0]),
            ..Default::default()
        },
    );
    stage.connect().unwrap();
    assert_eq!(stage.position().unwrap(), Vector::from([15.0, 25.0, 5.0]));
}

#[test]
fn test_two_axis_router() {
    let (mut stage, sim) = setup(Grbl::with_axes(2).unwrap(), GrblSim::default());
    stage.connect().unwrap();

    stage.move_to(&Vector::from([4.0, 8.0]), true).unwrap();
    assert_eq!(sim.lock().position, [4.0, 8.0, 0.0]);
    assert_eq!(stage.position().unwrap(), Vector::from([4.0, 8.0]));
}

#[test]
fn test_set_origin_sends_g92_for_each_axis() {
    let (mut stage, sim) = setup(Grbl::new(), GrblSim::default());
    stage.connect().unwrap();
    stage.set_origin().unwrap();
    assert_eq!(sim.lock().origin_command.as_deref(), Some("G92 X0 Y0 Z0"));

    let (mut stage, sim) = setup(Grbl::with_axes(2).unwrap(), GrblSim::default());
    stage.connect().unwrap();
    stage.set_origin().unwrap();
    assert_eq!(sim.lock().origin_command.as_deref(), Some("G92 X0 Y0"));
}

#[test]
fn test_relative_move_starts_from_current_position() {
    let (mut stage, sim) = setup(
        Grbl::new(),
        GrblSim {
            position: [1.0, 2.0, 3.0],
            ..Default::default()
        },
    );
    stage.connect().unwrap();

    stage.move_relative(&Vector::from([1.0, 1.0, -1.0]), true).unwrap();
    assert_eq!(sim.lock().position, [2.0, 3.0, 2.0]);
}

#[test]
fn test_stop_is_unsupported() {
    let (mut stage, _sim) = setup(Grbl::new(), GrblSim::default());
    stage.connect().unwrap();
    assert!(stage.stop().unwrap_err().is_unsupported());
}
