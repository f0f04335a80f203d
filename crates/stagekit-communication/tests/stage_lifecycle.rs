mod common;

use common::{corvus_device, fast_timeouts, stream_stage, CorvusSim};
use parking_lot::Mutex;
use stagekit_communication::{Corvus, Link, MockTransport, Stage};
use stagekit_core::{ConnectionState, HomingState, MotionState, Vector};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_silent_device_times_out() {
    let mock = MockTransport::new("silent");
    let handle = mock.handle();
    let mut stage = Stage::new(Corvus::new(), Link::stream(mock)).with_timeouts(fast_timeouts());

    let err = stage.connect().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(stage.connection_state(), ConnectionState::Disconnected);
    assert!(!handle.is_open());
}

#[test]
fn test_failed_open_is_a_connection_error() {
    let mock = MockTransport::new("busy");
    let handle = mock.handle();
    handle.fail_open("port in use");
    let mut stage = Stage::new(Corvus::new(), Link::stream(mock));

    let err = stage.connect().unwrap_err();
    assert!(err.is_connection_error());
    assert!(!stage.is_connected());
    assert!(handle.written().is_empty());
}

#[test]
fn test_connect_twice_opens_once() {
    let sim = Arc::new(Mutex::new(CorvusSim::default()));
    let (mut stage, handle) = stream_stage(Corvus::new(), corvus_device(sim));
    stage.connect().unwrap();
    stage.connect().unwrap();
    assert_eq!(handle.open_count(), 1);
}

#[test]
fn test_dimension_mismatch_sends_nothing() {
    let sim = Arc::new(Mutex::new(CorvusSim::default()));
    let (mut stage, handle) = stream_stage(Corvus::new(), corvus_device(sim));
    stage.connect().unwrap();
    let before = handle.written();

    let err = stage.set_position(&Vector::from([1.0, 2.0])).unwrap_err();
    assert!(err.is_dimension_mismatch());
    assert_eq!(handle.written(), before);
    assert_eq!(stage.motion_state(), MotionState::Idle);
}

#[test]
fn test_truncated_reply_keeps_cached_position() {
    let sim = Arc::new(Mutex::new(CorvusSim {
        position: [1.0, 2.0, 3.0],
        ..Default::default()
    }));
    let (mut stage, _handle) = stream_stage(Corvus::new(), corvus_device(Arc::clone(&sim)));
    stage.connect().unwrap();
    let good = stage.position().unwrap();

    sim.lock().position_reply = Some(b"4.0 5.0".to_vec());
    let err = stage.position().unwrap_err();
    assert!(err.is_protocol_error());
    assert_eq!(err.raw_bytes(), Some(b"4.0 5.0".as_slice()));
    assert_eq!(stage.cached_position(), Some(&good));
    assert!(stage.is_connected());
}

#[test]
fn test_stale_bytes_are_dropped_on_retry() {
    let sim = Arc::new(Mutex::new(CorvusSim {
        position: [7.0, 8.0, 9.0],
        ..Default::default()
    }));
    let (mut stage, handle) = stream_stage(Corvus::new(), corvus_device(sim));
    stage.connect().unwrap();

    handle.push_input(b"garbage\r\n");
    assert_eq!(stage.position().unwrap(), Vector::from([7.0, 8.0, 9.0]));
}

#[test]
fn test_severed_link_during_wait_disconnects() {
    let sim = Arc::new(Mutex::new(CorvusSim {
        move_polls: 1_000_000,
        ..Default::default()
    }));
    let (mut stage, handle) = stream_stage(Corvus::new(), corvus_device(sim));
    stage.connect().unwrap();
    stage.set_position(&Vector::from([1.0, 1.0, 1.0])).unwrap();

    let severer = {
        let handle = handle.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.sever();
        })
    };
    let err = stage.wait_move_finished().unwrap_err();
    severer.join().unwrap();

    assert!(err.is_connection_error());
    assert_eq!(stage.connection_state(), ConnectionState::Disconnected);
    assert_eq!(stage.motion_state(), MotionState::Idle);
    assert!(stage.position().unwrap_err().is_connection_error());
}

#[test]
fn test_reconnect_after_severed_link() {
    let sim = Arc::new(Mutex::new(CorvusSim::default()));
    let (mut stage, handle) = stream_stage(Corvus::new(), corvus_device(sim));
    stage.connect().unwrap();

    handle.sever();
    assert!(stage.position().unwrap_err().is_connection_error());
    assert!(!stage.is_connected());

    stage.connect().unwrap();
    assert_eq!(stage.position().unwrap(), Vector::from([0.0, 0.0, 0.0]));
    assert_eq!(handle.open_count(), 2);
}

#[test]
fn test_drop_closes_transport() {
    let sim = Arc::new(Mutex::new(CorvusSim::default()));
    let (mut stage, handle) = stream_stage(Corvus::new(), corvus_device(sim));
    stage.connect().unwrap();
    assert!(handle.is_open());

    drop(stage);
    assert!(!handle.is_open());
}

#[test]
fn test_home_timeout_leaves_homing_unknown() {
    let sim = Arc::new(Mutex::new(CorvusSim {
        calibration_polls: 1_000_000,
        ..Default::default()
    }));
    let (mut stage, _handle) = stream_stage(Corvus::new(), corvus_device(sim));
    stage.connect().unwrap();

    let err = stage.home().unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(stage.homing_state(), HomingState::Unknown);
    assert!(stage.is_connected());
}
