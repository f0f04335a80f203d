mod common;

use common::{smc100_device, stream_stage, Smc100Sim, SMC_READY};
use parking_lot::Mutex;
use stagekit_communication::{Smc100, Stage};
use stagekit_core::{HomingState, MotionState, Vector};
use std::sync::Arc;

fn setup(addresses: &[u8]) -> (Stage, Arc<Mutex<Smc100Sim>>) {
    let sim = Arc::new(Mutex::new(Smc100Sim::new(addresses)));
    let adapter = Smc100::new(addresses.to_vec()).unwrap();
    let (stage, _handle) = stream_stage(adapter, smc100_device(Arc::clone(&sim)));
    (stage, sim)
}

#[test]
fn test_connect_reads_every_controller() {
    let sim = Arc::new(Mutex::new(Smc100Sim::new(&[1, 2])));
    let adapter = Smc100::new(vec![1, 2]).unwrap();
    let (mut stage, handle) = stream_stage(adapter, smc100_device(Arc::clone(&sim)));
    stage.connect().unwrap();

    assert_eq!(stage.axis_count(), 2);
    assert_eq!(
        handle.written(),
        vec![b"1TS?\r\n".to_vec(), b"2TS?\r\n".to_vec()]
    );
}

#[test]
fn test_home_references_each_axis() {
    let (mut stage, sim) = setup(&[1, 2]);
    sim.lock().axes.get_mut(&2).unwrap().position = 7.0;
    stage.connect().unwrap();
    stage.home().unwrap();

    assert_eq!(stage.homing_state(), HomingState::Homed);
    let sim = sim.lock();
    assert!(sim.axes.values().all(|axis| axis.state == SMC_READY));
    assert!(sim.axes.values().all(|axis| axis.position == 0.0));
}

#[test]
fn test_home_skips_referenced_axes() {
    let sim = Arc::new(Mutex::new(Smc100Sim::new(&[1])));
    sim.lock().axes.get_mut(&1).unwrap().state = SMC_READY;
    let (mut stage, handle) = stream_stage(Smc100::new(vec![1]).unwrap(), smc100_device(sim));
    stage.connect().unwrap();
    handle.clear_written();

    stage.home().unwrap();
    assert!(!handle.written().contains(&b"1OR\r\n".to_vec()));
}

#[test]
fn test_home_failure_is_a_device_fault() {
    let (mut stage, sim) = setup(&[1]);
    sim.lock().homing_fails = true;
    stage.connect().unwrap();

    let err = stage.home().unwrap_err();
    assert!(err.is_device_fault());
    assert_eq!(stage.homing_state(), HomingState::Unknown);
    assert!(stage.is_connected());
}

#[test]
fn test_move_and_read_back() {
    let (mut stage, sim) = setup(&[1, 2]);
    stage.connect().unwrap();
    stage.home().unwrap();

    stage.move_to(&Vector::from([2.5, -1.25]), true).unwrap();
    assert!(!stage.is_moving().unwrap());
    assert_eq!(stage.position().unwrap(), Vector::from([2.5, -1.25]));
    assert_eq!(sim.lock().axes[&2].position, -1.25);
}

#[test]
fn test_move_reports_motion_until_ready() {
    let (mut stage, _sim) = setup(&[1]);
    stage.connect().unwrap();
    stage.home().unwrap();

    stage.set_position(&Vector::from([3.0])).unwrap();
    assert!(stage.is_moving().unwrap());
    stage.wait_move_finished().unwrap();
    assert!(!stage.is_moving().unwrap());
}

#[test]
fn test_rejected_move_is_out_of_range() {
    let (mut stage, sim) = setup(&[1]);
    stage.connect().unwrap();

    let err = stage.set_position(&Vector::from([40.0])).unwrap_err();
    assert!(err.is_out_of_range());
    assert_eq!(sim.lock().axes[&1].position, 0.0);
}

#[test]
fn test_wrong_dimension_sends_nothing() {
    let sim = Arc::new(Mutex::new(Smc100Sim::new(&[1, 2])));
    let (mut stage, handle) = stream_stage(Smc100::new(vec![1, 2]).unwrap(), smc100_device(sim));
    stage.connect().unwrap();
    let before = handle.written().len();

    let err = stage.set_position(&Vector::from([1.0])).unwrap_err();
    assert!(err.is_dimension_mismatch());
    assert_eq!(handle.written().len(), before);
}

#[test]
fn test_relative_move_sends_pr_per_axis() {
    let sim = Arc::new(Mutex::new(Smc100Sim::new(&[1, 2])));
    let adapter = Smc100::new(vec![1, 2]).unwrap();
    let (mut stage, handle) = stream_stage(adapter, smc100_device(Arc::clone(&sim)));
    stage.connect().unwrap();
    stage.home().unwrap();
    stage.move_to(&Vector::from([1.0, 2.0]), true).unwrap();
    handle.clear_written();

    stage.move_relative(&Vector::from([0.5, -3.0]), true).unwrap();
    assert!(handle.written().contains(&b"1PR0.5\r\n".to_vec()));
    assert!(handle.written().contains(&b"2PR-3\r\n".to_vec()));
    assert_eq!(stage.position().unwrap(), Vector::from([1.5, -1.0]));
}

#[test]
fn test_rejected_relative_move_keeps_the_code() {
    let (mut stage, sim) = setup(&[1]);
    stage.connect().unwrap();

    let err = stage.move_relative(&Vector::from([30.0]), false).unwrap_err();
    assert!(err.is_out_of_range());
    assert_eq!(err.device_code(), Some('C' as u32));
    assert_eq!(sim.lock().axes[&1].position, 0.0);
}

#[test]
fn test_stop_halts_every_axis() {
    let sim = Arc::new(Mutex::new(Smc100Sim::new(&[1, 2])));
    let adapter = Smc100::new(vec![1, 2]).unwrap();
    let (mut stage, handle) = stream_stage(adapter, smc100_device(Arc::clone(&sim)));
    stage.connect().unwrap();
    stage.home().unwrap();
    stage.set_position(&Vector::from([3.0, 3.0])).unwrap();
    handle.clear_written();

    stage.stop().unwrap();
    assert_eq!(
        handle.written(),
        vec![b"1ST\r\n".to_vec(), b"2ST\r\n".to_vec()]
    );
    assert_eq!(stage.motion_state(), MotionState::Idle);
    assert!(!stage.is_moving().unwrap());
}

#[test]
fn test_bad_status_carries_the_received_frame() {
    let (mut stage, sim) = setup(&[1]);
    stage.connect().unwrap();

    sim.lock().axes.get_mut(&1).unwrap().state = 0x99;
    let err = stage.is_moving().unwrap_err();
    assert!(err.is_protocol_error());
    assert_eq!(err.raw_bytes(), Some(b"1TS000099\r\n".as_slice()));
}
