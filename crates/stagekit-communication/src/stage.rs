//! Stage façade
//!
//! A [`Stage`] owns one transport and one protocol adapter and exposes the
//! same blocking operations for every controller family. It tracks the
//! connection, homing and motion state, caches the last position read, and
//! enforces optional software travel limits before anything is sent.

use crate::communication::Link;
use crate::protocols::{poll_until, Adapter, FamilyProfile, StageProtocol, StageTimeouts};
use stagekit_core::{
    ConnectionError, ConnectionState, ControllerFamily, Error, HomingState, MotionPolicy,
    MotionState, Result, Vector,
};

/// A motorized stage driven through one controller
#[derive(Debug)]
pub struct Stage {
    link: Link,
    adapter: Adapter,
    profile: FamilyProfile,
    timeouts: StageTimeouts,
    connection: ConnectionState,
    homing: HomingState,
    motion: MotionState,
    position: Option<Vector>,
    minimums: Option<Vector>,
    maximums: Option<Vector>,
}

impl Stage {
    /// Stage using the family's default timeouts. Nothing is opened until
    /// [`Stage::connect`].
    pub fn new(adapter: impl Into<Adapter>, link: Link) -> Self {
        let adapter = adapter.into();
        let profile = adapter.profile();
        Self {
            link,
            timeouts: profile.timeouts,
            adapter,
            profile,
            connection: ConnectionState::Disconnected,
            homing: HomingState::Unknown,
            motion: MotionState::Idle,
            position: None,
            minimums: None,
            maximums: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Open the transport and run the handshake
    ///
    /// Does nothing when already connected. On failure the transport is
    /// closed again and the stage stays disconnected.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        tracing::info!("Connecting {} stage on {}", self.family(), self.link.name());

        let result = self
            .link
            .open()
            .and_then(|()| self.adapter.handshake(&mut self.link, &self.timeouts));
        if let Err(err) = result {
            self.link.close();
            tracing::warn!("{} handshake on {} failed: {}", self.family(), self.link.name(), err);
            return Err(match err {
                // An unparseable reply means an unexpected device.
                err if err.is_protocol_error() => Error::handshake(err.to_string()),
                err => err,
            });
        }

        self.connection = ConnectionState::Connected;
        self.homing = HomingState::Unknown;
        self.motion = MotionState::Idle;
        self.position = None;
        tracing::info!("{} stage connected on {}", self.family(), self.link.name());
        Ok(())
    }

    /// Release the transport. Idempotent.
    pub fn disconnect(&mut self) {
        if self.connection == ConnectionState::Connected {
            tracing::info!("Disconnecting {} stage on {}", self.family(), self.link.name());
        }
        self.link.close();
        self.connection = ConnectionState::Disconnected;
        self.motion = MotionState::Idle;
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Run the homing sequence, blocking until it completes
    pub fn home(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.homing = HomingState::Homing;
        tracing::info!("Homing {} stage", self.family());
        let result = self.adapter.home(&mut self.link, &self.timeouts);
        match self.check(result) {
            Ok(()) => {
                self.homing = HomingState::Homed;
                self.position = None;
                tracing::info!("{} stage homed", self.family());
                Ok(())
            }
            Err(err) => {
                self.homing = HomingState::Unknown;
                Err(err)
            }
        }
    }

    /// Query the current position
    ///
    /// The result is cached and returned as a detached copy. The cache is
    /// left untouched when the query fails.
    pub fn position(&mut self) -> Result<Vector> {
        self.ensure_connected()?;
        let retry = self.profile.retry_status_query;
        let result = match self.query_position() {
            Err(err) if retry && (err.is_timeout() || err.is_protocol_error()) => {
                tracing::warn!(
                    "{} position query failed ({}), resynchronizing",
                    self.family(),
                    err
                );
                match self.link.resync().and_then(|()| self.query_position()) {
                    Ok(position) => Ok(position),
                    Err(retry_err) => {
                        tracing::warn!("{} position retry failed: {}", self.family(), retry_err);
                        if retry_err.is_connection_error() {
                            Err(retry_err)
                        } else {
                            Err(err)
                        }
                    }
                }
            }
            other => other,
        };
        let position = self.check(result)?;
        self.position = Some(position.clone());
        Ok(position)
    }

    fn query_position(&mut self) -> Result<Vector> {
        let position = self.adapter.query_position(&mut self.link, &self.timeouts)?;
        position.check_dim(self.axis_count())?;
        Ok(position)
    }

    /// Move to `target`, following the family's motion policy
    pub fn set_position(&mut self, target: &Vector) -> Result<()> {
        self.ensure_connected()?;
        target.check_dim(self.axis_count())?;
        self.check_limits(target)?;

        tracing::debug!("{} move to {}", self.family(), target);
        let result = self.adapter.move_to(&mut self.link, target, &self.timeouts);
        self.check(result)?;
        self.move_started()
    }

    /// Move by `offset` from the current position
    ///
    /// With travel limits set, the current position is read first so the
    /// resulting target can be checked before anything moves.
    pub fn move_relative(&mut self, offset: &Vector, wait: bool) -> Result<()> {
        self.ensure_connected()?;
        offset.check_dim(self.axis_count())?;
        if self.minimums.is_some() || self.maximums.is_some() {
            let target = self.position()?.checked_add(offset)?;
            self.check_limits(&target)?;
        }

        tracing::debug!("{} move by {}", self.family(), offset);
        let result = self.adapter.move_relative(&mut self.link, offset, &self.timeouts);
        self.check(result)?;
        self.position = None;
        self.move_started()?;
        if wait && self.motion == MotionState::Moving {
            self.wait_move_finished()?;
        }
        Ok(())
    }

    fn move_started(&mut self) -> Result<()> {
        self.motion = MotionState::Moving;
        if self.profile.motion_policy == MotionPolicy::WaitUntilIdle {
            self.wait_move_finished()?;
        }
        Ok(())
    }

    /// Stop any motion in progress
    ///
    /// Fails with an unsupported error for families without a stop command.
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_connected()?;
        tracing::info!("Stopping {} stage", self.family());
        let result = self.adapter.stop(&mut self.link, &self.timeouts);
        self.check(result)?;
        self.motion = MotionState::Idle;
        self.position = None;
        Ok(())
    }

    /// Make the current position the controller's coordinate origin
    pub fn set_origin(&mut self) -> Result<()> {
        self.ensure_connected()?;
        tracing::info!("Setting {} stage origin", self.family());
        let result = self.adapter.set_origin(&mut self.link, &self.timeouts);
        self.check(result)?;
        self.position = None;
        Ok(())
    }

    /// Move to `target` and optionally block until the move is finished
    pub fn move_to(&mut self, target: &Vector, wait: bool) -> Result<()> {
        self.set_position(target)?;
        if wait && self.motion == MotionState::Moving {
            self.wait_move_finished()?;
        }
        Ok(())
    }

    /// True while the controller reports motion
    pub fn is_moving(&mut self) -> Result<bool> {
        self.ensure_connected()?;
        let result = self.adapter.query_motion(&mut self.link, &self.timeouts);
        let moving = self.check(result)?;
        self.motion = if moving {
            MotionState::Moving
        } else {
            MotionState::Idle
        };
        Ok(moving)
    }

    /// Poll until the controller is idle, bounded by the motion timeout
    pub fn wait_move_finished(&mut self) -> Result<()> {
        let timeout = self.timeouts.motion;
        let poll_interval = self.timeouts.poll_interval;
        poll_until("Move", timeout, poll_interval, || {
            self.is_moving().map(|moving| !moving)
        })
    }

    /// Lower software travel limit, or `None` to lift it
    pub fn set_minimums(&mut self, minimums: Option<Vector>) -> Result<()> {
        if let Some(limit) = &minimums {
            limit.check_dim(self.axis_count())?;
        }
        self.minimums = minimums;
        Ok(())
    }

    /// Upper software travel limit, or `None` to lift it
    pub fn set_maximums(&mut self, maximums: Option<Vector>) -> Result<()> {
        if let Some(limit) = &maximums {
            limit.check_dim(self.axis_count())?;
        }
        self.maximums = maximums;
        Ok(())
    }

    pub fn minimums(&self) -> Option<&Vector> {
        self.minimums.as_ref()
    }

    pub fn maximums(&self) -> Option<&Vector> {
        self.maximums.as_ref()
    }

    pub fn family(&self) -> ControllerFamily {
        self.adapter.family()
    }

    pub fn axis_count(&self) -> usize {
        self.adapter.axis_count()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn homing_state(&self) -> HomingState {
        self.homing
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion
    }

    /// Last successfully read position, if any
    pub fn cached_position(&self) -> Option<&Vector> {
        self.position.as_ref()
    }

    pub fn timeouts(&self) -> &StageTimeouts {
        &self.timeouts
    }

    pub fn set_timeouts(&mut self, timeouts: StageTimeouts) {
        self.timeouts = timeouts;
    }

    pub fn profile(&self) -> &FamilyProfile {
        &self.profile
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected.into())
        }
    }

    fn check_limits(&self, target: &Vector) -> Result<()> {
        let axes = target.iter().enumerate();
        for (axis, value) in axes {
            if let Some(min) = self.minimums.as_ref().map(|m| m.as_slice()[axis]) {
                if value < min {
                    return Err(Error::out_of_range(format!(
                        "axis {} target {} below minimum {}",
                        axis, value, min
                    )));
                }
            }
            if let Some(max) = self.maximums.as_ref().map(|m| m.as_slice()[axis]) {
                if value > max {
                    return Err(Error::out_of_range(format!(
                        "axis {} target {} above maximum {}",
                        axis, value, max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Drop the session on transport failures
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_connection_error() {
                tracing::warn!("{} stage lost its transport: {}", self.family(), err);
                self.link.close();
                self.connection = ConnectionState::Disconnected;
                self.motion = MotionState::Idle;
            }
        }
        result
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::mock::MockTransport;
    use crate::protocols::Corvus;

    fn stage() -> Stage {
        Stage::new(Corvus::new(), Link::stream(MockTransport::new("mock")))
    }

    #[test]
    fn test_new_stage_is_disconnected() {
        let stage = stage();
        assert_eq!(stage.connection_state(), ConnectionState::Disconnected);
        assert_eq!(stage.homing_state(), HomingState::Unknown);
        assert_eq!(stage.motion_state(), MotionState::Idle);
        assert_eq!(stage.axis_count(), 3);
        assert_eq!(stage.family(), ControllerFamily::Corvus);
        assert!(stage.cached_position().is_none());
    }

    #[test]
    fn test_operations_require_connection() {
        let mut stage = stage();
        assert!(matches!(
            stage.position().unwrap_err(),
            Error::Connection(ConnectionError::NotConnected)
        ));
        assert!(stage.home().unwrap_err().is_connection_error());
        assert!(stage
            .set_position(&Vector::from([0.0, 0.0, 0.0]))
            .unwrap_err()
            .is_connection_error());
        assert!(stage.is_moving().unwrap_err().is_connection_error());
        assert!(stage.stop().unwrap_err().is_connection_error());
        assert!(stage.set_origin().unwrap_err().is_connection_error());
        assert!(stage
            .move_relative(&Vector::from([1.0, 0.0, 0.0]), false)
            .unwrap_err()
            .is_connection_error());
    }

    #[test]
    fn test_limits_must_match_axis_count() {
        let mut stage = stage();
        assert!(stage
            .set_minimums(Some(Vector::from([0.0, 0.0])))
            .unwrap_err()
            .is_dimension_mismatch());
        stage.set_minimums(Some(Vector::from([0.0, 0.0, 0.0]))).unwrap();
        stage.set_maximums(Some(Vector::from([10.0, 10.0, 10.0]))).unwrap();
        assert!(stage.check_limits(&Vector::from([5.0, 0.0, 10.0])).is_ok());
        assert!(stage
            .check_limits(&Vector::from([5.0, -0.1, 1.0]))
            .unwrap_err()
            .is_out_of_range());
        assert!(stage
            .check_limits(&Vector::from([10.5, 0.0, 1.0]))
            .unwrap_err()
            .is_out_of_range());
        stage.set_maximums(None).unwrap();
        assert!(stage.check_limits(&Vector::from([100.0, 0.0, 0.0])).is_ok());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut stage = stage();
        stage.disconnect();
        stage.disconnect();
        assert_eq!(stage.connection_state(), ConnectionState::Disconnected);
    }
}
