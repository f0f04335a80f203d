//! Plane-fit focus correction
//!
//! Given three in-focus calibration points on a tilted sample, predicts the
//! in-focus Z for any other (X, Y) on the same surface.
//!
//! Always bound-check the returned depth before sending it to a stage: a bad
//! calibration point can produce an arbitrarily large displacement.

use crate::error::FocusError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of calibration points needed for a fit
pub const CALIBRATION_POINTS: usize = 3;

const EPSILON: f64 = 1e-12;

/// Plane `a·x + b·y + c·z + d = 0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Plane {
    /// Plane through three points
    ///
    /// Fails with [`FocusError::DegeneratePlane`] when the points are
    /// collinear or coincident.
    pub fn through(p0: [f64; 3], p1: [f64; 3], p2: [f64; 3]) -> Result<Self> {
        let u = sub(p1, p0);
        let v = sub(p2, p0);
        let n = cross(u, v);
        let scale = norm(u) * norm(v);
        if scale <= f64::MIN_POSITIVE || norm(n) <= EPSILON * scale {
            return Err(FocusError::DegeneratePlane.into());
        }
        let d = -(n[0] * p0[0] + n[1] * p0[1] + n[2] * p0[2]);
        Ok(Self {
            a: n[0],
            b: n[1],
            c: n[2],
            d,
        })
    }

    /// Z of the plane at (x, y)
    pub fn z_at(&self, x: f64, y: f64) -> Result<f64> {
        let n = norm([self.a, self.b, self.c]);
        if self.c.abs() <= EPSILON * n {
            return Err(FocusError::Division.into());
        }
        Ok(-(self.a * x + self.b * y + self.d) / self.c)
    }
}

/// Three-point autofocus helper
///
/// Holds at most three calibration points. Registering a fourth replaces the
/// oldest one and refits.
#[derive(Debug, Clone, Default)]
pub struct Autofocus {
    points: VecDeque<[f64; 3]>,
    plane: Option<Plane>,
}

impl Autofocus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-focus point
    ///
    /// Once three points are held the plane is refitted. A degenerate set
    /// keeps the points but leaves the helper uncalibrated and returns
    /// [`FocusError::DegeneratePlane`]; registering another point replaces
    /// the oldest and tries again.
    pub fn register(&mut self, x: f64, y: f64, z: f64) -> Result<()> {
        if self.points.len() == CALIBRATION_POINTS {
            self.points.pop_front();
        }
        self.points.push_back([x, y, z]);
        self.plane = None;

        if self.points.len() == CALIBRATION_POINTS {
            let plane = Plane::through(self.points[0], self.points[1], self.points[2])?;
            tracing::debug!(
                "Autofocus plane fitted: {}x + {}y + {}z + {} = 0",
                plane.a,
                plane.b,
                plane.c,
                plane.d
            );
            self.plane = Some(plane);
        }
        Ok(())
    }

    /// Remove all calibration points
    pub fn clear(&mut self) {
        self.points.clear();
        self.plane = None;
    }

    /// Number of registered points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Registered points, oldest first
    pub fn points(&self) -> Vec<[f64; 3]> {
        self.points.iter().copied().collect()
    }

    /// Fitted plane, if calibrated
    pub fn plane(&self) -> Option<Plane> {
        self.plane
    }

    /// Predicted in-focus Z at (x, y)
    pub fn focus(&self, x: f64, y: f64) -> Result<f64> {
        let plane = self.plane.ok_or(FocusError::NotCalibrated {
            registered: self.points.len(),
        })?;
        plane.z_at(x, y)
    }
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(u: [f64; 3], v: [f64; 3]) -> [f64; 3] {
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
