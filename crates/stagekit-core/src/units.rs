//! Unit handling
//!
//! Count-based controllers (encoder counts, motor steps) exchange integers
//! and need a fixed scale between those counts and the user-facing unit.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Fixed scale between integer device counts and user units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountScale {
    /// Length of one count in user units
    pub unit_per_count: f64,
}

impl CountScale {
    pub fn new(unit_per_count: f64) -> Self {
        Self { unit_per_count }
    }

    /// Scale for `counts_per_unit` device counts per user unit
    pub fn per_unit(counts_per_unit: f64) -> Self {
        Self::new(1.0 / counts_per_unit)
    }

    /// Nearest count for a user-unit value
    ///
    /// Fails with an out-of-range error when the count does not fit a
    /// signed 32-bit device register.
    pub fn to_counts(&self, value: f64) -> Result<i32> {
        let counts = (value / self.unit_per_count).round();
        if !counts.is_finite() || counts < i32::MIN as f64 || counts > i32::MAX as f64 {
            return Err(Error::out_of_range(format!(
                "{} does not fit a 32-bit count register",
                value
            )));
        }
        Ok(counts as i32)
    }

    /// User-unit value of `counts`
    pub fn from_counts(&self, counts: i32) -> f64 {
        counts as f64 * self.unit_per_count
    }
}
