//! Fixed-dimension position vector
//!
//! Every stage position, travel limit and calibration offset is a [`Vector`].
//! The dimension is fixed at construction and is always at least 1.

use crate::error::VectorError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Ordered sequence of real coordinates
///
/// Equality is exact and componentwise. Vectors of different dimensions are
/// never equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Vector {
    data: Vec<f64>,
}

impl Vector {
    /// Create a vector from its coordinates
    pub fn new(values: impl Into<Vec<f64>>) -> Result<Self> {
        let data = values.into();
        if data.is_empty() {
            return Err(VectorError::ZeroDimension.into());
        }
        Ok(Self { data })
    }

    /// Create a zero vector of dimension `dim`
    pub fn zeros(dim: usize) -> Result<Self> {
        Self::new(vec![0.0; dim])
    }

    /// Create a vector of dimension `dim`, padding missing coordinates with 0
    pub fn with_dim(values: &[f64], dim: usize) -> Result<Self> {
        if values.len() > dim {
            return Err(VectorError::DimensionMismatch {
                expected: dim,
                actual: values.len(),
            }
            .into());
        }
        let mut data = values.to_vec();
        data.resize(dim, 0.0);
        Self::new(data)
    }

    /// Number of coordinates
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    /// Coordinates as a slice
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Iterate over the coordinates
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied()
    }

    /// Consume the vector into its coordinates
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Coordinate at `index`
    pub fn get(&self, index: usize) -> Result<f64> {
        self.data
            .get(index)
            .copied()
            .ok_or_else(|| self.index_error(index))
    }

    /// Replace the coordinate at `index`
    pub fn set(&mut self, index: usize, value: f64) -> Result<()> {
        let err = self.index_error(index);
        let slot = self.data.get_mut(index).ok_or(err)?;
        *slot = value;
        Ok(())
    }

    pub fn x(&self) -> Result<f64> {
        self.get(0)
    }

    pub fn y(&self) -> Result<f64> {
        self.get(1)
    }

    pub fn z(&self) -> Result<f64> {
        self.get(2)
    }

    pub fn w(&self) -> Result<f64> {
        self.get(3)
    }

    pub fn set_x(&mut self, value: f64) -> Result<()> {
        self.set(0, value)
    }

    pub fn set_y(&mut self, value: f64) -> Result<()> {
        self.set(1, value)
    }

    pub fn set_z(&mut self, value: f64) -> Result<()> {
        self.set(2, value)
    }

    pub fn set_w(&mut self, value: f64) -> Result<()> {
        self.set(3, value)
    }

    /// First two coordinates as a 2D vector
    pub fn xy(&self) -> Result<Vector> {
        Vector::new(vec![self.x()?, self.y()?])
    }

    /// Overwrite the first two coordinates from a 2D vector
    pub fn set_xy(&mut self, value: &Vector) -> Result<()> {
        if value.dim() != 2 {
            return Err(VectorError::DimensionMismatch {
                expected: 2,
                actual: value.dim(),
            }
            .into());
        }
        // Check the target before touching either coordinate.
        self.get(1)?;
        self.data[0] = value.data[0];
        self.data[1] = value.data[1];
        Ok(())
    }

    /// Elementwise sum
    pub fn checked_add(&self, other: &Vector) -> Result<Vector> {
        self.zip_with(other, |a, b| a + b)
    }

    /// Elementwise difference
    pub fn checked_sub(&self, other: &Vector) -> Result<Vector> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Elementwise product
    pub fn checked_mul(&self, other: &Vector) -> Result<Vector> {
        self.zip_with(other, |a, b| a * b)
    }

    /// Multiply every coordinate by `factor`
    pub fn scale(&self, factor: f64) -> Vector {
        Vector {
            data: self.data.iter().map(|v| v * factor).collect(),
        }
    }

    /// Fail unless the dimension is `expected`
    pub fn check_dim(&self, expected: usize) -> Result<()> {
        if self.dim() == expected {
            Ok(())
        } else {
            Err(VectorError::DimensionMismatch {
                expected,
                actual: self.dim(),
            }
            .into())
        }
    }

    fn zip_with(&self, other: &Vector, f: impl Fn(f64, f64) -> f64) -> Result<Vector> {
        other.check_dim(self.dim())?;
        Ok(Vector {
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }

    fn index_error(&self, index: usize) -> crate::Error {
        VectorError::IndexOutOfRange {
            index,
            dimension: self.dim(),
        }
        .into()
    }
}

impl TryFrom<Vec<f64>> for Vector {
    type Error = VectorError;

    fn try_from(data: Vec<f64>) -> std::result::Result<Self, Self::Error> {
        if data.is_empty() {
            return Err(VectorError::ZeroDimension);
        }
        Ok(Self { data })
    }
}

impl From<Vector> for Vec<f64> {
    fn from(v: Vector) -> Self {
        v.data
    }
}

impl<const N: usize> From<[f64; N]> for Vector {
    fn from(values: [f64; N]) -> Self {
        const { assert!(N > 0, "a Vector needs at least one coordinate") };
        Self {
            data: values.to_vec(),
        }
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

impl Add for &Vector {
    type Output = Result<Vector>;

    fn add(self, rhs: &Vector) -> Self::Output {
        self.checked_add(rhs)
    }
}

impl Sub for &Vector {
    type Output = Result<Vector>;

    fn sub(self, rhs: &Vector) -> Self::Output {
        self.checked_sub(rhs)
    }
}

impl Mul<f64> for &Vector {
    type Output = Vector;

    fn mul(self, rhs: f64) -> Vector {
        self.scale(rhs)
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;

    fn mul(self, rhs: f64) -> Vector {
        self.scale(rhs)
    }
}

impl Div<f64> for &Vector {
    type Output = Vector;

    fn div(self, rhs: f64) -> Vector {
        self.scale(1.0 / rhs)
    }
}

impl Div<f64> for Vector {
    type Output = Vector;

    fn div(self, rhs: f64) -> Vector {
        self.scale(1.0 / rhs)
    }
}
