//! # StageKit Core
//!
//! Core types shared by every StageKit crate: the position [`Vector`], the
//! error taxonomy, controller identity and session state enums, unit
//! handling and the three-point [`Autofocus`] helper.

pub mod autofocus;
pub mod data;
pub mod error;
pub mod units;
pub mod vector;

pub use autofocus::{Autofocus, Plane};
pub use data::{ConnectionState, ControllerFamily, HomingState, MotionPolicy, MotionState};
pub use error::{ConnectionError, Error, FocusError, Result, StageError, VectorError};
pub use units::CountScale;
pub use vector::Vector;
