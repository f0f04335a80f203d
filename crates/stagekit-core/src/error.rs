//! Error handling for StageKit
//!
//! Provides error types for every layer of the library:
//! - Connection errors (transport open/read/write)
//! - Stage errors (handshake, timeouts, malformed frames, device faults)
//! - Vector errors (indexing and dimension checks)
//! - Focus errors (plane fit preconditions)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents failures of the underlying transport: serial port or USB
/// device handle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {port}")]
    PortNotFound {
        /// The name of the port that was not found.
        port: String,
    },

    /// USB device not found
    #[error("USB device {vid:04x}:{pid:04x} not found")]
    DeviceNotFound {
        /// USB vendor id.
        vid: u16,
        /// USB product id.
        pid: u16,
    },

    /// Failed to open port
    #[error("Failed to open {port}: {reason}")]
    FailedToOpen {
        /// The name of the port or device that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Transport used while not open
    #[error("Not connected")]
    NotConnected,

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {reason}")]
    IoError {
        /// The reason for the I/O error.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Stage error type
///
/// Represents failures while talking to a controller over an open transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// Unexpected or unrecognized reply during connect
    #[error("Handshake failed: {reason}")]
    Handshake {
        /// What the controller sent instead of the expected reply.
        reason: String,
    },

    /// No complete reply within the bound
    #[error("No response within {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Malformed or unparseable reply
    #[error("Protocol error: {reason} (raw: {raw:02x?})")]
    Protocol {
        /// What was wrong with the frame.
        reason: String,
        /// The offending bytes exactly as received.
        raw: Vec<u8>,
    },

    /// Controller reported an internal fault or error code
    #[error("Device fault {code}: {message}")]
    DeviceFault {
        /// Vendor error code.
        code: u32,
        /// Decoded description of the code.
        message: String,
    },

    /// Requested position beyond the configured or device travel
    #[error("Position out of range: {reason}")]
    OutOfRange {
        /// Which bound was violated.
        reason: String,
        /// Vendor error code, when the controller rejected the move.
        code: Option<u32>,
    },

    /// Operation the controller family has no command for
    #[error("{family} does not support {operation}")]
    Unsupported {
        /// Controller family name.
        family: String,
        /// Requested operation.
        operation: &'static str,
    },
}

/// Vector error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    /// Index beyond the vector dimension
    #[error("Index {index} out of range for dimension {dimension}")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The dimension of the vector.
        dimension: usize,
    },

    /// Operand dimensions differ
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension required by the receiver.
        expected: usize,
        /// The dimension that was supplied.
        actual: usize,
    },

    /// A vector needs at least one coordinate
    #[error("Vector dimension must be at least 1")]
    ZeroDimension,
}

/// Autofocus error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FocusError {
    /// The three calibration points do not span a plane
    #[error("Calibration points are collinear or coincident")]
    DegeneratePlane,

    /// Fewer than three calibration points registered
    #[error("Autofocus needs 3 calibration points, have {registered}")]
    NotCalibrated {
        /// Number of points currently registered.
        registered: usize,
    },

    /// The fitted plane has no single Z for a given (X, Y)
    #[error("Fitted plane is vertical, Z is undefined")]
    Division,
}

/// Main error type for StageKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Stage error
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Vector error
    #[error(transparent)]
    Vector(#[from] VectorError),

    /// Autofocus error
    #[error(transparent)]
    Focus(#[from] FocusError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Malformed frame carrying the bytes that were received
    pub fn protocol(reason: impl Into<String>, raw: impl Into<Vec<u8>>) -> Self {
        Error::Stage(StageError::Protocol {
            reason: reason.into(),
            raw: raw.into(),
        })
    }

    /// Unexpected reply during connect
    pub fn handshake(reason: impl Into<String>) -> Self {
        Error::Stage(StageError::Handshake {
            reason: reason.into(),
        })
    }

    /// Device-reported fault
    pub fn device_fault(code: u32, message: impl Into<String>) -> Self {
        Error::Stage(StageError::DeviceFault {
            code,
            message: message.into(),
        })
    }

    /// Position outside the allowed travel
    pub fn out_of_range(reason: impl Into<String>) -> Self {
        Error::Stage(StageError::OutOfRange {
            reason: reason.into(),
            code: None,
        })
    }

    /// Move rejected by the controller with a vendor error code
    pub fn out_of_range_code(code: u32, reason: impl Into<String>) -> Self {
        Error::Stage(StageError::OutOfRange {
            reason: reason.into(),
            code: Some(code),
        })
    }

    /// Operation not available for a controller family
    pub fn unsupported(family: impl ToString, operation: &'static str) -> Self {
        Error::Stage(StageError::Unsupported {
            family: family.to_string(),
            operation,
        })
    }

    /// No reply within `timeout_ms`
    pub fn timeout(timeout_ms: u64) -> Self {
        Error::Stage(StageError::Timeout { timeout_ms })
    }

    /// Lost or failed transport
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Error::Connection(ConnectionError::ConnectionLost {
            reason: reason.into(),
        })
    }

    /// Operand dimension does not match
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Error::Vector(VectorError::DimensionMismatch { expected, actual })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Stage(StageError::Timeout { .. }))
    }

    /// Check if this is a connection error
    ///
    /// Plain I/O errors count as transport failures.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Check if this is a malformed-frame error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Stage(StageError::Protocol { .. }))
    }

    /// Check if this is a handshake error
    pub fn is_handshake_error(&self) -> bool {
        matches!(self, Error::Stage(StageError::Handshake { .. }))
    }

    /// Check if the controller reported a fault
    pub fn is_device_fault(&self) -> bool {
        matches!(self, Error::Stage(StageError::DeviceFault { .. }))
    }

    /// Check if this is a travel-limit violation
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Error::Stage(StageError::OutOfRange { .. }))
    }

    /// Check if the family lacks the requested operation
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Stage(StageError::Unsupported { .. }))
    }

    /// Vendor error code of a device fault or a rejected move
    pub fn device_code(&self) -> Option<u32> {
        match self {
            Error::Stage(StageError::DeviceFault { code, .. }) => Some(*code),
            Error::Stage(StageError::OutOfRange { code, .. }) => *code,
            _ => None,
        }
    }

    /// Check if this is a dimension mismatch
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(self, Error::Vector(VectorError::DimensionMismatch { .. }))
    }

    /// Attach the complete received frame to a protocol error
    ///
    /// Decoders work on text already stripped of its terminator; this puts
    /// the bytes exactly as received back in. Other errors pass through.
    pub fn with_frame(self, frame: &[u8]) -> Self {
        match self {
            Error::Stage(StageError::Protocol { reason, .. }) => Error::Stage(StageError::Protocol {
                reason,
                raw: frame.to_vec(),
            }),
            other => other,
        }
    }

    /// Raw bytes attached to a protocol error
    pub fn raw_bytes(&self) -> Option<&[u8]> {
        match self {
            Error::Stage(StageError::Protocol { raw, .. }) => Some(raw),
            _ => None,
        }
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
