//! Error types for gridtile-ops operations

use gridtile_device::DeviceError;

/// Result type for gridtile-ops operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating an operation or committing its program
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Operand lives in host memory
    #[error("operand '{operand}' must be on device")]
    NotOnDevice { operand: &'static str },

    /// Operand not supplied
    #[error("operand '{operand}' is missing")]
    MissingOperand { operand: &'static str },

    /// Operand has no device buffer allocated
    #[error("operand '{operand}' has no device buffer")]
    MissingBuffer { operand: &'static str },

    /// Operand memory layout unsupported by the operation
    #[error("operand '{operand}' must be interleaved, got {actual}")]
    UnsupportedMemoryLayout { operand: &'static str, actual: String },

    /// Operand layout unsupported by the operation
    #[error("operand '{operand}' must be in tile layout")]
    NotTiled { operand: &'static str },

    /// Two operands disagree on a property that must match
    #[error("{property} mismatch: {expected} vs {actual}")]
    Mismatch {
        property: &'static str,
        expected: String,
        actual: String,
    },

    /// Shape cannot be carried by the operation
    #[error("invalid tensor shape: {0}")]
    InvalidShape(String),

    /// Data type conversion outside tile layout
    #[error("data type conversion from {from} to {to} requires tile layout")]
    UnsupportedConversion { from: String, to: String },

    /// Resource commitment failed on the device
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl Error {
    pub(crate) fn mismatch(property: &'static str, expected: impl ToString, actual: impl ToString) -> Self {
        Self::Mismatch {
            property,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
