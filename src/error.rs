//! Error types for textquilt.

use std::fmt;

/// Result type alias for textquilt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for textquilt operations.
#[derive(Debug)]
pub enum Error {
    /// A regex pattern failed to parse or compile.
    InvalidPattern(String),
    /// A counted repetition expanded past the compiler's size cap.
    PatternTooLarge { limit: usize },
    /// Deserialization was attempted on a buffer that is not in the
    /// pristine single-layer state.
    NotPristine,
    /// Serialized data ended before the expected field.
    TruncatedData { expected: usize, remaining: usize },
    /// Serialized data decoded to an impossible structure.
    MalformedData(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPattern(s) => write!(f, "invalid pattern: {s}"),
            Self::PatternTooLarge { limit } => {
                write!(f, "pattern too large: compiled size exceeds {limit}")
            }
            Self::NotPristine => {
                write!(f, "buffer is not in the pristine single-layer state")
            }
            Self::TruncatedData {
                expected,
                remaining,
            } => {
                write!(
                    f,
                    "truncated data: needed {expected} bytes, {remaining} remaining"
                )
            }
            Self::MalformedData(s) => write!(f, "malformed data: {s}"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidPattern("unclosed group".to_string());
        assert!(err.to_string().contains("invalid pattern"));

        let err = Error::TruncatedData {
            expected: 4,
            remaining: 1,
        };
        assert!(err.to_string().contains("needed 4 bytes"));

        let err = Error::NotPristine;
        assert!(err.to_string().contains("pristine"));
    }
}
