use crate::types::ErrorCode;

/// Reasons a validated frame does not decode into a [`Message`](crate::Message).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The opcode is not part of the protocol.
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// The payload ended before a field was complete.
    #[error("truncated field `{field}` (need {needed} bytes, have {available})")]
    TruncatedField {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// An enumerated field holds a value outside its range.
    #[error("invalid value {value} for `{field}`")]
    InvalidEnum { field: &'static str, value: u8 },

    /// A path or name is not valid UTF-8.
    #[error("field `{field}` is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// Bytes remain after the last field.
    #[error("{count} trailing bytes after message")]
    TrailingBytes { count: usize },
}

impl DecodeError {
    /// Protocol error code sent back to the host.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownOpcode(_) => ErrorCode::Unsupported,
            Self::TruncatedField { .. } => ErrorCode::Truncated,
            Self::InvalidEnum { .. } | Self::InvalidUtf8 { .. } | Self::TrailingBytes { .. } => {
                ErrorCode::Malformed
            }
        }
    }
}

/// A string is not one of the `fopen` mode spellings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid open mode `{0}` (expected r, w, a, r+, w+ or a+)")]
pub struct ParseOpenModeError(pub String);

pub type Result<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_mapping() {
        assert_eq!(DecodeError::UnknownOpcode(0x42).error_code(), ErrorCode::Unsupported);
        assert_eq!(
            DecodeError::TruncatedField {
                field: "handle",
                needed: 2,
                available: 1
            }
            .error_code(),
            ErrorCode::Truncated
        );
        assert_eq!(
            DecodeError::InvalidEnum {
                field: "whence",
                value: 7
            }
            .error_code(),
            ErrorCode::Malformed
        );
        assert_eq!(
            DecodeError::InvalidUtf8 { field: "path" }.error_code(),
            ErrorCode::Malformed
        );
        assert_eq!(
            DecodeError::TrailingBytes { count: 3 }.error_code(),
            ErrorCode::Malformed
        );
    }

    #[test]
    fn display_includes_context() {
        let err = DecodeError::TruncatedField {
            field: "offset",
            needed: 4,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "truncated field `offset` (need 4 bytes, have 2)"
        );
        assert_eq!(DecodeError::UnknownOpcode(0x0A).to_string(), "unknown opcode 0x0a");
    }
}
