use thiserror::Error;

/// A payload did not match the layout it was decoded against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Input too short: needed {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("Integer with {len} significant bytes does not fit in {bits} bits")]
    Overflow { len: usize, bits: usize },

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("No zero-padded address anchor in message body")]
    AnchorNotFound,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl DecodeError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}
