use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encoding failure: {0}")]
    EncodingFailure(String),

    #[error("Corrupt stream: {0}")]
    CorruptStream(String),

    #[error("Unsupported stream feature: {0}")]
    Unsupported(String),
}

impl CodecError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptStream(_))
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

// Reads only ever fail on a short buffer; writes go to Vec<u8> and cannot fail.
impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                CodecError::CorruptStream("unexpected end of stream".into())
            }
            _ => CodecError::CorruptStream(err.to_string()),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
