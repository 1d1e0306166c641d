use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug)]
pub enum ModelError {
    InvalidId(uuid::Error),
    EmptyContent,
    ContentTooLong { len: usize, max: usize },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidId(err) => write!(f, "invalid message id: {err}"),
            ModelError::EmptyContent => write!(f, "message content is empty"),
            ModelError::ContentTooLong { len, max } => write!(
                f,
                "message content is {len} characters, limit is {max}"
            ),
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::InvalidId(err) => Some(err),
            ModelError::EmptyContent | ModelError::ContentTooLong { .. } => {
                None
            }
        }
    }
}

impl From<uuid::Error> for ModelError {
    fn from(err: uuid::Error) -> Self {
        ModelError::InvalidId(err)
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
