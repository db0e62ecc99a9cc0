use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("invalid rule #{index}: {reason}")]
    InvalidRule { index: usize, reason: String },
    #[error("invalid role binding #{index}: {reason}")]
    InvalidBinding { index: usize, reason: String },
    #[error("missing request context: {0}")]
    MissingContext(&'static str),
    #[error("policy source error: {0}")]
    Source(String),
}

impl AuthzError {
    /// True for errors that describe bad configuration rather than a
    /// transient failure of the policy source.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, AuthzError::Source(_))
    }
}

pub type AuthzResult<T> = Result<T, AuthzError>;
