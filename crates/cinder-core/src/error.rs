use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    /// Encryption was requested without a password.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("sign must be {expected} characters long")]
    SignFormat { expected: usize },

    #[error("note not found")]
    NotFound,

    /// Missing password, wrong password and undecryptable data all land here.
    #[error("password error: {0}")]
    Password(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Transient contention inside a backend. Retried by `NoteService`.
    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operation may succeed if simply tried again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}
