use thiserror::Error;

/// Errors surfaced by the playlist manager. Everything except `Storage` is a
/// deterministic function of the current state and safe to retry after
/// correcting the request.
#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl PlaylistError {
    pub fn not_found(what: impl Into<String>) -> Self {
        PlaylistError::NotFound(what.into())
    }
}
