use crate::{domain::UserId, session::SessionState};

/// Core error type for the pairing relay.
///
/// Adapter crates map their specific errors into this type so the transport layer
/// can decide what to show the user (state errors) and what to only log.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("user {user} is {state}, cannot {action}")]
    InvalidState {
        user: UserId,
        state: SessionState,
        action: &'static str,
    },

    #[error("user {0} is not in a chat")]
    NotPaired(UserId),

    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    #[error("user {0} is blocked")]
    Blocked(UserId),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// True for errors caused by what the user asked for (as opposed to infrastructure).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidState { .. }
                | Error::NotPaired(_)
                | Error::UnknownUser(_)
                | Error::Blocked(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
