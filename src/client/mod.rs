use thiserror::Error;

mod session;
mod storage;

pub use session::SessionManager;
pub use storage::{PersistedSession, SessionStorage};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("session storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session storage contains invalid data: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected the request with status {0}")]
    Rejected(u16),
}
