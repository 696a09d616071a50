use thiserror::Error;

/// Transport-level failures, kept free of any concrete HTTP client type
/// so fakes can produce them in tests.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("response decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// Login call did not succeed.
    #[error("login failed: {0}")]
    Auth(String),
    /// A call that requires a credential was made with none present.
    /// No network call is issued in this case.
    #[error("not authenticated")]
    Unauthenticated,
    /// The call hit a 401; one re-authentication was attempted and the
    /// original call is reported failed. The caller decides on retry.
    #[error("session expired; re-authentication attempted")]
    SessionExpired,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Channel failures are non-fatal: they drive reconnection and status
/// notifications, never hard failures elsewhere in the system.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("cannot open channel without a credential")]
    Unauthenticated,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("fleet endpoint returned status {status}")]
    Api { status: u16 },
    #[error("fleet payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}
