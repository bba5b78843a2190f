use thiserror::Error;

/// Failure classes for the relay.
///
/// Handshake and credential errors are terminal for that connection only;
/// subscription errors are synchronous and leave existing state untouched;
/// delivery failures are logged per subscriber and never cascade.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("handshake timed out before init message")]
    HandshakeTimeout,

    #[error("invalid credentials for {package_name}")]
    CredentialInvalid { package_name: String },

    #[error("invalid subscription token: {0}")]
    InvalidSubscriptionToken(String),

    #[error("delivery to {0} failed: transport closed")]
    DeliveryFailure(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("transport closed unexpectedly")]
    TransportClosed,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("app not registered: {0}")]
    AppNotFound(String),

    #[error("no pending app session for {package_name}")]
    NotPending { package_name: String },

    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("webhook rejected session: {0}")]
    WebhookRejected(String),
}
