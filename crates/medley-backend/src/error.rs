use medley_shared::ServerKind;
use thiserror::Error;

/// Errors surfaced by backend implementations.
///
/// The sync core classifies retry policy from these variants: an
/// [`BackendError::Http`] status drives unauthorized / unsupported-mirror
/// detection, while [`BackendError::Network`] means the request never
/// reached the server (CORS or transport failure) and will not succeed on
/// retry.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request failed before an HTTP status could be obtained.
    #[error("Network error: {0}")]
    Network(String),

    /// The operation needs a signer but none is connected.
    #[error("Signer required but not connected")]
    SignerMissing,

    /// The signer rejected or failed the signing request.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The server answered, but the payload could not be parsed.
    #[error("Malformed server response: {0}")]
    Malformed(String),

    /// No backend is registered for this server kind.
    #[error("No backend registered for {0} servers")]
    NoBackend(ServerKind),
}

impl BackendError {
    /// The HTTP status, when one was obtained.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        BackendError::Http {
            status,
            message: message.into(),
        }
    }
}
