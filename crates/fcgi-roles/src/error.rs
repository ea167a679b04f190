//! Role errors.

use fcgi_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    /// The application logic itself failed.
    #[error("application error: {0}")]
    Application(String),

    #[error("required service {0:?} is not registered")]
    MissingService(String),

    /// Writing output to the connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RoleError {
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application(message.into())
    }
}
