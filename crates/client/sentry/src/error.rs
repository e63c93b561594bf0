use std::borrow::Cow;

#[derive(Debug, thiserror::Error)]
pub enum SentryError {
    /// The sentry cancelled the call or dropped the stream during shutdown. Translated into
    /// normal termination by every loop that sees it.
    #[error("Sentry call cancelled")]
    Cancelled,
    #[error("Sentry transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("Sentry rpc error: {0}")]
    Rpc(tonic::Status),
    #[error("Sentry call timed out")]
    Timeout,
    #[error("Sentry speaks an unsupported protocol: eth/{0}")]
    ProtocolMismatch(u32),
    #[error("Malformed sentry payload: {0}")]
    Malformed(Cow<'static, str>),
}

impl From<tonic::Status> for SentryError {
    fn from(status: tonic::Status) -> Self {
        if status.code() == tonic::Code::Cancelled {
            Self::Cancelled
        } else {
            Self::Rpc(status)
        }
    }
}

impl SentryError {
    pub fn malformed(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
