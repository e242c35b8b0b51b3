use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("write timeout must be higher than 0")]
    ZeroWriteTimeout,
    #[error("output buffer size must be higher than 0")]
    ZeroOutputBufferSize,
    #[error("name can't be empty")]
    EmptyName,
    #[error("fanout `{0}` is not set up")]
    NotConfigured(String),
    #[error("listener `{listener}` is already subscribed to `{fanout}`")]
    AlreadySubscribed { listener: String, fanout: String },
    #[error("listener `{listener}` is not subscribed to `{fanout}`")]
    NotSubscribed { listener: String, fanout: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error items delivered on a listener's error output.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("end of stream")]
    EndOfStream,
    #[error("timeout while writing to listener")]
    WriteTimeout,
    #[error("listener dropped its receiver")]
    Disconnected,
    #[error(transparent)]
    Producer(Arc<dyn std::error::Error + Send + Sync>),
}

impl StreamError {
    /// Wraps an error raised by the producing side.
    pub fn producer(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Producer(Arc::new(err))
    }
}
