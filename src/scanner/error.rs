#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no container source defined")]
    NoContainerSource,
    #[error("scanner is already started")]
    AlreadyStarted,
    #[error("can't initialize container runtime client: {0}")]
    ClientInit(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;
