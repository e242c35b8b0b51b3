use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("docker socket `{path}` does not exist")]
    SocketMissing { path: PathBuf },
    #[error("failed to connect to socket `{path}`: {source}")]
    SocketConnect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP handshake with the docker daemon failed: {0}")]
    Handshake(#[source] hyper::Error),
    #[error("failed to build request `{uri}`: {source}")]
    Request {
        uri: String,
        #[source]
        source: hyper::http::Error,
    },
    #[error("request `{uri}` failed: {source}")]
    Send {
        uri: String,
        #[source]
        source: hyper::Error,
    },
    #[error("request `{uri}` returned status {status}")]
    Status {
        uri: String,
        status: hyper::StatusCode,
    },
    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),
    #[error("failed to decode response of `{uri}`: {source}")]
    Decode {
        uri: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
