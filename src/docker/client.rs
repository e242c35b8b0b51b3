use std::path::{Path, PathBuf};
use std::sync::Arc;

use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, header};
use hyper_util::rt::TokioIo;
use tokio::sync::mpsc;

use super::tailer::DockerTailer;
use super::{Error, Result};
use crate::config::LogSource;
use crate::container::Container;
use crate::pipeline::Message;
use crate::scanner::ContainerRuntime;

/// The engine API moves quickly, requests are pinned to this version.
pub const DOCKER_API_VERSION: &str = "1.25";

/// Minimal client of the docker engine API, speaking HTTP/1.1 over the
/// daemon's unix socket. Every request opens its own connection.
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: Arc<Path>,
}

impl DockerClient {
    /// # Errors
    ///
    /// Returns [`Error::SocketMissing`] if nothing exists at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Result<Self> {
        let socket_path = socket_path.into();
        if !socket_path.exists() {
            return Err(Error::SocketMissing { path: socket_path });
        }

        Ok(Self {
            socket_path: socket_path.into(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends `GET /v<version><path_and_query>` and returns the response once
    /// its headers arrived. Non 2xx statuses are errors.
    pub(super) async fn get(&self, path_and_query: &str) -> Result<Response<Incoming>> {
        let uri = format!("/v{}{}", DOCKER_API_VERSION, path_and_query);
        let stream = tokio::net::UnixStream::connect(&*self.socket_path)
            .await
            .map_err(|source| Error::SocketConnect {
                path: self.socket_path.to_path_buf(),
                source,
            })?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream))
                .await
                .map_err(Error::Handshake)?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                log::debug!("docker connection closed: {}", err);
            }
        });

        let request = Request::get(&uri)
            .header(header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|source| Error::Request {
                uri: uri.clone(),
                source,
            })?;
        log::trace!("GET {}", &uri);
        let response = sender
            .send_request(request)
            .await
            .map_err(|source| Error::Send {
                uri: uri.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(Error::Status {
                uri,
                status: response.status(),
            });
        }

        Ok(response)
    }
}

impl ContainerRuntime for DockerClient {
    type Error = Error;
    type Tailer = DockerTailer;

    async fn list_containers(&self) -> Result<Vec<Container>> {
        let path = "/containers/json";
        let body = self
            .get(path)
            .await?
            .into_body()
            .collect()
            .await
            .map_err(Error::Body)?
            .to_bytes();

        serde_json::from_slice(&body).map_err(|source| Error::Decode {
            uri: path.to_owned(),
            source,
        })
    }

    fn new_tailer(
        &self,
        container: &Container,
        source: Arc<LogSource>,
        output: mpsc::Sender<Message>,
    ) -> DockerTailer {
        DockerTailer::new(self.clone(), container.id.clone(), source, output)
    }
}
