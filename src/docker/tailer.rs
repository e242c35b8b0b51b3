use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{DockerClient, Error, Result};
use crate::auditor::Auditor;
use crate::config::LogSource;
use crate::container::ContainerID;
use crate::pipeline::{Message, Origin};
use crate::scanner::Tailer;

/// Follows the stdout and stderr of one container and forwards the raw
/// chunks to its pipeline.
#[derive(Debug)]
pub struct DockerTailer {
    client: DockerClient,
    container_id: ContainerID,
    source: Arc<LogSource>,
    output: mpsc::Sender<Message>,
    should_stop: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DockerTailer {
    pub fn new(
        client: DockerClient,
        container_id: ContainerID,
        source: Arc<LogSource>,
        output: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            client,
            container_id,
            source,
            output,
            should_stop: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            task: None,
        }
    }

    /// Key under which offsets of this container are audited.
    pub fn identifier(&self) -> String {
        format!("docker:{}", self.container_id)
    }

    pub fn source(&self) -> &LogSource {
        &self.source
    }

    async fn start(&mut self, since: Option<String>) -> Result<()> {
        let mut path = format!(
            "/containers/{}/logs?follow=1&stdout=1&stderr=1",
            self.container_id
        );
        if let Some(since) = since {
            path.push_str("&since=");
            path.push_str(&since);
        }

        let response = match self.client.get(&path).await {
            Ok(response) => response,
            Err(err) => {
                // retried by the next scan
                self.should_stop.store(true, Ordering::Release);
                return Err(err);
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(forward_logs(
            response.into_body(),
            stop_rx,
            self.identifier(),
            self.output.clone(),
            Arc::clone(&self.should_stop),
        )));
        log::debug!("Started tailing container {}", self.container_id.short());

        Ok(())
    }
}

impl Tailer for DockerTailer {
    type Error = Error;

    async fn tail_from_beginning(&mut self) -> Result<()> {
        self.start(None).await
    }

    async fn recover_tailing<A: Auditor>(&mut self, auditor: &A) -> Result<()> {
        let since = auditor.offset(&self.identifier());
        self.start(since).await
    }

    fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::Acquire)
    }

    async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // the task may already be gone if the stream ended
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log::error!(
                    "tailer of container {} panicked: {}",
                    self.container_id.short(),
                    err
                );
            }
        }
    }
}

async fn forward_logs(
    mut body: Incoming,
    mut stop_rx: oneshot::Receiver<()>,
    identifier: String,
    output: mpsc::Sender<Message>,
    should_stop: Arc<AtomicBool>,
) {
    loop {
        let frame = tokio::select! {
            _ = &mut stop_rx => return,
            frame = body.frame() => frame,
        };
        let content = match frame {
            Some(Ok(frame)) => match frame.into_data() {
                Ok(content) => content,
                Err(_) => continue,
            },
            Some(Err(err)) => {
                log::warn!("failed to read log stream of {}: {}", identifier, err);
                break;
            }
            None => {
                log::info!("Log stream of {} ended", identifier);
                break;
            }
        };

        let message = Message {
            origin: Origin {
                identifier: identifier.clone(),
                offset: unix_timestamp(),
            },
            content,
        };
        tokio::select! {
            _ = &mut stop_rx => return,
            res = output.send(message) => if res.is_err() {
                log::debug!("pipeline of {} is closed", identifier);
                break;
            },
        }
    }

    should_stop.store(true, Ordering::Release);
}

fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
        .to_string()
}
