use std::collections::HashMap;
use std::sync::Arc;

use http_body_util::BodyExt;
use serde::Deserialize;

use super::{DockerClient, Error, Result};
use crate::container::ContainerID;
use crate::fanout::{EventFanout, Inputs, StreamError};

/// `/events` filtered on `{"type":["container"]}`.
const EVENTS_PATH: &str = "/events?filters=%7B%22type%22%3A%5B%22container%22%5D%7D";

pub type ContainerEventFanout = EventFanout<Arc<ContainerEvent>>;

/// A container lifecycle event, e.g. `start`, `die` or `destroy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub container_id: ContainerID,
    pub image: String,
    pub action: String,
    pub time: i64,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Actor")]
    actor: RawActor,
    #[serde(default)]
    time: i64,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

/// Decodes one line of the events stream. Events not about containers are
/// skipped.
fn decode_event(line: &[u8]) -> std::result::Result<Option<ContainerEvent>, serde_json::Error> {
    let raw: RawEvent = serde_json::from_slice(line)?;
    if raw.kind != "container" {
        return Ok(None);
    }
    let container_id = ContainerID::new(&raw.actor.id)
        .map_err(<serde_json::Error as serde::de::Error>::custom)?;
    let mut attributes = raw.actor.attributes;

    Ok(Some(ContainerEvent {
        container_id,
        image: attributes.remove("image").unwrap_or_default(),
        action: raw.action,
        time: raw.time,
    }))
}

/// Splits a chunked byte stream into newline terminated lines.
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if line.iter().any(|b| !b.is_ascii_whitespace()) {
                lines.push(line);
            }
        }
        lines
    }
}

/// Streams container events from the daemon into a fanout's inputs.
///
/// Undecodable events are published on the error input and skipped. Returns
/// when the events stream ends, or when the fanout stopped consuming inputs.
///
/// # Errors
///
/// Returns the error that broke the events stream, after publishing it on
/// the error input.
pub async fn forward_events(
    client: DockerClient,
    inputs: Inputs<Arc<ContainerEvent>>,
) -> Result<()> {
    let mut body = match client.get(EVENTS_PATH).await {
        Ok(response) => response.into_body(),
        Err(err) => return Err(publish_error(&inputs, err).await),
    };
    log::debug!("Subscribed to docker container events");

    let mut splitter = LineSplitter::default();
    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => return Err(publish_error(&inputs, Error::Body(err)).await),
        };
        let Ok(chunk) = frame.into_data() else {
            continue;
        };
        for line in splitter.push(&chunk) {
            match decode_event(&line) {
                Ok(Some(event)) => {
                    log::trace!(
                        "container event: {} {}",
                        event.action,
                        event.container_id.short()
                    );
                    if inputs.data.send(Arc::new(event)).await.is_err() {
                        log::debug!("event fanout stopped, closing events stream");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(source) => {
                    let err = Error::Decode {
                        uri: EVENTS_PATH.to_owned(),
                        source,
                    };
                    log::warn!("{}", err);
                    if inputs.errors.send(StreamError::producer(err)).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
    log::debug!("docker events stream ended");

    Ok(())
}

async fn publish_error(inputs: &Inputs<Arc<ContainerEvent>>, err: Error) -> Error {
    log::error!("container events stream failed: {}", err);
    // Keep our own copy of the error, subscribers get its message.
    let published = StreamError::producer(std::io::Error::other(err.to_string()));
    if inputs.errors.send(published).await.is_err() {
        log::debug!("event fanout stopped before the error could be published");
    }
    err
}
