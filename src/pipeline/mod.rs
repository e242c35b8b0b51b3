//! Handoff point between discovery and the ingestion pipeline.
//!
//! Every tailer is wired to exactly one output channel for its whole session.
//! The [`Provider`] hands those channels out round-robin.
use std::sync::atomic::{AtomicUsize, Ordering};

use hyper::body::Bytes;
use tokio::sync::mpsc;

/// Where a message was read from, and how far the reader got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub identifier: String,
    pub offset: String,
}

/// A chunk of raw log output.
#[derive(Debug, Clone)]
pub struct Message {
    pub origin: Origin,
    pub content: Bytes,
}

pub trait PipelineProvider: Send + Sync + 'static {
    /// Returns the output channel the next tailer should write to.
    fn next_pipeline_chan(&self) -> mpsc::Sender<Message>;
}

#[derive(Debug)]
pub struct Provider {
    outputs: Vec<mpsc::Sender<Message>>,
    next: AtomicUsize,
}

impl Provider {
    /// Creates `pipelines` bounded channels and returns the provider together
    /// with the consuming ends, in the same order.
    ///
    /// `pipelines` and `buffer_size` are clamped to at least 1.
    pub fn new(pipelines: usize, buffer_size: usize) -> (Self, Vec<mpsc::Receiver<Message>>) {
        let (outputs, inputs): (Vec<_>, Vec<_>) = (0..pipelines.max(1))
            .map(|_| mpsc::channel(buffer_size.max(1)))
            .unzip();

        (
            Self {
                outputs,
                next: AtomicUsize::new(0),
            },
            inputs,
        )
    }
}

impl PipelineProvider for Provider {
    fn next_pipeline_chan(&self) -> mpsc::Sender<Message> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.outputs.len();
        self.outputs[idx].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(identifier: &str) -> Message {
        Message {
            origin: Origin {
                identifier: identifier.to_owned(),
                offset: "0".to_owned(),
            },
            content: Bytes::from_static(b"hello"),
        }
    }

    #[tokio::test]
    async fn test_round_robin() {
        let (provider, mut inputs) = Provider::new(2, 4);
        assert_eq!(inputs.len(), 2);

        for name in ["a", "b", "c"] {
            provider.next_pipeline_chan().send(message(name)).await.unwrap();
        }

        assert_eq!(inputs[0].recv().await.unwrap().origin.identifier, "a");
        assert_eq!(inputs[1].recv().await.unwrap().origin.identifier, "b");
        assert_eq!(inputs[0].recv().await.unwrap().origin.identifier, "c");
    }

    #[test]
    fn test_clamps_zero_pipelines() {
        let (_provider, inputs) = Provider::new(0, 0);
        assert_eq!(inputs.len(), 1);
    }
}
