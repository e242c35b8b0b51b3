use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};

use super::StreamError;

/// Consumer side of a subscription. Both outputs are closed once the
/// listener is unsubscribed, after a final error item.
#[derive(Debug)]
pub struct Outputs<T> {
    pub data: mpsc::Receiver<T>,
    pub errors: mpsc::Receiver<StreamError>,
}

/// An item travelling through the fanout.
#[derive(Debug, Clone)]
pub(super) enum Item<T> {
    Data(T),
    Error(StreamError),
}

#[derive(Debug)]
pub(super) struct Subscription<T> {
    data: mpsc::Sender<T>,
    errors: mpsc::Sender<StreamError>,
    write_timeout: Duration,
}

impl<T> Subscription<T> {
    pub(super) fn new(buffer_size: usize, write_timeout: Duration) -> (Self, Outputs<T>) {
        let (data_tx, data_rx) = mpsc::channel(buffer_size);
        let (errors_tx, errors_rx) = mpsc::channel(buffer_size);
        (
            Self {
                data: data_tx,
                errors: errors_tx,
                write_timeout,
            },
            Outputs {
                data: data_rx,
                errors: errors_rx,
            },
        )
    }

    /// Enqueues `item`, waiting at most the write timeout.
    pub(super) async fn send(&self, item: Item<T>) -> Result<(), StreamError> {
        match item {
            Item::Data(data) => self
                .data
                .send_timeout(data, self.write_timeout)
                .await
                .map_err(timeout_or_closed),
            Item::Error(err) => self
                .errors
                .send_timeout(err, self.write_timeout)
                .await
                .map_err(timeout_or_closed),
        }
    }

    /// Delivers a final error item and closes both outputs. Consuming the
    /// subscription guarantees the outputs are closed exactly once.
    pub(super) async fn close(self, err: StreamError) {
        if let Err(send_err) = self.errors.send_timeout(err, self.write_timeout).await {
            log::debug!("failed to deliver closing error: {}", timeout_or_closed(send_err));
        }
    }
}

fn timeout_or_closed<T>(err: SendTimeoutError<T>) -> StreamError {
    match err {
        SendTimeoutError::Timeout(_) => StreamError::WriteTimeout,
        SendTimeoutError::Closed(_) => StreamError::Disconnected,
    }
}
