//! Single producer, multiple consumer broadcast with per-listener backpressure.
//!
//! An [`EventFanout`] is set up once, which yields the producer [`Inputs`].
//! Listeners [`subscribe`](EventFanout::subscribe) by name and receive every
//! item published afterwards, in publish order, on their own bounded
//! [`Outputs`]. A listener that does not accept an item within the write
//! timeout is unsubscribed with [`StreamError::WriteTimeout`]; the producer
//! is never blocked by a slow listener.
//!
//! # Lifecycle
//!
//! - The dispatch loop is started by the first subscription.
//! - It stops on [`stop`](EventFanout::stop), when the last listener leaves,
//!   or when the producer drops its inputs. All remaining listeners receive
//!   [`StreamError::EndOfStream`] and their outputs are closed.
//! - Once stopped, the loop drops the input receivers: producer sends fail
//!   with a closed channel error and [`subscribe`](EventFanout::subscribe)
//!   returns [`Error::NotConfigured`] until [`setup`](EventFanout::setup) is
//!   called again. This already holds once a stop was requested, even if
//!   the loop has not exited yet.
mod config;
mod error;
mod subscription;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

pub use config::Config;
pub use error::{Error, Result, StreamError};
pub use subscription::Outputs;
use subscription::{Item, Subscription};

/// Producer side of a fanout.
#[derive(Debug, Clone)]
pub struct Inputs<T> {
    pub data: mpsc::Sender<T>,
    pub errors: mpsc::Sender<StreamError>,
}

/// Receiving ends owned by the dispatch loop while it runs.
#[derive(Debug)]
struct Receivers<T> {
    data: mpsc::Receiver<T>,
    errors: mpsc::Receiver<StreamError>,
    stop: mpsc::Receiver<()>,
}

#[derive(Debug)]
struct State<T> {
    config: Option<Config>,
    receivers: Option<Receivers<T>>,
    stop_tx: Option<mpsc::Sender<()>>,
    listeners: HashMap<String, Subscription<T>>,
    running: bool,
    // Set once a stop was requested, until the next setup.
    stopping: bool,
    // Bumped by every setup so a loop from a previous setup never touches
    // the new state when it exits.
    generation: u64,
}

impl<T> State<T> {
    fn name(&self) -> String {
        self.config
            .as_ref()
            .map(|config| config.name.clone())
            .unwrap_or_default()
    }

    fn signal_stop(&mut self) {
        self.stopping = true;
        if let Some(stop_tx) = &self.stop_tx {
            // A full buffer means a stop is already pending.
            if let Err(err) = stop_tx.try_send(()) {
                log::trace!("stop signal for `{}` not sent: {}", self.name(), err);
            }
        }
    }
}

/// Cheaply cloneable handle to a fanout instance.
#[derive(Debug)]
pub struct EventFanout<T> {
    state: Arc<RwLock<State<T>>>,
}

impl<T> Clone for EventFanout<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for EventFanout<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                config: None,
                receivers: None,
                stop_tx: None,
                listeners: HashMap::new(),
                running: false,
                stopping: false,
                generation: 0,
            })),
        }
    }
}

impl<T> EventFanout<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `config` and (re)initializes the fanout, returning the
    /// producer inputs.
    ///
    /// Calling `setup` again replaces all state: a running loop is stopped
    /// and current listeners are closed with [`StreamError::EndOfStream`].
    ///
    /// # Errors
    ///
    /// - [`Error::ZeroWriteTimeout`] if `config.write_timeout` is zero.
    /// - [`Error::ZeroOutputBufferSize`] if `config.output_buffer_size` is zero.
    /// - [`Error::EmptyName`] if `config.name` is empty.
    pub async fn setup(&self, config: Config) -> Result<Inputs<T>> {
        config.validate()?;

        let (data_tx, data_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        let mut state = self.state.write().await;
        if state.running {
            state.signal_stop();
        }
        for (_, listener) in state.listeners.drain() {
            listener.close(StreamError::EndOfStream).await;
        }
        state.config = Some(config);
        state.receivers = Some(Receivers {
            data: data_rx,
            errors: errors_rx,
            stop: stop_rx,
        });
        state.stop_tx = Some(stop_tx);
        state.running = false;
        state.stopping = false;
        state.generation += 1;

        Ok(Inputs {
            data: data_tx,
            errors: errors_tx,
        })
    }

    /// Registers a new listener and starts the dispatch loop if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConfigured`] if the fanout was never set up, or was
    ///   stopped since the last setup.
    /// - [`Error::AlreadySubscribed`] if `name` is already subscribed.
    pub async fn subscribe(&self, name: impl Into<String>) -> Result<Outputs<T>> {
        let name = name.into();
        let mut state = self.state.write().await;
        let Some(config) = state.config.clone() else {
            return Err(Error::NotConfigured("<unnamed>".to_owned()));
        };
        if state.listeners.contains_key(&name) {
            return Err(Error::AlreadySubscribed {
                listener: name,
                fanout: config.name,
            });
        }
        if state.stopping || (!state.running && state.receivers.is_none()) {
            return Err(Error::NotConfigured(config.name));
        }

        let (subscription, outputs) =
            Subscription::new(config.output_buffer_size, config.write_timeout);
        state.listeners.insert(name, subscription);

        if !state.running {
            if let Some(receivers) = state.receivers.take() {
                state.running = true;
                let generation = state.generation;
                tokio::spawn(self.clone().dispatch(receivers, generation));
                log::debug!("Started dispatching `{}`", config.name);
            }
        }

        Ok(outputs)
    }

    /// Unsubscribes `name`, delivering [`StreamError::EndOfStream`] before
    /// closing its outputs. See [`unsubscribe_with_error`](Self::unsubscribe_with_error).
    pub async fn unsubscribe(&self, name: &str) -> Result<bool> {
        self.unsubscribe_with_error(name, StreamError::EndOfStream).await
    }

    /// Unsubscribes `name`, delivering `err` before closing its outputs.
    ///
    /// Returns `true` if this was the last listener of a running fanout, in
    /// which case the dispatch loop is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSubscribed`] if `name` is unknown.
    pub async fn unsubscribe_with_error(&self, name: &str, err: StreamError) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(listener) = state.listeners.remove(name) else {
            return Err(Error::NotSubscribed {
                listener: name.to_owned(),
                fanout: state.name(),
            });
        };
        listener.close(err).await;

        if state.running && state.listeners.is_empty() {
            state.signal_stop();
            return Ok(true);
        }

        Ok(false)
    }

    /// Asks the dispatch loop to stop. Returns without waiting for the loop
    /// to exit; repeated calls before the loop reacts have no further effect.
    pub async fn stop(&self) {
        self.state.write().await.signal_stop();
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    pub async fn listeners(&self) -> usize {
        self.state.read().await.listeners.len()
    }

    async fn dispatch(self, mut receivers: Receivers<T>, generation: u64) {
        let mut data_closed = false;
        let mut errors_closed = false;
        // Items already queued on one input are still delivered after the
        // other input was closed.
        while !(data_closed && errors_closed) {
            let item = tokio::select! {
                biased;
                _ = receivers.stop.recv() => break,
                data = receivers.data.recv(), if !data_closed => match data {
                    Some(data) => Item::Data(data),
                    None => {
                        data_closed = true;
                        continue;
                    }
                },
                err = receivers.errors.recv(), if !errors_closed => match err {
                    Some(err) => Item::Error(err),
                    None => {
                        errors_closed = true;
                        continue;
                    }
                },
            };

            // Evict after the round, with the read lock released.
            for (name, err) in self.broadcast(item).await {
                let fanout = self.state.read().await.name();
                log::info!("forcefully unsubscribing {} from {}: {}", name, fanout, err);
                if let Err(err) = self.unsubscribe_with_error(&name, err).await {
                    log::debug!("{}", err);
                }
            }
        }
        drop(receivers);

        let mut state = self.state.write().await;
        if state.generation != generation {
            return;
        }
        for (_, listener) in state.listeners.drain() {
            listener.close(StreamError::EndOfStream).await;
        }
        state.running = false;
        log::debug!("Stopped dispatching `{}`", state.name());
    }

    /// Sends `item` to every listener and returns the ones that failed.
    async fn broadcast(&self, item: Item<T>) -> Vec<(String, StreamError)> {
        let state = self.state.read().await;
        let mut failed = Vec::new();
        for (name, listener) in &state.listeners {
            if let Err(err) = listener.send(item.clone()).await {
                failed.push((name.clone(), err));
            }
        }

        failed
    }
}
