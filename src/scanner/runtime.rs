use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auditor::Auditor;
use crate::config::LogSource;
use crate::container::Container;
use crate::pipeline::Message;

/// A reading session on the output of a single container.
pub trait Tailer: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Starts reading the container output from its beginning.
    fn tail_from_beginning(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Starts reading from the last offset recorded by `auditor`.
    fn recover_tailing<A: Auditor>(
        &mut self,
        auditor: &A,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether the tailer detected it can't make progress anymore, e.g. the
    /// container exited.
    fn should_stop(&self) -> bool;

    /// Stops reading and waits for the session to wind down. Must be
    /// idempotent.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;
}

/// Client of a container runtime, shared read-only across scans.
pub trait ContainerRuntime: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
    type Tailer: Tailer;

    /// Returns the containers currently running.
    fn list_containers(&self) -> impl Future<Output = Result<Vec<Container>, Self::Error>> + Send;

    /// Creates an idle tailer writing to `output`.
    fn new_tailer(
        &self,
        container: &Container,
        source: Arc<LogSource>,
        output: mpsc::Sender<Message>,
    ) -> Self::Tailer;
}
