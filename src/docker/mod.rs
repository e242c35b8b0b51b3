//! Docker engine integration: container listing, log tailing and the
//! container events stream.
mod client;
mod error;
mod events;
mod tailer;

pub use client::{DOCKER_API_VERSION, DockerClient};
pub use error::{Error, Result};
pub use events::{ContainerEvent, ContainerEventFanout, forward_events};
pub use tailer::DockerTailer;
