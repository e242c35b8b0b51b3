//! Creo Logs: discovers the log sources of a host and keeps tailing sessions
//! in line with them.
//!
//! This library provides the discovery side of a log collection agent:
//! resolving file sources into concrete files, reconciling docker sources
//! against the running containers, and broadcasting container events to
//! independent internal consumers.
use std::sync::Arc;

use error::ResultOkLogExt;
use scanner::Scanner;

pub mod auditor;
pub mod config;
pub mod container;
pub mod docker;
pub mod error;
pub mod fanout;
pub mod file_provider;
pub mod pipeline;
pub mod scanner;

/// Name under which the agent itself listens to container events.
const EVENT_LOGGER: &str = "event-logger";

/// Runs the Creo Logs agent until Ctrl-C is received.
///
/// Loads the configuration, starts the pipelines, resolves the files to tail,
/// streams container events and starts the container scanner.
///
/// # Errors
///
/// Possible errors include:
/// - Missing or invalid configuration file.
/// - Failure to subscribe to the container events fanout.
/// - Failure to listen for the shutdown signal.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::from_env()?;
    let sources = config.log_sources();

    let auditor = Arc::new(auditor::MemoryAuditor::default());
    let (provider, pipelines) =
        pipeline::Provider::new(config.pipelines, config.pipeline_buffer_size);
    for (idx, mut rx) in pipelines.into_iter().enumerate() {
        let auditor = Arc::clone(&auditor);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                log::trace!(
                    "pipeline {}: {} bytes from {}",
                    idx,
                    message.content.len(),
                    message.origin.identifier
                );
                auditor.commit(message.origin.identifier, message.origin.offset);
            }
        });
    }

    let files = file_provider::FileProvider::new(sources.clone(), config.open_files_limit)
        .files_to_tail();
    for file in &files {
        log::info!(
            "Tailing file `{}` for source `{}`",
            file.path.display(),
            file.source.name()
        );
    }

    let fanout = docker::ContainerEventFanout::new();
    if let Some(inputs) = fanout.setup(config.event_fanout()).await.ok_log() {
        let mut outputs = fanout.subscribe(EVENT_LOGGER).await?;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = outputs.data.recv() => log::info!(
                        "Container {} {} ({})",
                        event.container_id.short(),
                        event.action,
                        event.image
                    ),
                    Some(err) = outputs.errors.recv() => log::warn!("container events: {}", err),
                    else => break,
                }
            }
        });
        if let Some(client) = docker::DockerClient::new(&config.docker_socket).ok_log() {
            tokio::spawn(async move { docker::forward_events(client, inputs).await.ok_log() });
        }
    }

    let socket = config.docker_socket.clone();
    let scanner = Arc::new(
        Scanner::new(&sources, provider, Arc::clone(&auditor), move || {
            docker::DockerClient::new(&socket)
        })
        .with_scan_period(config.scan_period()),
    );
    scanner.start().await;
    log::debug!("Started container scanner");

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down, {} offsets committed", auditor.size());
    scanner.stop().await;
    fanout.stop().await;

    Ok(())
}
