//! "New release detected" events and the single consumer that turns them into runs.
//!
//! Producers (the poller and the webhook handler) only send events; the consumer is
//! the only thing that calls `WorkflowEngine::run`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::error::AppError;
use crate::release::{ReleaseSynchronizer, UpdateCheck};
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::types::RunOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Poller,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEvent {
    pub tag: String,
    pub source: EventSource,
}

pub type ReleaseEventSender = mpsc::UnboundedSender<ReleaseEvent>;
pub type ReleaseEventReceiver = mpsc::UnboundedReceiver<ReleaseEvent>;

pub fn channel() -> (ReleaseEventSender, ReleaseEventReceiver) {
    mpsc::unbounded_channel()
}

/// Poll for new releases on a fixed interval until shutdown.
pub async fn run_poller(
    synchronizer: Arc<ReleaseSynchronizer>,
    interval: Duration,
    events: ReleaseEventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(interval_secs = interval.as_secs(), "Release poller started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        match synchronizer.has_update().await {
            Ok(UpdateCheck::Available(release)) => {
                tracing::info!(tag = %release.tag, "New release detected");
                let event = ReleaseEvent {
                    tag: release.tag,
                    source: EventSource::Poller,
                };
                if events.send(event).is_err() {
                    tracing::warn!("Release consumer is gone, stopping poller");
                    break;
                }
            }
            Ok(UpdateCheck::UpToDate(release)) => {
                tracing::debug!(tag = %release.tag, "Working tree is up to date");
            }
            Ok(UpdateCheck::Unreachable { reason }) => {
                tracing::warn!(reason = %reason, "Release source unreachable");
            }
            Err(e) => {
                tracing::error!(error = %e, "Update check failed");
            }
        }
    }
    tracing::info!("Release poller stopped");
}

/// Consume release events one at a time until shutdown or until all senders are gone.
pub async fn run_consumer(
    engine: Arc<WorkflowEngine>,
    mut events: ReleaseEventReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Release consumer started");

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        handle_event(&engine, event).await;
    }
    tracing::info!("Release consumer stopped");
}

async fn handle_event(engine: &WorkflowEngine, event: ReleaseEvent) {
    // A webhook and the poller can both report the same release
    match engine.synchronizer().known_tags().await {
        Ok(tags) if tags.contains(&event.tag) => {
            tracing::info!(tag = %event.tag, source = ?event.source, "Release already applied, ignoring event");
            return;
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not read local tags, running anyway"),
    }

    tracing::info!(tag = %event.tag, source = ?event.source, "Processing release event");
    let options = RunOptions {
        revision: Some(event.tag.clone()),
        ..Default::default()
    };

    match engine.run(options).await {
        Ok(report) => {
            tracing::info!(tag = %event.tag, run = %report.id, "Run completed");
        }
        Err(AppError::AlreadyRunning) => {
            tracing::warn!(tag = %event.tag, "A run is already in progress, event dropped");
        }
        Err(e) => {
            let run = e.report().map(|r| r.id.clone()).unwrap_or_default();
            tracing::error!(tag = %event.tag, run = %run, error = %e, "Run failed");
        }
    }
}
