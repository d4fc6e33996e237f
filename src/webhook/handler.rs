use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::queue::{self, EventSource};
use crate::server::AppState;
use crate::webhook::events::{ReleaseEvent, WebhookEvent};
use crate::webhook::signature::verify_signature;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Entry point for GitHub deliveries. Only signed `release` events can start a run.
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(secret) = state.webhook_secret.as_deref() else {
        tracing::warn!("Webhook delivery rejected, no webhook secret configured");
        return StatusCode::UNAUTHORIZED;
    };

    let Some(signature) = header(&headers, "x-hub-signature-256") else {
        tracing::warn!("Webhook delivery without X-Hub-Signature-256");
        return StatusCode::UNAUTHORIZED;
    };
    if let Err(e) = verify_signature(secret, &body, signature) {
        tracing::warn!(error = %e, "Rejected webhook delivery");
        return StatusCode::UNAUTHORIZED;
    }

    let Some(event_type) = header(&headers, "x-github-event") else {
        tracing::warn!("Signed delivery without X-GitHub-Event");
        return StatusCode::BAD_REQUEST;
    };
    let event = match WebhookEvent::parse(event_type, &body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, event_type, "Unparseable webhook payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    tracing::debug!(event_type, "Webhook event accepted");

    match event {
        WebhookEvent::Release(release_event) => handle_release_event(&state, release_event),
        WebhookEvent::Ping => StatusCode::OK,
        WebhookEvent::Unsupported(other) => {
            tracing::debug!(event_type = %other, "Ignoring non-release event");
            StatusCode::OK
        }
    }
}

fn handle_release_event(state: &AppState, event: ReleaseEvent) -> StatusCode {
    if !event.repository.full_name.eq_ignore_ascii_case(&state.repo_full_name) {
        tracing::warn!(
            repo = %event.repository.full_name,
            expected = %state.repo_full_name,
            "Release event for another repository, ignoring"
        );
        return StatusCode::OK;
    }

    if !event.is_publication() {
        tracing::debug!(action = %event.action, tag = %event.release.tag_name, "Ignoring release action");
        return StatusCode::OK;
    }

    tracing::info!(tag = %event.release.tag_name, "Release published, enqueuing run");
    let sent = state.events.send(queue::ReleaseEvent {
        tag: event.release.tag_name,
        source: EventSource::Webhook,
    });
    if sent.is_err() {
        tracing::error!("Release consumer is not running");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::ACCEPTED
}
