//! SSE snapshot feed
//!
//! Streams the clinic's registry events to web clients: the current state on
//! connect, one snapshot event per delta after that, and an explicit failure
//! event if the subscription drops. The stream is a thin adapter over the
//! synchronizer's watch channel.

use super::{clinic_from_headers, error_response, ApiError};
use crate::sync::SyncView;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::BoxStream;
use futures::StreamExt;
use medilog_common::events::RegistryEvent;
use medilog_common::time;
use std::convert::Infallible;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// GET /api/events
///
/// Live snapshot stream for the caller's clinic.
pub async fn event_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<BoxStream<'static, Result<Event, Infallible>>>, ApiError> {
    let clinic_id = clinic_from_headers(&headers)?;
    let mut rx = state
        .subscription(clinic_id)
        .await
        .map_err(error_response)?;

    info!("New SSE client connected for clinic {}", clinic_id);

    let stream = async_stream::stream! {
        // Initial state on connection
        let view = rx.borrow_and_update().clone();
        if let Some(event) = view_event(clinic_id, &view) {
            yield Ok(event);
        }

        loop {
            match rx.changed().await {
                Ok(()) => {
                    let view = rx.borrow_and_update().clone();
                    let failed = matches!(view, SyncView::Failed { .. });
                    if let Some(event) = view_event(clinic_id, &view) {
                        yield Ok(event);
                    }
                    if failed {
                        // The subscription never recovers on its own; end the
                        // stream so the client reconnects deliberately
                        break;
                    }
                }
                Err(_) => {
                    let view = SyncView::Failed {
                        message: "subscription closed".to_string(),
                    };
                    if let Some(event) = view_event(clinic_id, &view) {
                        yield Ok(event);
                    }
                    break;
                }
            }
        }
    }
    .boxed();

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Convert a sync view into its wire event
fn view_event(clinic_id: Uuid, view: &SyncView) -> Option<Event> {
    let event = match view {
        SyncView::Live(snapshot) => RegistryEvent::from_snapshot(snapshot),
        SyncView::Failed { message } => RegistryEvent::SyncFailed {
            clinic_id,
            message: message.clone(),
            timestamp: time::now(),
        },
    };

    Event::default()
        .event(event.event_type())
        .json_data(&event)
        .ok()
}
