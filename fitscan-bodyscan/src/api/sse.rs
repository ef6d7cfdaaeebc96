//! Server-Sent Events for live scan progress
//!
//! Every `ScanEvent` recorded by the pipeline is forwarded with its event name
//! as the SSE event type and its JSON form as data.

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// GET /events - SSE stream of scan events
pub async fn scan_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to scan events");

    let mut rx = state.events.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let name = event.name();
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            debug!("SSE: Broadcasting scan event: {}", name);
                            yield Ok(Event::default().event(name).data(json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", name, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE: Client lagged, {} scan events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

/// Build event stream routes
pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(scan_event_stream))
}
