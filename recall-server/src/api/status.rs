// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Health and processing status, as a snapshot and as a live SSE stream.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream, StreamExt};
use recall_worker::ProcessingStatus;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api/processing-status
pub async fn processing_status(State(state): State<AppState>) -> Json<ProcessingStatus> {
    Json(state.manager.processing_status())
}

fn status_event(status: &ProcessingStatus) -> Event {
    Event::default()
        .event("processing_status")
        .data(serde_json::to_string(status).unwrap_or_default())
}

/// GET /api/events - Current status, then every published change
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Status stream client connected");

    // Subscribe before taking the snapshot so no change falls in between.
    let updates = BroadcastStream::new(state.manager.feed().subscribe())
        .filter_map(|update| async move { update.ok() });
    let initial = state.manager.processing_status();

    let stream = stream::once(async move { initial })
        .chain(updates)
        .map(|status| Ok(status_event(&status)));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}
