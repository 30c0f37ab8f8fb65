//! Event ingestion endpoint.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::Response;
use axum::Json;
use tally_core::validate_events;
use tally_pipeline::{write_events, ForwardPolicy, Forwarder};
use tracing::{error, info};

use crate::auth::authenticate;
use crate::error::{ok_response, ApiError};
use crate::state::AppState;

/// `POST /event`
///
/// Body: JSON array of telemetry events. On success every
/// `(app, stage, type)` group lands in its own archive object and a
/// best-effort forward to the stream is kicked off per object; the 201
/// body lists the keys written.
pub async fn post_event(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers, uri.path()).await?;

    let events = validate_events(&payload).map_err(ApiError::from_validation)?;
    let count = events.len();
    let keys = write_events(state.archive.as_ref(), events).await?;
    info!(events = count, groups = keys.len(), "added telemetry events to archive");

    // The archive write is the durable part; forwarding is repeatable
    // via redrive, so it happens after the response, best effort.
    for key in &keys {
        let forwarder = Forwarder::new(state.archive.clone(), state.stream.clone());
        let key = key.as_str().to_string();
        tokio::spawn(async move {
            if let Err(err) = forwarder.forward_object(&key, ForwardPolicy::BestEffort).await {
                error!(key = %key, error = %err, "post-archive forward failed");
            }
        });
    }

    let message = keys
        .iter()
        .map(|key| key.as_str())
        .collect::<Vec<_>>()
        .join(",");
    Ok(ok_response(StatusCode::CREATED, message))
}
