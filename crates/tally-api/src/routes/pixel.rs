//! Tracking pixel endpoint.
//!
//! Internal tools embed this as an image to record page views without
//! shipping a telemetry client. The synthesized event goes through the
//! exact same ingestion path as `POST /event`.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::header::REFERER;
use axum::http::{HeaderMap, StatusCode, Uri};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use tally_core::{MetricValue, TagValue, TelemetryEvent};
use tally_pipeline::{write_events, ForwardPolicy, Forwarder};
use tracing::error;

use crate::auth::authenticate_session;
use crate::error::ApiError;
use crate::state::AppState;

/// Event type recorded for a pixel hit.
pub const TOOL_ACCESSED_EVENT_TYPE: &str = "GUARDIAN_TOOL_ACCESSED";

#[derive(Debug, Deserialize)]
pub struct PixelParams {
    app: Option<String>,
    stage: Option<String>,
    path: Option<String>,
}

/// `GET /tracking-pixel?app=&stage=&path=`
///
/// Session-cookie auth only: the point is to attribute the access to a
/// signed-in user. 204 on success, 400 on missing params.
pub async fn tracking_pixel(
    State(state): State<AppState>,
    Query(params): Query<PixelParams>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let identity = authenticate_session(&state, &headers).await?;

    let (app, stage, path) = match (params.app, params.stage, params.path) {
        (Some(app), Some(stage), Some(path)) => (app, stage, path),
        _ => {
            return Err(ApiError::BadRequest(
                "tracking-pixel requires app, stage and path query parameters".to_string(),
            ))
        }
    };

    let mut tags: BTreeMap<String, TagValue> = BTreeMap::new();
    tags.insert("email".to_string(), TagValue::from(identity.email));
    tags.insert("path".to_string(), TagValue::from(path));
    if let Some((host, referrer_path)) = referrer_parts(&headers) {
        tags.insert("referrerHost".to_string(), TagValue::from(host));
        tags.insert("referrerPath".to_string(), TagValue::from(referrer_path));
    }

    let event = TelemetryEvent {
        app,
        stage,
        event_type: TOOL_ACCESSED_EVENT_TYPE.to_string(),
        value: MetricValue::Number(1.into()),
        event_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        tags: Some(tags),
    };

    let keys = write_events(state.archive.as_ref(), vec![event]).await?;
    for key in &keys {
        let forwarder = Forwarder::new(state.archive.clone(), state.stream.clone());
        let key = key.as_str().to_string();
        tokio::spawn(async move {
            if let Err(err) = forwarder.forward_object(&key, ForwardPolicy::BestEffort).await {
                error!(key = %key, error = %err, "post-archive forward failed");
            }
        });
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Host and path of the `Referer` header, when it parses as a URI.
fn referrer_parts(headers: &HeaderMap) -> Option<(String, String)> {
    let referrer = headers.get(REFERER)?.to_str().ok()?;
    let uri: Uri = referrer.parse().ok()?;
    let host = uri.host()?.to_string();
    Some((host, uri.path().to_string()))
}
