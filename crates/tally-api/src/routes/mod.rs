//! API route definitions.
//!
//! # Route Structure
//!
//! - `GET /healthcheck` - static health response, no auth
//! - `POST /event` - ingest a batch of telemetry events (HMAC or
//!   session cookie)
//! - `GET /tracking-pixel` - synthesize a tool-access event for the
//!   signed-in user (session cookie only)

mod event;
mod health;
mod pixel;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::state::AppState;

/// Build the complete API router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origin_suffixes);

    Router::new()
        .route("/healthcheck", get(health::healthcheck))
        .route("/event", post(event::post_event))
        .route("/tracking-pixel", get(pixel::tracking_pixel))
        .layer(cors)
        .with_state(state)
}

/// CORS restricted to internal-tool origins: only hosts ending with a
/// configured suffix get the allow headers, and credentials are
/// allowed because the session cookie rides along.
fn cors_layer(suffixes: &[String]) -> CorsLayer {
    let suffixes = suffixes.to_vec();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request| {
                origin
                    .to_str()
                    .map(|origin| suffixes.iter().any(|suffix| origin.ends_with(suffix)))
                    .unwrap_or(false)
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
}
