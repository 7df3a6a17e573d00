//! Visitor-facing entry point: classify, then bait

use axum::{
    body::to_bytes,
    extract::{OriginalUri, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::collector::{Classification, RequestClassifier, Visit};
use crate::AppState;

/// Fallback for every path that is not an operator route
pub async fn catch_all(State(state): State<AppState>, req: Request) -> Response {
    dispatch(&state, req).await
}

/// Classify the request and hand it to the matching collector stage
pub async fn dispatch(state: &AppState, mut req: Request) -> Response {
    // Nested routers strip their prefix; fingerprint the path as sent
    if let Some(OriginalUri(uri)) = req.extensions().get::<OriginalUri>().cloned() {
        *req.uri_mut() = uri;
    }

    let (parts, body) = req.into_parts();
    match state.gatekeeper.classify(&parts) {
        // Real content is served by the routing layer, not from here
        Classification::Authenticated(operator) => {
            tracing::debug!("Operator {} requested unmapped {}", operator.subject, parts.uri.path());
            StatusCode::NOT_FOUND.into_response()
        }
        Classification::DeepCollectionSubmission => {
            let visit = Visit::from_parts(&parts, &state.config);
            match to_bytes(body, state.config.deep_payload_limit).await {
                Ok(bytes) => state.collector.deep_collect(&visit, &bytes).await.into_response(),
                Err(e) => {
                    tracing::debug!("Deep submission body rejected: {}", e);
                    state.collector.decline(&visit).await.into_response()
                }
            }
        }
        Classification::StaticLookalike { extension } => {
            let visit = Visit::from_parts(&parts, &state.config);
            state.collector.get_extension(&visit, &extension).await.into_response()
        }
        Classification::SimpleBaitCandidate => {
            let visit = Visit::from_parts(&parts, &state.config);
            state.collector.simple_collect(&visit).await.into_response()
        }
    }
}
