//! Request log of unauthenticated traffic

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;

use crate::collector::{header_pairs, source_address};
use crate::middleware::auth::Identity;
use crate::AppState;

/// Middleware: log every request that does not carry operator credentials
pub async fn log_unauthenticated(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let operator = state.gatekeeper.identify(req.extensions(), req.headers());
    let anonymous = operator.is_none();
    req.extensions_mut().insert(Identity(operator));

    if anonymous {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let source = source_address(req.headers(), peer, state.config.trust_forwarded_for);

        let headers = header_pairs(req.headers())
            .into_iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        tracing::info!(
            target: "requests",
            "{:<17} {:>9} {}\n{}",
            format!("[{}]", source),
            format!("[{}]", req.method()),
            req.uri(),
            headers
        );
    }

    next.run(req).await
}
