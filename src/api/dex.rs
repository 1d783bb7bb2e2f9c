//! Reverse proxy for the Dex endpoints under `/api/dex/*`.
//!
//! The orchestrator exposes Dex on its own origin so the OIDC issuer is
//! `<sso url>/api/dex`. Requests are forwarded to `DEX_URL` with the same
//! method, path, query, and body; hop-by-hop headers are dropped both ways.
use crate::api::error::{ApiError, api_internal, api_not_found};
use crate::app::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "host",
    "transfer-encoding",
    "content-length",
    "upgrade",
    "te",
    "trailer",
    "proxy-authorization",
];

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP {
        out.remove(*name);
    }
    out
}

/// Upstream URL for `uri` on the Dex at `base`.
pub fn upstream_url(base: &str, uri: &Uri) -> String {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{}{}", base.trim_end_matches('/'), path_and_query)
}

#[utoipa::path(
    get,
    path = "/api/dex/{path}",
    tag = "session",
    params(
        ("path" = String, Path, description = "Dex path")
    ),
    responses(
        (status = 200, description = "Upstream Dex response"),
        (status = 404, description = "Dex is not configured", body = crate::api::types::ErrorBody)
    )
)]
/// Forward the request to Dex and relay its response.
///
/// # Errors
/// - 404 when `DEX_URL` is unset.
/// - 500 when Dex is unreachable.
pub(crate) async fn proxy(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if state.config.dex.url.trim().is_empty() {
        return Err(api_not_found("dex is not configured"));
    }
    let url = upstream_url(&state.config.dex.url, &uri);
    tracing::debug!(%method, url = %url, "proxying dex request");
    let upstream = state
        .http
        .request(method, url)
        .headers(forwardable(&headers))
        .body(body)
        .send()
        .await
        .map_err(|err| api_internal("dex request failed", &err))?;
    let status = upstream.status();
    let response_headers = forwardable(upstream.headers());
    let bytes = upstream
        .bytes()
        .await
        .map_err(|err| api_internal("dex response failed", &err))?;
    Ok((status, response_headers, bytes).into_response())
}
