//! Carrier voice webhook.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header, HeaderMap},
    response::IntoResponse,
};

use crate::AppState;

const MEDIA_STREAM_PATH: &str = "/api/media-stream";

/// Handler for `POST /api/twilio/stream`.
///
/// Answers an incoming call with TwiML that connects its audio to the
/// media-stream websocket.
pub async fn stream_twiml_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let url = media_stream_url(state.public_url.as_deref(), host);
    tracing::info!(url = %url, "answering call with media stream");

    (
        [(header::CONTENT_TYPE, "text/xml")],
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Response><Connect><Stream url=\"{}\"/></Connect></Response>",
            escape_xml(&url)
        ),
    )
}

/// Builds the websocket URL the carrier should stream to. A configured
/// public URL wins; otherwise the request's host is used, over plain `ws`
/// only for loopback hosts.
pub fn media_stream_url(public_url: Option<&str>, host: &str) -> String {
    if let Some(base) = public_url.map(str::trim).filter(|u| !u.is_empty()) {
        let base = base.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            format!("wss://{base}")
        };
        return format!("{base}{MEDIA_STREAM_PATH}");
    }

    let scheme = if is_loopback(host) { "ws" } else { "wss" };
    format!("{scheme}://{host}{MEDIA_STREAM_PATH}")
}

fn is_loopback(host: &str) -> bool {
    let name = match host.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or(v6),
        None => host.split(':').next().unwrap_or(host),
    };
    name == "localhost" || name == "::1" || name.starts_with("127.")
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
