//! Per-request pipeline.
//!
//! # Data Flow
//! ```text
//! request → client IP → whitelisted? ── yes ──→ random backend, forward
//!             │ no
//!             ├→ session cookie → sticky lookup
//!             ├→ no session + queue full → full-queue page
//!             ├→ admit (backend or queue) + set cookie
//!             └→ backend? forward : waiting page
//! ```
//!
//! # Design Decisions
//! - X-Forwarded-For is only honored behind a trusted proxy hop, walking
//!   entries right to left
//! - A request presenting a well-formed session id skips the full-queue
//!   pre-check; admission itself still enforces the cap
//! - Forwarding streams bodies both ways, no buffering

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::config::DynamicConfig;
use crate::engine::backend::Backend;
use crate::engine::session::is_valid_session_id;
use crate::http::server::AppState;
use crate::security::IpList;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

// Connection-scoped headers that must not travel to the next hop.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Main proxy handler: decides between upstream, waiting page, and
/// full-queue page for every request.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    request: Request<Body>,
) -> Response {
    let dynamic = state.config.dynamic();

    if is_request_whitelisted(&dynamic, peer, request.headers()) {
        let backend = state.engine.random_backend();
        return forward(&backend, peer, request).await;
    }

    let cookie_name = state.config.fixed().cookie_name.as_str();
    let session_id = jar
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .unwrap_or_default();

    let mut placement = None;
    if is_valid_session_id(&session_id) {
        placement = state.engine.load_session(&session_id);
    } else if !state.engine.has_remaining_queue_slots() {
        return Html(dynamic.full_queue_template.clone()).into_response();
    }

    let mut issued_cookie = None;
    let (_session, backend) = match placement {
        Some(placement) => placement,
        None => match state.engine.new_session() {
            Some((session, backend)) => {
                let cookie = Cookie::build((cookie_name.to_string(), session.id().to_string()))
                    .path("/")
                    .http_only(true)
                    .build();
                issued_cookie = Some(jar.add(cookie));
                (session, backend)
            }
            None => return Html(dynamic.full_queue_template.clone()).into_response(),
        },
    };

    let response = match backend {
        Some(backend) => forward(&backend, peer, request).await,
        None => Html(dynamic.queue_template.clone()).into_response(),
    };

    match issued_cookie {
        Some(jar) => (jar, response).into_response(),
        None => response,
    }
}

fn is_request_whitelisted(dynamic: &DynamicConfig, peer: SocketAddr, headers: &HeaderMap) -> bool {
    match client_ip(&dynamic.trusted_proxies, peer, headers) {
        Some(ip) => dynamic.whitelisted_ips.contains(&ip),
        None => false,
    }
}

/// Identify the real client. The peer address wins unless it is a trusted
/// proxy, in which case the X-Forwarded-For chain is walked right to left
/// for the first untrusted entry.
fn client_ip(trusted_proxies: &IpList, peer: SocketAddr, headers: &HeaderMap) -> Option<String> {
    let peer_ip = peer.ip().to_string();
    if !trusted_proxies.contains(&peer_ip) {
        return Some(peer_ip);
    }

    let forwarded_for = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !forwarded_for.is_empty() {
        for entry in forwarded_for.split(", ").collect::<Vec<_>>().into_iter().rev() {
            if !trusted_proxies.contains(entry) {
                return Some(entry.to_string());
            }
        }
    }

    tracing::error!(
        remote_addr = %peer_ip,
        x_forwarded_for = %forwarded_for,
        "unable to identify client"
    );

    None
}

/// Forward the request to the backend's origin and stream the answer back.
pub(crate) async fn forward(backend: &Backend, peer: SocketAddr, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let mut target = backend.url().clone();
    target.set_path(&join_paths(
        backend.url().path(),
        parts.uri.path(),
    ));
    target.set_query(parts.uri.query());

    let mut headers = parts.headers.clone();
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
    // The upstream client derives these from the target URL and body.
    headers.remove(axum::http::header::HOST);
    headers.remove(axum::http::header::CONTENT_LENGTH);
    append_forwarded_for(&mut headers, peer);

    let outcome = backend
        .client()
        .request(parts.method, target)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    match outcome {
        Ok(upstream) => {
            let status = upstream.status();
            let upstream_headers = upstream.headers().clone();
            let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
            *response.status_mut() = status;
            for (name, value) in upstream_headers.iter() {
                if !HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                    response.headers_mut().append(name, value.clone());
                }
            }

            response
        }
        Err(error) => {
            tracing::error!(backend = %backend.name(), %error, "upstream request failed");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let client = peer.ip().to_string();
    let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {client}"),
        _ => client,
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

fn join_paths(base: &str, request: &str) -> String {
    match (base.ends_with('/'), request.starts_with('/')) {
        (true, true) => format!("{}{}", base, &request[1..]),
        (false, false) => format!("{base}/{request}"),
        _ => format!("{base}{request}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip_list(entries: &[&str]) -> IpList {
        let entries: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
        IpList::new(&entries).unwrap()
    }

    fn peer(addr: &str) -> SocketAddr {
        addr.parse().unwrap()
    }

    fn forwarded_for(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn untrusted_peer_is_the_client() {
        let trusted = ip_list(&["127.0.0.1"]);
        let headers = forwarded_for("9.9.9.9");

        // The forwarded chain is ignored for direct clients.
        let ip = client_ip(&trusted, peer("10.1.2.3:12345"), &headers);
        assert_eq!(ip.as_deref(), Some("10.1.2.3"));
    }

    #[test]
    fn trusted_peer_walks_forwarded_chain_right_to_left() {
        let trusted = ip_list(&["127.0.0.1"]);
        let headers = forwarded_for("9.9.9.9, 1.2.3.4");

        let ip = client_ip(&trusted, peer("127.0.0.1:9999"), &headers);
        assert_eq!(ip.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn trusted_entries_in_chain_are_skipped() {
        let trusted = ip_list(&["127.0.0.1", "10.0.0.0/8"]);
        let headers = forwarded_for("9.9.9.9, 10.0.0.7");

        let ip = client_ip(&trusted, peer("127.0.0.1:9999"), &headers);
        assert_eq!(ip.as_deref(), Some("9.9.9.9"));
    }

    #[test]
    fn fully_trusted_chain_is_unidentifiable() {
        let trusted = ip_list(&["127.0.0.1"]);

        let ip = client_ip(&trusted, peer("127.0.0.1:9999"), &HeaderMap::new());
        assert_eq!(ip, None);

        let headers = forwarded_for("127.0.0.1");
        let ip = client_ip(&trusted, peer("127.0.0.1:9999"), &headers);
        assert_eq!(ip, None);
    }

    #[test]
    fn path_joining_avoids_double_slashes() {
        assert_eq!(join_paths("/", "/foo"), "/foo");
        assert_eq!(join_paths("/base", "/foo"), "/base/foo");
        assert_eq!(join_paths("/base/", "/foo"), "/base/foo");
        assert_eq!(join_paths("/base", "foo"), "/base/foo");
    }

    #[test]
    fn forwarded_for_header_is_appended_to() {
        let mut headers = forwarded_for("9.9.9.9");
        append_forwarded_for(&mut headers, peer("10.1.2.3:12345"));
        assert_eq!(headers[X_FORWARDED_FOR], "9.9.9.9, 10.1.2.3");

        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, peer("10.1.2.3:12345"));
        assert_eq!(headers[X_FORWARDED_FOR], "10.1.2.3");
    }
}
