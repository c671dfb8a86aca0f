//! Header hygiene for the forward and return legs of the proxy (`§4.4`).

use axum::http::{HeaderMap, HeaderName};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const CLIENT_SENSITIVE: &[&str] = &[
    "cookie",
    "authorization",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
    "accept-encoding",
    "host",
    "content-length",
];

/// Strip hop-by-hop and client-sensitive headers before forwarding a
/// request upstream.
pub fn clean_forward_headers(headers: &HeaderMap) -> HeaderMap {
    strip(headers, HOP_BY_HOP.iter().chain(CLIENT_SENSITIVE.iter()))
}

/// Strip hop-by-hop headers plus `content-length`/`content-encoding` before
/// returning the upstream response to the client.
pub fn clean_return_headers(headers: &HeaderMap) -> HeaderMap {
    let extra = ["content-length", "content-encoding"];
    strip(headers, HOP_BY_HOP.iter().chain(extra.iter()))
}

fn strip<'a>(headers: &HeaderMap, blocked: impl Iterator<Item = &'a &'a str>) -> HeaderMap {
    let blocked: Vec<HeaderName> = blocked
        .filter_map(|name| HeaderName::try_from(*name).ok())
        .collect();
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if !blocked.contains(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forward_strips_hop_by_hop_and_sensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("session=abc"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("x-request-id", HeaderValue::from_static("r-1"));
        let cleaned = clean_forward_headers(&headers);
        assert!(cleaned.get("cookie").is_none());
        assert!(cleaned.get("connection").is_none());
        assert!(cleaned.get("x-request-id").is_some());
    }

    #[test]
    fn return_strips_content_length_and_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("123"));
        headers.insert("content-encoding", HeaderValue::from_static("gzip"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let cleaned = clean_return_headers(&headers);
        assert!(cleaned.get("content-length").is_none());
        assert!(cleaned.get("content-encoding").is_none());
        assert!(cleaned.get("content-type").is_some());
    }
}
