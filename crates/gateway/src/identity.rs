//! Resolve a normalized user identifier from request headers (`§4.1`).

use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

const HEADER_EMAIL: &str = "x-openwebui-user-email";
const HEADER_USER_ID: &str = "x-openwebui-user-id";

#[derive(Deserialize)]
struct JwtClaims {
    email: Option<String>,
    id: Option<String>,
    sub: Option<String>,
}

/// Order of sources, first match wins: `x-openwebui-user-email`,
/// `x-openwebui-user-id`, then the middle segment of an
/// `authorization: Bearer <jwt>` header. Malformed tokens yield `None`; no
/// error ever surfaces from this function.
pub fn resolve(headers: &HeaderMap) -> Option<String> {
    if let Some(email) = header_str(headers, HEADER_EMAIL) {
        return normalize(email);
    }
    if let Some(id) = header_str(headers, HEADER_USER_ID) {
        return normalize(id);
    }
    if let Some(auth) = header_str(headers, "authorization") {
        if let Some(jwt) = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")) {
            if let Some(id) = decode_jwt_identity(jwt) {
                return normalize(&id);
            }
        }
    }
    None
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Decode the middle (payload) segment of a JWT as URL-safe base64, with
/// padding restored modulo 4, and pull `email`, `id`, or `sub` in that
/// order. Any failure along the way (malformed structure, invalid base64,
/// invalid JSON) yields `None`.
fn decode_jwt_identity(jwt: &str) -> Option<String> {
    let mut parts = jwt.split('.');
    parts.next()?; // header, unused
    let payload = parts.next()?;

    let padded = restore_padding(payload);
    let bytes = URL_SAFE_NO_PAD
        .decode(padded.trim_end_matches('='))
        .ok()
        .or_else(|| URL_SAFE_NO_PAD.decode(payload).ok())?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
    claims.email.or(claims.id).or(claims.sub)
}

fn restore_padding(segment: &str) -> String {
    let remainder = segment.len() % 4;
    if remainder == 0 {
        segment.to_string()
    } else {
        format!("{segment}{}", "=".repeat(4 - remainder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefers_email_header_over_others() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_EMAIL, HeaderValue::from_static("  A@X.com "));
        headers.insert(HEADER_USER_ID, HeaderValue::from_static("other"));
        assert_eq!(resolve(&headers), Some("a@x.com".to_string()));
    }

    #[test]
    fn falls_back_to_user_id_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_USER_ID, HeaderValue::from_static("User-123"));
        assert_eq!(resolve(&headers), Some("user-123".to_string()));
    }

    #[test]
    fn decodes_email_from_jwt_payload() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"email":"B@X.com"}"#);
        let jwt = format!("xx.{payload}.yy");
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {jwt}")).unwrap(),
        );
        assert_eq!(resolve(&headers), Some("b@x.com".to_string()));
    }

    #[test]
    fn malformed_jwt_yields_none() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer not-a-jwt"));
        assert_eq!(resolve(&headers), None);
    }

    #[test]
    fn no_headers_yields_none() {
        assert_eq!(resolve(&HeaderMap::new()), None);
    }
}
