use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

use crate::{models::ApiResponse, AppState};

type HmacSha256 = Hmac<Sha256>;

/// Domain separation for the admin key tag.
const KEY_CONTEXT: &[u8] = b"slotbook-admin-key";

/// Admin API key, kept only as an HMAC tag and compared in constant time.
#[derive(Clone)]
pub struct AdminKey {
    tag: Option<Vec<u8>>,
}

impl AdminKey {
    /// `None` (or an empty key) disables every admin endpoint.
    pub fn new(key: Option<&str>) -> Self {
        let tag = key
            .filter(|k| !k.is_empty())
            .map(|k| key_mac(k).finalize().into_bytes().to_vec());
        Self { tag }
    }

    pub fn is_configured(&self) -> bool {
        self.tag.is_some()
    }

    pub fn verify(&self, presented: &str) -> bool {
        match &self.tag {
            Some(expected) => key_mac(presented).verify_slice(expected).is_ok(),
            None => false,
        }
    }
}

fn key_mac(key: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(KEY_CONTEXT).expect("HMAC can take key of any size");
    mac.update(key.as_bytes());
    mac
}

/// Header format: `Bearer <key>`
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").map(str::trim)
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error("unauthorized", message)),
    )
        .into_response()
}

/// Axum middleware guarding administrative routes.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    if !state.admin_key.is_configured() {
        return Err(unauthorized("Admin API is disabled"));
    }

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("Missing Authorization header"))?;

    let key = extract_bearer(auth_header).ok_or_else(|| unauthorized("Expected a Bearer token"))?;
    if !state.admin_key.verify(key) {
        tracing::warn!("rejected admin request with invalid key");
        return Err(unauthorized("Invalid admin key"));
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_matching_key() {
        let key = AdminKey::new(Some("s3cret"));
        assert!(key.verify("s3cret"));
        assert!(!key.verify("s3cret "));
        assert!(!key.verify("other"));
    }

    #[test]
    fn test_unconfigured_key_rejects_everything() {
        let key = AdminKey::new(None);
        assert!(!key.is_configured());
        assert!(!key.verify(""));
        assert!(!AdminKey::new(Some("")).verify(""));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer("Basic abc"), None);
        assert_eq!(extract_bearer("abc"), None);
    }
}
