//! Admin token verification for operator endpoints.

use axum::http::{HeaderMap, StatusCode};

use super::ApiError;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Compares every byte, not just up to the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

/// The header must match the configured token. With no token configured
/// (or an empty one) every admin request is denied.
pub fn verify_admin_token(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = match expected {
        Some(t) if !t.is_empty() => t,
        _ => {
            tracing::warn!("[SECURITY] ADMIN_TOKEN not configured, admin request denied");
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "admin token not configured",
            ));
        }
    };
    let given = headers.get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok());
    match given {
        Some(t) if constant_time_eq(t.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => {
            tracing::warn!("[SECURITY] admin request with missing or invalid token");
            Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid admin token"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_checks() {
        let mut h = HeaderMap::new();
        assert!(verify_admin_token(None, &h).is_err());
        assert!(verify_admin_token(Some("s3cret"), &h).is_err());
        h.insert(ADMIN_TOKEN_HEADER, "s3cre".parse().unwrap());
        assert!(verify_admin_token(Some("s3cret"), &h).is_err());
        h.insert(ADMIN_TOKEN_HEADER, "s3cret".parse().unwrap());
        assert!(verify_admin_token(Some("s3cret"), &h).is_ok());
    }

    #[test]
    fn unconfigured_token_denies_everyone() {
        let mut h = HeaderMap::new();
        h.insert(ADMIN_TOKEN_HEADER, "anything".parse().unwrap());
        assert!(verify_admin_token(None, &h).is_err());
        h.insert(ADMIN_TOKEN_HEADER, "".parse().unwrap());
        assert!(verify_admin_token(Some(""), &h).is_err());
    }
}
