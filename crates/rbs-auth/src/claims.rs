//! Unverified JWT claim decoding and the refresh-window rule.
//!
//! Signatures are never checked here. The backend is the authority on
//! token validity; the client only reads identity and expiry.

use crate::{AuthError, AuthResult};
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;

/// Claims read from a token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject identifier (`userId`, falling back to `sub`).
    pub subject_id: Option<String>,
    /// True for tokens issued by the anonymous bootstrap.
    pub anonymous: bool,
    /// Expiry as Unix seconds.
    pub expires_at: Option<i64>,
}

impl Claims {
    /// Expiry, or `InvalidToken` when the token carries none.
    pub fn require_expiry(&self) -> AuthResult<i64> {
        self.expires_at
            .ok_or_else(|| AuthError::InvalidToken("token has no exp claim".to_string()))
    }
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(rename = "userId", alias = "sub", default)]
    user_id: Option<String>,
    #[serde(default)]
    anonymous: bool,
    #[serde(default)]
    exp: Option<i64>,
}

/// Decode the claims segment of a JWT without verifying its signature.
pub fn decode_claims(token: &str) -> AuthResult<Claims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) if !payload.is_empty() => payload,
        _ => {
            return Err(AuthError::InvalidToken(
                "expected three dot-separated segments".to_string(),
            ))
        }
    };

    let trimmed = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| AuthError::InvalidToken(format!("payload is not base64: {e}")))?;

    let raw: RawClaims = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::InvalidToken(format!("payload is not a claims object: {e}")))?;

    Ok(Claims {
        subject_id: raw.user_id,
        anonymous: raw.anonymous,
        expires_at: raw.exp,
    })
}

/// True when `now + skew` has reached the access expiry but not the
/// refresh expiry.
///
/// A pair whose refresh token is also past the window is left alone; the
/// backend rejects it on first use.
pub fn needs_refresh(access_exp: i64, refresh_exp: i64, now: i64, skew_secs: i64) -> bool {
    let horizon = now.saturating_add(skew_secs);
    access_exp <= horizon && horizon < refresh_exp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(payload.as_bytes())
        )
    }

    #[test]
    fn test_decode_user_claims() {
        let claims = decode_claims(&encode(r#"{"userId":"u1","exp":1700}"#)).unwrap();
        assert_eq!(claims.subject_id.as_deref(), Some("u1"));
        assert!(!claims.anonymous);
        assert_eq!(claims.expires_at, Some(1700));
    }

    #[test]
    fn test_decode_sub_fallback_and_anonymous() {
        let claims =
            decode_claims(&encode(r#"{"sub":"anon-7","anonymous":true,"exp":5}"#)).unwrap();
        assert_eq!(claims.subject_id.as_deref(), Some("anon-7"));
        assert!(claims.anonymous);
    }

    #[test]
    fn test_decode_padded_payload() {
        let padded = format!(
            "h.{}.s",
            base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":1}"#)
        );
        assert_eq!(decode_claims(&padded).unwrap().expires_at, Some(1));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_claims("not-a-jwt"),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            decode_claims("a.!!!.c"),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            decode_claims(&encode("[1,2]")),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_missing_expiry() {
        let claims = decode_claims(&encode(r#"{"userId":"u"}"#)).unwrap();
        assert!(matches!(
            claims.require_expiry(),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_needs_refresh_boundaries() {
        let now = 1_000;
        // Access expires exactly at the skew horizon: refresh.
        assert!(needs_refresh(now + 30, now + 3600, now, 30));
        // One second beyond the horizon: still valid.
        assert!(!needs_refresh(now + 31, now + 3600, now, 30));
        // Already expired access token with live refresh token.
        assert!(needs_refresh(now - 10, now + 3600, now, 30));
        // Refresh token inside the horizon too: nothing to gain.
        assert!(!needs_refresh(now - 10, now + 30, now, 30));
        assert!(!needs_refresh(now - 10, now + 10, now, 30));
    }
}
