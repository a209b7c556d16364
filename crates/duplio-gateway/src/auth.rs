// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection authentication.
//!
//! Two token forms are accepted, checked in order of shape:
//! 1. Guest tokens `guest_<uuid-v4>_<millis>`: validated by shape and age
//!    only. They grant no user-scoped data access beyond the anonymous
//!    session, so no cryptographic verification is required.
//! 2. JWTs (HS256): verified for signature, issuer, audience, and expiry.
//!
//! Failed auth maps onto AUTH_REQUIRED / AUTH_INVALID / AUTH_EXPIRED and
//! closes the connection.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use duplio_core::error::DuplioError;
use duplio_core::types::UserId;

/// Gateway auth settings.
#[derive(Clone)]
pub struct AuthSettings {
    /// HS256 secret; `None` disables JWT auth (guest tokens still work).
    pub jwt_secret: Option<String>,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    /// Maximum guest-token age.
    pub guest_max_age: chrono::Duration,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[redacted]"))
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("guest_max_age", &self.guest_max_age)
            .finish()
    }
}

/// A verified connection identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user_id: UserId,
    pub guest: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    aud: String,
    exp: i64,
    iat: i64,
}

/// Validates a presented token.
pub fn validate_token(token: &str, settings: &AuthSettings) -> Result<AuthIdentity, DuplioError> {
    if token.is_empty() {
        return Err(DuplioError::AuthRequired);
    }

    if token.starts_with("guest_") {
        return validate_guest_token(token, settings.guest_max_age);
    }

    let Some(secret) = &settings.jwt_secret else {
        return Err(DuplioError::AuthInvalid("JWT auth is not enabled".into()));
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[settings.jwt_issuer.as_str()]);
    validation.set_audience(&[settings.jwt_audience.as_str()]);

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => DuplioError::AuthExpired,
        other => DuplioError::AuthInvalid(format!("{other:?}")),
    })?;

    Ok(AuthIdentity {
        user_id: UserId(data.claims.sub),
        guest: false,
    })
}

/// Validates a guest token by shape and age.
pub fn validate_guest_token(
    token: &str,
    max_age: chrono::Duration,
) -> Result<AuthIdentity, DuplioError> {
    let rest = token
        .strip_prefix("guest_")
        .ok_or_else(|| DuplioError::AuthInvalid("not a guest token".into()))?;

    // UUIDs are fixed-width, so the trailing `_<millis>` splits cleanly.
    let (uuid_part, ts_part) = rest
        .rsplit_once('_')
        .ok_or_else(|| DuplioError::AuthInvalid("malformed guest token".into()))?;

    let uuid = uuid::Uuid::parse_str(uuid_part)
        .map_err(|e| DuplioError::AuthInvalid(format!("guest token uuid: {e}")))?;

    let issued_ms: i64 = ts_part
        .parse()
        .map_err(|e| DuplioError::AuthInvalid(format!("guest token timestamp: {e}")))?;

    let age_ms = Utc::now().timestamp_millis() - issued_ms;
    if age_ms < 0 || age_ms > max_age.num_milliseconds() {
        return Err(DuplioError::AuthExpired);
    }

    Ok(AuthIdentity {
        user_id: UserId(format!("guest-{uuid}")),
        guest: true,
    })
}

/// Generates a guest token for anonymous interactive use.
pub fn generate_guest_token() -> String {
    format!(
        "guest_{}_{}",
        uuid::Uuid::new_v4(),
        Utc::now().timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AuthSettings {
        AuthSettings {
            jwt_secret: Some("test-secret".into()),
            jwt_issuer: "duplio-accounts".into(),
            jwt_audience: "duplio-realtime".into(),
            guest_max_age: chrono::Duration::hours(1),
        }
    }

    fn make_jwt(claims: &Claims, secret: &str) -> String {
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            claims,
            &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn valid_claims() -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: "user-42".into(),
            iss: "duplio-accounts".into(),
            aud: "duplio-realtime".into(),
            exp: now + 3600,
            iat: now,
        }
    }

    #[test]
    fn generated_guest_token_validates() {
        let token = generate_guest_token();
        let identity = validate_token(&token, &settings()).unwrap();
        assert!(identity.guest);
        assert!(identity.user_id.0.starts_with("guest-"));
    }

    #[test]
    fn guest_token_round_trip_preserves_uuid_and_timestamp() {
        let uuid = uuid::Uuid::new_v4();
        let issued = Utc::now().timestamp_millis();
        let token = format!("guest_{uuid}_{issued}");

        let identity = validate_guest_token(&token, chrono::Duration::hours(1)).unwrap();
        assert_eq!(identity.user_id.0, format!("guest-{uuid}"));
    }

    #[test]
    fn guest_token_expires_after_one_hour() {
        let uuid = uuid::Uuid::new_v4();

        // 59 minutes old: valid.
        let fresh = Utc::now().timestamp_millis() - 59 * 60 * 1000;
        let token = format!("guest_{uuid}_{fresh}");
        assert!(validate_guest_token(&token, chrono::Duration::hours(1)).is_ok());

        // 61 minutes old: expired.
        let stale = Utc::now().timestamp_millis() - 61 * 60 * 1000;
        let token = format!("guest_{uuid}_{stale}");
        match validate_guest_token(&token, chrono::Duration::hours(1)) {
            Err(DuplioError::AuthExpired) => {}
            other => panic!("expected AuthExpired, got {other:?}"),
        }
    }

    #[test]
    fn guest_token_from_the_future_is_rejected() {
        let uuid = uuid::Uuid::new_v4();
        let future = Utc::now().timestamp_millis() + 10 * 60 * 1000;
        let token = format!("guest_{uuid}_{future}");
        assert!(validate_guest_token(&token, chrono::Duration::hours(1)).is_err());
    }

    #[test]
    fn malformed_guest_tokens_are_invalid() {
        for token in [
            "guest_not-a-uuid_1712000000000",
            "guest_",
            "guest_12345",
            "guest__",
        ] {
            match validate_token(token, &settings()) {
                Err(DuplioError::AuthInvalid(_)) => {}
                other => panic!("expected AuthInvalid for {token:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn empty_token_requires_auth() {
        match validate_token("", &settings()) {
            Err(DuplioError::AuthRequired) => {}
            other => panic!("expected AuthRequired, got {other:?}"),
        }
    }

    #[test]
    fn valid_jwt_yields_subject() {
        let token = make_jwt(&valid_claims(), "test-secret");
        let identity = validate_token(&token, &settings()).unwrap();
        assert_eq!(identity.user_id.0, "user-42");
        assert!(!identity.guest);
    }

    #[test]
    fn jwt_with_wrong_signature_is_invalid() {
        let token = make_jwt(&valid_claims(), "other-secret");
        assert!(matches!(
            validate_token(&token, &settings()),
            Err(DuplioError::AuthInvalid(_))
        ));
    }

    #[test]
    fn expired_jwt_maps_to_auth_expired() {
        let mut claims = valid_claims();
        claims.exp = Utc::now().timestamp() - 120;
        let token = make_jwt(&claims, "test-secret");
        assert!(matches!(
            validate_token(&token, &settings()),
            Err(DuplioError::AuthExpired)
        ));
    }

    #[test]
    fn jwt_with_wrong_audience_is_invalid() {
        let mut claims = valid_claims();
        claims.aud = "other-service".into();
        let token = make_jwt(&claims, "test-secret");
        assert!(matches!(
            validate_token(&token, &settings()),
            Err(DuplioError::AuthInvalid(_))
        ));
    }
}
