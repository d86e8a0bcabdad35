//! Bearer tokens
//!
//! Compact signed tokens carrying the subscriber identity. The signing
//! algorithm and secret come from settings; expiry defaults to 30 minutes.

use crate::model::Subscriber;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tunnel_common::{CoreError, CoreResult, Settings};
use uuid::Uuid;

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subscriber id
    pub sub: Uuid,
    /// Numeric handle
    pub handle: u32,
    pub email: String,
    /// Operator bit, checked for the admin surfaces
    pub superuser: bool,
    /// Issued-at, seconds since epoch
    pub iat: usize,
    /// Expiry, seconds since epoch
    pub exp: usize,
}

/// Issue an access token for a subscriber
pub fn issue_token(subscriber: &Subscriber, settings: &Settings) -> CoreResult<String> {
    let algorithm = algorithm(settings)?;
    let now = Utc::now();
    let exp = now + Duration::minutes(settings.access_token_ttl_minutes as i64);
    let claims = Claims {
        sub: subscriber.id,
        handle: subscriber.handle,
        email: subscriber.email.clone(),
        superuser: subscriber.superuser,
        iat: now.timestamp() as usize,
        exp: exp.timestamp() as usize,
    };
    encode(
        &Header::new(algorithm),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
    .map_err(|e| CoreError::Internal(format!("token signing failed: {e}")))
}

/// Verify a bearer token and return its claims
///
/// Any decode, signature or expiry failure collapses to
/// `Unauthenticated`.
pub fn verify_token(token: &str, settings: &Settings) -> CoreResult<Claims> {
    let algorithm = algorithm(settings)?;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
        &Validation::new(algorithm),
    )
    .map(|data| data.claims)
    .map_err(|_| CoreError::Unauthenticated)
}

fn algorithm(settings: &Settings) -> CoreResult<Algorithm> {
    Algorithm::from_str(&settings.jwt_algorithm)
        .map_err(|_| CoreError::Internal(format!("unknown jwt algorithm {}", settings.jwt_algorithm)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn subscriber() -> Subscriber {
        Subscriber {
            id: Uuid::new_v4(),
            handle: 10_001,
            email: "a@x.test".into(),
            password_hash: String::new(),
            name: "Alice".into(),
            phone: None,
            country: None,
            verified: true,
            active: true,
            premium: false,
            superuser: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let settings = Settings::for_tests();
        let sub = subscriber();
        let token = issue_token(&sub, &settings).unwrap();
        let claims = verify_token(&token, &settings).unwrap();
        assert_eq!(claims.sub, sub.id);
        assert_eq!(claims.handle, sub.handle);
        assert!(!claims.superuser);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_is_unauthenticated() {
        let settings = Settings::for_tests();
        let token = issue_token(&subscriber(), &settings).unwrap();
        let other = Settings {
            jwt_secret: "a-different-secret".into(),
            ..Settings::default()
        };
        assert_eq!(verify_token(&token, &other).unwrap_err(), CoreError::Unauthenticated);
    }

    #[test]
    fn test_garbage_token_is_unauthenticated() {
        let settings = Settings::for_tests();
        assert_eq!(
            verify_token("not.a.token", &settings).unwrap_err(),
            CoreError::Unauthenticated
        );
    }
}
