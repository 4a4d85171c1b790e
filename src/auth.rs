use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiError, AppState};

/// Stable identity resolved once at connection time from a verified
/// credential. Immutable for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub name: String,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    name: String,
    exp: i64,
}

/// Verifies and mints HS256 credential tokens.
///
/// Policy: a missing or invalid token degrades to anonymous rather than
/// rejecting the connection. Anonymous connections may hold a socket and
/// receive broadcast snapshots, but never enter the presence registry and
/// fail every identity-requiring operation with `Unauthorized`. The REST
/// surface has no anonymous tier at all.
#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenAuthority {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::default(),
        }
    }

    /// Never errors: any token that fails to verify yields anonymous.
    pub fn authenticate(&self, token: Option<&str>) -> Option<UserIdentity> {
        let token = token?;
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation).ok()?;
        let id = Uuid::parse_str(&data.claims.sub).ok()?;
        Some(UserIdentity {
            id,
            name: data.claims.name,
        })
    }

    /// Mints a token for `user`. Used by the (out-of-scope) login service
    /// and by tests.
    pub fn issue(&self, user: &UserIdentity, ttl: time::Duration) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user.id.to_string(),
            name: user.name.clone(),
            exp: (time::OffsetDateTime::now_utc() + ttl).unix_timestamp(),
        };
        Ok(jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &self.encoding,
        )?)
    }
}

impl FromRequestParts<AppState> for UserIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        state.auth.authenticate(token).ok_or(ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(b"test-secret")
    }

    #[test]
    fn valid_token_round_trips_identity() {
        let authority = authority();
        let user = UserIdentity {
            id: Uuid::now_v7(),
            name: "Ada".to_string(),
        };
        let token = authority.issue(&user, time::Duration::hours(1)).unwrap();
        assert_eq!(authority.authenticate(Some(&token)), Some(user));
    }

    #[test]
    fn missing_and_garbage_tokens_are_anonymous() {
        let authority = authority();
        assert_eq!(authority.authenticate(None), None);
        assert_eq!(authority.authenticate(Some("not-a-jwt")), None);
    }

    #[test]
    fn expired_token_is_anonymous_not_an_error() {
        let authority = authority();
        let user = UserIdentity {
            id: Uuid::now_v7(),
            name: "Ada".to_string(),
        };
        let token = authority.issue(&user, time::Duration::hours(-2)).unwrap();
        assert_eq!(authority.authenticate(Some(&token)), None);
    }

    #[test]
    fn wrong_secret_is_anonymous() {
        let user = UserIdentity {
            id: Uuid::now_v7(),
            name: "Ada".to_string(),
        };
        let token = TokenAuthority::new(b"other-secret")
            .issue(&user, time::Duration::hours(1))
            .unwrap();
        assert_eq!(authority().authenticate(Some(&token)), None);
    }
}
