use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use pasaje_core::identity::{Actor, Role};

use crate::error::AppError;
use crate::state::{AppState, AuthConfig};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

pub fn issue_token(auth: &AuthConfig, actor: &Actor) -> Result<String, AppError> {
    let role = serde_json::to_value(actor.role)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "GUEST".to_string());

    let claims = Claims {
        sub: actor.user_id.clone(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))
}

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

fn decode_actor(token: &str, auth: &AuthConfig) -> Result<Actor, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthenticationError("invalid or expired token".to_string()))?;

    let role = Role::parse(&token_data.claims.role)
        .ok_or_else(|| AppError::AuthenticationError("unknown role".to_string()))?;

    Ok(Actor::new(token_data.claims.sub, role))
}

// ============================================================================
// Extractors
// ============================================================================

/// Caller with a valid bearer token.
pub struct AuthActor(pub Actor);

impl FromRequestParts<AppState> for AuthActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)
            .ok_or_else(|| AppError::AuthenticationError("missing bearer token".to_string()))?;
        decode_actor(token, &state.auth).map(AuthActor)
    }
}

/// Anonymous callers pass through as `None`; a bad token is still rejected.
pub struct MaybeActor(pub Option<Actor>);

impl FromRequestParts<AppState> for MaybeActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer(parts) {
            Some(token) => decode_actor(token, &state.auth).map(|a| MaybeActor(Some(a))),
            None => Ok(MaybeActor(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip_keeps_role() {
        let auth = AuthConfig {
            secret: "test-secret".to_string(),
            expiration: 60,
        };
        let agent = Actor::new("agent-7", Role::Agent);

        let token = issue_token(&auth, &agent).unwrap();
        assert_eq!(decode_actor(&token, &auth).unwrap(), agent);

        let other = AuthConfig {
            secret: "other".to_string(),
            expiration: 60,
        };
        assert!(decode_actor(&token, &other).is_err());
    }
}
