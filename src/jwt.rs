use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::Principal;
use crate::config::env_parse;
use crate::db::users;
use crate::errors::AppError;
use crate::events::log_activity;
use crate::models::user::{SessionActivity, User};

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        if secret.trim().is_empty() {
            return Err(AppError::configuration("JWT_SECRET must not be empty"));
        }

        let exp_hours = env_parse("JWT_EXP_HOURS", 24_i64)?;
        if exp_hours <= 0 {
            return Err(AppError::configuration("JWT_EXP_HOURS must be positive"));
        }

        Ok(Self {
            secret: Arc::new(secret.into_bytes()),
            exp_hours,
        })
    }

    /// Signs a new token for `user_id` with a fresh token id.
    pub fn issue(&self, user_id: Uuid) -> Result<(String, Claims), AppError> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.exp_hours);

        let claims = Claims {
            sub: user_id,
            jti: Uuid::new_v4(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))?;
        Ok((token, claims))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub exp: usize,
    pub iat: usize,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.exp as i64, 0).unwrap_or_else(Utc::now)
    }
}

/// Authenticated caller with resolved roles and permissions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub jti: Uuid,
    pub expires_at: DateTime<Utc>,
    pub user: User,
    pub principal: Principal,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.jwt.decode(token)?;
        let expires_at = claims.expires_at();

        if state.authenticator.is_revoked(claims.jti).await? {
            return Err(AppError::unauthorized("token has been revoked"));
        }

        let user = users::find_live(&state.pool, claims.sub)
            .await?
            .ok_or_else(|| AppError::unauthorized("account no longer exists"))?;

        // deactivated mid-session: end the session instead of serving the request
        if !user.active {
            state.authenticator.revoke(claims.jti, user.id, expires_at).await?;
            log_activity(
                &state.event_bus,
                "terminated",
                Some(user.id),
                &SessionActivity {
                    user_id: user.id,
                    token_id: claims.jti,
                },
            );
            tracing::warn!(user_id = %user.id, "session ended for inactive account");
            return Err(AppError::unauthorized("account is inactive"));
        }

        let principal = state.resolver.principal(&user).await?;

        Ok(AuthUser {
            user_id: user.id,
            jti: claims.jti,
            expires_at,
            user: user.into(),
            principal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: Arc::new(b"unit-test-secret".to_vec()),
            exp_hours: 1,
        }
    }

    #[test]
    fn issued_tokens_decode_with_unique_ids() {
        let jwt = config();
        let user_id = Uuid::new_v4();

        let (first, first_claims) = jwt.issue(user_id).unwrap();
        let (_, second_claims) = jwt.issue(user_id).unwrap();
        assert_ne!(first_claims.jti, second_claims.jti);

        let decoded = jwt.decode(&first).unwrap();
        assert_eq!(decoded.sub, user_id);
        assert_eq!(decoded.jti, first_claims.jti);
        assert!(decoded.expires_at() > Utc::now());
    }

    #[test]
    fn tokens_from_another_secret_are_rejected() {
        let (token, _) = config().issue(Uuid::new_v4()).unwrap();
        let other = JwtConfig {
            secret: Arc::new(b"different".to_vec()),
            exp_hours: 1,
        };
        assert!(matches!(other.decode(&token), Err(AppError::Token(_))));
    }
}
