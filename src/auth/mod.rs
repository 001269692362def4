//! Login, logout and token revocation.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::users;
use crate::errors::{AppError, GENERIC_LOGIN_FAILURE};
use crate::jwt::JwtConfig;
use crate::models::user::User;
use crate::utils::{hash_password, utc_now, verify_password};

pub mod throttle;

pub use throttle::{throttle_key, LoginThrottle, ThrottleConfig};

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is inactive")]
    AccountInactive,
    #[error("too many login attempts")]
    RateLimited { retry_after: Duration },
    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<AuthError> for AppError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidCredentials | AuthError::AccountInactive => {
                AppError::unauthorized(GENERIC_LOGIN_FAILURE)
            }
            AuthError::RateLimited { retry_after } => AppError::rate_limited(retry_after.as_secs().max(1)),
            AuthError::Store(err) => err,
        }
    }
}

/// Hash of a random secret, verified against when no account matches so that
/// unknown emails cost the same argon2 work as wrong passwords.
fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password(&Uuid::new_v4().to_string()).unwrap_or_default())
}

/// A freshly issued bearer token and the account it belongs to.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub jti: Uuid,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Authenticator {
    pool: SqlitePool,
    jwt: Arc<JwtConfig>,
    throttle: Arc<LoginThrottle>,
}

impl Authenticator {
    pub fn new(pool: SqlitePool, jwt: Arc<JwtConfig>, throttle: ThrottleConfig) -> Self {
        dummy_hash();
        Self {
            pool,
            jwt,
            throttle: Arc::new(LoginThrottle::new(throttle)),
        }
    }

    pub fn throttle(&self) -> &LoginThrottle {
        &self.throttle
    }

    /// Checks credentials for `email` coming from `client` and issues a session.
    ///
    /// Failures, including logins on inactive accounts, count towards the
    /// throttle for `(email, client)`; a success clears it.
    pub async fn attempt_login(&self, email: &str, password: &str, client: &str) -> Result<Session, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AppError::validation("email and password are required").into());
        }

        let key = throttle_key(email, client);
        if let Some(retry_after) = self.throttle.too_many_attempts(&key) {
            tracing::warn!(email = %email.trim(), client, retry_after_secs = retry_after.as_secs(), "login throttled");
            return Err(AuthError::RateLimited { retry_after });
        }

        let candidate = users::find_by_email(&self.pool, email).await?;
        let verified = match &candidate {
            Some(user) => verify_password(password, &user.password_hash)?,
            None => {
                let _ = verify_password(password, dummy_hash());
                false
            }
        };

        let user = match candidate {
            Some(user) if verified => user,
            _ => {
                let attempts = self.throttle.hit(&key);
                tracing::warn!(email = %email.trim(), client, attempts, "failed login attempt");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !user.active {
            let attempts = self.throttle.hit(&key);
            tracing::warn!(user_id = %user.id, email = %user.email, attempts, "login attempt on inactive account");
            return Err(AuthError::AccountInactive);
        }

        self.throttle.clear(&key);
        let (token, claims) = self.jwt.issue(user.id)?;
        tracing::info!(user_id = %user.id, email = %user.email, "login succeeded");

        Ok(Session {
            token,
            jti: claims.jti,
            expires_at: claims.expires_at(),
            user: user.into(),
        })
    }

    /// Revokes the token `jti`. Revoking an already revoked token is a no-op.
    pub async fn revoke(&self, jti: Uuid, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<(), AppError> {
        let now = utc_now().to_rfc3339();

        sqlx::query("INSERT OR IGNORE INTO revoked_tokens (jti, user_id, revoked_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(jti.to_string())
            .bind(user_id.to_string())
            .bind(&now)
            .bind(expires_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        // expired tokens fail signature validation anyway
        sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < ?")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn logout(&self, jti: Uuid, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<(), AppError> {
        self.revoke(jti, user_id, expires_at).await?;
        tracing::info!(user_id = %user_id, "logout succeeded");
        Ok(())
    }

    pub async fn is_revoked(&self, jti: Uuid) -> Result<bool, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM revoked_tokens WHERE jti = ?")
            .bind(jti.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}
