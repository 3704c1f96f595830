/*!
 * # Authentication
 *
 * Bearer tokens are issued elsewhere; this module only verifies them and turns
 * the claims into an [`Identity`]. Every service operation takes an `Identity`
 * and branches on its [`Role`].
 */

use async_trait::async_trait;
use axum::{
    extract::FromRef,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::errors::ServiceError;

/// Legacy header carrying the raw token without the `Bearer` prefix.
pub const LEGACY_TOKEN_HEADER: &str = "auth-token";

/// Exactly one privileged role exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    #[serde(alias = "user")]
    Customer,
    Admin,
}

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

/// The caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn customer(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Customer,
            name: None,
            email: None,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Admin,
            name: None,
            email: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Name shown next to reviews.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Customer".to_string())
    }

    /// Rejects the privileged role for customer-only operations.
    pub fn require_customer(&self, action: &str) -> Result<(), ServiceError> {
        if self.is_admin() {
            return Err(ServiceError::Forbidden(format!(
                "Admin users cannot {}",
                action
            )));
        }
        Ok(())
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if !self.is_admin() {
            return Err(ServiceError::Forbidden(
                "Admin role required".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            name: claims.name,
            email: claims.email,
        }
    }
}

/// Verifies HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ServiceError::Unauthorized("Token has expired".to_string())
                }
                _ => ServiceError::Unauthorized("Invalid token".to_string()),
            })
    }

    /// Extracts and verifies the token carried by `headers`.
    pub fn identify(&self, headers: &HeaderMap) -> Result<Identity, ServiceError> {
        let token = bearer_token(headers).ok_or_else(|| {
            ServiceError::Unauthorized("Please authenticate using a valid token".to_string())
        })?;
        let claims = self.verify(token)?;
        debug!(user_id = %claims.sub, role = ?claims.role, "authenticated request");
        Ok(claims.into())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token);
            }
        }
    }
    headers
        .get(LEGACY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
    Arc<TokenVerifier>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<TokenVerifier>::from_ref(state);
        verifier.identify(&parts.headers)
    }
}
