/*!
 * # Authentication
 *
 * Bearer JWT verification for the storefront API. Tokens are minted by the
 * identity provider with a shared HS256 secret; this module only verifies
 * them and exposes the caller as an [`AuthUser`] extractor.
 */

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::errors::ServiceError;

pub const ROLE_STAFF: &str = "staff";
pub const ROLE_ADMIN: &str = "admin";

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl AuthUser {
    /// Check if the user has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Staff and admins may see any order and move it through fulfilment.
    pub fn is_staff(&self) -> bool {
        self.has_role(ROLE_STAFF) || self.has_role(ROLE_ADMIN)
    }

    pub fn owns(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

#[derive(Clone, Debug)]
pub struct AuthService {
    jwt_secret: String,
    issuer: Option<String>,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>, issuer: Option<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            issuer,
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer.as_str()]);
        }

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ServiceError::Unauthorized("Token expired".to_string())
            }
            _ => {
                debug!("Rejected bearer token: {}", e);
                ServiceError::Unauthorized("Invalid token".to_string())
            }
        })?;

        if data.claims.sub.trim().is_empty() {
            return Err(ServiceError::Unauthorized("Token has no subject".to_string()));
        }
        Ok(data.claims)
    }

    /// Mints a token the way the identity provider does. Used by tooling and tests.
    pub fn issue_token(
        &self,
        user_id: &str,
        roles: &[&str],
        ttl: ChronoDuration,
    ) -> Result<String, ServiceError> {
        let claims = Claims {
            sub: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            exp: (Utc::now() + ttl).timestamp(),
            iss: self.issuer.clone(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("Failed to sign token: {}", e)))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<AuthService>: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_service = Arc::<AuthService>::from_ref(state);
        let token = bearer_token(parts).ok_or_else(|| {
            ServiceError::Unauthorized("Missing bearer token".to_string())
        })?;
        let claims = auth_service.validate_token(token)?;

        Ok(AuthUser {
            user_id: claims.sub,
            roles: claims.roles,
        })
    }
}
