//! Bearer-token verification for WebSocket upgrades.

use chrono::Utc;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Claims carried by the CMS-issued JWT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl Claims {
    /// Sensitive actions require an admin role or the sheets read scope.
    pub fn has_privilege(&self) -> bool {
        let role = self.role.as_deref().unwrap_or("").to_lowercase();
        role == "admin" || role == "superadmin" || self.scopes.iter().any(|s| s == "sheets:read")
    }

    /// Best identity string available for audit and job attribution.
    pub fn actor(&self) -> String {
        self.email
            .clone()
            .or_else(|| self.sub.clone())
            .unwrap_or_else(|| "unknown".into())
    }
}

/// Verify an HS256 token against the shared secret.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Synthetic superadmin identity for local development. Only reachable when
/// `server.allow_unauthenticated_dev_identity` is set; the warning is
/// deliberate and must stay.
pub fn dev_identity() -> Claims {
    warn!("issuing synthetic dev identity; never enable allow_unauthenticated_dev_identity in production");
    let now = Utc::now().timestamp();
    Claims {
        sub: Some("dev-user-id".into()),
        email: Some("dev@localhost".into()),
        name: None,
        role: Some("superadmin".into()),
        scopes: vec!["sheets:read".into()],
        iat: Some(now),
        exp: Some(now + 86_400),
    }
}
