use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use mealplan_core::error::PlanError;

/// Turns a request credential into the owner id every plan operation is
/// scoped by.
pub trait IdentityProvider: Send + Sync {
    /// `credential` is the bearer token, or `None` when the request carried none.
    fn resolve_caller(&self, credential: Option<&str>) -> Result<String, PlanError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub exp: u64,
}

/// Verifies HS256 tokens signed with a shared secret and reads the caller
/// from the `userId` claim.
pub struct JwtIdentity {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentity {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl IdentityProvider for JwtIdentity {
    fn resolve_caller(&self, credential: Option<&str>) -> Result<String, PlanError> {
        let token = credential
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PlanError::Unauthorized("Missing bearer token".to_string()))?;

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            PlanError::Unauthorized("Invalid or expired token".to_string())
        })?;

        let user_id = data.claims.user_id.trim();
        if user_id.is_empty() {
            return Err(PlanError::Unauthorized(
                "Token carries no user id".to_string(),
            ));
        }
        Ok(user_id.to_string())
    }
}

/// Treats every request as one fixed owner. Used when the server runs
/// without authentication.
pub struct StaticIdentity {
    owner_id: String,
}

impl StaticIdentity {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn resolve_caller(&self, _credential: Option<&str>) -> Result<String, PlanError> {
        Ok(self.owner_id.clone())
    }
}
