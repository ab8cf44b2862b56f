use axum::{extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jetset_core::Actor;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::{AppState, AuthConfig};

const STAFF_ROLES: [&str; 2] = ["STAFF", "ADMIN"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaffClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// An authenticated operator. Handlers take this as an argument and hand
/// `actor()` to the lifecycle; nothing about the caller is stored globally.
#[derive(Debug, Clone)]
pub struct StaffActor {
    pub staff_id: String,
    pub role: String,
}

impl StaffActor {
    pub fn actor(&self) -> Actor {
        Actor::Staff(self.staff_id.clone())
    }
}

pub fn verify_staff_token(token: &str, auth: &AuthConfig) -> Result<StaffActor, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    if let Some(issuer) = &auth.issuer {
        validation.set_issuer(&[issuer]);
    }

    let token_data = decode::<StaffClaims>(
        token,
        &DecodingKey::from_secret(auth.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "Staff token rejected");
        AppError::AuthenticationError("invalid or expired staff token".into())
    })?;

    let claims = token_data.claims;
    if !STAFF_ROLES.contains(&claims.role.as_str()) {
        return Err(AppError::AuthorizationError(format!(
            "role {} may not manage quotes",
            claims.role
        )));
    }

    Ok(StaffActor {
        staff_id: claims.sub,
        role: claims.role,
    })
}

impl FromRequestParts<AppState> for StaffActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::AuthenticationError("missing bearer token".into()))?;

        verify_staff_token(bearer.token(), &state.auth)
    }
}
