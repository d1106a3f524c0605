use super::{Identity, SessionAuthority};
use crate::handlers::ApiError;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use std::sync::Arc;
use tracing::{error, warn};
use vdrive_core::ErrorCode;

/// Request extension carrying the session authority
#[derive(Clone)]
pub struct AuthExtractor {
    pub authority: Arc<dyn SessionAuthority>,
}

impl AuthExtractor {
    pub fn new(authority: Arc<dyn SessionAuthority>) -> Self {
        Self { authority }
    }
}

/// Extractor that rejects the request unless it carries a live bearer session
pub struct RequireAuth(pub Identity);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let extractor = parts
            .extensions
            .get::<AuthExtractor>()
            .cloned()
            .ok_or_else(|| {
                error!("AuthExtractor extension missing from router");
                ApiError::new(ErrorCode::Persistence, "authentication unavailable")
            })?;

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    ApiError::new(ErrorCode::Authentication, "missing bearer credential")
                })?;

        match extractor.authority.resolve(bearer.token()) {
            Ok(Some(identity)) => Ok(RequireAuth(identity)),
            Ok(None) => {
                warn!("Rejected request with invalid or expired session");
                Err(ApiError::new(
                    ErrorCode::Authentication,
                    "invalid or expired session",
                ))
            }
            Err(e) => {
                error!("Session lookup failed: {}", e);
                Err(ApiError::new(ErrorCode::Persistence, "storage failure"))
            }
        }
    }
}
