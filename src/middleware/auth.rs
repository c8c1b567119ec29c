use async_trait::async_trait;
use axum::{http::HeaderMap, response::IntoResponse};
use std::sync::Arc;

use crate::app::Services;
use crate::auth::{Claims, Role, TokenService};
use crate::dispatch::{Middleware, MiddlewareError, Outcome, RequestContext};
use crate::error::ApiError;

/// Which tokens a unit lets through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Any valid token
    Authenticated,
    /// Role `superadmin`
    SuperAdmin,
    /// Role `superadmin`, or `school_admin` bound to a school
    SchoolAdmin,
}

/// Verifies the bearer token and contributes its claims
pub struct AuthMiddleware {
    tokens: Arc<TokenService>,
    requirement: Requirement,
}

impl AuthMiddleware {
    pub fn new(tokens: Arc<TokenService>, requirement: Requirement) -> Self {
        Self { tokens, requirement }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<Claims, ApiError> {
        let token = extract_token(headers).map_err(ApiError::unauthorized)?;
        let claims = self.tokens.verify(&token)?;

        match self.requirement {
            Requirement::Authenticated => Ok(claims),
            Requirement::SuperAdmin if claims.is_superadmin() => Ok(claims),
            Requirement::SuperAdmin => Err(ApiError::forbidden("Superadmin access required")),
            Requirement::SchoolAdmin => match claims.role {
                Role::SuperAdmin => Ok(claims),
                Role::SchoolAdmin if claims.school_id.is_some() => Ok(claims),
                Role::SchoolAdmin => Err(ApiError::forbidden("No school assigned to this account")),
            },
        }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn run(&self, ctx: &RequestContext) -> Result<Outcome, MiddlewareError> {
        match self.authorize(&ctx.headers) {
            Ok(claims) => {
                let value = serde_json::to_value(&claims).map_err(|e| MiddlewareError::new(e.to_string()))?;
                Ok(Outcome::Next(value))
            }
            Err(err) => {
                tracing::debug!("Rejected {}.{}: {}", ctx.module, ctx.method, err);
                Ok(Outcome::ShortCircuit(err.into_response()))
            }
        }
    }
}

pub fn auth(services: &Services) -> Arc<dyn Middleware> {
    Arc::new(AuthMiddleware::new(Arc::clone(&services.tokens), Requirement::Authenticated))
}

pub fn super_admin(services: &Services) -> Arc<dyn Middleware> {
    Arc::new(AuthMiddleware::new(Arc::clone(&services.tokens), Requirement::SuperAdmin))
}

pub fn school_admin(services: &Services) -> Arc<dyn Middleware> {
    Arc::new(AuthMiddleware::new(Arc::clone(&services.tokens), Requirement::SchoolAdmin))
}

/// Extract the token from `Authorization: Bearer ...` or a bare `token` header
fn extract_token(headers: &HeaderMap) -> Result<String, String> {
    if let Some(auth_header) = headers.get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header format".to_string())?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or_else(|| "Authorization header must use Bearer token format".to_string())?;
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        return Ok(token.trim().to_string());
    }

    match headers.get("token").and_then(|v| v.to_str().ok()) {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err("Missing authentication token".to_string()),
    }
}
