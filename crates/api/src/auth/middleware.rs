//! Authentication middleware for Axum
//!
//! Callers authenticate with a Supabase-issued access token, sent either as a
//! bearer token or in the `sb-access-token` cookie set by the web app.

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use nanoedit_billing::{AdminAllowlist, CallerIdentity};
use nanoedit_shared::UserId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Cookie the web app stores the access token in
pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";

/// Audience Supabase stamps on signed-in user tokens
const SUPABASE_AUDIENCE: &str = "authenticated";

/// Claims of a Supabase access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseClaims {
    pub sub: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub aud: String,
    pub exp: usize,
}

/// Authenticated caller extracted from the access token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: Option<String>,
    pub role: String,
}

impl AuthUser {
    pub fn identity(&self) -> CallerIdentity {
        CallerIdentity {
            user_id: self.user_id,
            email: self.email.clone(),
        }
    }
}

/// Verifies Supabase HS256 access tokens
#[derive(Clone)]
pub struct JwtVerifier {
    key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SUPABASE_AUDIENCE]);
        Self {
            key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(validation),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let data = decode::<SupabaseClaims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            AuthError::InvalidToken
        })?;

        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AuthError::InvalidToken)?;

        Ok(AuthUser {
            user_id,
            email: data.claims.email.filter(|e| !e.trim().is_empty()),
            role: data
                .claims
                .role
                .unwrap_or_else(|| SUPABASE_AUDIENCE.to_string()),
        })
    }
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub verifier: JwtVerifier,
    pub admins: AdminAllowlist,
}

fn extract_token_from_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                cookie
                    .trim()
                    .strip_prefix(ACCESS_TOKEN_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                    .filter(|token| !token.is_empty())
                    .map(String::from)
            })
        })
}

/// Extract bearer token from Authorization header or cookie
/// Prefers the Authorization header
fn extract_bearer_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    extract_token_from_cookie(request)
}

/// Middleware that requires authentication
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_result = match extract_bearer_token(&request) {
        Some(token) => auth_state.verifier.verify(&token),
        None => Err(AuthError::MissingAuth),
    };

    match auth_result {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                user_id = %auth_user.user_id,
                role = %auth_user.role,
                "require_auth: authentication successful"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

/// Middleware that requires an allowlisted admin; run after [`require_auth`]
pub async fn require_admin(
    State(auth_state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth_user) = request.extensions().get::<AuthUser>() else {
        return AuthError::MissingAuth.into_response();
    };

    let is_admin = auth_user
        .email
        .as_deref()
        .map(|email| auth_state.admins.contains(email))
        .unwrap_or(false);

    if !is_admin {
        tracing::warn!(
            user_id = %auth_user.user_id,
            path = %request.uri().path(),
            "require_admin: caller is not an admin"
        );
        return AuthError::InsufficientPermissions.into_response();
    }

    next.run(request).await
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::InsufficientPermissions => {
                (StatusCode::FORBIDDEN, "Insufficient permissions")
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
