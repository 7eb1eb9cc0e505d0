//! Unit tests for authentication middleware
//!
//! Tests cover:
//! - Supabase token validation (valid, expired, wrong secret, wrong audience)
//! - Token extraction from header and cookie
//! - Admin gating

#[cfg(test)]
mod tests {
    use super::super::middleware::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Extension, Router,
    };
    use jsonwebtoken::{encode, EncodingKey, Header};
    use nanoedit_billing::AdminAllowlist;
    use nanoedit_shared::UserId;
    use tower::ServiceExt;

    const SECRET: &str = "test-supabase-jwt-secret-for-testing-only";

    fn far_future() -> usize {
        9_999_999_999
    }

    fn token(user_id: UserId, email: Option<&str>, aud: &str, exp: usize, secret: &str) -> String {
        let claims = SupabaseClaims {
            sub: user_id.to_string(),
            email: email.map(String::from),
            role: Some("authenticated".to_string()),
            aud: aud.to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn auth_state() -> AuthState {
        AuthState {
            verifier: JwtVerifier::new(SECRET),
            admins: AdminAllowlist::from_csv("admin@example.com"),
        }
    }

    fn app() -> Router {
        let state = auth_state();
        let admin = Router::new()
            .route("/admin", get(|| async { "ok" }))
            .layer(from_fn_with_state(state.clone(), require_admin));
        Router::new()
            .route(
                "/me",
                get(|Extension(user): Extension<AuthUser>| async move { user.user_id.to_string() }),
            )
            .merge(admin)
            .layer(from_fn_with_state(state, require_auth))
    }

    // =========================================================================
    // Token validation
    // =========================================================================

    #[test]
    fn test_valid_token() {
        let user_id = UserId::new();
        let jwt = token(user_id, Some("u@example.com"), "authenticated", far_future(), SECRET);

        let user = JwtVerifier::new(SECRET).verify(&jwt).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.email.as_deref(), Some("u@example.com"));
        assert_eq!(user.identity().user_id, user_id);
    }

    #[test]
    fn test_expired_token_rejected() {
        let jwt = token(UserId::new(), Some("u@example.com"), "authenticated", 1, SECRET);
        assert!(matches!(
            JwtVerifier::new(SECRET).verify(&jwt),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let jwt = token(UserId::new(), None, "authenticated", far_future(), "other-secret");
        assert!(JwtVerifier::new(SECRET).verify(&jwt).is_err());
    }

    #[test]
    fn test_anon_audience_rejected() {
        let jwt = token(UserId::new(), None, "anon", far_future(), SECRET);
        assert!(JwtVerifier::new(SECRET).verify(&jwt).is_err());
    }

    #[test]
    fn test_blank_email_is_none() {
        let jwt = token(UserId::new(), Some("  "), "authenticated", far_future(), SECRET);
        let user = JwtVerifier::new(SECRET).verify(&jwt).unwrap();
        assert_eq!(user.email, None);
    }

    // =========================================================================
    // Middleware
    // =========================================================================

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let resp = app()
            .oneshot(Request::get("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bearer_header_accepted() {
        let jwt = token(UserId::new(), Some("u@example.com"), "authenticated", far_future(), SECRET);
        let resp = app()
            .oneshot(
                Request::get("/me")
                    .header("Authorization", format!("Bearer {}", jwt))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cookie_accepted() {
        let jwt = token(UserId::new(), Some("u@example.com"), "authenticated", far_future(), SECRET);
        let resp = app()
            .oneshot(
                Request::get("/me")
                    .header("Cookie", format!("theme=dark; {}={}", ACCESS_TOKEN_COOKIE, jwt))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_route_gated_by_allowlist() {
        let user_jwt = token(UserId::new(), Some("u@example.com"), "authenticated", far_future(), SECRET);
        let resp = app()
            .oneshot(
                Request::get("/admin")
                    .header("Authorization", format!("Bearer {}", user_jwt))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let admin_jwt = token(
            UserId::new(),
            Some("Admin@Example.com"),
            "authenticated",
            far_future(),
            SECRET,
        );
        let resp = app()
            .oneshot(
                Request::get("/admin")
                    .header("Authorization", format!("Bearer {}", admin_jwt))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
