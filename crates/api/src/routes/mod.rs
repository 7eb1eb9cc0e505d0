//! API routes

pub mod admin;
pub mod checkout;
pub mod generate;
pub mod health;
pub mod usage;
pub mod webhooks;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{
    auth::{require_admin, require_auth},
    state::AppState,
};

/// Source images arrive inline as data URLs
const GENERATE_BODY_LIMIT: usize = 20 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let admin_routes = Router::new()
        .route("/billing/invariants", get(admin::run_invariants))
        .route(
            "/accounts/{user_id}",
            get(admin::get_account).patch(admin::patch_account),
        )
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_admin,
        ));

    let protected_routes = Router::new()
        .route("/usage", get(usage::get_usage))
        .route(
            "/generate",
            post(generate::generate).layer(DefaultBodyLimit::max(GENERATE_BODY_LIMIT)),
        )
        .route("/checkout", post(checkout::create_checkout))
        .nest("/admin", admin_routes)
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    let public_routes = Router::new().route("/webhooks", post(webhooks::receive));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api", protected_routes.merge(public_routes))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GenerationConfig, GenerationMode};
    use crate::generation::SimulatedGenerationService;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use jsonwebtoken::{encode, EncodingKey, Header};
    use nanoedit_billing::{
        AccountDefaults, AccountStore, AdminAllowlist, BillingConfig, BillingService,
        MemoryAccountStore,
    };
    use nanoedit_shared::UserId;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "router-test-secret";

    fn config() -> Config {
        Config {
            database_url: "postgres://unused".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            supabase_jwt_secret: SECRET.to_string(),
            allowed_origins: vec![],
            generation: GenerationConfig {
                mode: GenerationMode::Simulated,
                api_key: String::new(),
                base_url: String::new(),
                model: String::new(),
                timeout: Duration::from_secs(5),
                app_url: "http://localhost:3000".to_string(),
            },
        }
    }

    fn app(store: &MemoryAccountStore, webhook_secret: Option<&str>) -> Router {
        let billing = BillingService::new(
            Arc::new(store.clone()),
            BillingConfig::default().with_admins(AdminAllowlist::from_csv("admin@example.com")),
            None,
            webhook_secret.map(String::from),
        )
        .unwrap();
        create_router(AppState::with_generator(
            config(),
            Arc::new(billing),
            Arc::new(SimulatedGenerationService::new()),
        ))
    }

    fn bearer(user_id: UserId, email: &str) -> String {
        let claims = json!({
            "sub": user_id.to_string(),
            "email": email,
            "aud": "authenticated",
            "exp": 9_999_999_999u64,
        });
        let jwt = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {}", jwt)
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let resp = app(&MemoryAccountStore::new(), None)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_usage_provisions_free_trial() {
        let store = MemoryAccountStore::new();
        let user_id = UserId::new();
        let resp = app(&store, None)
            .oneshot(
                Request::get("/api/usage")
                    .header("Authorization", bearer(user_id, "new@example.com"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["canGenerate"], json!(true));
        assert_eq!(body["remainingCredits"], json!(2));
        assert_eq!(body["planName"], json!("Free Trial"));
        assert_eq!(body["simulated"], json!(true));
        assert!(store.get(user_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_usage_requires_auth() {
        let resp = app(&MemoryAccountStore::new(), None)
            .oneshot(Request::get("/api/usage").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_usage_store_outage_is_503() {
        let store = MemoryAccountStore::new();
        store.set_unavailable(true);
        let resp = app(&store, None)
            .oneshot(
                Request::get("/api/usage")
                    .header("Authorization", bearer(UserId::new(), "u@example.com"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_generate_charges_and_then_402() {
        let store = MemoryAccountStore::new();
        let user_id = UserId::new();
        let auth = bearer(user_id, "u@example.com");
        let router = app(&store, None);
        let body = json!({ "image": "data:image/png;base64,AAAA", "prompt": "hat" }).to_string();

        let first = router
            .clone()
            .oneshot(
                Request::post("/api/generate")
                    .header("Authorization", &auth)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_json(first).await["remainingCredits"], json!(0));

        let second = router
            .oneshot(
                Request::post("/api/generate")
                    .header("Authorization", &auth)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_generate_missing_prompt_is_400() {
        let resp = app(&MemoryAccountStore::new(), None)
            .oneshot(
                Request::post("/api/generate")
                    .header("Authorization", bearer(UserId::new(), "u@example.com"))
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"image":"data:image/png;base64,AAAA"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_checkout_without_creem_is_503() {
        let resp = app(&MemoryAccountStore::new(), None)
            .oneshot(
                Request::post("/api/checkout")
                    .header("Authorization", bearer(UserId::new(), "u@example.com"))
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"plan":"Basic","billingType":"monthly"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_webhook_grants_and_acknowledges() {
        let store = MemoryAccountStore::new();
        let user_id = UserId::new();
        let payload = json!({
            "type": "checkout.completed",
            "data": {
                "status": "completed",
                "order_id": "ord_1",
                "metadata": {
                    "user_id": user_id.to_string(),
                    "user_email": "buyer@example.com",
                    "plan_name": "Basic",
                    "billing_type": "yearly"
                }
            }
        });

        let resp = app(&store, None)
            .oneshot(
                Request::post("/api/webhooks")
                    .header("Content-Type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["received"], json!(true));
        assert_eq!(store.get(user_id).await.unwrap().remaining_credits, 1800);
    }

    #[tokio::test]
    async fn test_webhook_garbage_still_200() {
        let resp = app(&MemoryAccountStore::new(), None)
            .oneshot(
                Request::post("/api/webhooks")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_bad_signature_is_401() {
        let store = MemoryAccountStore::new();
        let resp = app(&store, Some("whsec"))
            .oneshot(
                Request::post("/api/webhooks")
                    .header("creem-signature", "00ff")
                    .body(Body::from(r#"{"type":"checkout.completed"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_admin_patch_and_get_account() {
        let store = MemoryAccountStore::new();
        let user_id = UserId::new();
        store
            .create(user_id, "u@example.com", &AccountDefaults::free_trial(2))
            .await
            .unwrap();
        let router = app(&store, None);
        let admin = bearer(UserId::new(), "admin@example.com");

        let resp = router
            .clone()
            .oneshot(
                Request::patch(format!("/api/admin/accounts/{}", user_id))
                    .header("Authorization", &admin)
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"remaining_credits":40,"total_credits":40}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .clone()
            .oneshot(
                Request::get(format!("/api/admin/accounts/{}", user_id))
                    .header("Authorization", &admin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["remaining_credits"], json!(40));

        let resp = router
            .oneshot(
                Request::get(format!("/api/admin/accounts/{}", UserId::new()))
                    .header("Authorization", &admin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_routes_forbidden_for_users() {
        let resp = app(&MemoryAccountStore::new(), None)
            .oneshot(
                Request::get("/api/admin/billing/invariants")
                    .header("Authorization", bearer(UserId::new(), "u@example.com"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invariants_report() {
        let resp = app(&MemoryAccountStore::new(), None)
            .oneshot(
                Request::get("/api/admin/billing/invariants")
                    .header("Authorization", bearer(UserId::new(), "admin@example.com"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["healthy"], json!(true));
    }
}
