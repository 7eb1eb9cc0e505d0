//! Creem checkout sessions
//!
//! The client only names a plan and billing period. The product id is resolved
//! here from configuration, so a caller cannot buy an arbitrary product.

use nanoedit_shared::{BillingType, PlanName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::entitlement::CallerIdentity;
use crate::error::{BillingError, BillingResult};

pub const CREEM_LIVE_API_URL: &str = "https://api.creem.io/v1";
pub const CREEM_TEST_API_URL: &str = "https://test-api.creem.io/v1";

const DEFAULT_APP_URL: &str = "http://localhost:3000";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Product ids for plans that are listed but not on sale yet contain this marker
const PLACEHOLDER_MARKER: &str = "placeholder";

/// Creem connection settings
#[derive(Debug, Clone)]
pub struct CreemConfig {
    pub api_key: String,
    pub api_url: String,
    pub success_url: String,
    /// Upper bound on a single call to the Creem API
    pub timeout: Duration,
    products: HashMap<(PlanName, BillingType), String>,
}

impl CreemConfig {
    pub fn new(api_key: impl Into<String>, api_url: impl Into<String>, app_url: &str) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            success_url: format!("{}/payment/success", app_url.trim_end_matches('/')),
            timeout: DEFAULT_TIMEOUT,
            products: HashMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_product(
        mut self,
        plan: PlanName,
        billing: BillingType,
        product_id: impl Into<String>,
    ) -> Self {
        self.products.insert((plan, billing), product_id.into());
        self
    }

    /// Sellable product for a plan; placeholders and non-product ids are skipped
    pub fn product_id(&self, plan: PlanName, billing: BillingType) -> Option<&str> {
        self.products
            .get(&(plan, billing))
            .map(String::as_str)
            .filter(|id| id.starts_with("prod_") && !id.contains(PLACEHOLDER_MARKER))
    }

    /// Load from environment; `None` when no API key is configured
    ///
    /// `CREEM_API_URL` wins over `CREEM_TEST_MODE`, which selects the sandbox.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("CREEM_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())?;

        let api_url = std::env::var("CREEM_API_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| {
                let test_mode = std::env::var("CREEM_TEST_MODE")
                    .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false);
                if test_mode {
                    CREEM_TEST_API_URL.to_string()
                } else {
                    CREEM_LIVE_API_URL.to_string()
                }
            });

        let app_url = std::env::var("APP_URL").unwrap_or_else(|_| DEFAULT_APP_URL.to_string());

        let mut config = Self::new(api_key, api_url, &app_url);
        match std::env::var("CREEM_TIMEOUT_SECS").ok().map(|v| v.trim().parse::<u64>()) {
            Some(Ok(secs)) if secs > 0 => config = config.with_timeout(Duration::from_secs(secs)),
            Some(_) => tracing::warn!("Invalid CREEM_TIMEOUT_SECS, using default"),
            None => {}
        }
        for plan in PlanName::PURCHASABLE {
            for billing in BillingType::ALL {
                let key = format!(
                    "CREEM_PRODUCT_{}_{}",
                    plan.as_str().to_ascii_uppercase().replace(' ', "_"),
                    billing.as_str().to_ascii_uppercase()
                );
                if let Ok(product_id) = std::env::var(&key) {
                    let product_id = product_id.trim();
                    if !product_id.is_empty() {
                        config = config.with_product(plan, billing, product_id);
                    }
                }
            }
        }

        tracing::info!(
            api_url = %config.api_url,
            products = config.products.len(),
            timeout_secs = config.timeout.as_secs(),
            "Creem checkout configured"
        );
        Some(config)
    }
}

/// Checkout session handed back to the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
struct CreateCheckoutRequest<'a> {
    product_id: &'a str,
    customer: CheckoutCustomer<'a>,
    success_url: &'a str,
    metadata: CheckoutMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct CheckoutCustomer<'a> {
    email: &'a str,
}

/// Echoed back on webhooks; the grant handler keys on these fields
#[derive(Debug, Serialize)]
struct CheckoutMetadata<'a> {
    user_id: String,
    user_email: &'a str,
    plan_name: &'a str,
    billing_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutResponse {
    id: String,
    checkout_url: String,
}

#[derive(Debug, Deserialize)]
struct CreemErrorBody {
    error: Option<String>,
    message: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct CheckoutService {
    http: reqwest::Client,
    config: CreemConfig,
}

impl CheckoutService {
    pub fn new(config: CreemConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BillingError::Configuration(format!("Creem HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &CreemConfig {
        &self.config
    }

    /// Create a hosted checkout for a plan purchase
    pub async fn create_checkout(
        &self,
        identity: &CallerIdentity,
        plan: PlanName,
        billing_type: BillingType,
    ) -> BillingResult<CheckoutSession> {
        let email = identity.require_email()?;

        if !plan.is_purchasable() {
            return Err(BillingError::PlanUnavailable(plan.to_string()));
        }
        let product_id = self
            .config
            .product_id(plan, billing_type)
            .ok_or_else(|| {
                tracing::warn!(plan = %plan, billing_type = %billing_type, "No product configured for plan");
                BillingError::PlanUnavailable(format!("{} ({})", plan, billing_type))
            })?;

        let body = CreateCheckoutRequest {
            product_id,
            customer: CheckoutCustomer { email },
            success_url: &self.config.success_url,
            metadata: CheckoutMetadata {
                user_id: identity.user_id.to_string(),
                user_email: email,
                plan_name: plan.as_str(),
                billing_type: billing_type.as_str(),
            },
        };

        let url = format!("{}/checkouts", self.config.api_url);
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Creem checkout request failed");
                BillingError::CheckoutFailed(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<CreemErrorBody>(&text)
                .ok()
                .and_then(|b| {
                    b.error.or_else(|| {
                        b.message.map(|m| match m {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        })
                    })
                })
                .unwrap_or_else(|| format!("status {}", status));
            tracing::error!(
                status = %status,
                product_id = %product_id,
                response_body = %text,
                "Creem rejected checkout"
            );
            return Err(BillingError::CheckoutFailed(detail));
        }

        let created: CreateCheckoutResponse = resp.json().await.map_err(|e| {
            BillingError::CheckoutFailed(format!("unexpected checkout response: {}", e))
        })?;

        tracing::info!(
            user_id = %identity.user_id,
            plan = %plan,
            billing_type = %billing_type,
            session_id = %created.id,
            "Checkout session created"
        );

        Ok(CheckoutSession {
            checkout_url: created.checkout_url,
            session_id: created.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use nanoedit_shared::UserId;
    use serial_test::serial;

    fn service(server: &mockito::Server) -> CheckoutService {
        let config = CreemConfig::new("creem_key", server.url(), "https://app.example.com/")
            .with_product(PlanName::Basic, BillingType::Monthly, "prod_basic_m")
            .with_product(PlanName::Pro, BillingType::Yearly, "prod_pro_product_placeholder")
            .with_product(PlanName::Max, BillingType::Yearly, "price_max_y");
        CheckoutService::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_creates_checkout_with_metadata() {
        let mut server = mockito::Server::new_async().await;
        let user_id = UserId::new();
        let mock = server
            .mock("POST", "/checkouts")
            .match_header("x-api-key", "creem_key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "product_id": "prod_basic_m",
                "customer": { "email": "buyer@example.com" },
                "success_url": "https://app.example.com/payment/success",
                "metadata": {
                    "user_id": user_id.to_string(),
                    "user_email": "buyer@example.com",
                    "plan_name": "Basic",
                    "billing_type": "monthly"
                }
            })))
            .with_status(200)
            .with_body(r#"{"id":"ch_123","checkout_url":"https://pay.creem.io/ch_123"}"#)
            .create_async()
            .await;

        let session = service(&server)
            .create_checkout(
                &CallerIdentity::new(user_id, "buyer@example.com"),
                PlanName::Basic,
                BillingType::Monthly,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(session.session_id, "ch_123");
        assert_eq!(session.checkout_url, "https://pay.creem.io/ch_123");
    }

    #[tokio::test]
    async fn test_provider_error_surfaces_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/checkouts")
            .with_status(400)
            .with_body(r#"{"message":"product archived"}"#)
            .create_async()
            .await;

        let result = service(&server)
            .create_checkout(
                &CallerIdentity::new(UserId::new(), "buyer@example.com"),
                PlanName::Basic,
                BillingType::Monthly,
            )
            .await;
        assert!(matches!(result, Err(BillingError::CheckoutFailed(m)) if m == "product archived"));
    }

    #[tokio::test]
    async fn test_unconfigured_or_placeholder_product_unavailable() {
        let server = mockito::Server::new_async().await;
        let svc = service(&server);
        let identity = CallerIdentity::new(UserId::new(), "buyer@example.com");

        assert!(matches!(
            svc.create_checkout(&identity, PlanName::Max, BillingType::Monthly)
                .await,
            Err(BillingError::PlanUnavailable(_))
        ));
        assert!(matches!(
            svc.create_checkout(&identity, PlanName::Pro, BillingType::Yearly)
                .await,
            Err(BillingError::PlanUnavailable(_))
        ));
        assert!(matches!(
            svc.create_checkout(&identity, PlanName::Max, BillingType::Yearly)
                .await,
            Err(BillingError::PlanUnavailable(_))
        ));
        assert!(matches!(
            svc.create_checkout(&identity, PlanName::Admin, BillingType::Monthly)
                .await,
            Err(BillingError::PlanUnavailable(_))
        ));
    }

    #[test]
    fn test_product_lookup_skips_placeholders() {
        let config = CreemConfig::new("k", "https://creem.test", "https://app.example.com")
            .with_product(PlanName::Basic, BillingType::Monthly, "prod_basic_m")
            .with_product(PlanName::Pro, BillingType::Monthly, "prod_pro_product_placeholder")
            .with_product(PlanName::Max, BillingType::Monthly, "max_monthly");

        assert_eq!(
            config.product_id(PlanName::Basic, BillingType::Monthly),
            Some("prod_basic_m")
        );
        assert_eq!(config.product_id(PlanName::Pro, BillingType::Monthly), None);
        assert_eq!(config.product_id(PlanName::Max, BillingType::Monthly), None);
    }

    #[tokio::test]
    async fn test_stalled_provider_times_out() {
        use std::io::Write;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/checkouts")
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(500));
                w.write_all(br#"{"id":"ch_1","checkout_url":"https://pay.creem.io/ch_1"}"#)
            })
            .create_async()
            .await;

        let config = CreemConfig::new("creem_key", server.url(), "https://app.example.com")
            .with_product(PlanName::Basic, BillingType::Monthly, "prod_basic_m")
            .with_timeout(Duration::from_millis(50));
        let result = CheckoutService::new(config)
            .unwrap()
            .create_checkout(
                &CallerIdentity::new(UserId::new(), "buyer@example.com"),
                PlanName::Basic,
                BillingType::Monthly,
            )
            .await;

        assert!(matches!(result, Err(BillingError::CheckoutFailed(_))));
    }

    #[tokio::test]
    async fn test_missing_email_rejected() {
        let server = mockito::Server::new_async().await;
        let identity = CallerIdentity {
            user_id: UserId::new(),
            email: None,
        };
        assert!(matches!(
            service(&server)
                .create_checkout(&identity, PlanName::Basic, BillingType::Monthly)
                .await,
            Err(BillingError::MissingEmail)
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::remove_var("CREEM_API_KEY");
        assert!(CreemConfig::from_env().is_none());

        std::env::set_var("CREEM_API_KEY", "creem_test_abc");
        std::env::remove_var("CREEM_API_URL");
        std::env::set_var("CREEM_TEST_MODE", "true");
        std::env::set_var("APP_URL", "https://nano.example");
        std::env::set_var("CREEM_PRODUCT_FREE_TRIAL_MONTHLY", "prod_free");
        std::env::set_var("CREEM_PRODUCT_BASIC_YEARLY", "prod_by");
        std::env::set_var("CREEM_TIMEOUT_SECS", "12");

        let config = CreemConfig::from_env().unwrap();
        assert_eq!(config.api_url, CREEM_TEST_API_URL);
        assert_eq!(config.success_url, "https://nano.example/payment/success");
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(
            config.product_id(PlanName::Basic, BillingType::Yearly),
            Some("prod_by")
        );
        assert_eq!(
            config.product_id(PlanName::FreeTrial, BillingType::Monthly),
            None
        );

        for key in [
            "CREEM_API_KEY",
            "CREEM_TEST_MODE",
            "APP_URL",
            "CREEM_PRODUCT_FREE_TRIAL_MONTHLY",
            "CREEM_PRODUCT_BASIC_YEARLY",
            "CREEM_TIMEOUT_SECS",
        ] {
            std::env::remove_var(key);
        }
    }
}
