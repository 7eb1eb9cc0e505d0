//! Payment webhook handling
//!
//! Normalizes Creem webhook payloads into [`PaymentEvent`]s and applies them
//! to the ledger. Delivery is at-least-once, so every event is safe to apply
//! twice. Processing failures are logged and contained: the provider always
//! gets an acknowledgement so it does not redeliver in a loop.

use hmac::{Hmac, Mac};
use nanoedit_shared::{BillingType, PlanName, UserId};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::account::{CreditGrant, GrantApplication, ProviderRefs};
use crate::config::PlanCatalog;
use crate::error::{BillingError, BillingResult};
use crate::store::AccountStore;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw body
pub const SIGNATURE_HEADER: &str = "creem-signature";

/// Checkout status that marks a completed purchase
const CHECKOUT_COMPLETED_STATUS: &str = "completed";

/// Who an event is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSubject {
    pub user_id: UserId,
    pub email: String,
}

/// Purchase details shared by checkout and activation events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub subject: EventSubject,
    pub plan: PlanName,
    pub billing_type: BillingType,
    pub refs: ProviderRefs,
    /// Payment this purchase pays for: the order, the subscription
    /// transaction, or failing both the webhook event id
    pub grant_key: Option<String>,
}

/// Normalized payment-provider event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    CheckoutCompleted { status: String, purchase: Purchase },
    SubscriptionActivated(Purchase),
    SubscriptionCanceled { subject: EventSubject, refs: ProviderRefs },
    Unhandled { event_type: String },
}

impl PaymentEvent {
    /// Parse a raw webhook body
    pub fn from_payload(payload: &[u8]) -> BillingResult<Self> {
        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| BillingError::MalformedEvent(format!("invalid JSON: {}", e)))?;
        Self::from_json(&body)
    }

    pub fn from_json(body: &Value) -> BillingResult<Self> {
        let event_type = ["type", "event_type", "eventType"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .ok_or_else(|| BillingError::MalformedEvent("missing event type".to_string()))?;

        let object = body
            .get("data")
            .or_else(|| body.get("object"))
            .filter(|v| v.is_object())
            .unwrap_or(body);
        // Only an enveloped payload has an event id distinct from the object id
        let event_id = if std::ptr::eq(object, body) {
            None
        } else {
            text_field(body, "id")
        };

        match event_type {
            "checkout.completed" => {
                let status = text_field(object, "status")
                    .or_else(|| text_field(body, "status"))
                    .unwrap_or_default();
                let refs = ProviderRefs {
                    order_id: id_field(object, "order_id")
                        .or_else(|| id_field(object, "order"))
                        .or_else(|| id_field(object, "id")),
                    customer_id: id_field(object, "customer_id")
                        .or_else(|| id_field(object, "customer")),
                    subscription_id: id_field(object, "subscription_id")
                        .or_else(|| id_field(object, "subscription")),
                };
                let grant_key = refs.order_id.clone().or(event_id);
                Ok(PaymentEvent::CheckoutCompleted {
                    status,
                    purchase: purchase(body, object, refs, grant_key)?,
                })
            }
            "subscription.active" | "subscription.paid" => {
                let refs = ProviderRefs {
                    subscription_id: id_field(object, "subscription_id")
                        .or_else(|| id_field(object, "id")),
                    customer_id: id_field(object, "customer_id")
                        .or_else(|| id_field(object, "customer")),
                    order_id: id_field(object, "order_id"),
                };
                let grant_key = refs
                    .order_id
                    .clone()
                    .or_else(|| id_field(object, "last_transaction_id"))
                    .or(event_id);
                Ok(PaymentEvent::SubscriptionActivated(purchase(
                    body, object, refs, grant_key,
                )?))
            }
            "subscription.canceled" | "subscription.expired" => {
                let refs = ProviderRefs {
                    subscription_id: id_field(object, "subscription_id")
                        .or_else(|| id_field(object, "id")),
                    customer_id: id_field(object, "customer_id")
                        .or_else(|| id_field(object, "customer")),
                    order_id: None,
                };
                Ok(PaymentEvent::SubscriptionCanceled {
                    subject: subject(body, object)?,
                    refs,
                })
            }
            other => Ok(PaymentEvent::Unhandled {
                event_type: other.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            PaymentEvent::CheckoutCompleted { .. } => "checkout_completed",
            PaymentEvent::SubscriptionActivated(_) => "subscription_activated",
            PaymentEvent::SubscriptionCanceled { .. } => "subscription_canceled",
            PaymentEvent::Unhandled { event_type } => event_type,
        }
    }
}

fn metadata<'a>(body: &'a Value, object: &'a Value) -> Option<&'a Value> {
    object
        .get("metadata")
        .filter(|m| m.is_object())
        .or_else(|| body.get("metadata").filter(|m| m.is_object()))
}

fn subject(body: &Value, object: &Value) -> BillingResult<EventSubject> {
    let meta = metadata(body, object)
        .ok_or_else(|| BillingError::MalformedEvent("missing metadata".to_string()))?;

    let raw_user_id = text_field(meta, "user_id")
        .ok_or_else(|| BillingError::MalformedEvent("missing user_id".to_string()))?;
    let email = text_field(meta, "user_email")
        .ok_or_else(|| BillingError::MalformedEvent("missing user_email".to_string()))?;
    let user_id = raw_user_id.parse::<UserId>().map_err(|e| {
        BillingError::MalformedEvent(format!("invalid user_id '{}': {}", raw_user_id, e))
    })?;

    Ok(EventSubject { user_id, email })
}

fn purchase(
    body: &Value,
    object: &Value,
    refs: ProviderRefs,
    grant_key: Option<String>,
) -> BillingResult<Purchase> {
    let subject = subject(body, object)?;
    let meta = metadata(body, object);

    let plan = match meta.and_then(|m| text_field(m, "plan_name")) {
        None => PlanName::Basic,
        Some(raw) => match raw.parse::<PlanName>() {
            Ok(plan) if plan.is_purchasable() => plan,
            _ => {
                tracing::warn!(
                    user_id = %subject.user_id,
                    plan_name = %raw,
                    "Unrecognised plan in payment metadata, falling back to Basic"
                );
                PlanName::Basic
            }
        },
    };

    let billing_type = match meta.and_then(|m| text_field(m, "billing_type")) {
        None => BillingType::Monthly,
        Some(raw) => raw.parse::<BillingType>().unwrap_or_else(|_| {
            tracing::warn!(
                user_id = %subject.user_id,
                billing_type = %raw,
                "Unrecognised billing type in payment metadata, falling back to monthly"
            );
            BillingType::Monthly
        }),
    };

    Ok(Purchase {
        subject,
        plan,
        billing_type,
        refs,
        grant_key,
    })
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Provider ids arrive either as plain strings or expanded `{ "id": ... }` objects
fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(_) => text_field(value, key),
        nested @ Value::Object(_) => text_field(nested, "id"),
        _ => None,
    }
}

/// What processing an event did to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GrantOutcome {
    Granted { user_id: UserId, credits: i32 },
    Duplicate { user_id: UserId },
    Revoked { user_id: UserId },
    Ignored { reason: String },
}

/// Acknowledgement returned to the provider for every delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReceipt {
    pub received: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<GrantOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Applies payment events to account records
#[derive(Clone)]
pub struct WebhookHandler {
    store: Arc<dyn AccountStore>,
    catalog: PlanCatalog,
    webhook_secret: Option<String>,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn AccountStore>,
        catalog: PlanCatalog,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn verifies_signatures(&self) -> bool {
        self.webhook_secret.is_some()
    }

    /// Check the body's HMAC when a webhook secret is configured
    pub fn verify_signature(&self, payload: &[u8], signature: Option<&str>) -> BillingResult<()> {
        let Some(secret) = &self.webhook_secret else {
            return Ok(());
        };

        let signature = signature.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(|| {
            tracing::warn!("Webhook signature header missing");
            BillingError::WebhookSignatureInvalid
        })?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
            tracing::error!("Invalid webhook secret key");
            BillingError::WebhookSignatureInvalid
        })?;
        mac.update(payload);
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed
            .as_bytes()
            .ct_eq(signature.to_ascii_lowercase().as_bytes())
            .into()
        {
            Ok(())
        } else {
            tracing::warn!(payload_len = payload.len(), "Webhook signature mismatch");
            Err(BillingError::WebhookSignatureInvalid)
        }
    }

    /// Process a raw delivery; never fails
    pub async fn handle_payload(&self, payload: &[u8]) -> WebhookReceipt {
        let event = match PaymentEvent::from_payload(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Dropping malformed payment event");
                return WebhookReceipt {
                    received: true,
                    outcome: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let kind = event.kind().to_string();
        match self.handle_event(event).await {
            Ok(outcome) => WebhookReceipt {
                received: true,
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => {
                tracing::error!(
                    event = %kind,
                    error = %e,
                    "Payment event processing failed, acknowledging anyway"
                );
                WebhookReceipt {
                    received: true,
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Apply one normalized event to the ledger
    pub async fn handle_event(&self, event: PaymentEvent) -> BillingResult<GrantOutcome> {
        match event {
            PaymentEvent::CheckoutCompleted { status, purchase } => {
                if status != CHECKOUT_COMPLETED_STATUS {
                    tracing::info!(
                        user_id = %purchase.subject.user_id,
                        status = %status,
                        "Checkout not completed yet, skipping"
                    );
                    return Ok(GrantOutcome::Ignored {
                        reason: format!("checkout status '{}'", status),
                    });
                }
                self.grant(purchase).await
            }
            PaymentEvent::SubscriptionActivated(purchase) => self.grant(purchase).await,
            PaymentEvent::SubscriptionCanceled { subject, refs } => {
                self.revoke(subject, refs).await
            }
            PaymentEvent::Unhandled { event_type } => {
                tracing::info!(event_type = %event_type, "Unhandled payment event type");
                Ok(GrantOutcome::Ignored {
                    reason: format!("unhandled event type '{}'", event_type),
                })
            }
        }
    }

    async fn grant(&self, purchase: Purchase) -> BillingResult<GrantOutcome> {
        let credits = self
            .catalog
            .allotment(purchase.plan, purchase.billing_type)
            .or_else(|| {
                tracing::warn!(
                    plan = %purchase.plan,
                    billing_type = %purchase.billing_type,
                    "Plan missing from catalog, using Basic allotment"
                );
                self.catalog.allotment(PlanName::Basic, purchase.billing_type)
            })
            .ok_or_else(|| {
                BillingError::Configuration(format!(
                    "no allotment for {} / {}",
                    purchase.plan, purchase.billing_type
                ))
            })?;

        let user_id = purchase.subject.user_id;
        let grant = CreditGrant {
            user_id,
            email: purchase.subject.email,
            plan: purchase.plan,
            billing_type: purchase.billing_type,
            credits,
            refs: purchase.refs,
            grant_key: purchase.grant_key,
        };
        if grant.grant_key.is_none() {
            tracing::warn!(
                user_id = %user_id,
                "Payment event has no order, transaction or event id, applying without duplicate check"
            );
        }

        match self.store.apply_grant(&grant).await? {
            GrantApplication::Applied(account) => {
                tracing::info!(
                    user_id = %user_id,
                    plan = %grant.plan,
                    billing_type = %grant.billing_type,
                    credits = account.remaining_credits,
                    grant_key = ?grant.grant_key,
                    "Allocated plan credits"
                );
                Ok(GrantOutcome::Granted { user_id, credits })
            }
            GrantApplication::Duplicate => {
                tracing::info!(
                    user_id = %user_id,
                    grant_key = ?grant.grant_key,
                    "Payment already applied, skipping duplicate delivery"
                );
                Ok(GrantOutcome::Duplicate { user_id })
            }
        }
    }

    async fn revoke(&self, subject: EventSubject, refs: ProviderRefs) -> BillingResult<GrantOutcome> {
        match self.store.revoke(subject.user_id).await {
            Ok(_) => {
                tracing::info!(
                    user_id = %subject.user_id,
                    subscription_id = ?refs.subscription_id,
                    "Subscription canceled, paid status revoked"
                );
                Ok(GrantOutcome::Revoked {
                    user_id: subject.user_id,
                })
            }
            Err(BillingError::NotFound(user_id)) => {
                tracing::warn!(user_id = %user_id, "Cancellation for unknown account");
                Ok(GrantOutcome::Ignored {
                    reason: "no account for cancellation".to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}
