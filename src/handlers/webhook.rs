use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::from_value;

use crate::billing::{CheckoutSessionCompleted, InvoiceEvent, SubscriptionEvent, WebhookEvent};
use crate::db::{AppState, queries};
use crate::engine::{self, BillingEvent, BillingOutcome};
use crate::error::{AppError, Result};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}

/// Entry point for signed billing events.
///
/// Order matters: signature verification runs before any business field is
/// even parsed (fail closed), then replay deduplication, then routing. A
/// replayed or unroutable event is a successful no-op - billing providers
/// retry on anything but 2xx.
///
/// The ledger insert and the engine mutation share one transaction: an event
/// id counts as processed only once its mutation has committed. If mapping
/// or application fails, the rollback also releases the event id, so the
/// provider's retry can apply the mutation instead of being dropped as a
/// replay.
pub async fn handle_billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let now = Utc::now().timestamp();

    let signature = headers
        .get("billing-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::SignatureInvalid)?;

    state
        .billing
        .verify_webhook_signature(&body, signature, now)?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid event payload: {}", e)))?;

    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    if !queries::try_record_webhook_event(&tx, &event.id, &event.event_type, now)? {
        tracing::info!("replayed billing event ignored: {}", event.id);
        return Ok(Json(WebhookResponse { received: true }));
    }

    let mapped = match map_event(&state, &event)? {
        Some(e) => e,
        None => {
            // Intentionally ignored events are still processed: commit the
            // ledger entry so replays short-circuit
            tx.commit()?;
            tracing::info!("billing event ignored: {} ({})", event.id, event.event_type);
            return Ok(Json(WebhookResponse { received: true }));
        }
    };

    let outcome = engine::apply_billing_event(&tx, &state.config, mapped, now)?;
    tx.commit()?;

    match outcome {
        BillingOutcome::Issued(license) => {
            tracing::info!(
                "issued license {} for customer {} (plan {})",
                license.license_key,
                license.billing_customer_id,
                license.plan.as_ref()
            );
            state.notifier.dispatch_key(&license);
        }
        BillingOutcome::Updated => {
            tracing::info!("applied billing event {} ({})", event.id, event.event_type);
        }
        BillingOutcome::Ignored => {
            tracing::warn!(
                "billing event {} matched no mutable license ({})",
                event.id,
                event.event_type
            );
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}

/// Map a provider event to an engine mutation. None = intentionally ignored.
fn map_event(state: &AppState, event: &WebhookEvent) -> Result<Option<BillingEvent>> {
    let mapped = match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSessionCompleted = from_value(event.data.object.clone())
                .map_err(|e| AppError::BadRequest(format!("Invalid checkout session: {}", e)))?;
            let Some(plan) = session.derive_plan(&state.config) else {
                tracing::warn!("checkout session {} has no derivable plan", event.id);
                return Ok(None);
            };
            Some(BillingEvent::PurchaseCompleted {
                customer_id: session.customer,
                subscription_id: session.subscription,
                plan,
            })
        }
        "customer.subscription.deleted" => {
            let sub: SubscriptionEvent = from_value(event.data.object.clone())
                .map_err(|e| AppError::BadRequest(format!("Invalid subscription: {}", e)))?;
            Some(BillingEvent::SubscriptionCanceled {
                subscription_id: sub.id,
            })
        }
        "invoice.paid" => {
            let invoice: InvoiceEvent = from_value(event.data.object.clone())
                .map_err(|e| AppError::BadRequest(format!("Invalid invoice: {}", e)))?;
            // The initial period is granted by checkout completion; only
            // renewals extend from here
            if invoice.billing_reason.as_deref() == Some("subscription_create") {
                return Ok(None);
            }
            let Some(subscription_id) = invoice.subscription else {
                return Ok(None);
            };
            Some(BillingEvent::InvoicePaid { subscription_id })
        }
        "invoice.payment_failed" => {
            let invoice: InvoiceEvent = from_value(event.data.object.clone())
                .map_err(|e| AppError::BadRequest(format!("Invalid invoice: {}", e)))?;
            let Some(subscription_id) = invoice.subscription else {
                return Ok(None);
            };
            Some(BillingEvent::InvoicePaymentFailed { subscription_id })
        }
        _ => None,
    };
    Ok(mapped)
}
