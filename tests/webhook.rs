//! End-to-end webhook tests: signature enforcement, replay deduplication,
//! and event routing through the public router.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use axctl_license::billing::sign_payload;
use axctl_license::db::{AppState, queries};
use axctl_license::handlers;
use axctl_license::models::{LicenseStatus, Plan};

mod common;
use common::*;

fn public_app(state: AppState) -> Router {
    handlers::router().with_state(state)
}

fn signed_webhook_request(body: &Value) -> Request<Body> {
    let payload = serde_json::to_vec(body).unwrap();
    let signature = sign_payload(TEST_WEBHOOK_SECRET, &payload, Utc::now().timestamp());
    Request::builder()
        .method("POST")
        .uri("/webhook/billing")
        .header("content-type", "application/json")
        .header("billing-signature", signature)
        .body(Body::from(payload))
        .unwrap()
}

fn checkout_completed_event(event_id: &str, customer: &str, subscription: Option<&str>) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "customer": customer,
                "subscription": subscription,
                "mode": if subscription.is_some() { "subscription" } else { "payment" },
                "metadata": { "plan": "annual" },
                "price_id": "price_annual",
            }
        }
    })
}

fn count_licenses(state: &AppState) -> i64 {
    let conn = state.db.get().unwrap();
    conn.query_row("SELECT COUNT(*) FROM licenses", [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn tampered_signature_is_rejected_and_nothing_persisted() {
    let (state, _dir) = create_test_app_state();
    let app = public_app(state.clone());

    let body = serde_json::to_vec(&checkout_completed_event("evt_1", "cus_A", Some("sub_1"))).unwrap();
    let mut signature = sign_payload(TEST_WEBHOOK_SECRET, &body, Utc::now().timestamp());
    // Flip the last hex digit of the MAC
    let last = signature.pop().unwrap();
    signature.push(if last == '0' { '1' } else { '0' });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/billing")
                .header("billing-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(count_licenses(&state), 0);
}

#[tokio::test]
async fn missing_signature_header_is_rejected() {
    let (state, _dir) = create_test_app_state();
    let app = public_app(state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/billing")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn checkout_completed_issues_license() {
    let (state, _dir) = create_test_app_state();
    let app = public_app(state.clone());

    let response = app
        .oneshot(signed_webhook_request(&checkout_completed_event(
            "evt_1",
            "cus_A",
            Some("sub_1"),
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(count_licenses(&state), 1);

    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_subscription(&conn, "sub_1")
        .unwrap()
        .unwrap();
    assert_eq!(license.billing_customer_id, "cus_A");
    assert_eq!(license.plan, Plan::Annual);
    assert_eq!(license.status, LicenseStatus::Active);
    assert!(license.license_key.starts_with("AXCTL-PRO-cus_A-"));
    assert!(license.expires_at.is_some());
}

#[tokio::test]
async fn one_time_payment_issues_lifetime_license() {
    let (state, _dir) = create_test_app_state();
    let app = public_app(state.clone());

    let response = app
        .oneshot(signed_webhook_request(&json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "customer": "cus_A",
                    "subscription": null,
                    "mode": "payment",
                    "metadata": {},
                }
            }
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let license: (String, Option<i64>) = conn
        .query_row(
            "SELECT plan, expires_at FROM licenses WHERE billing_customer_id = 'cus_A'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(license.0, "lifetime");
    assert_eq!(license.1, None);
}

#[tokio::test]
async fn failed_application_does_not_consume_event_id() {
    let (state, _dir) = create_test_app_state();

    // Validly signed, but the checkout object is malformed (missing the
    // required customer field): application fails, nothing is issued
    let broken = json!({
        "id": "evt_retry",
        "type": "checkout.session.completed",
        "data": { "object": { "mode": "subscription" } }
    });
    let response = public_app(state.clone())
        .oneshot(signed_webhook_request(&broken))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(count_licenses(&state), 0);

    // The provider retries the same event id with a well-formed payload;
    // it must apply, not be dropped as a replay
    let retry = checkout_completed_event("evt_retry", "cus_A", Some("sub_1"));
    let response = public_app(state.clone())
        .oneshot(signed_webhook_request(&retry))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(count_licenses(&state), 1);

    // And once applied, the event id is spent
    let response = public_app(state.clone())
        .oneshot(signed_webhook_request(&retry))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(count_licenses(&state), 1);
}

#[tokio::test]
async fn duplicate_event_delivery_issues_one_license() {
    let (state, _dir) = create_test_app_state();

    let event = checkout_completed_event("evt_dup", "cus_A", Some("sub_1"));
    for _ in 0..2 {
        let response = public_app(state.clone())
            .oneshot(signed_webhook_request(&event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(count_licenses(&state), 1);
}

#[tokio::test]
async fn subscription_deleted_cancels_license() {
    let (state, _dir) = create_test_app_state();

    public_app(state.clone())
        .oneshot(signed_webhook_request(&checkout_completed_event(
            "evt_1",
            "cus_A",
            Some("sub_1"),
        )))
        .await
        .unwrap();

    let response = public_app(state.clone())
        .oneshot(signed_webhook_request(&json!({
            "id": "evt_2",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_1" } }
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_subscription(&conn, "sub_1")
        .unwrap()
        .unwrap();
    assert_eq!(license.status, LicenseStatus::Canceled);
}

#[tokio::test]
async fn invoice_payment_failed_marks_license() {
    let (state, _dir) = create_test_app_state();

    public_app(state.clone())
        .oneshot(signed_webhook_request(&checkout_completed_event(
            "evt_1",
            "cus_A",
            Some("sub_1"),
        )))
        .await
        .unwrap();

    let conn = state.db.get().unwrap();
    let before = queries::get_license_by_subscription(&conn, "sub_1")
        .unwrap()
        .unwrap();

    let response = public_app(state.clone())
        .oneshot(signed_webhook_request(&json!({
            "id": "evt_2",
            "type": "invoice.payment_failed",
            "data": { "object": { "subscription": "sub_1" } }
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let after = queries::get_license_by_subscription(&conn, "sub_1")
        .unwrap()
        .unwrap();
    assert_eq!(after.status, LicenseStatus::PaymentFailed);
    // Payment failure never touches expiry; the grace period covers it
    assert_eq!(after.expires_at, before.expires_at);
}

#[tokio::test]
async fn invoice_paid_renewal_extends_license() {
    let (state, _dir) = create_test_app_state();

    public_app(state.clone())
        .oneshot(signed_webhook_request(&checkout_completed_event(
            "evt_1",
            "cus_A",
            Some("sub_1"),
        )))
        .await
        .unwrap();

    let response = public_app(state.clone())
        .oneshot(signed_webhook_request(&json!({
            "id": "evt_2",
            "type": "invoice.paid",
            "data": { "object": { "subscription": "sub_1", "billing_reason": "subscription_cycle" } }
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_subscription(&conn, "sub_1")
        .unwrap()
        .unwrap();
    assert_eq!(license.status, LicenseStatus::Active);
    let expires = license.expires_at.unwrap();
    // Renewed for a fresh annual period from (approximately) now
    let expected = Utc::now().timestamp() + 365 * DAY;
    assert!((expires - expected).abs() < 60);
}

#[tokio::test]
async fn initial_invoice_does_not_double_extend() {
    let (state, _dir) = create_test_app_state();

    public_app(state.clone())
        .oneshot(signed_webhook_request(&checkout_completed_event(
            "evt_1",
            "cus_A",
            Some("sub_1"),
        )))
        .await
        .unwrap();

    let conn = state.db.get().unwrap();
    let before = queries::get_license_by_subscription(&conn, "sub_1")
        .unwrap()
        .unwrap();

    // The invoice generated at subscription creation is skipped; only
    // renewal invoices extend
    let response = public_app(state.clone())
        .oneshot(signed_webhook_request(&json!({
            "id": "evt_2",
            "type": "invoice.paid",
            "data": { "object": { "subscription": "sub_1", "billing_reason": "subscription_create" } }
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let after = queries::get_license_by_subscription(&conn, "sub_1")
        .unwrap()
        .unwrap();
    assert_eq!(after.expires_at, before.expires_at);
}

#[tokio::test]
async fn unknown_event_type_is_acknowledged() {
    let (state, _dir) = create_test_app_state();

    let response = public_app(state.clone())
        .oneshot(signed_webhook_request(&json!({
            "id": "evt_1",
            "type": "customer.updated",
            "data": { "object": {} }
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(count_licenses(&state), 0);
}
