//! Entitlement engine: the license state machine and admission control.
//!
//! All license mutation flows through the four operations here - `issue`,
//! `activate`, `validate`, and `apply_billing_event` - so the capacity and
//! uniqueness invariants are enforced in exactly one place. Expected business
//! outcomes (not found, expired, over capacity) are outcome variants, not
//! errors; only infrastructure failures propagate as `AppError`.

use rusqlite::Connection;

use crate::config::Config;
use crate::db::queries::{self, MachineAdmission};
use crate::error::Result;
use crate::keygen::generate_license_key;
use crate::models::{License, LicenseStatus, Plan};

const SECONDS_PER_DAY: i64 = 86400;

/// Key collision retries before giving up. With 32 bits of suffix entropy a
/// single retry is already overkill.
const MAX_KEY_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub enum ActivationOutcome {
    Activated {
        license: License,
        /// True when this machine was already registered (idempotent repeat)
        already_activated: bool,
        current_machines: i64,
        max_machines: i64,
    },
    NotFound,
    /// status != active. Carries the observed status so the caller can
    /// distinguish canceled from payment_failed.
    Inactive { status: LicenseStatus },
    Expired,
    LimitReached { current: i64, max: i64 },
}

#[derive(Debug)]
pub enum ValidationOutcome {
    Valid { license: License },
    Invalid { reason: ValidationFailure },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    NotFound,
    Inactive,
    MachineNotRegistered,
    Expired,
}

impl ValidationFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationFailure::NotFound => "not_found",
            ValidationFailure::Inactive => "inactive",
            ValidationFailure::MachineNotRegistered => "machine_not_registered",
            ValidationFailure::Expired => "expired",
        }
    }
}

fn expires_at_for(plan: Plan, now: i64) -> Option<i64> {
    plan.duration_days().map(|days| now + days * SECONDS_PER_DAY)
}

/// Issue a new license for a verified purchase.
///
/// A customer may hold multiple licenses; the only insert failure mode is a
/// license key collision, which is retried with a fresh key.
pub fn issue(
    conn: &Connection,
    config: &Config,
    customer_id: &str,
    subscription_id: Option<&str>,
    plan: Plan,
    now: i64,
) -> Result<License> {
    let expires_at = expires_at_for(plan, now);

    for _ in 0..MAX_KEY_ATTEMPTS {
        let key = generate_license_key(&config.license_key_prefix, customer_id);
        match queries::create_license(
            conn,
            &key,
            customer_id,
            subscription_id,
            plan,
            expires_at,
            now,
        ) {
            Ok(license) => return Ok(license),
            Err(e) if e.is_unique_violation() => {
                tracing::warn!("license key collision, regenerating: {}", key);
            }
            Err(e) => return Err(e),
        }
    }
    Err(crate::error::AppError::Internal(
        "license key generation exhausted retries".into(),
    ))
}

/// Activate a machine against a license, claiming one of its slots.
///
/// Activation is the stricter gate: no grace period applies here, and a
/// `payment_failed` license cannot register NEW machines (already-registered
/// machines still re-activate idempotently, since that claims no new slot).
pub fn activate(
    conn: &mut Connection,
    config: &Config,
    license_key: &str,
    machine_id: &str,
    now: i64,
) -> Result<ActivationOutcome> {
    let Some(license) = queries::get_license_by_key(conn, license_key)? else {
        return Ok(ActivationOutcome::NotFound);
    };

    match license.status {
        LicenseStatus::Active => {}
        LicenseStatus::Canceled => {
            return Ok(ActivationOutcome::Inactive {
                status: license.status,
            });
        }
        LicenseStatus::PaymentFailed => {
            // Existing machines keep working through a billing hiccup; only
            // new slot claims are blocked until payment recovers
            if queries::get_machine_for_license(conn, &license.id, machine_id)?.is_none() {
                return Ok(ActivationOutcome::Inactive {
                    status: license.status,
                });
            }
        }
    }

    if let Some(expires_at) = license.expires_at
        && now > expires_at
    {
        return Ok(ActivationOutcome::Expired);
    }

    let max_machines = config.machine_limit(license.plan);
    match queries::admit_machine_atomic(conn, &license.id, machine_id, max_machines, now)? {
        MachineAdmission::Existing(_) => {
            let current = queries::count_machines_for_license(conn, &license.id)?;
            Ok(ActivationOutcome::Activated {
                license,
                already_activated: true,
                current_machines: current,
                max_machines,
            })
        }
        MachineAdmission::Created(_) => {
            let current = queries::count_machines_for_license(conn, &license.id)?;
            Ok(ActivationOutcome::Activated {
                license,
                already_activated: false,
                current_machines: current,
                max_machines,
            })
        }
        MachineAdmission::LimitReached { current, max } => {
            Ok(ActivationOutcome::LimitReached { current, max })
        }
    }
}

/// Validate a license for an already-activated machine.
///
/// Expiry is evaluated dynamically against wall-clock time with an offline
/// grace period: clients that cannot reach the network to pick up a renewal
/// stay valid until `expires_at + grace`. Validate never mutates `status` -
/// the billing system is the source of truth for cancellation, and the clock
/// is the source of truth for expiry. A `payment_failed` license validates
/// normally until it ages out past the grace window.
pub fn validate(
    conn: &Connection,
    config: &Config,
    license_key: &str,
    machine_id: &str,
    now: i64,
) -> Result<ValidationOutcome> {
    let Some(license) = queries::get_license_by_key(conn, license_key)? else {
        return Ok(ValidationOutcome::Invalid {
            reason: ValidationFailure::NotFound,
        });
    };

    if license.status == LicenseStatus::Canceled {
        return Ok(ValidationOutcome::Invalid {
            reason: ValidationFailure::Inactive,
        });
    }

    let Some(machine) = queries::get_machine_for_license(conn, &license.id, machine_id)? else {
        return Ok(ValidationOutcome::Invalid {
            reason: ValidationFailure::MachineNotRegistered,
        });
    };

    if let Some(expires_at) = license.expires_at {
        let deadline = expires_at + config.grace_period_days * SECONDS_PER_DAY;
        // Boundary inclusive: valid at exactly expires_at + grace
        if now > deadline {
            return Ok(ValidationOutcome::Invalid {
                reason: ValidationFailure::Expired,
            });
        }
    }

    // Best-effort bookkeeping; a failed update must not fail the validation
    if let Err(e) = queries::touch_last_validated(conn, &license.id, now) {
        tracing::warn!("failed to update last_validated_at: {}", e);
    }
    if let Err(e) = queries::touch_machine_last_seen(conn, &machine.id, now) {
        tracing::warn!("failed to update machine last_seen_at: {}", e);
    }

    Ok(ValidationOutcome::Valid { license })
}

/// A verified billing event, already mapped from the provider's wire format.
#[derive(Debug)]
pub enum BillingEvent {
    PurchaseCompleted {
        customer_id: String,
        subscription_id: Option<String>,
        plan: Plan,
    },
    SubscriptionCanceled { subscription_id: String },
    InvoicePaid { subscription_id: String },
    InvoicePaymentFailed { subscription_id: String },
}

#[derive(Debug)]
pub enum BillingOutcome {
    Issued(License),
    Updated,
    /// No license matched the subscription id, or the license is canceled
    /// (terminal - no event transitions out of it)
    Ignored,
}

/// Apply a verified billing event to the store.
///
/// Signature verification and replay deduplication happen before this is
/// called; this is the pure event -> store mutation mapping.
pub fn apply_billing_event(
    conn: &Connection,
    config: &Config,
    event: BillingEvent,
    now: i64,
) -> Result<BillingOutcome> {
    match event {
        BillingEvent::PurchaseCompleted {
            customer_id,
            subscription_id,
            plan,
        } => {
            let license = issue(
                conn,
                config,
                &customer_id,
                subscription_id.as_deref(),
                plan,
                now,
            )?;
            Ok(BillingOutcome::Issued(license))
        }
        BillingEvent::SubscriptionCanceled { subscription_id } => {
            let Some(license) = queries::get_license_by_subscription(conn, &subscription_id)?
            else {
                return Ok(BillingOutcome::Ignored);
            };
            queries::set_license_status(conn, &license.id, LicenseStatus::Canceled)?;
            Ok(BillingOutcome::Updated)
        }
        BillingEvent::InvoicePaid { subscription_id } => {
            let Some(license) = queries::get_license_by_subscription(conn, &subscription_id)?
            else {
                return Ok(BillingOutcome::Ignored);
            };
            if license.status == LicenseStatus::Canceled {
                return Ok(BillingOutcome::Ignored);
            }
            // Renewal resets the clock from now, not from the old expiry
            queries::renew_license(conn, &license.id, expires_at_for(license.plan, now))?;
            Ok(BillingOutcome::Updated)
        }
        BillingEvent::InvoicePaymentFailed { subscription_id } => {
            let Some(license) = queries::get_license_by_subscription(conn, &subscription_id)?
            else {
                return Ok(BillingOutcome::Ignored);
            };
            if license.status == LicenseStatus::Canceled {
                return Ok(BillingOutcome::Ignored);
            }
            // expires_at is untouched; the grace period covers the hiccup
            queries::set_license_status(conn, &license.id, LicenseStatus::PaymentFailed)?;
            Ok(BillingOutcome::Updated)
        }
    }
}
