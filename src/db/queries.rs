use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{License, LicenseStatus, MachineActivation, Plan};

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

const LICENSE_COLS: &str = "id, license_key, billing_customer_id, billing_subscription_id, \
                            plan, status, created_at, expires_at, last_validated_at";

const MACHINE_COLS: &str = "id, license_id, machine_id, activated_at, last_seen_at";

fn license_from_row(row: &Row) -> rusqlite::Result<License> {
    Ok(License {
        id: row.get(0)?,
        license_key: row.get(1)?,
        billing_customer_id: row.get(2)?,
        billing_subscription_id: row.get(3)?,
        plan: row
            .get::<_, String>(4)?
            .parse()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        status: row
            .get::<_, String>(5)?
            .parse()
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
        last_validated_at: row.get(8)?,
    })
}

fn machine_from_row(row: &Row) -> rusqlite::Result<MachineActivation> {
    Ok(MachineActivation {
        id: row.get(0)?,
        license_id: row.get(1)?,
        machine_id: row.get(2)?,
        activated_at: row.get(3)?,
        last_seen_at: row.get(4)?,
    })
}

// ============ Licenses ============

/// Insert a new license. Fails with a UNIQUE violation on key collision;
/// the engine retries with a fresh key rather than overwriting.
pub fn create_license(
    conn: &Connection,
    license_key: &str,
    billing_customer_id: &str,
    billing_subscription_id: Option<&str>,
    plan: Plan,
    expires_at: Option<i64>,
    now: i64,
) -> Result<License> {
    let id = gen_id();

    conn.execute(
        "INSERT INTO licenses (id, license_key, billing_customer_id, billing_subscription_id, plan, status, created_at, expires_at, last_validated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
        params![
            &id,
            license_key,
            billing_customer_id,
            billing_subscription_id,
            plan.as_ref(),
            LicenseStatus::Active.as_ref(),
            now,
            expires_at
        ],
    )?;

    Ok(License {
        id,
        license_key: license_key.to_string(),
        billing_customer_id: billing_customer_id.to_string(),
        billing_subscription_id: billing_subscription_id.map(String::from),
        plan,
        status: LicenseStatus::Active,
        created_at: now,
        expires_at,
        last_validated_at: None,
    })
}

pub fn get_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<License>> {
    conn.query_row(
        &format!("SELECT {} FROM licenses WHERE license_key = ?1", LICENSE_COLS),
        params![license_key],
        license_from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Find a license by billing subscription id (for renewals and cancellations).
pub fn get_license_by_subscription(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Option<License>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM licenses WHERE billing_subscription_id = ?1",
            LICENSE_COLS
        ),
        params![subscription_id],
        license_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn set_license_status(conn: &Connection, id: &str, status: LicenseStatus) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET status = ?1 WHERE id = ?2",
        params![status.as_ref(), id],
    )?;
    Ok(affected > 0)
}

/// Set status and reset expiry in one statement (subscription renewal).
pub fn renew_license(
    conn: &Connection,
    id: &str,
    new_expires_at: Option<i64>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET status = ?1, expires_at = ?2 WHERE id = ?3",
        params![LicenseStatus::Active.as_ref(), new_expires_at, id],
    )?;
    Ok(affected > 0)
}

/// Best-effort bookkeeping; callers ignore failures by design.
pub fn touch_last_validated(conn: &Connection, id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE licenses SET last_validated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

// ============ Machine activations ============

/// Result of attempting to claim a machine slot on a license.
pub enum MachineAdmission {
    /// Machine was already activated on this license; `last_seen_at` refreshed
    Existing(MachineActivation),
    /// New activation created within the cap
    Created(MachineActivation),
    /// Cap reached; no row written
    LimitReached { current: i64, max: i64 },
}

/// Atomically admit a machine to a license, enforcing the per-plan cap.
///
/// Runs inside an IMMEDIATE transaction so the count-then-insert pair is
/// serialized per database writer: two concurrent requests racing for the
/// last slot cannot both observe a free slot. The UNIQUE(license_id,
/// machine_id) constraint backstops the idempotence check.
pub fn admit_machine_atomic(
    conn: &mut Connection,
    license_id: &str,
    machine_id: &str,
    machine_limit: i64,
    now: i64,
) -> Result<MachineAdmission> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    // Idempotent path first: an already-registered machine never fails and
    // never counts twice against the cap
    let existing: Option<MachineActivation> = tx
        .query_row(
            &format!(
                "SELECT {} FROM machines WHERE license_id = ?1 AND machine_id = ?2",
                MACHINE_COLS
            ),
            params![license_id, machine_id],
            machine_from_row,
        )
        .optional()?;

    if let Some(machine) = existing {
        tx.execute(
            "UPDATE machines SET last_seen_at = ?1 WHERE id = ?2",
            params![now, machine.id],
        )?;
        tx.commit()?;
        return Ok(MachineAdmission::Existing(MachineActivation {
            last_seen_at: now,
            ..machine
        }));
    }

    let current: i64 = tx.query_row(
        "SELECT COUNT(*) FROM machines WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )?;

    if current >= machine_limit {
        // Dropping the transaction rolls back; nothing was written
        return Ok(MachineAdmission::LimitReached {
            current,
            max: machine_limit,
        });
    }

    let id = gen_id();
    tx.execute(
        "INSERT INTO machines (id, license_id, machine_id, activated_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, license_id, machine_id, now, now],
    )?;

    tx.commit()?;

    Ok(MachineAdmission::Created(MachineActivation {
        id,
        license_id: license_id.to_string(),
        machine_id: machine_id.to_string(),
        activated_at: now,
        last_seen_at: now,
    }))
}

pub fn get_machine_for_license(
    conn: &Connection,
    license_id: &str,
    machine_id: &str,
) -> Result<Option<MachineActivation>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM machines WHERE license_id = ?1 AND machine_id = ?2",
            MACHINE_COLS
        ),
        params![license_id, machine_id],
        machine_from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn count_machines_for_license(conn: &Connection, license_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM machines WHERE license_id = ?1",
        params![license_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Best-effort bookkeeping; callers ignore failures by design.
pub fn touch_machine_last_seen(conn: &Connection, id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE machines SET last_seen_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

// ============ Webhook event deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
/// Returns false if the event was already processed (billing systems retry
/// on timeout; a replay must be a no-op).
///
/// Uses INSERT OR IGNORE for atomicity - if the event_id already exists the
/// insert is silently skipped and we return false.
pub fn try_record_webhook_event(
    conn: &Connection,
    event_id: &str,
    event_type: &str,
    now: i64,
) -> Result<bool> {
    let id = gen_id();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, event_id, event_type, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, event_id, event_type, now],
    )?;
    Ok(affected > 0)
}
