use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Plan {
    Monthly,
    Annual,
    Lifetime,
}

impl Plan {
    /// Nominal license duration. None = perpetual (lifetime only).
    pub fn duration_days(self) -> Option<i64> {
        match self {
            Plan::Monthly => Some(30),
            Plan::Annual => Some(365),
            Plan::Lifetime => None,
        }
    }

    pub fn is_recurring(self) -> bool {
        match self {
            Plan::Monthly | Plan::Annual => true,
            Plan::Lifetime => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LicenseStatus {
    Active,
    PaymentFailed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    /// External-facing identifier. Unique, immutable once issued, never reused.
    pub license_key: String,
    pub billing_customer_id: String,
    /// Present for recurring plans, absent for lifetime purchases
    pub billing_subscription_id: Option<String>,
    pub plan: Plan,
    pub status: LicenseStatus,
    pub created_at: i64,
    /// None = perpetual; None iff plan == lifetime
    pub expires_at: Option<i64>,
    pub last_validated_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineActivation {
    pub id: String,
    pub license_id: String,
    /// Client-supplied stable hardware identifier
    pub machine_id: String,
    pub activated_at: i64,
    pub last_seen_at: i64,
}
