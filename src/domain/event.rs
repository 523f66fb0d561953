//! Triggering events and their idempotency keys.

use crate::domain::{Decimal, PackageId, TimeMs};
use serde::{Deserialize, Serialize};

/// An "installment paid" event as delivered by payment capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPaid {
    /// Stable unique identifier for this event.
    ///
    /// Priority: `payment_ref` (if present) > hash of deterministic fields.
    pub event_key: String,
    pub package_id: PackageId,
    pub amount: Decimal,
    pub paid_at: TimeMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_ref: Option<String>,
}

impl InstallmentPaid {
    pub fn new(
        package_id: PackageId,
        amount: Decimal,
        paid_at: TimeMs,
        payment_ref: Option<String>,
    ) -> Self {
        let payment_ref = normalize_ref(payment_ref);
        let event_key =
            Self::compute_event_key(&package_id, paid_at, &amount, payment_ref.as_deref());
        Self {
            event_key,
            package_id,
            amount,
            paid_at,
            payment_ref,
        }
    }

    /// Compute a stable unique key for this event.
    ///
    /// When no payment reference is supplied, the key is a SHA-256 over the
    /// length-prefixed package id, paid time and canonical amount, truncated to
    /// 128 bits. A replay of the same capture produces the same key.
    pub fn compute_event_key(
        package_id: &PackageId,
        paid_at: TimeMs,
        amount: &Decimal,
        payment_ref: Option<&str>,
    ) -> String {
        if let Some(r) = payment_ref.filter(|s| !s.trim().is_empty()) {
            return format!("pay:{}", r.trim().to_lowercase());
        }
        hashed_key(
            "pay",
            &[
                package_id.as_str(),
                &paid_at.as_ms().to_string(),
                &amount.to_canonical_string(),
            ],
        )
    }
}

/// Key for an auto-pool distribution run.
pub fn distribution_event_key(distribution_key: &str) -> String {
    format!("dist:{}", distribution_key.trim().to_lowercase())
}

fn normalize_ref(payment_ref: Option<String>) -> Option<String> {
    payment_ref
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
}

pub(crate) fn hashed_key(prefix: &str, parts: &[&str]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u32).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let hash = hasher.finalize();
    format!("{}:hash:{}", prefix, hex::encode(&hash[..16]))
}
