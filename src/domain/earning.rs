//! Ledger entry types.

use crate::domain::{Decimal, MemberId, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Reward mechanism that produced an earning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningType {
    Direct,
    Binary,
    Level,
    Autopool,
    InstallmentBonus,
}

impl EarningType {
    pub const ALL: [EarningType; 5] = [
        EarningType::Direct,
        EarningType::Binary,
        EarningType::Level,
        EarningType::Autopool,
        EarningType::InstallmentBonus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EarningType::Direct => "direct",
            EarningType::Binary => "binary",
            EarningType::Level => "level",
            EarningType::Autopool => "autopool",
            EarningType::InstallmentBonus => "installment_bonus",
        }
    }

    /// Commission income (funds the auto pool). Bonuses and pool payouts are not.
    pub fn is_commission(&self) -> bool {
        matches!(
            self,
            EarningType::Direct | EarningType::Binary | EarningType::Level
        )
    }
}

impl FromStr for EarningType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EarningType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown earning type {}", s))
    }
}

impl std::fmt::Display for EarningType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An earning computed but not yet written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    pub beneficiary: MemberId,
    pub earning_type: EarningType,
    pub amount: Decimal,
    /// Member whose activity generated the credit.
    pub related_member: Option<MemberId>,
    pub description: String,
    /// Uniqueness scope within the ledger: one credit per (beneficiary, type, trigger_key).
    pub trigger_key: String,
}

/// A stored ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Earning {
    pub id: i64,
    pub beneficiary: MemberId,
    pub earning_type: EarningType,
    pub amount: Decimal,
    pub related_member: Option<MemberId>,
    pub description: String,
    pub trigger_key: String,
    pub event_key: String,
    pub plan_version: String,
    pub created_at: TimeMs,
}
