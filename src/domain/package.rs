//! Packages and their installment schedules.

use crate::domain::{Decimal, MemberId, PackageId, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Package lifecycle: `scheduled → partially_paid → completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Scheduled,
    PartiallyPaid,
    Completed,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Scheduled => "scheduled",
            PackageStatus::PartiallyPaid => "partially_paid",
            PackageStatus::Completed => "completed",
        }
    }
}

impl FromStr for PackageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(PackageStatus::Scheduled),
            "partially_paid" => Ok(PackageStatus::PartiallyPaid),
            "completed" => Ok(PackageStatus::Completed),
            other => Err(format!("unknown package status {}", other)),
        }
    }
}

/// Per-installment status: `pending → paid | late`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Late,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Late => "late",
        }
    }
}

impl FromStr for InstallmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstallmentStatus::Pending),
            "paid" => Ok(InstallmentStatus::Paid),
            "late" => Ok(InstallmentStatus::Late),
            other => Err(format!("unknown installment status {}", other)),
        }
    }
}

/// A purchasable tier with its fixed monthly amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTier {
    pub name: String,
    pub monthly_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub member: MemberId,
    pub tier: String,
    pub monthly_amount: Decimal,
    pub total_months: u32,
    pub paid_months: u32,
    pub status: PackageStatus,
    /// Set once any installment is recorded late; disqualifies the completion bonus.
    pub has_late: bool,
    pub bonus_earned: bool,
    pub purchased_at: TimeMs,
    pub plan_version: String,
}

impl Package {
    pub fn is_completed(&self) -> bool {
        self.status == PackageStatus::Completed
    }

    /// Total business value of the package over its whole schedule.
    pub fn total_value(&self) -> Decimal {
        self.monthly_amount * Decimal::from_i64(i64::from(self.total_months))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub package_id: PackageId,
    /// 1-based position in the schedule.
    pub seq: u32,
    pub amount: Decimal,
    pub due_at: TimeMs,
    pub paid_at: Option<TimeMs>,
    pub status: InstallmentStatus,
    pub event_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        for s in [
            PackageStatus::Scheduled,
            PackageStatus::PartiallyPaid,
            PackageStatus::Completed,
        ] {
            assert_eq!(PackageStatus::from_str(s.as_str()).unwrap(), s);
        }
        for s in [
            InstallmentStatus::Pending,
            InstallmentStatus::Paid,
            InstallmentStatus::Late,
        ] {
            assert_eq!(InstallmentStatus::from_str(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn test_total_value() {
        let pkg = Package {
            id: PackageId::new("p1".to_string()),
            member: MemberId::new("m1".to_string()),
            tier: "gold".to_string(),
            monthly_amount: Decimal::from_i64(3000),
            total_months: 11,
            paid_months: 0,
            status: PackageStatus::Scheduled,
            has_late: false,
            bonus_earned: false,
            purchased_at: TimeMs::new(0),
            plan_version: "v1".to_string(),
        };
        assert_eq!(pkg.total_value(), Decimal::from_i64(33000));
        assert!(!pkg.is_completed());
    }
}
