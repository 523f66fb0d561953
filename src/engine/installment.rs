//! Installment schedule and the per-package payment state machine.

use crate::domain::{
    Decimal, Installment, InstallmentStatus, Package, PackageId, PackageStatus, TimeMs,
};
use chrono::{DateTime, Months, TimeDelta, Utc};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstallmentError {
    #[error("package {0} is already completed")]
    PackageCompleted(PackageId),
    #[error("package {0} has no pending installment")]
    NothingPending(PackageId),
    #[error("payment of {paid} does not match installment amount {due}")]
    AmountMismatch { due: Decimal, paid: Decimal },
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

fn to_datetime(t: TimeMs) -> Result<DateTime<Utc>, InstallmentError> {
    DateTime::<Utc>::from_timestamp_millis(t.as_ms())
        .ok_or(InstallmentError::InvalidTimestamp(t.as_ms()))
}

/// Pre-create the full schedule; installment `k` is due `k - 1` months after purchase.
pub fn build_schedule(
    package_id: &PackageId,
    monthly_amount: Decimal,
    count: u32,
    purchased_at: TimeMs,
) -> Result<Vec<Installment>, InstallmentError> {
    let start = to_datetime(purchased_at)?;
    (1..=count)
        .map(|seq| {
            let due = start
                .checked_add_months(Months::new(seq - 1))
                .ok_or(InstallmentError::InvalidTimestamp(purchased_at.as_ms()))?;
            Ok(Installment {
                package_id: package_id.clone(),
                seq,
                amount: monthly_amount,
                due_at: TimeMs::new(due.timestamp_millis()),
                paid_at: None,
                status: InstallmentStatus::Pending,
                event_key: None,
            })
        })
        .collect()
}

/// Effect of recording one payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDecision {
    pub seq: u32,
    pub status: InstallmentStatus,
    pub paid_months: u32,
    pub package_status: PackageStatus,
    pub has_late: bool,
    /// First paid installment: the package activation event.
    pub activates: bool,
    /// All installments paid and none ever late.
    pub bonus_due: bool,
}

/// Apply a payment against the earliest pending installment.
pub fn apply_payment(
    package: &Package,
    next_pending: Option<&Installment>,
    amount: Decimal,
    paid_at: TimeMs,
    late_grace_days: i64,
) -> Result<PaymentDecision, InstallmentError> {
    if package.is_completed() {
        return Err(InstallmentError::PackageCompleted(package.id.clone()));
    }
    let installment =
        next_pending.ok_or_else(|| InstallmentError::NothingPending(package.id.clone()))?;
    if amount != installment.amount {
        return Err(InstallmentError::AmountMismatch {
            due: installment.amount,
            paid: amount,
        });
    }

    let deadline = TimeDelta::try_days(late_grace_days)
        .and_then(|grace| to_datetime(installment.due_at).ok()?.checked_add_signed(grace))
        .ok_or(InstallmentError::InvalidTimestamp(installment.due_at.as_ms()))?;
    let status = if to_datetime(paid_at)? > deadline {
        InstallmentStatus::Late
    } else {
        InstallmentStatus::Paid
    };

    let paid_months = package.paid_months + 1;
    let has_late = package.has_late || status == InstallmentStatus::Late;
    let package_status = if paid_months >= package.total_months {
        PackageStatus::Completed
    } else {
        PackageStatus::PartiallyPaid
    };

    Ok(PaymentDecision {
        seq: installment.seq,
        status,
        paid_months,
        package_status,
        has_late,
        activates: package.paid_months == 0,
        bonus_due: package_status == PackageStatus::Completed
            && !has_late
            && !package.bonus_earned,
    })
}
