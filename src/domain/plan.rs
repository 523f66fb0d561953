//! Versioned compensation plan: every rate, weight and threshold the engine applies.

use crate::domain::{Decimal, PackageTier};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard ceiling on level-income depth.
pub const LEVEL_CEILING: u32 = 20;

/// Longest grace period a plan may allow after an installment's due date.
pub const MAX_LATE_GRACE_DAYS: i64 = 365;

/// How a sponsor's third and later direct referrals are placed in the binary tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpilloverPolicy {
    /// Referral k alternates legs (even → left, odd → right) and takes the first
    /// vacancy down the outermost edge of that leg.
    OuterLeg,
    /// Refuse placement beyond two direct referrals.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationPlan {
    pub version: String,
    pub direct_rate: Decimal,
    pub binary_rate: Decimal,
    /// Share of each binary payout spread over the earner's upline.
    pub level_pool_rate: Decimal,
    /// Fraction of the level pool per depth, index 0 = depth 1.
    pub level_weights: Vec<Decimal>,
    pub max_levels: u32,
    pub levels_per_referral: u32,
    pub autopool_funding_rate: Decimal,
    pub autopool_threshold: Decimal,
    /// Relative weight of a pool position by pool level, index 0 = level 1.
    /// Deeper levels reuse the last weight.
    pub autopool_level_weights: Vec<Decimal>,
    pub company_charge_rate: Decimal,
    pub installment_count: u32,
    pub late_grace_days: i64,
    pub tiers: Vec<PackageTier>,
    pub spillover: SpilloverPolicy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("{0} must be within [0, 1]")]
    RateOutOfRange(&'static str),
    #[error("level weights must have exactly {expected} entries, got {actual}")]
    LevelWeightCount { expected: usize, actual: usize },
    #[error("level weights sum to {0}, which exceeds 1")]
    LevelWeightSum(String),
    #[error("max levels must be between 1 and {LEVEL_CEILING}")]
    MaxLevels,
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("auto-pool level weights must be non-negative with at least one positive entry")]
    AutopoolWeights,
    #[error("package tiers must be non-empty with unique names")]
    Tiers,
    #[error("late grace days must be between 0 and {MAX_LATE_GRACE_DAYS}")]
    LateGraceDays,
}

impl CompensationPlan {
    /// The reference deployment's plan.
    pub fn reference() -> Self {
        let w = |s: &str| Decimal::from_str_canonical(s).unwrap_or_default();
        let mut level_weights = vec![w("0.20"), w("0.10"), w("0.08"), w("0.06"), w("0.05")];
        level_weights.extend(std::iter::repeat(w("0.04")).take(5));
        level_weights.extend(std::iter::repeat(w("0.031")).take(10));

        CompensationPlan {
            version: "v1".to_string(),
            direct_rate: w("0.05"),
            binary_rate: w("0.05"),
            level_pool_rate: w("0.62"),
            level_weights,
            max_levels: LEVEL_CEILING,
            levels_per_referral: 2,
            autopool_funding_rate: w("0.025"),
            autopool_threshold: w("10000"),
            autopool_level_weights: vec![w("3"), w("2"), w("1")],
            company_charge_rate: w("0.10"),
            installment_count: 11,
            late_grace_days: 0,
            tiers: vec![
                PackageTier { name: "bronze".to_string(), monthly_amount: w("1000") },
                PackageTier { name: "silver".to_string(), monthly_amount: w("2000") },
                PackageTier { name: "gold".to_string(), monthly_amount: w("3000") },
                PackageTier { name: "platinum".to_string(), monthly_amount: w("5000") },
            ],
            spillover: SpilloverPolicy::OuterLeg,
        }
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        let unit = |d: &Decimal| !d.is_negative() && *d <= Decimal::one();
        for (name, rate) in [
            ("direct_rate", &self.direct_rate),
            ("binary_rate", &self.binary_rate),
            ("level_pool_rate", &self.level_pool_rate),
            ("autopool_funding_rate", &self.autopool_funding_rate),
            ("company_charge_rate", &self.company_charge_rate),
        ] {
            if !unit(rate) {
                return Err(PlanError::RateOutOfRange(name));
            }
        }

        if self.max_levels == 0 || self.max_levels > LEVEL_CEILING {
            return Err(PlanError::MaxLevels);
        }
        if self.level_weights.len() != self.max_levels as usize {
            return Err(PlanError::LevelWeightCount {
                expected: self.max_levels as usize,
                actual: self.level_weights.len(),
            });
        }
        if self.level_weights.iter().any(|w| w.is_negative()) {
            return Err(PlanError::RateOutOfRange("level_weights"));
        }
        let weight_sum: Decimal = self.level_weights.iter().sum();
        if weight_sum > Decimal::one() {
            return Err(PlanError::LevelWeightSum(weight_sum.to_canonical_string()));
        }

        if self.levels_per_referral == 0 {
            return Err(PlanError::NotPositive("levels_per_referral"));
        }
        if self.installment_count == 0 {
            return Err(PlanError::NotPositive("installment_count"));
        }
        if !self.autopool_threshold.is_positive() {
            return Err(PlanError::NotPositive("autopool_threshold"));
        }
        if !(0..=MAX_LATE_GRACE_DAYS).contains(&self.late_grace_days) {
            return Err(PlanError::LateGraceDays);
        }
        if self.autopool_level_weights.is_empty()
            || self.autopool_level_weights.iter().any(|w| w.is_negative())
            || !self.autopool_level_weights.iter().any(|w| w.is_positive())
        {
            return Err(PlanError::AutopoolWeights);
        }

        let mut names: Vec<&str> = self.tiers.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if self.tiers.is_empty()
            || names.len() != self.tiers.len()
            || self.tiers.iter().any(|t| !t.monthly_amount.is_positive())
        {
            return Err(PlanError::Tiers);
        }

        Ok(())
    }

    pub fn tier(&self, name: &str) -> Option<&PackageTier> {
        let name = name.trim();
        self.tiers
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Levels a member may draw level income from, given their direct referrals.
    pub fn unlocked_levels_for(&self, direct_referrals: u32) -> u32 {
        direct_referrals
            .saturating_mul(self.levels_per_referral)
            .min(self.max_levels)
    }

    /// Weight of one auto-pool position on the given 1-based pool level.
    pub fn autopool_weight(&self, level: u32) -> Decimal {
        let idx = (level.max(1) - 1) as usize;
        self.autopool_level_weights
            .get(idx)
            .or_else(|| self.autopool_level_weights.last())
            .copied()
            .unwrap_or_default()
    }

    /// Canonical JSON used to detect a changed plan published under an old version.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
