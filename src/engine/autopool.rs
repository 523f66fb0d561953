//! Auto-pool 1:3:9 matrix: position arithmetic and weighted fund split.
//!
//! Positions are numbered in breadth-first order from 0. Level `L` (1-based)
//! holds `3^(L-1)` positions and the parent of position `i > 0` is `(i - 1) / 3`.

use crate::domain::{CompensationPlan, Credit, Decimal, EarningType, MemberId};
use serde::{Deserialize, Serialize};

/// Occupied-or-next slot in the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSlot {
    pub position: u64,
    pub level: u32,
    pub parent_position: Option<u64>,
}

/// A member sitting in the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPosition {
    pub member: MemberId,
    pub position: u64,
    pub level: u32,
}

/// Outcome of splitting a fund amount across the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolSplit {
    pub credits: Vec<Credit>,
    pub distributed: Decimal,
    /// Left in the fund for the next cycle (truncation dust, or everything when empty).
    pub remainder: Decimal,
}

/// Number of positions on a 1-based level.
pub fn slots_on_level(level: u32) -> u64 {
    3u64.saturating_pow(level.saturating_sub(1))
}

/// First position index on a 1-based level.
fn first_position_of(level: u32) -> u64 {
    (3u64.saturating_pow(level.saturating_sub(1)) - 1) / 2
}

pub fn level_of(position: u64) -> u32 {
    let mut level = 1;
    while first_position_of(level + 1) <= position {
        level += 1;
    }
    level
}

pub fn parent_of(position: u64) -> Option<u64> {
    (position > 0).then(|| (position - 1) / 3)
}

/// Slot a new admission takes when `occupied` positions are filled.
pub fn next_slot(occupied: u64) -> PoolSlot {
    PoolSlot {
        position: occupied,
        level: level_of(occupied),
        parent_position: parent_of(occupied),
    }
}

/// Split `fund` across the occupied positions by per-level weight.
///
/// Each share is truncated to paise; the dust stays in the fund. With no
/// positions nothing is distributed.
pub fn split(
    plan: &CompensationPlan,
    trigger_key: &str,
    fund: Decimal,
    positions: &[PoolPosition],
) -> PoolSplit {
    let total_weight: Decimal = positions
        .iter()
        .map(|p| plan.autopool_weight(p.level))
        .sum();

    if positions.is_empty() || !fund.is_positive() || !total_weight.is_positive() {
        return PoolSplit {
            credits: Vec::new(),
            distributed: Decimal::zero(),
            remainder: fund,
        };
    }

    let mut credits = Vec::with_capacity(positions.len());
    let mut distributed = Decimal::zero();
    for p in positions {
        let weight = plan.autopool_weight(p.level);
        let amount = (fund * weight / total_weight).to_money();
        if !amount.is_positive() {
            continue;
        }
        distributed += amount;
        credits.push(Credit {
            beneficiary: p.member.clone(),
            earning_type: EarningType::Autopool,
            amount,
            related_member: None,
            description: format!(
                "Auto-pool share for position {} (level {})",
                p.position, p.level
            ),
            trigger_key: trigger_key.to_string(),
        });
    }

    PoolSplit {
        credits,
        distributed,
        remainder: fund - distributed,
    }
}
