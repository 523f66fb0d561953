//! Binary matching with carry-forward.

use crate::domain::{Decimal, MemberId, Side};
use serde::{Deserialize, Serialize};

/// Unmatched volume per leg carried into the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CarryForward {
    pub left: Decimal,
    pub right: Decimal,
}

impl CarryForward {
    pub fn new(left: Decimal, right: Decimal) -> Self {
        Self { left, right }
    }
}

/// Full recursive subtree sizes per leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeamCounts {
    pub left: u64,
    pub right: u64,
}

impl TeamCounts {
    pub fn new(left: u64, right: u64) -> Self {
        Self { left, right }
    }

    /// Matching needs a 2:1 or 1:2 team shape before anything is paid.
    pub fn ratio_satisfied(&self) -> bool {
        (self.left >= 2 && self.right >= 1) || (self.left >= 1 && self.right >= 2)
    }
}

/// One recomputation of a member's binary position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCycle {
    pub member: MemberId,
    pub incoming_side: Side,
    pub incoming_volume: Decimal,
    pub counts: TeamCounts,
    pub left_volume: Decimal,
    pub right_volume: Decimal,
    pub matched: Decimal,
    pub payout: Decimal,
    pub carry_after: CarryForward,
}

impl MatchCycle {
    pub fn is_match(&self) -> bool {
        self.matched.is_positive()
    }
}

/// Fold new volume into a member's legs and match if the team shape allows.
///
/// The lighter leg is consumed entirely; the heavier leg keeps `volume - matched`.
/// When the ratio gate fails, both legs roll forward untouched.
pub fn run_cycle(
    member: MemberId,
    carry: CarryForward,
    counts: TeamCounts,
    incoming_side: Side,
    incoming_volume: Decimal,
    binary_rate: Decimal,
) -> MatchCycle {
    let (left_volume, right_volume) = match incoming_side {
        Side::Left => (carry.left + incoming_volume, carry.right),
        Side::Right => (carry.left, carry.right + incoming_volume),
    };

    let matched = if counts.ratio_satisfied() {
        left_volume.min(right_volume)
    } else {
        Decimal::zero()
    };

    let (payout, carry_after) = if matched.is_positive() {
        (
            (matched * binary_rate).to_money(),
            CarryForward::new(left_volume - matched, right_volume - matched),
        )
    } else {
        (Decimal::zero(), CarryForward::new(left_volume, right_volume))
    };

    MatchCycle {
        member,
        incoming_side,
        incoming_volume,
        counts,
        left_volume,
        right_volume,
        matched,
        payout,
        carry_after,
    }
}
