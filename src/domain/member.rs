//! Members, their binary-tree placement and their derived summary.

use crate::domain::{Decimal, MemberId, Side, TimeMs};
use serde::{Deserialize, Serialize};

/// A member's immutable position in the sponsor and binary trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: MemberId,
    pub sponsor: Option<MemberId>,
    /// Binary-tree parent; `None` only for a root.
    pub parent: Option<MemberId>,
    pub side: Option<Side>,
    pub depth: u32,
    /// Position in the append-only placement log.
    pub placement_seq: i64,
    pub created_at: TimeMs,
}

/// Result of placing a newly registered member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub member: MemberId,
    pub sponsor: Option<MemberId>,
    pub parent: Option<MemberId>,
    pub side: Option<Side>,
    pub depth: u32,
}

/// Denormalized per-member summary. Written only by the aggregate projector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAggregate {
    pub member: MemberId,
    pub direct_referral_count: u32,
    pub unlocked_levels: u32,
    pub left_team_count: u64,
    pub right_team_count: u64,
    pub left_carry_forward: Decimal,
    pub right_carry_forward: Decimal,
    pub total_earnings: Decimal,
    pub withdrawable_amount: Decimal,
    pub autopool_eligible: bool,
}

impl MemberAggregate {
    pub fn empty(member: MemberId) -> Self {
        Self {
            member,
            direct_referral_count: 0,
            unlocked_levels: 0,
            left_team_count: 0,
            right_team_count: 0,
            left_carry_forward: Decimal::zero(),
            right_carry_forward: Decimal::zero(),
            total_earnings: Decimal::zero(),
            withdrawable_amount: Decimal::zero(),
            autopool_eligible: false,
        }
    }

    pub fn team_count(&self, side: Side) -> u64 {
        match side {
            Side::Left => self.left_team_count,
            Side::Right => self.right_team_count,
        }
    }
}
