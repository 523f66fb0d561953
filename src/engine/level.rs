//! Level income: a share of every binary payout spread over the earner's sponsor chain.

use crate::domain::{CompensationPlan, Credit, Decimal, EarningType, MemberId};

/// A sponsor-chain recipient with the levels they have unlocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplineMember {
    pub member: MemberId,
    /// 1 = the earner's direct sponsor.
    pub level: u32,
    pub unlocked_levels: u32,
}

pub fn level_trigger_key(event_key: &str, earner: &MemberId) -> String {
    format!("{}#level:{}", event_key, earner)
}

/// Credits produced by one binary payout.
///
/// A recipient at level `d` is paid only if `d <= unlocked_levels`. Zero amounts
/// after truncation to paise are dropped.
pub fn distribute(
    plan: &CompensationPlan,
    event_key: &str,
    earner: &MemberId,
    binary_payout: Decimal,
    upline: &[UplineMember],
) -> Vec<Credit> {
    if !binary_payout.is_positive() {
        return Vec::new();
    }
    let pool = binary_payout * plan.level_pool_rate;
    let trigger_key = level_trigger_key(event_key, earner);

    upline
        .iter()
        .filter(|u| u.level >= 1 && u.level <= plan.max_levels && u.level <= u.unlocked_levels)
        .filter_map(|u| {
            let weight = plan.level_weights.get((u.level - 1) as usize)?;
            let amount = (pool * *weight).to_money();
            amount.is_positive().then(|| Credit {
                beneficiary: u.member.clone(),
                earning_type: EarningType::Level,
                amount,
                related_member: Some(earner.clone()),
                description: format!(
                    "Level {} income from binary match of {}",
                    u.level, earner
                ),
                trigger_key: trigger_key.clone(),
            })
        })
        .collect()
}
