//! Aggregate projection: a member's summary as a pure function of ledger and tree state.

use crate::domain::{CompensationPlan, Decimal, MemberAggregate, MemberId};
use crate::engine::binary::{CarryForward, TeamCounts};

/// Everything the projector reads for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionInputs {
    pub member: MemberId,
    pub ledger_total: Decimal,
    pub direct_referrals: u32,
    pub team: TeamCounts,
    pub carry: CarryForward,
    /// Stored summary, consulted only for the monotonic fields.
    pub previous: Option<MemberAggregate>,
}

pub fn project(plan: &CompensationPlan, inputs: ProjectionInputs) -> MemberAggregate {
    let previous_unlocked = inputs.previous.as_ref().map_or(0, |p| p.unlocked_levels);
    let previously_eligible = inputs
        .previous
        .as_ref()
        .is_some_and(|p| p.autopool_eligible);

    MemberAggregate {
        member: inputs.member,
        direct_referral_count: inputs.direct_referrals,
        unlocked_levels: plan
            .unlocked_levels_for(inputs.direct_referrals)
            .max(previous_unlocked)
            .min(plan.max_levels),
        left_team_count: inputs.team.left,
        right_team_count: inputs.team.right,
        left_carry_forward: inputs.carry.left,
        right_carry_forward: inputs.carry.right,
        total_earnings: inputs.ledger_total,
        withdrawable_amount: inputs.ledger_total * (Decimal::one() - plan.company_charge_rate),
        autopool_eligible: previously_eligible || inputs.ledger_total >= plan.autopool_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn inputs(total: &str, direct: u32) -> ProjectionInputs {
        ProjectionInputs {
            member: MemberId::new("a".to_string()),
            ledger_total: d(total),
            direct_referrals: direct,
            team: TeamCounts::new(2, 1),
            carry: CarryForward::new(d("1000"), Decimal::zero()),
            previous: None,
        }
    }

    #[test]
    fn test_projection_derives_every_field() {
        let plan = CompensationPlan::reference();
        let agg = project(&plan, inputs("400", 3));
        assert_eq!(agg.total_earnings, d("400"));
        assert_eq!(agg.withdrawable_amount, d("360"));
        assert_eq!(agg.unlocked_levels, 6);
        assert_eq!(agg.left_team_count, 2);
        assert_eq!(agg.right_team_count, 1);
        assert_eq!(agg.left_carry_forward, d("1000"));
        assert!(!agg.autopool_eligible);
    }

    #[test]
    fn test_projection_is_idempotent() {
        let plan = CompensationPlan::reference();
        let first = project(&plan, inputs("250", 1));
        let mut again = inputs("250", 1);
        again.previous = Some(first.clone());
        assert_eq!(project(&plan, again), first);
    }

    #[test]
    fn test_threshold_crossing_sets_eligibility() {
        let plan = CompensationPlan::reference();
        assert!(!project(&plan, inputs("9999.99", 0)).autopool_eligible);
        assert!(project(&plan, inputs("10000", 0)).autopool_eligible);
    }

    #[test]
    fn test_monotonic_fields_never_regress() {
        let plan = CompensationPlan::reference();
        let mut prev = project(&plan, inputs("12000", 5));
        prev.autopool_eligible = true;
        let mut next = inputs("0", 0);
        next.previous = Some(prev);
        let agg = project(&plan, next);
        assert!(agg.autopool_eligible);
        assert_eq!(agg.unlocked_levels, 10);
    }
}
