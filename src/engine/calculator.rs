//! Per-event compensation: direct, binary and level income in fixed order.
//!
//! The calculator is synchronous and side-effect free. The processor loads an
//! [`EventContext`] inside the event's transaction, runs the calculator, and
//! writes the outcome back in the same transaction.

use crate::domain::{CompensationPlan, Credit, Decimal, EarningType, MemberId, PackageId, Side};
use crate::engine::binary::{run_cycle, CarryForward, MatchCycle, TeamCounts};
use crate::engine::level::{self, UplineMember};
use crate::engine::tree::{TreeError, TreeView};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Binary state of one ancestor on the triggering member's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorState {
    pub member: MemberId,
    /// Leg of this ancestor that contains the triggering member.
    pub side: Side,
    pub counts: TeamCounts,
    pub carry: CarryForward,
}

#[derive(Debug, Clone)]
pub struct EventContext {
    pub event_key: String,
    pub buyer: MemberId,
    pub package_id: PackageId,
    pub monthly_amount: Decimal,
    /// Business volume this event adds to every binary ancestor.
    pub volume: Decimal,
    /// First paid installment of the package.
    pub activates: bool,
    /// Binary ancestors, nearest first.
    pub path: Vec<AncestorState>,
    /// Set when the path stopped at a parent link that could not be resolved.
    pub path_orphan: Option<MemberId>,
    /// Links of the buyer and every path member.
    pub tree: TreeView,
    pub unlocked_levels: HashMap<MemberId, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompensationOutcome {
    pub credits: Vec<Credit>,
    pub cycles: Vec<MatchCycle>,
    pub touched: BTreeSet<MemberId>,
    pub commission_total: Decimal,
    pub pool_contribution: Decimal,
    /// Ancestors that could not be resolved and were skipped.
    pub orphans: Vec<MemberId>,
}

impl CompensationOutcome {
    pub fn total_for(&self, member: &MemberId, earning_type: EarningType) -> Decimal {
        self.credits
            .iter()
            .filter(|c| &c.beneficiary == member && c.earning_type == earning_type)
            .map(|c| c.amount)
            .sum()
    }
}

pub struct CompensationCalculator<'a> {
    plan: &'a CompensationPlan,
}

impl<'a> CompensationCalculator<'a> {
    pub fn new(plan: &'a CompensationPlan) -> Self {
        Self { plan }
    }

    pub fn calculate(&self, ctx: &EventContext) -> Result<CompensationOutcome, TreeError> {
        let mut out = CompensationOutcome::default();
        out.touched.insert(ctx.buyer.clone());
        out.orphans.extend(ctx.path_orphan.iter().cloned());

        if ctx.activates {
            self.direct_income(ctx, &mut out);
        }
        let payouts = self.binary_matching(ctx, &mut out);
        for (earner, payout) in payouts {
            self.level_income(ctx, &earner, payout, &mut out)?;
        }

        for credit in &out.credits {
            out.touched.insert(credit.beneficiary.clone());
        }
        out.orphans.sort();
        out.orphans.dedup();
        out.commission_total = out
            .credits
            .iter()
            .filter(|c| c.earning_type.is_commission())
            .map(|c| c.amount)
            .sum();
        out.pool_contribution = (out.commission_total * self.plan.autopool_funding_rate).to_money();

        debug!(
            event_key = %ctx.event_key,
            credits = out.credits.len(),
            cycles = out.cycles.len(),
            commission = %out.commission_total,
            "Compensation computed"
        );
        Ok(out)
    }

    fn direct_income(&self, ctx: &EventContext, out: &mut CompensationOutcome) {
        let Some(sponsor) = ctx.tree.get(&ctx.buyer).and_then(|l| l.sponsor.clone()) else {
            return;
        };
        if ctx.tree.get(&sponsor).is_none() {
            warn!(buyer = %ctx.buyer, sponsor = %sponsor, "Orphaned sponsor, skipping direct income");
            out.orphans.push(sponsor);
            return;
        }
        let amount = (ctx.monthly_amount * self.plan.direct_rate).to_money();
        if !amount.is_positive() {
            return;
        }
        out.credits.push(Credit {
            beneficiary: sponsor,
            earning_type: EarningType::Direct,
            amount,
            related_member: Some(ctx.buyer.clone()),
            description: format!(
                "Direct income from {} activating package {}",
                ctx.buyer, ctx.package_id
            ),
            trigger_key: ctx.event_key.clone(),
        });
    }

    /// Returns each ancestor's binary payout, nearest ancestor first.
    fn binary_matching(
        &self,
        ctx: &EventContext,
        out: &mut CompensationOutcome,
    ) -> Vec<(MemberId, Decimal)> {
        let mut payouts = Vec::new();
        for ancestor in &ctx.path {
            out.touched.insert(ancestor.member.clone());
            let cycle = run_cycle(
                ancestor.member.clone(),
                ancestor.carry,
                ancestor.counts,
                ancestor.side,
                ctx.volume,
                self.plan.binary_rate,
            );
            if cycle.payout.is_positive() {
                out.credits.push(Credit {
                    beneficiary: ancestor.member.clone(),
                    earning_type: EarningType::Binary,
                    amount: cycle.payout,
                    related_member: Some(ctx.buyer.clone()),
                    description: format!(
                        "Binary match of {} (left {}, right {})",
                        cycle.matched, cycle.left_volume, cycle.right_volume
                    ),
                    trigger_key: ctx.event_key.clone(),
                });
                payouts.push((ancestor.member.clone(), cycle.payout));
            }
            out.cycles.push(cycle);
        }
        payouts
    }

    fn level_income(
        &self,
        ctx: &EventContext,
        earner: &MemberId,
        payout: Decimal,
        out: &mut CompensationOutcome,
    ) -> Result<(), TreeError> {
        let chain = ctx.tree.sponsor_chain(earner, self.plan.max_levels)?;
        if let Some(orphan) = chain.orphaned {
            out.orphans.push(orphan);
        }
        let upline: Vec<UplineMember> = chain
            .steps
            .into_iter()
            .map(|step| UplineMember {
                unlocked_levels: ctx.unlocked_levels.get(&step.ancestor).copied().unwrap_or(0),
                member: step.ancestor,
                level: step.level,
            })
            .collect();
        out.credits.extend(level::distribute(
            self.plan,
            &ctx.event_key,
            earner,
            payout,
            &upline,
        ));
        Ok(())
    }
}
