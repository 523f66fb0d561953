//! Package purchases and installment-paid events.

use super::engine::{CompensationEngine, EngineError, EventOutcome};
use crate::db::repo::{aggregates, autopool, ledger, packages, tree};
use crate::domain::{
    Credit, Decimal, Earning, EarningType, InstallmentPaid, MemberId, Package, PackageId,
    PackageStatus, Side, TimeMs,
};
use crate::engine::calculator::{AncestorState, CompensationCalculator, EventContext};
use crate::engine::installment::{apply_payment, build_schedule};
use crate::engine::{TeamCounts, TreeView};
use sqlx::sqlite::SqliteConnection;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

/// What one installment-paid event did.
#[derive(Debug, Clone)]
pub struct InstallmentReport {
    pub event_key: String,
    pub outcome: EventOutcome,
    pub package: Package,
    /// Installment settled by this event (or by the original on replay).
    pub installment_seq: Option<u32>,
    /// Ledger entries written under this event key.
    pub earnings: Vec<Earning>,
    pub bonus_awarded: bool,
    pub pool_contribution: Decimal,
    pub orphans: Vec<MemberId>,
    pub admitted: Vec<MemberId>,
}

struct Applied {
    seq: u32,
    bonus_awarded: bool,
    pool_contribution: Decimal,
    orphans: Vec<MemberId>,
    admitted: Vec<MemberId>,
}

impl CompensationEngine {
    /// Create a package and its full installment schedule. Nothing is paid until the first installment.
    pub async fn purchase_package(
        &self,
        member: &MemberId,
        tier_name: &str,
        package_id: Option<PackageId>,
        purchased_at: TimeMs,
    ) -> Result<(Package, EventOutcome), EngineError> {
        let tier = self
            .plan
            .tier(tier_name)
            .ok_or_else(|| EngineError::UnknownTier(tier_name.to_string()))?
            .clone();
        let id = package_id.unwrap_or_else(PackageId::generate);

        self.with_retry("purchase_package", || async {
            let mut tx = self.repo.begin().await?;
            if tree::get_node(&mut tx, member).await?.is_none() {
                return Err(EngineError::MemberNotFound(member.clone()));
            }

            let package = Package {
                id: id.clone(),
                member: member.clone(),
                tier: tier.name.clone(),
                monthly_amount: tier.monthly_amount,
                total_months: self.plan.installment_count,
                paid_months: 0,
                status: PackageStatus::Scheduled,
                has_late: false,
                bonus_earned: false,
                purchased_at,
                plan_version: self.plan.version.clone(),
            };
            let schedule = build_schedule(
                &package.id,
                package.monthly_amount,
                package.total_months,
                purchased_at,
            )
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

            if !packages::insert_package(&mut tx, &package, &schedule).await? {
                let stored = packages::get_package(&mut tx, &id)
                    .await?
                    .ok_or_else(|| EngineError::conflict(format!("package {} vanished", id)))?;
                if stored.member == package.member && stored.tier == package.tier {
                    return Ok((stored, EventOutcome::Duplicate));
                }
                return Err(EngineError::PackageExists(id.clone()));
            }
            tx.commit().await?;

            info!(
                member = %member,
                package = %package.id,
                tier = %package.tier,
                monthly = %package.monthly_amount,
                "Package purchased"
            );
            Ok((package, EventOutcome::Applied))
        })
        .await
    }

    /// Record one installment payment and run every compensation step it triggers.
    ///
    /// Replaying the same event key is a no-op that reports the original earnings.
    pub async fn record_installment(
        &self,
        event: &InstallmentPaid,
    ) -> Result<InstallmentReport, EngineError> {
        if event.amount.is_negative() || event.amount.is_zero() {
            return Err(EngineError::InvalidInput("amount must be positive".to_string()));
        }
        let package = self
            .repo
            .get_package(&event.package_id)
            .await?
            .ok_or_else(|| EngineError::PackageNotFound(event.package_id.clone()))?;

        let applied = self
            .with_retry("record_installment", || self.try_record(event, &package.member))
            .await?;

        let mut conn = self.repo.pool().acquire().await?;
        let package = packages::get_package(&mut conn, &event.package_id)
            .await?
            .ok_or_else(|| EngineError::PackageNotFound(event.package_id.clone()))?;
        let earnings = ledger::earnings_for_event(&mut conn, &event.event_key).await?;

        Ok(match applied {
            Some(a) => InstallmentReport {
                event_key: event.event_key.clone(),
                outcome: EventOutcome::Applied,
                package,
                installment_seq: Some(a.seq),
                earnings,
                bonus_awarded: a.bonus_awarded,
                pool_contribution: a.pool_contribution,
                orphans: a.orphans,
                admitted: a.admitted,
            },
            None => {
                let original = packages::installment_by_event(&mut conn, &event.event_key).await?;
                InstallmentReport {
                    event_key: event.event_key.clone(),
                    outcome: EventOutcome::Duplicate,
                    installment_seq: original.map(|i| i.seq),
                    bonus_awarded: earnings
                        .iter()
                        .any(|e| e.earning_type == EarningType::InstallmentBonus),
                    package,
                    earnings,
                    pool_contribution: Decimal::zero(),
                    orphans: Vec::new(),
                    admitted: Vec::new(),
                }
            }
        })
    }

    /// One attempt; `None` means the event key was already processed.
    async fn try_record(
        &self,
        event: &InstallmentPaid,
        buyer: &MemberId,
    ) -> Result<Option<Applied>, EngineError> {
        let chain = self.chain_of(buyer).await?;
        let _guard = self.locks.acquire(chain).await;
        let at = event.paid_at;

        let mut tx = self.repo.begin().await?;
        if !aggregates::mark_processed(&mut tx, &event.event_key, "installment", &self.plan.version, at)
            .await?
        {
            info!(event_key = %event.event_key, "Duplicate installment event ignored");
            return Ok(None);
        }

        let package = packages::get_package(&mut tx, &event.package_id)
            .await?
            .ok_or_else(|| EngineError::PackageNotFound(event.package_id.clone()))?;
        let next = packages::next_pending_installment(&mut tx, &package.id).await?;
        let decision = apply_payment(
            &package,
            next.as_ref(),
            event.amount,
            event.paid_at,
            self.plan.late_grace_days,
        )?;

        if !packages::settle_installment(
            &mut tx,
            &package.id,
            decision.seq,
            decision.status,
            event.paid_at,
            &event.event_key,
        )
        .await?
            || !packages::advance_package(
                &mut tx,
                &package.id,
                package.paid_months,
                decision.paid_months,
                decision.package_status,
                decision.has_late,
            )
            .await?
        {
            return Err(EngineError::conflict(format!(
                "package {} advanced concurrently",
                package.id
            )));
        }

        let ctx = self
            .load_context(&mut tx, event, &package, decision.activates)
            .await?;
        let outcome = CompensationCalculator::new(&self.plan).calculate(&ctx)?;

        for cycle in &outcome.cycles {
            aggregates::insert_binary_cycle(&mut tx, cycle, &event.event_key, at).await?;
        }
        let mut credits = outcome.credits.clone();

        let mut bonus_awarded = false;
        if decision.bonus_due && packages::claim_bonus(&mut tx, &package.id).await? {
            bonus_awarded = true;
            credits.push(Credit {
                beneficiary: package.member.clone(),
                earning_type: EarningType::InstallmentBonus,
                amount: package.monthly_amount,
                related_member: None,
                description: format!(
                    "Completion bonus for {} package {} paid on time",
                    package.tier, package.id
                ),
                trigger_key: format!("bonus:{}", package.id),
            });
        }

        for credit in &credits {
            if !ledger::append_credit(&mut tx, credit, &event.event_key, &self.plan.version, at).await? {
                warn!(
                    beneficiary = %credit.beneficiary,
                    earning_type = %credit.earning_type,
                    trigger_key = %credit.trigger_key,
                    "Duplicate trigger skipped"
                );
            }
        }

        if outcome.pool_contribution.is_positive() {
            autopool::record_movement(
                &mut tx,
                &format!("fund:{}", event.event_key),
                "contribution",
                outcome.pool_contribution,
                at,
            )
            .await?;
        }

        let mut touched: BTreeSet<MemberId> = outcome.touched.clone();
        touched.extend(credits.iter().map(|c| c.beneficiary.clone()));
        let admitted = self.settle_members(&mut tx, &touched, at).await?;
        tx.commit().await?;

        info!(
            event_key = %event.event_key,
            package = %package.id,
            seq = decision.seq,
            status = %decision.status.as_str(),
            credits = credits.len(),
            commission = %outcome.commission_total,
            "Installment recorded"
        );

        Ok(Some(Applied {
            seq: decision.seq,
            bonus_awarded,
            pool_contribution: outcome.pool_contribution,
            orphans: outcome.orphans,
            admitted,
        }))
    }

    async fn load_context(
        &self,
        conn: &mut SqliteConnection,
        event: &InstallmentPaid,
        package: &Package,
        activates: bool,
    ) -> Result<EventContext, EngineError> {
        let buyer = &package.member;
        let view = TreeView::new(tree::upline_links(conn, buyer).await?);
        let walk = view.binary_path(buyer)?;

        let mut path = Vec::with_capacity(walk.steps.len());
        for step in walk.steps {
            let counts = TeamCounts::new(
                tree::subtree_count(conn, &step.ancestor, Side::Left).await?,
                tree::subtree_count(conn, &step.ancestor, Side::Right).await?,
            );
            let carry = aggregates::latest_carry(conn, &step.ancestor).await?;
            path.push(AncestorState {
                member: step.ancestor,
                side: step.side,
                counts,
                carry,
            });
        }

        let mut unlocked_levels = HashMap::new();
        for member in path.iter().map(|a| &a.member) {
            let direct = tree::direct_referral_count(conn, member).await?;
            let previous = aggregates::get_aggregate(conn, member)
                .await?
                .map_or(0, |a| a.unlocked_levels);
            unlocked_levels.insert(
                member.clone(),
                self.plan.unlocked_levels_for(direct).max(previous),
            );
        }

        Ok(EventContext {
            event_key: event.event_key.clone(),
            buyer: buyer.clone(),
            package_id: package.id.clone(),
            monthly_amount: package.monthly_amount,
            volume: event.amount,
            activates,
            path,
            path_orphan: walk.orphaned,
            tree: view,
            unlocked_levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{
        Decimal, EarningType, InstallmentPaid, InstallmentStatus, MemberId, PackageId,
        PackageStatus, TimeMs,
    };
    use crate::engine::InstallmentError;
    use crate::orchestration::engine::test_support::engine;
    use crate::orchestration::{CompensationEngine, EngineError, EventOutcome};

    // 2024-01-15T00:00:00Z
    const T0: i64 = 1_705_276_800_000;

    fn id(s: &str) -> MemberId {
        MemberId::new(s.to_string())
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    async fn buy(engine: &CompensationEngine, member: &str, tier: &str) -> PackageId {
        let pkg = PackageId::new(format!("pkg-{}", member));
        engine
            .purchase_package(&id(member), tier, Some(pkg.clone()), TimeMs::new(T0))
            .await
            .unwrap();
        pkg
    }

    async fn pay(engine: &CompensationEngine, pkg: &PackageId, amount: &str, at: i64) -> crate::orchestration::InstallmentReport {
        engine
            .record_installment(&InstallmentPaid::new(pkg.clone(), d(amount), TimeMs::new(at), None))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_activation_pays_direct_income_once() {
        let (_dir, engine) = engine().await;
        engine.register_member(&id("a"), None, TimeMs::new(T0)).await.unwrap();
        engine.register_member(&id("b"), Some(&id("a")), TimeMs::new(T0)).await.unwrap();
        let pkg = buy(&engine, "b", "silver").await;

        let first = pay(&engine, &pkg, "2000", T0).await;
        assert_eq!(first.outcome, EventOutcome::Applied);
        assert_eq!(first.installment_seq, Some(1));
        let direct: Vec<_> = first
            .earnings
            .iter()
            .filter(|e| e.earning_type == EarningType::Direct)
            .collect();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].beneficiary, id("a"));
        assert_eq!(direct[0].amount, d("100"));

        let second = pay(&engine, &pkg, "2000", T0 + 31 * 86_400_000).await;
        assert!(second.earnings.iter().all(|e| e.earning_type != EarningType::Direct));

        let agg = engine.repo().get_aggregate(&id("a")).await.unwrap().unwrap();
        assert_eq!(agg.total_earnings, d("100"));
        assert_eq!(agg.withdrawable_amount, d("90"));
        assert_eq!(agg.left_carry_forward, d("4000"));
    }

    #[tokio::test]
    async fn test_replayed_event_is_a_no_op() {
        let (_dir, engine) = engine().await;
        engine.register_member(&id("a"), None, TimeMs::new(T0)).await.unwrap();
        engine.register_member(&id("b"), Some(&id("a")), TimeMs::new(T0)).await.unwrap();
        let pkg = buy(&engine, "b", "gold").await;

        let event = InstallmentPaid::new(pkg.clone(), d("3000"), TimeMs::new(T0), Some("TXN-1".to_string()));
        let first = engine.record_installment(&event).await.unwrap();
        let replay = engine.record_installment(&event).await.unwrap();

        assert_eq!(replay.outcome, EventOutcome::Duplicate);
        assert_eq!(replay.earnings, first.earnings);
        assert_eq!(replay.package.paid_months, 1);
        assert_eq!(replay.installment_seq, Some(1));
        let agg = engine.repo().get_aggregate(&id("a")).await.unwrap().unwrap();
        assert_eq!(agg.total_earnings, d("150"));
    }

    #[tokio::test]
    async fn test_invalid_payments_are_rejected_without_side_effects() {
        let (_dir, engine) = engine().await;
        engine.register_member(&id("a"), None, TimeMs::new(T0)).await.unwrap();
        let pkg = buy(&engine, "a", "bronze").await;

        let wrong = engine
            .record_installment(&InstallmentPaid::new(pkg.clone(), d("999"), TimeMs::new(T0), None))
            .await;
        assert!(matches!(
            wrong,
            Err(EngineError::InvalidPackageState(InstallmentError::AmountMismatch { .. }))
        ));
        let stored = engine.repo().get_package(&pkg).await.unwrap().unwrap();
        assert_eq!(stored.paid_months, 0);

        let missing = engine
            .record_installment(&InstallmentPaid::new(PackageId::new("nope".to_string()), d("1000"), TimeMs::new(T0), None))
            .await;
        assert!(matches!(missing, Err(EngineError::PackageNotFound(_))));
    }

    #[tokio::test]
    async fn test_late_payment_forfeits_bonus() {
        let (_dir, engine) = engine().await;
        engine.register_member(&id("a"), None, TimeMs::new(T0)).await.unwrap();
        let pkg = buy(&engine, "a", "bronze").await;

        let schedule = engine.repo().get_installments(&pkg).await.unwrap();
        for (i, inst) in schedule.iter().enumerate() {
            let at = if i == 3 { inst.due_at.as_ms() + 2 * 86_400_000 } else { inst.due_at.as_ms() };
            let report = pay(&engine, &pkg, "1000", at).await;
            assert!(!report.bonus_awarded);
        }

        let stored = engine.repo().get_package(&pkg).await.unwrap().unwrap();
        assert_eq!(stored.status, PackageStatus::Completed);
        assert!(stored.has_late);
        assert!(!stored.bonus_earned);
        let installments = engine.repo().get_installments(&pkg).await.unwrap();
        assert_eq!(installments[3].status, InstallmentStatus::Late);

        let done = engine
            .record_installment(&InstallmentPaid::new(pkg.clone(), d("1000"), TimeMs::new(T0 + 400 * 86_400_000), None))
            .await;
        assert!(matches!(
            done,
            Err(EngineError::InvalidPackageState(InstallmentError::PackageCompleted(_)))
        ));
    }

    #[tokio::test]
    async fn test_purchase_validates_member_and_tier() {
        let (_dir, engine) = engine().await;
        engine.register_member(&id("a"), None, TimeMs::new(T0)).await.unwrap();

        assert!(matches!(
            engine.purchase_package(&id("a"), "diamond", None, TimeMs::new(T0)).await,
            Err(EngineError::UnknownTier(_))
        ));
        assert!(matches!(
            engine.purchase_package(&id("ghost"), "gold", None, TimeMs::new(T0)).await,
            Err(EngineError::MemberNotFound(_))
        ));

        let pkg = PackageId::new("p-1".to_string());
        let (first, outcome) = engine
            .purchase_package(&id("a"), "Gold", Some(pkg.clone()), TimeMs::new(T0))
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(first.monthly_amount, d("3000"));
        assert_eq!(first.total_months, 11);
        let (_, again) = engine
            .purchase_package(&id("a"), "gold", Some(pkg), TimeMs::new(T0))
            .await
            .unwrap();
        assert_eq!(again, EventOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_unschedulable_purchase_time_is_invalid_input() {
        let (_dir, engine) = engine().await;
        engine.register_member(&id("a"), None, TimeMs::new(T0)).await.unwrap();
        let pkg = PackageId::new("far-future".to_string());

        let result = engine
            .purchase_package(&id("a"), "gold", Some(pkg.clone()), TimeMs::new(i64::MAX))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        assert!(engine.repo().get_package(&pkg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_parent_is_reported_as_orphan() {
        let (_dir, engine) = engine().await;
        engine.register_member(&id("a"), None, TimeMs::new(T0)).await.unwrap();
        engine.register_member(&id("b"), Some(&id("a")), TimeMs::new(T0)).await.unwrap();
        let pkg = buy(&engine, "b", "silver").await;

        // Point b's parent at a row that does not exist.
        let mut conn = engine.repo().pool().acquire().await.unwrap();
        sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await.unwrap();
        sqlx::query("UPDATE members SET parent_id = 'gone' WHERE id = 'b'")
            .execute(&mut *conn)
            .await
            .unwrap();
        sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await.unwrap();
        drop(conn);

        let report = pay(&engine, &pkg, "2000", T0).await;
        assert_eq!(report.outcome, EventOutcome::Applied);
        assert_eq!(report.orphans, vec![id("gone")]);
        // Direct income follows the sponsor link, which is intact.
        assert!(report
            .earnings
            .iter()
            .any(|e| e.earning_type == EarningType::Direct && e.beneficiary == id("a")));
        assert!(engine.repo().binary_cycles(&id("a"), 10).await.unwrap().is_empty());
    }
}
