//! Auto-pool distributions.

use super::engine::{CompensationEngine, EngineError, EventOutcome};
use crate::db::repo::{aggregates, autopool, ledger, tree};
use crate::domain::{distribution_event_key, Decimal, Earning, MemberId, TimeMs};
use crate::engine::autopool::split;
use std::collections::BTreeSet;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DistributionReport {
    pub event_key: String,
    pub outcome: EventOutcome,
    pub fund_before: Decimal,
    pub requested: Decimal,
    pub distributed: Decimal,
    /// Left in the fund after this run.
    pub remainder: Decimal,
    pub earnings: Vec<Earning>,
}

impl CompensationEngine {
    /// Split `amount` (default: the whole fund) across occupied matrix positions.
    ///
    /// Keyed by `distribution_key`; replays are no-ops. With an empty matrix nothing
    /// is written and the key stays unused.
    pub async fn distribute_autopool(
        &self,
        distribution_key: &str,
        amount: Option<Decimal>,
        at: TimeMs,
    ) -> Result<DistributionReport, EngineError> {
        if distribution_key.trim().is_empty() {
            return Err(EngineError::InvalidInput("distribution key must not be empty".to_string()));
        }
        if amount.is_some_and(|a| a.is_negative()) {
            return Err(EngineError::InvalidInput("amount must not be negative".to_string()));
        }
        let event_key = distribution_event_key(distribution_key);
        let _pool = self.pool_lock.lock().await;

        let report = self
            .with_retry("distribute_autopool", || self.try_distribute(&event_key, amount, at))
            .await?;

        let earnings = self.repo.earnings_for_event(&event_key).await?;
        Ok(DistributionReport { earnings, ..report })
    }

    async fn try_distribute(
        &self,
        event_key: &str,
        amount: Option<Decimal>,
        at: TimeMs,
    ) -> Result<DistributionReport, EngineError> {
        // Recipients' summaries change, so lock every occupied position's member.
        let preview = self.repo.autopool_positions().await?;
        let mut lock_set = Vec::with_capacity(preview.len());
        {
            let mut conn = self.repo.pool().acquire().await?;
            for p in &preview {
                let depth = tree::get_node(&mut conn, &p.member).await?.map_or(0, |n| n.depth);
                lock_set.push((p.member.clone(), depth));
            }
        }
        let _guard = self.locks.acquire(lock_set).await;

        let mut tx = self.repo.begin().await?;
        let fund_before = autopool::fund_balance(&mut tx).await?;
        let requested = amount.unwrap_or(fund_before);
        let report = |outcome: EventOutcome, distributed: Decimal| DistributionReport {
            event_key: event_key.to_string(),
            outcome,
            fund_before,
            requested,
            distributed,
            remainder: fund_before - distributed,
            earnings: Vec::new(),
        };

        if aggregates::is_processed(&mut tx, event_key).await? {
            return Ok(report(EventOutcome::Duplicate, Decimal::zero()));
        }

        let positions = autopool::all_positions(&mut tx).await?;
        if positions.len() != preview.len() {
            return Err(EngineError::conflict("auto-pool admitted members while locking"));
        }
        if positions.is_empty() || !requested.is_positive() {
            warn!(event_key = %event_key, positions = positions.len(), "Nothing to distribute");
            return Ok(report(EventOutcome::NoOp, Decimal::zero()));
        }
        if requested > fund_before {
            return Err(EngineError::InvalidInput(format!(
                "requested {} exceeds fund balance {}",
                requested, fund_before
            )));
        }

        if !aggregates::mark_processed(&mut tx, event_key, "autopool_distribution", &self.plan.version, at)
            .await?
        {
            return Err(EngineError::conflict("distribution key claimed concurrently"));
        }

        let shares = split(&self.plan, event_key, requested, &positions);
        for credit in &shares.credits {
            ledger::append_credit(&mut tx, credit, event_key, &self.plan.version, at).await?;
        }
        if shares.distributed.is_positive() {
            autopool::record_movement(&mut tx, event_key, "distribution", -shares.distributed, at)
                .await?;
        }

        let touched: BTreeSet<MemberId> =
            shares.credits.iter().map(|c| c.beneficiary.clone()).collect();
        self.settle_members(&mut tx, &touched, at).await?;
        tx.commit().await?;

        info!(
            event_key = %event_key,
            recipients = shares.credits.len(),
            distributed = %shares.distributed,
            dust = %shares.remainder,
            "Auto-pool distributed"
        );
        Ok(report(EventOutcome::Applied, shares.distributed))
    }
}
