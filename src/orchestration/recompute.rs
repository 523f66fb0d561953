//! Repair operations that re-derive member summaries from the ledger and tree.

use super::engine::{CompensationEngine, EngineError};
use crate::db::repo::tree;
use crate::domain::{MemberAggregate, MemberId, TimeMs};
use tracing::{debug, info};

impl CompensationEngine {
    /// Rebuild one member's summary. Running it on unchanged state rewrites the same values.
    pub async fn recompute_aggregates(
        &self,
        member: &MemberId,
        at: TimeMs,
    ) -> Result<MemberAggregate, EngineError> {
        self.with_retry("recompute_aggregates", || self.try_recompute(member, at))
            .await
    }

    async fn try_recompute(&self, member: &MemberId, at: TimeMs) -> Result<MemberAggregate, EngineError> {
        let depth = {
            let mut conn = self.repo.pool().acquire().await?;
            tree::get_node(&mut conn, member)
                .await?
                .ok_or_else(|| EngineError::MemberNotFound(member.clone()))?
                .depth
        };
        let _guard = self.locks.acquire(vec![(member.clone(), depth)]).await;

        let mut tx = self.repo.begin().await?;
        let agg = self.project_member(&mut tx, member, at).await?;
        if agg.autopool_eligible {
            self.admit(&mut tx, member, at).await?;
        }
        tx.commit().await?;
        debug!(member = %member, total = %agg.total_earnings, "Aggregate recomputed");
        Ok(agg)
    }

    /// Rebuild every summary, deepest members first. Returns how many were rebuilt.
    pub async fn recompute_all(&self, at: TimeMs) -> Result<usize, EngineError> {
        let members = {
            let mut conn = self.repo.pool().acquire().await?;
            tree::members_deepest_first(&mut conn).await?
        };
        for (member, _) in &members {
            self.recompute_aggregates(member, at).await?;
        }
        info!(members = members.len(), "All aggregates recomputed");
        Ok(members.len())
    }
}
