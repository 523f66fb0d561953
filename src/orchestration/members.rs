//! Member registration and binary placement.

use super::engine::{CompensationEngine, EngineError, EventOutcome};
use crate::db::repo::tree;
use crate::domain::{MemberId, Placement, Side, TimeMs, TreeNode};
use crate::engine::tree::{place_on_leg, placement_side};
use sqlx::sqlite::SqliteConnection;
use std::collections::BTreeSet;
use tracing::info;

/// Where a registration lands, decided from current tree state.
struct PlacementPlan {
    parent: Option<MemberId>,
    side: Option<Side>,
    depth: u32,
}

impl CompensationEngine {
    /// Place a newly registered member under `sponsor`.
    ///
    /// Re-registering an existing member under the same sponsor returns the stored placement.
    pub async fn register_member(
        &self,
        member: &MemberId,
        sponsor: Option<&MemberId>,
        at: TimeMs,
    ) -> Result<(Placement, EventOutcome), EngineError> {
        self.with_retry("register_member", || self.try_register(member, sponsor, at))
            .await
    }

    async fn plan_placement(
        &self,
        conn: &mut SqliteConnection,
        sponsor: Option<&MemberId>,
    ) -> Result<PlacementPlan, EngineError> {
        let Some(sponsor) = sponsor else {
            return Ok(PlacementPlan {
                parent: None,
                side: None,
                depth: 0,
            });
        };
        let sponsor_node = tree::get_node(conn, sponsor)
            .await?
            .ok_or_else(|| EngineError::MemberNotFound(sponsor.clone()))?;
        let existing = tree::direct_referral_count(conn, sponsor).await?;
        let side = placement_side(self.plan.spillover, sponsor, existing)?;
        // An own-leg slot may already hold an upline's spillover, so always descend.
        let leg = tree::outer_leg(conn, sponsor, side).await?;
        let (parent, depth) = place_on_leg(sponsor, sponsor_node.depth, &leg)?;
        Ok(PlacementPlan {
            parent: Some(parent),
            side: Some(side),
            depth,
        })
    }

    async fn try_register(
        &self,
        member: &MemberId,
        sponsor: Option<&MemberId>,
        at: TimeMs,
    ) -> Result<(Placement, EventOutcome), EngineError> {
        // Preview outside the transaction to learn which chain to lock.
        let preview = {
            let mut conn = self.repo.pool().acquire().await?;
            if let Some(existing) = tree::get_node(&mut conn, member).await? {
                return existing_placement(existing, sponsor);
            }
            self.plan_placement(&mut conn, sponsor).await?
        };

        let mut lock_set = vec![(member.clone(), preview.depth)];
        if let Some(parent) = &preview.parent {
            lock_set.extend(self.chain_of(parent).await?);
        }
        let _guard = self.locks.acquire(lock_set).await;

        let mut tx = self.repo.begin().await?;
        if let Some(existing) = tree::get_node(&mut tx, member).await? {
            return existing_placement(existing, sponsor);
        }
        let placement = self.plan_placement(&mut tx, sponsor).await?;
        if placement.parent != preview.parent || placement.side != preview.side {
            return Err(EngineError::conflict(format!(
                "placement of {} moved while acquiring locks",
                member
            )));
        }

        let node = TreeNode {
            id: member.clone(),
            sponsor: sponsor.cloned(),
            parent: placement.parent.clone(),
            side: placement.side,
            depth: placement.depth,
            placement_seq: tree::next_placement_seq(&mut tx).await?,
            created_at: at,
        };
        tree::insert_member(&mut tx, &node).await?;

        // Team counts change for every binary ancestor; the sponsor also gains a referral.
        let mut touched: BTreeSet<MemberId> = BTreeSet::new();
        touched.insert(member.clone());
        if let Some(parent) = &node.parent {
            let mut current = Some(parent.clone());
            while let Some(id) = current {
                if !touched.insert(id.clone()) {
                    break;
                }
                current = tree::get_node(&mut tx, &id).await?.and_then(|n| n.parent);
            }
        }
        self.settle_members(&mut tx, &touched, at).await?;
        tx.commit().await?;

        info!(
            member = %member,
            sponsor = ?sponsor.map(|s| s.as_str()),
            parent = ?node.parent.as_ref().map(|p| p.as_str()),
            side = ?node.side,
            depth = node.depth,
            "Member placed"
        );
        Ok((placement_of(&node), EventOutcome::Applied))
    }
}

fn placement_of(node: &TreeNode) -> Placement {
    Placement {
        member: node.id.clone(),
        sponsor: node.sponsor.clone(),
        parent: node.parent.clone(),
        side: node.side,
        depth: node.depth,
    }
}

fn existing_placement(
    existing: TreeNode,
    sponsor: Option<&MemberId>,
) -> Result<(Placement, EventOutcome), EngineError> {
    if existing.sponsor.as_ref() == sponsor {
        Ok((placement_of(&existing), EventOutcome::Duplicate))
    } else {
        Err(EngineError::MemberExists(existing.id))
    }
}
