//! Transactional driver around the pure compensation engines.
//!
//! Every triggering event runs read → compute → write inside one SQLite
//! transaction while holding the chain locks of every member it touches.
//! Lost races surface as [`EngineError::ConcurrentUpdateConflict`] and the whole
//! event is retried with exponential backoff.

use crate::db::repo::{aggregates, autopool, ledger, tree};
use crate::db::Repository;
use crate::domain::{CompensationPlan, MemberAggregate, MemberId, PackageId, Side, TimeMs};
use crate::engine::autopool::next_slot;
use crate::engine::projector::{project, ProjectionInputs};
use crate::engine::{InstallmentError, TeamCounts, TreeError, TreeView};
use crate::orchestration::locks::ChainLocks;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("member {0} not found")]
    MemberNotFound(MemberId),
    #[error("member {0} is already registered under a different sponsor")]
    MemberExists(MemberId),
    #[error("package {0} not found")]
    PackageNotFound(PackageId),
    #[error("package {0} already exists with different terms")]
    PackageExists(PackageId),
    #[error("unknown package tier {0}")]
    UnknownTier(String),
    #[error("invalid package state: {0}")]
    InvalidPackageState(#[from] InstallmentError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("concurrent update conflict: {0}")]
    ConcurrentUpdateConflict(String),
    #[error(transparent)]
    Db(sqlx::Error),
}

impl EngineError {
    /// Retrying the whole event may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::ConcurrentUpdateConflict(_))
    }

    pub(crate) fn conflict(what: impl Into<String>) -> Self {
        EngineError::ConcurrentUpdateConflict(what.into())
    }
}

/// Busy/locked databases and lost unique-slot races are conflicts; everything else is fatal.
impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                let code = db.code();
                let busy = matches!(
                    code.as_deref(),
                    Some("5" | "6" | "261" | "262" | "517")
                ) || db.message().contains("database is locked");
                if busy || db.is_unique_violation() {
                    EngineError::ConcurrentUpdateConflict(db.message().to_string())
                } else {
                    EngineError::Db(e)
                }
            }
            sqlx::Error::PoolTimedOut => EngineError::ConcurrentUpdateConflict(e.to_string()),
            _ => EngineError::Db(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Applied,
    /// The event key was already processed; nothing was written.
    Duplicate,
    /// Nothing to do; the key was not consumed.
    NoOp,
}

pub struct CompensationEngine {
    pub(crate) repo: Arc<Repository>,
    pub(crate) plan: Arc<CompensationPlan>,
    pub(crate) locks: ChainLocks,
    /// Serializes auto-pool distributions against each other.
    pub(crate) pool_lock: Mutex<()>,
    max_attempts: u32,
}

impl CompensationEngine {
    pub fn new(repo: Arc<Repository>, plan: CompensationPlan, max_attempts: u32) -> Self {
        Self {
            repo,
            plan: Arc::new(plan),
            locks: ChainLocks::new(),
            pool_lock: Mutex::new(()),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn plan(&self) -> &CompensationPlan {
        &self.plan
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts the attempt budget.
    pub(crate) async fn with_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(500),
            max_elapsed_time: None,
            ..Default::default()
        };
        let max_attempts = self.max_attempts;
        let mut attempt = 0u32;

        retry(policy, || {
            attempt += 1;
            let current = attempt;
            let fut = f();
            async move {
                match fut.await {
                    Ok(v) => Ok(v),
                    Err(e) if e.is_transient() && current < max_attempts => {
                        debug!(op, attempt = current, error = %e, "Retrying after conflict");
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => {
                        if e.is_transient() {
                            warn!(op, attempts = current, error = %e, "Giving up after repeated conflicts");
                        }
                        Err(backoff::Error::permanent(e))
                    }
                }
            }
        })
        .await
    }

    /// Binary ancestors of `member` with depths, plus the member itself, for locking.
    pub(crate) async fn chain_of(&self, member: &MemberId) -> Result<Vec<(MemberId, u32)>, EngineError> {
        let mut conn = self.repo.pool().acquire().await?;
        let view = TreeView::new(tree::upline_links(&mut conn, member).await?);
        let Some(link) = view.get(member) else {
            return Err(EngineError::MemberNotFound(member.clone()));
        };
        let mut chain = vec![(member.clone(), link.depth)];
        let walk = view.binary_path(member)?;
        chain.extend(walk.steps.into_iter().map(|s| (s.ancestor, s.depth)));
        Ok(chain)
    }

    /// Re-derive and store one member's summary.
    pub(crate) async fn project_member(
        &self,
        conn: &mut SqliteConnection,
        member: &MemberId,
        at: TimeMs,
    ) -> Result<MemberAggregate, EngineError> {
        let previous = aggregates::get_aggregate(conn, member).await?;
        let inputs = ProjectionInputs {
            member: member.clone(),
            ledger_total: ledger::ledger_total(conn, member).await?,
            direct_referrals: tree::direct_referral_count(conn, member).await?,
            team: TeamCounts::new(
                tree::subtree_count(conn, member, Side::Left).await?,
                tree::subtree_count(conn, member, Side::Right).await?,
            ),
            carry: aggregates::latest_carry(conn, member).await?,
            previous,
        };
        let agg = project(&self.plan, inputs);
        aggregates::upsert_aggregate(conn, &agg, at).await?;
        Ok(agg)
    }

    /// Project every touched member, then admit newly eligible ones to the auto-pool.
    ///
    /// Returns the members admitted by this call.
    pub(crate) async fn settle_members(
        &self,
        conn: &mut SqliteConnection,
        touched: &BTreeSet<MemberId>,
        at: TimeMs,
    ) -> Result<Vec<MemberId>, EngineError> {
        let mut eligible = Vec::new();
        for member in touched {
            let agg = self.project_member(conn, member, at).await?;
            if agg.autopool_eligible {
                eligible.push(agg.member);
            }
        }

        let mut admitted = Vec::new();
        for member in eligible {
            if self.admit(conn, &member, at).await? {
                admitted.push(member);
            }
        }
        Ok(admitted)
    }

    /// Place `member` in the next open matrix slot. No-op if already admitted.
    pub(crate) async fn admit(
        &self,
        conn: &mut SqliteConnection,
        member: &MemberId,
        at: TimeMs,
    ) -> Result<bool, EngineError> {
        if autopool::position_of(conn, member).await?.is_some() {
            return Ok(false);
        }
        let slot = next_slot(autopool::occupied_count(conn).await?);
        let inserted = autopool::insert_position(conn, member, &slot, at).await?;
        if inserted {
            info!(
                member = %member,
                position = slot.position,
                level = slot.level,
                "Admitted to auto-pool"
            );
        }
        Ok(inserted)
    }
}
