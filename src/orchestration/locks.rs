//! Per-member exclusive locks covering every member one event touches.
//!
//! Locks are always taken deepest member first, ties by id. Depth never changes
//! after placement, so any two events agree on the order and cannot deadlock.

use crate::domain::MemberId;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

const PRUNE_THRESHOLD: usize = 4096;

#[derive(Default)]
pub struct ChainLocks {
    slots: Mutex<HashMap<MemberId, Arc<AsyncMutex<()>>>>,
}

/// Held locks; released on drop.
pub struct ChainGuard {
    members: Vec<MemberId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ChainGuard {
    /// Members in the order they were locked.
    pub fn members(&self) -> &[MemberId] {
        &self.members
    }
}

/// Sort and dedup `(member, depth)` pairs into lock order.
pub fn lock_order(mut members: Vec<(MemberId, u32)>) -> Vec<MemberId> {
    members.sort_by(|(a, da), (b, db)| (Reverse(*da), a).cmp(&(Reverse(*db), b)));
    members.dedup_by(|(a, _), (b, _)| a == b);
    members.into_iter().map(|(m, _)| m).collect()
}

impl ChainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, member: &MemberId) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.len() > PRUNE_THRESHOLD {
            slots.retain(|_, m| Arc::strong_count(m) > 1);
        }
        slots.entry(member.clone()).or_default().clone()
    }

    pub async fn acquire(&self, members: Vec<(MemberId, u32)>) -> ChainGuard {
        let ordered = lock_order(members);
        let mut guards = Vec::with_capacity(ordered.len());
        for member in &ordered {
            guards.push(self.slot(member).lock_owned().await);
        }
        trace!(count = ordered.len(), "Chain locks acquired");
        ChainGuard {
            members: ordered,
            _guards: guards,
        }
    }
}
