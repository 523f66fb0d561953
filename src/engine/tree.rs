//! Binary placement rule and ancestor walks over loaded tree links.
//!
//! Placement is immutable and every member has at most one parent, so walks
//! terminate structurally. The visited set only detects corrupted data.

use crate::domain::{MemberId, Side, SpilloverPolicy};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("cycle detected at member {0}")]
    CycleDetected(MemberId),
    #[error("placement undefined for referral #{referral_number} of sponsor {sponsor}")]
    PlacementUndefined {
        sponsor: MemberId,
        referral_number: u32,
    },
}

/// Parent and sponsor pointers for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: MemberId,
    pub sponsor: Option<MemberId>,
    pub parent: Option<MemberId>,
    pub side: Option<Side>,
    pub depth: u32,
}

/// One binary ancestor of a starting member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub ancestor: MemberId,
    /// The ancestor's leg that contains the starting member.
    pub side: Side,
    /// Tree depth of the ancestor, used for bottom-up lock ordering.
    pub depth: u32,
}

/// One sponsor-chain ancestor, `level` 1 being the direct sponsor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStep {
    pub ancestor: MemberId,
    pub level: u32,
}

/// Result of a walk; `orphaned` names the member whose upward link could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Walk<T> {
    pub steps: Vec<T>,
    pub orphaned: Option<MemberId>,
}

// Derived `Default` would demand `T: Default`, which the step types lack.
impl<T> Default for Walk<T> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            orphaned: None,
        }
    }
}

/// Leg a sponsor's next direct referral goes to, given referrals already placed.
pub fn referral_side(existing_referrals: u32) -> Side {
    if existing_referrals % 2 == 0 {
        Side::Left
    } else {
        Side::Right
    }
}

/// Decide the leg for a new referral, honoring the spillover policy.
pub fn placement_side(
    policy: SpilloverPolicy,
    sponsor: &MemberId,
    existing_referrals: u32,
) -> Result<Side, TreeError> {
    if existing_referrals >= 2 && policy == SpilloverPolicy::Reject {
        return Err(TreeError::PlacementUndefined {
            sponsor: sponsor.clone(),
            referral_number: existing_referrals + 1,
        });
    }
    Ok(referral_side(existing_referrals))
}

/// Pick the binary parent from the sponsor and the occupied outer leg below it.
///
/// `leg` lists the members already occupying the chosen leg's outermost edge under the
/// sponsor, top-down, each with its depth. The new member hangs off the last one.
pub fn place_on_leg(
    sponsor: &MemberId,
    sponsor_depth: u32,
    leg: &[(MemberId, u32)],
) -> Result<(MemberId, u32), TreeError> {
    let mut seen = HashSet::new();
    seen.insert(sponsor.clone());
    for (id, _) in leg {
        if !seen.insert(id.clone()) {
            return Err(TreeError::CycleDetected(id.clone()));
        }
    }
    match leg.last() {
        Some((parent, depth)) => Ok((parent.clone(), depth + 1)),
        None => Ok((sponsor.clone(), sponsor_depth + 1)),
    }
}

/// In-memory view over the links of one ancestor path.
#[derive(Debug, Clone, Default)]
pub struct TreeView {
    links: HashMap<MemberId, Link>,
}

impl TreeView {
    pub fn new(links: impl IntoIterator<Item = Link>) -> Self {
        Self {
            links: links.into_iter().map(|l| (l.id.clone(), l)).collect(),
        }
    }

    pub fn get(&self, id: &MemberId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Binary ancestors of `start`, nearest first, up to the root.
    pub fn binary_path(&self, start: &MemberId) -> Result<Walk<PathStep>, TreeError> {
        let mut walk = Walk::default();
        let mut visited = HashSet::new();
        visited.insert(start.clone());

        let Some(mut current) = self.links.get(start) else {
            walk.orphaned = Some(start.clone());
            return Ok(walk);
        };

        while let (Some(parent_id), Some(side)) = (&current.parent, current.side) {
            if !visited.insert(parent_id.clone()) {
                return Err(TreeError::CycleDetected(parent_id.clone()));
            }
            let Some(parent) = self.links.get(parent_id) else {
                warn!(member = %current.id, parent = %parent_id, "Orphaned ancestor in binary path");
                walk.orphaned = Some(parent_id.clone());
                break;
            };
            walk.steps.push(PathStep {
                ancestor: parent_id.clone(),
                side,
                depth: parent.depth,
            });
            current = parent;
        }

        Ok(walk)
    }

    /// Sponsor chain above `start`, at most `max_levels` deep.
    pub fn sponsor_chain(
        &self,
        start: &MemberId,
        max_levels: u32,
    ) -> Result<Walk<ChainStep>, TreeError> {
        let mut walk = Walk::default();
        let mut visited = HashSet::new();
        visited.insert(start.clone());

        let Some(mut current) = self.links.get(start) else {
            walk.orphaned = Some(start.clone());
            return Ok(walk);
        };

        let mut level = 1;
        while level <= max_levels {
            let Some(sponsor_id) = &current.sponsor else {
                break;
            };
            if !visited.insert(sponsor_id.clone()) {
                return Err(TreeError::CycleDetected(sponsor_id.clone()));
            }
            let Some(sponsor) = self.links.get(sponsor_id) else {
                warn!(member = %current.id, sponsor = %sponsor_id, "Orphaned ancestor in sponsor chain");
                walk.orphaned = Some(sponsor_id.clone());
                break;
            };
            walk.steps.push(ChainStep {
                ancestor: sponsor_id.clone(),
                level,
            });
            current = sponsor;
            level += 1;
        }

        Ok(walk)
    }
}
