//! Domain types for the compensation engine.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Identifiers and primitives: MemberId, PackageId, TimeMs, Side
//! - Members, packages, installments and ledger entries
//! - Triggering events with deterministic idempotency keys
//! - The versioned compensation plan

pub mod decimal;
pub mod earning;
pub mod event;
pub mod member;
pub mod package;
pub mod plan;
pub mod primitives;

pub use decimal::Decimal;
pub use earning::{Credit, Earning, EarningType};
pub use event::{distribution_event_key, InstallmentPaid};
pub use member::{MemberAggregate, Placement, TreeNode};
pub use package::{Installment, InstallmentStatus, Package, PackageStatus, PackageTier};
pub use plan::{CompensationPlan, PlanError, SpilloverPolicy, LEVEL_CEILING};
pub use primitives::{IdParseError, MemberId, PackageId, Side, TimeMs};
