//! Pure computation engines for deterministic compensation logic.
//!
//! Nothing in here touches storage; the orchestration layer loads inputs and
//! persists outputs around these functions.

pub mod autopool;
pub mod binary;
pub mod calculator;
pub mod installment;
pub mod level;
pub mod projector;
pub mod tree;

pub use autopool::{PoolPosition, PoolSlot, PoolSplit};
pub use binary::{CarryForward, MatchCycle, TeamCounts};
pub use calculator::{AncestorState, CompensationCalculator, CompensationOutcome, EventContext};
pub use installment::{InstallmentError, PaymentDecision};
pub use projector::ProjectionInputs;
pub use tree::{ChainStep, Link, PathStep, TreeError, TreeView, Walk};
