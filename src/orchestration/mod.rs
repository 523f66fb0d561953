//! Event processing: idempotency, chain locking and transactional writes.
//!
//! Each public operation on [`CompensationEngine`] is one triggering event or
//! repair operation. See `engine.rs` for the shared retry and projection plumbing.

pub mod autopool;
pub mod engine;
pub mod installments;
pub mod locks;
pub mod members;
pub mod recompute;

pub use autopool::DistributionReport;
pub use engine::{CompensationEngine, EngineError, EventOutcome};
pub use installments::InstallmentReport;
pub use locks::{ChainGuard, ChainLocks};
