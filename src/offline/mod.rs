//! Offline writes: durable queue, optimistic patches and replay.

mod applier;
mod patch;
mod queue;
mod replay;

pub use applier::OptimisticApplier;
pub use patch::apply_patch;
pub use queue::{MutationQueue, OfflineQueue, PendingMutation, SqliteMutationQueue};
pub use replay::{ReplaySummary, Replayer};
