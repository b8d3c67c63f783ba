//! Records offline writes and synthesizes their as-if-succeeded snapshots.

use chrono::Utc;
use color_eyre::Result;
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::tickets::{detail_scope, Ticket, TicketMutation, UpsertPropagator, UserRef};

use super::patch::apply_patch;
use super::queue::{MutationQueue, OfflineQueue, PendingMutation};

/// Handles a write that cannot reach the server.
///
/// Callers must not run two `apply` calls for the same ticket concurrently;
/// each one reads the snapshot the previous one wrote.
pub struct OptimisticApplier<S: CacheStore, Q: MutationQueue> {
  queue: OfflineQueue<Q>,
  storage: Arc<S>,
  propagator: Arc<UpsertPropagator<S>>,
}

impl<S: CacheStore, Q: MutationQueue> OptimisticApplier<S, Q> {
  pub fn new(
    queue: OfflineQueue<Q>,
    storage: Arc<S>,
    propagator: Arc<UpsertPropagator<S>>,
  ) -> Self {
    Self {
      queue,
      storage,
      propagator,
    }
  }

  pub fn queue(&self) -> &OfflineQueue<Q> {
    &self.queue
  }

  /// Queue `mutation` and return the optimistic snapshot.
  ///
  /// The queue append is the durability boundary: if it fails, nothing is
  /// patched and the error is returned.
  pub fn apply(&self, mutation: &TicketMutation) -> Result<Ticket> {
    let now = Utc::now();
    let pending = PendingMutation::record(mutation, now);
    self.queue.enqueue(&pending)?;

    let current = self
      .current_snapshot(mutation.ticket_id())
      .unwrap_or_else(|| self.skeleton(mutation, now));

    let ticket = apply_patch(&current, mutation, now);
    self.propagator.upsert(&ticket, &[]);

    tracing::info!(
      ticket_id = %ticket.id,
      kind = mutation.kind().as_str(),
      mutation_id = %pending.id,
      "Queued offline mutation"
    );
    Ok(ticket)
  }

  fn current_snapshot(&self, ticket_id: &str) -> Option<Ticket> {
    let owner = self.queue.owner_id()?;
    let entry = match self.storage.read(&owner, &detail_scope(ticket_id)) {
      Ok(entry) => entry?,
      Err(err) => {
        tracing::warn!(ticket_id, error = %err, "Failed to read cached ticket");
        return None;
      }
    };
    serde_json::from_value(entry.payload)
      .map_err(|err| tracing::warn!(ticket_id, error = %err, "Cached ticket has unexpected shape"))
      .ok()
  }

  fn skeleton(&self, mutation: &TicketMutation, now: chrono::DateTime<Utc>) -> Ticket {
    let mut ticket = Ticket::skeleton(mutation.ticket_id(), now);
    if matches!(mutation, TicketMutation::Create { .. }) {
      ticket.creator = self.queue.owner_id().map(|id| UserRef {
        id,
        display_name: None,
      });
    }
    ticket
  }
}
