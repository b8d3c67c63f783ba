//! Drains the mutation queue once the server is reachable again.

use chrono::Utc;
use color_eyre::{Report, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{is_connectivity_failure, RemoteError};
use crate::tickets::{Ticket, TicketApi, UpsertPropagator};

use super::patch::apply_patch;
use super::queue::{MutationQueue, OfflineQueue};

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
  pub confirmed: usize,
  pub rejected: usize,
  /// Entries still queued after the pass.
  pub remaining: usize,
  /// The pass stopped early because the server became unreachable.
  pub interrupted: bool,
  /// Server ids of tickets with no queued writes left.
  pub synced_tickets: Vec<String>,
}

/// Replays queued writes in FIFO order.
///
/// A rejected write stays queued and holds back later writes for the same
/// ticket; other tickets continue. A connectivity failure ends the pass.
pub struct Replayer<S: CacheStore, Q: MutationQueue> {
  queue: OfflineQueue<Q>,
  api: Arc<dyn TicketApi>,
  propagator: Arc<UpsertPropagator<S>>,
  request_timeout: Duration,
}

impl<S: CacheStore, Q: MutationQueue> Replayer<S, Q> {
  pub fn new(
    queue: OfflineQueue<Q>,
    api: Arc<dyn TicketApi>,
    propagator: Arc<UpsertPropagator<S>>,
  ) -> Self {
    Self {
      queue,
      api,
      propagator,
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
    }
  }

  pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
    self.request_timeout = request_timeout;
    self
  }

  pub async fn replay_pending(&self) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    let mut blocked: HashSet<String> = HashSet::new();
    // local id -> server id, for tickets created offline
    let mut server_ids: HashMap<String, String> = HashMap::new();

    for pending in self.queue.pending()? {
      // Entries read before a create was confirmed in this pass still carry
      // the local id; the stored copies were already retargeted.
      let pending = match server_ids.get(&pending.ticket_id) {
        Some(server_id) => pending.retarget(server_id),
        None => pending,
      };
      if blocked.contains(&pending.ticket_id) {
        continue;
      }

      let request = pending.request();
      let result = match tokio::time::timeout(self.request_timeout, self.api.send(&request)).await {
        Ok(result) => result,
        Err(_) => Err(Report::new(RemoteError::Timeout(self.request_timeout))),
      };

      match result {
        Ok(confirmed) => {
          summary.confirmed += 1;

          let reassigned = !confirmed.id.is_empty() && confirmed.id != pending.ticket_id;
          let ticket_id = if reassigned {
            let moved = self
              .queue
              .confirm_create(&pending.id, &pending.ticket_id, &confirmed.id)?;
            tracing::info!(
              local_id = %pending.ticket_id,
              ticket_id = %confirmed.id,
              retargeted = moved,
              "Offline-created ticket confirmed"
            );
            server_ids.insert(pending.ticket_id.clone(), confirmed.id.clone());
            confirmed.id.clone()
          } else {
            self.queue.remove(&pending.id)?;
            pending.ticket_id.clone()
          };

          let snapshot = self.rebase(&ticket_id, confirmed);
          if reassigned {
            self.propagator.upsert_replacing(&pending.ticket_id, &snapshot);
          } else {
            self.propagator.upsert(&snapshot, &[]);
          }
          if !snapshot.pending_sync && !summary.synced_tickets.contains(&snapshot.id) {
            summary.synced_tickets.push(snapshot.id);
          }
        }
        Err(err) if is_connectivity_failure(&err) => {
          tracing::warn!(error = %err, "Server unreachable, pausing replay");
          summary.interrupted = true;
          break;
        }
        Err(err) => {
          tracing::warn!(
            ticket_id = %pending.ticket_id,
            mutation_id = %pending.id,
            error = %err,
            "Server rejected queued mutation, keeping it queued"
          );
          summary.rejected += 1;
          blocked.insert(pending.ticket_id.clone());
        }
      }
    }

    summary.remaining = self.queue.pending()?.len();
    tracing::info!(
      confirmed = summary.confirmed,
      rejected = summary.rejected,
      remaining = summary.remaining,
      "Replay pass finished"
    );
    Ok(summary)
  }

  /// Re-apply writes still queued for the ticket on top of the server's
  /// snapshot so later optimistic edits stay visible.
  fn rebase(&self, ticket_id: &str, confirmed: Ticket) -> Ticket {
    let remaining = self.queue.pending_for(ticket_id).unwrap_or_else(|err| {
      tracing::warn!(ticket_id, error = %err, "Failed to read remaining mutations");
      Vec::new()
    });

    let now = Utc::now();
    remaining
      .iter()
      .fold(confirmed, |ticket, pending| apply_patch(&ticket, &pending.mutation, now))
  }
}
