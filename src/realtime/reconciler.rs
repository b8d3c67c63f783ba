//! Turns validated push events into lazy invalidation and notifications.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::offline::{MutationQueue, OfflineQueue, ReplaySummary};
use crate::query::{Surface, SurfaceRegistry};

use super::events::{ActivityEvent, PushEvent};

/// How many activity ids are remembered for deduplication.
const RECENT_ACTIVITY_CAPACITY: usize = 256;

/// User-facing notices raised by the realtime layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
  Activity(ActivityEvent),
  /// The channel is retrying after a non-auth failure.
  ServiceDegraded { message: String },
  /// Credential refresh failed and the user was signed out.
  SessionEnded,
}

/// Answers whether a ticket still has writes waiting for replay.
pub trait PendingLookup: Send + Sync {
  fn has_pending(&self, ticket_id: &str) -> bool;
}

impl<Q: MutationQueue> PendingLookup for OfflineQueue<Q> {
  fn has_pending(&self, ticket_id: &str) -> bool {
    OfflineQueue::has_pending(self, ticket_id)
  }
}

/// Bounded set of recently seen ids; the oldest is forgotten first.
#[derive(Debug)]
struct RecentIds {
  capacity: usize,
  order: VecDeque<String>,
  seen: HashSet<String>,
}

impl RecentIds {
  fn new(capacity: usize) -> Self {
    Self {
      capacity,
      order: VecDeque::with_capacity(capacity),
      seen: HashSet::with_capacity(capacity),
    }
  }

  /// Returns false if `id` was already seen.
  fn insert(&mut self, id: &str) -> bool {
    if self.seen.contains(id) {
      return false;
    }
    if self.order.len() == self.capacity {
      if let Some(oldest) = self.order.pop_front() {
        self.seen.remove(&oldest);
      }
    }
    self.order.push_back(id.to_string());
    self.seen.insert(id.to_string());
    true
  }
}

/// Marks surfaces stale when other actors change tickets.
///
/// Nothing is refetched here; the next read of a stale surface goes back to
/// the server. While a ticket still has queued local writes, its detail
/// surface is left alone so the optimistic snapshot stays visible; the
/// invalidation is applied once replay reports the ticket synced.
pub struct Reconciler {
  surfaces: SurfaceRegistry,
  pending: Option<Arc<dyn PendingLookup>>,
  notifications: mpsc::UnboundedSender<Notification>,
  recent_activity: RecentIds,
  deferred: HashSet<String>,
}

impl Reconciler {
  pub fn new(surfaces: SurfaceRegistry, notifications: mpsc::UnboundedSender<Notification>) -> Self {
    Self {
      surfaces,
      pending: None,
      notifications,
      recent_activity: RecentIds::new(RECENT_ACTIVITY_CAPACITY),
      deferred: HashSet::new(),
    }
  }

  pub fn with_pending(mut self, pending: Arc<dyn PendingLookup>) -> Self {
    self.pending = Some(pending);
    self
  }

  /// Apply one event. Returns the surfaces that were marked stale.
  pub fn handle(&mut self, event: &PushEvent) -> Vec<Surface> {
    match event {
      PushEvent::TicketChanged(changed) => self.invalidate_ticket(&changed.ticket_id),
      PushEvent::Activity(activity) => {
        if !self.recent_activity.insert(&activity.id) {
          tracing::debug!(activity_id = %activity.id, "Duplicate activity event ignored");
          return Vec::new();
        }

        let mut marked = self.invalidate_ticket(&activity.ticket_id);
        for surface in [
          Surface::Activity(Some(activity.ticket_id.clone())),
          Surface::Activity(None),
        ] {
          if self.surfaces.invalidate(&surface) {
            marked.push(surface);
          }
        }
        self.notify(Notification::Activity(activity.clone()));
        marked
      }
    }
  }

  /// Called once replay has confirmed every queued write for a ticket.
  /// Applies a deferred detail invalidation, if any.
  pub fn on_ticket_synced(&mut self, ticket_id: &str) -> bool {
    if !self.deferred.remove(ticket_id) {
      return false;
    }
    self
      .surfaces
      .invalidate(&Surface::TicketDetail(ticket_id.to_string()))
  }

  /// Flush deferred invalidations for every ticket a replay pass synced.
  pub fn apply_replay(&mut self, summary: &ReplaySummary) -> usize {
    summary
      .synced_tickets
      .iter()
      .filter(|id| self.on_ticket_synced(id))
      .count()
  }

  pub fn is_deferred(&self, ticket_id: &str) -> bool {
    self.deferred.contains(ticket_id)
  }

  pub fn notify(&self, notification: Notification) {
    if self.notifications.send(notification).is_err() {
      tracing::debug!("Notification receiver dropped");
    }
  }

  fn invalidate_ticket(&mut self, ticket_id: &str) -> Vec<Surface> {
    let mut marked = Vec::new();
    for surface in [Surface::TicketList, Surface::TicketStats, Surface::Reports] {
      if self.surfaces.invalidate(&surface) {
        marked.push(surface);
      }
    }

    let has_pending = self
      .pending
      .as_ref()
      .is_some_and(|pending| pending.has_pending(ticket_id));
    if has_pending {
      tracing::debug!(ticket_id, "Ticket has queued writes, deferring detail invalidation");
      self.deferred.insert(ticket_id.to_string());
    } else {
      let detail = Surface::TicketDetail(ticket_id.to_string());
      if self.surfaces.invalidate(&detail) {
        marked.push(detail);
      }
    }

    marked
  }
}
