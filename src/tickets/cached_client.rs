//! Ticket client with transparent caching, write-through and offline writes.

use color_eyre::Result;
use std::sync::Arc;

use crate::cache::{CacheLayer, CacheResult, CacheStore};
use crate::error::is_connectivity_failure;
use crate::offline::{MutationQueue, OptimisticApplier};
use crate::query::{Query, Surface, SurfaceRegistry};

use super::cache::{detail_scope, list_scope};
use super::client::TicketApi;
use super::mutation::{TicketMutation, LOCAL_ID_PREFIX};
use super::propagator::UpsertPropagator;
use super::types::{NewTicket, Ticket, TicketChanges, TicketFilter, UserRef};

/// Ticket client with transparent caching support.
///
/// Reads go through the cache-aside layer. Successful writes are propagated
/// to every cached surface. Writes that cannot reach the server are queued
/// and answered with an optimistic snapshot.
pub struct CachedTicketClient<S: CacheStore, Q: MutationQueue> {
  api: Arc<dyn TicketApi>,
  cache: CacheLayer<S>,
  propagator: Arc<UpsertPropagator<S>>,
  offline: OptimisticApplier<S, Q>,
}

impl<S: CacheStore, Q: MutationQueue> CachedTicketClient<S, Q> {
  pub fn new(
    api: Arc<dyn TicketApi>,
    cache: CacheLayer<S>,
    propagator: Arc<UpsertPropagator<S>>,
    offline: OptimisticApplier<S, Q>,
  ) -> Self {
    Self {
      api,
      cache,
      propagator,
      offline,
    }
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  pub fn offline(&self) -> &OptimisticApplier<S, Q> {
    &self.offline
  }

  /// Get a single ticket with caching.
  pub async fn get_ticket(&self, id: &str) -> Result<CacheResult<Ticket>> {
    self
      .cache
      .fetch(&detail_scope(id), || self.api.get_ticket(id))
      .await
  }

  /// List tickets matching `filter` with caching.
  pub async fn list_tickets(&self, filter: &TicketFilter) -> Result<CacheResult<Vec<Ticket>>> {
    self
      .cache
      .fetch(&list_scope(filter), || self.api.list_tickets(filter))
      .await
  }

  pub async fn update_ticket(&self, id: &str, changes: TicketChanges) -> Result<Ticket> {
    self
      .mutate(TicketMutation::Update {
        ticket_id: id.to_string(),
        changes,
      })
      .await
  }

  pub async fn assign_ticket(&self, id: &str, assignee: UserRef) -> Result<Ticket> {
    self
      .mutate(TicketMutation::Assign {
        ticket_id: id.to_string(),
        assignee,
      })
      .await
  }

  pub async fn resolve_ticket(&self, id: &str, note: Option<String>) -> Result<Ticket> {
    self
      .mutate(TicketMutation::Resolve {
        ticket_id: id.to_string(),
        note,
      })
      .await
  }

  pub async fn create_ticket(&self, draft: NewTicket) -> Result<Ticket> {
    self.mutate(TicketMutation::create(draft)).await
  }

  /// Send a write, falling back to the offline queue when the server
  /// cannot be reached.
  ///
  /// A ticket with writes still queued, or one the server has not assigned
  /// an id yet, only accepts further writes through the queue so replay
  /// sends them in issue order.
  pub async fn mutate(&self, mutation: TicketMutation) -> Result<Ticket> {
    if self.cache.is_offline() {
      return self.offline.apply(&mutation);
    }
    if self.behind_queue(&mutation) {
      tracing::debug!(
        ticket_id = mutation.ticket_id(),
        "Ticket has unsent writes, queueing behind them"
      );
      return self.offline.apply(&mutation);
    }

    let request = mutation.request();
    match self.cache.timed(|| self.api.send(&request)).await {
      Ok(ticket) => {
        self.propagator.upsert(&ticket, &[]);
        Ok(ticket)
      }
      Err(err) if is_connectivity_failure(&err) => {
        tracing::warn!(
          ticket_id = mutation.ticket_id(),
          error = %err,
          "Server unreachable, queueing mutation"
        );
        self.offline.apply(&mutation)
      }
      Err(err) => Err(err),
    }
  }

  fn behind_queue(&self, mutation: &TicketMutation) -> bool {
    if matches!(mutation, TicketMutation::Create { .. }) {
      return false;
    }
    let ticket_id = mutation.ticket_id();
    ticket_id.starts_with(LOCAL_ID_PREFIX) || self.offline.queue().has_pending(ticket_id)
  }
}

impl<S: CacheStore + 'static, Q: MutationQueue + 'static> CachedTicketClient<S, Q> {
  /// Ticket list view that refetches after the list surface is invalidated.
  pub fn list_query(
    self: &Arc<Self>,
    filter: TicketFilter,
    surfaces: &SurfaceRegistry,
  ) -> Query<CacheResult<Vec<Ticket>>> {
    let client = self.clone();
    Query::new(move || {
      let client = client.clone();
      let filter = filter.clone();
      async move {
        client
          .list_tickets(&filter)
          .await
          .map_err(|e| e.to_string())
      }
    })
    .bind(Surface::TicketList, surfaces.clone())
  }

  /// Detail view of one ticket, bound to its detail surface.
  pub fn detail_query(
    self: &Arc<Self>,
    id: &str,
    surfaces: &SurfaceRegistry,
  ) -> Query<CacheResult<Ticket>> {
    let client = self.clone();
    let ticket_id = id.to_string();
    Query::new(move || {
      let client = client.clone();
      let ticket_id = ticket_id.clone();
      async move { client.get_ticket(&ticket_id).await.map_err(|e| e.to_string()) }
    })
    .bind(Surface::TicketDetail(id.to_string()), surfaces.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, NetworkStatus, SqliteStorage};
  use crate::error::is_offline_miss;
  use crate::offline::{OfflineQueue, Replayer, SqliteMutationQueue};
  use crate::session::StaticSession;
  use crate::tickets::testing::FakeApi;
  use crate::tickets::{TicketStatus, TICKET_LIST};
  use chrono::Utc;

  struct Fixture {
    client: CachedTicketClient<SqliteStorage, SqliteMutationQueue>,
    api: Arc<FakeApi>,
    network: Arc<NetworkStatus>,
    queue: Arc<SqliteMutationQueue>,
    replayer: Replayer<SqliteStorage, SqliteMutationQueue>,
  }

  fn fixture() -> Fixture {
    let identity = Arc::new(StaticSession::new("alice", None));
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    let queue = Arc::new(SqliteMutationQueue::in_memory().unwrap());
    let network = Arc::new(NetworkStatus::new(false));
    let api = Arc::new(FakeApi::default());
    let propagator = Arc::new(UpsertPropagator::new(storage.clone(), identity.clone()));
    let applier = OptimisticApplier::new(
      OfflineQueue::new(queue.clone(), identity.clone()),
      storage.clone(),
      propagator.clone(),
    );
    let replayer = Replayer::new(
      OfflineQueue::new(queue.clone(), identity.clone()),
      api.clone(),
      propagator.clone(),
    );
    let cache = CacheLayer::new(storage, identity, network.clone());

    Fixture {
      client: CachedTicketClient::new(api.clone(), cache, propagator, applier),
      api,
      network,
      queue,
      replayer,
    }
  }

  fn ticket(id: &str, title: &str) -> Ticket {
    let mut ticket = Ticket::skeleton(id, Utc::now());
    ticket.title = title.to_string();
    ticket
  }

  #[tokio::test]
  async fn test_read_through_then_offline() {
    let f = fixture();
    f.api.insert(ticket("abc", "Printer"));

    let online = f.client.list_tickets(&TicketFilter::default()).await.unwrap();
    assert_eq!(online.source, CacheSource::Network);

    f.network.set_offline(true);
    let offline = f.client.list_tickets(&TicketFilter::default()).await.unwrap();
    assert_eq!(offline.source, CacheSource::Offline);
    assert_eq!(offline.data[0].title, "Printer");
    assert_eq!(f.api.fetches(), 1);

    let miss = f.client.get_ticket("never-seen").await.unwrap_err();
    assert!(is_offline_miss(&miss));
  }

  #[tokio::test]
  async fn test_online_write_propagates_to_lists() {
    let f = fixture();
    f.api.insert(ticket("abc", "Printer"));
    f.api.insert(ticket("xyz", "Monitor"));
    f.client.list_tickets(&TicketFilter::default()).await.unwrap();

    let resolved = f.client.resolve_ticket("abc", None).await.unwrap();
    assert_eq!(resolved.status, TicketStatus::Resolved);
    assert!(!resolved.pending_sync);

    f.network.set_offline(true);
    let list = f.client.list_tickets(&TicketFilter::default()).await.unwrap();
    let abc = list.data.iter().find(|t| t.id == "abc").unwrap();
    assert_eq!(abc.status, TicketStatus::Resolved);
    let detail = f.client.get_ticket("abc").await.unwrap();
    assert_eq!(detail.data.status, TicketStatus::Resolved);
    assert!(f.queue.pending("alice").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_offline_write_is_queued_without_network() {
    let f = fixture();
    f.api.insert(ticket("abc", "Printer"));
    f.client.get_ticket("abc").await.unwrap();
    f.network.set_offline(true);

    let optimistic = f
      .client
      .update_ticket(
        "abc",
        TicketChanges {
          priority: Some("high".to_string()),
          ..TicketChanges::default()
        },
      )
      .await
      .unwrap();

    assert!(optimistic.pending_sync);
    assert_eq!(optimistic.priority.as_deref(), Some("high"));
    assert!(f.api.sent().is_empty());
    assert_eq!(f.queue.pending("alice").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_unreachable_server_falls_back_to_queue() {
    let f = fixture();
    f.api.go_offline();

    let optimistic = f.client.resolve_ticket("abc", None).await.unwrap();

    assert!(optimistic.pending_sync);
    assert_eq!(f.queue.pending("alice").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_rejected_write_propagates_error() {
    let f = fixture();
    f.api.insert(ticket("abc", "Printer"));
    f.api.reject_endpoint("/tickets/abc/resolve");

    assert!(f.client.resolve_ticket("abc", None).await.is_err());
    assert!(f.queue.pending("alice").unwrap().is_empty());
    assert!(f
      .client
      .cache()
      .cached::<Vec<Ticket>>(&crate::cache::Scope::new(TICKET_LIST))
      .is_none());
  }

  fn describe(text: &str) -> TicketChanges {
    TicketChanges {
      description: Some(text.to_string()),
      ..TicketChanges::default()
    }
  }

  #[tokio::test]
  async fn test_online_write_queues_behind_pending_writes() {
    let f = fixture();
    f.api.insert(ticket("abc", "Printer"));
    f.network.set_offline(true);
    f.client.update_ticket("abc", describe("first")).await.unwrap();

    f.network.set_offline(false);
    let second = f.client.update_ticket("abc", describe("second")).await.unwrap();

    assert!(second.pending_sync);
    assert_eq!(second.description.as_deref(), Some("second"));
    assert!(f.api.sent().is_empty());
    assert_eq!(f.queue.pending("alice").unwrap().len(), 2);

    f.replayer.replay_pending().await.unwrap();
    let server = f.api.get_ticket("abc").await.unwrap();
    assert_eq!(server.description.as_deref(), Some("second"));
  }

  #[tokio::test]
  async fn test_online_write_to_unsent_ticket_is_queued() {
    let f = fixture();
    f.network.set_offline(true);
    let created = f
      .client
      .create_ticket(NewTicket {
        title: "Badge reader".to_string(),
        ..NewTicket::default()
      })
      .await
      .unwrap();

    f.network.set_offline(false);
    let resolved = f.client.resolve_ticket(&created.id, None).await.unwrap();

    assert_eq!(resolved.status, TicketStatus::Resolved);
    assert!(resolved.pending_sync);
    assert!(f.api.sent().is_empty());

    let summary = f.replayer.replay_pending().await.unwrap();
    assert_eq!(summary.confirmed, 2);
    let endpoints: Vec<String> = f.api.sent().iter().map(|r| r.endpoint.clone()).collect();
    assert_eq!(endpoints, vec!["/tickets", "/tickets/srv-1/resolve"]);
    assert_eq!(
      f.api.get_ticket("srv-1").await.unwrap().status,
      TicketStatus::Resolved
    );
  }

  #[tokio::test]
  async fn test_online_create_is_sent_directly() {
    let f = fixture();

    let created = f
      .client
      .create_ticket(NewTicket {
        title: "Projector".to_string(),
        ..NewTicket::default()
      })
      .await
      .unwrap();

    assert_eq!(created.id, "srv-1");
    assert!(!created.pending_sync);
    assert!(f.queue.pending("alice").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_list_query_refetches_after_invalidation() {
    let f = fixture();
    f.api.insert(ticket("abc", "Printer"));
    let client = Arc::new(f.client);
    let surfaces = SurfaceRegistry::new();
    let mut list = client.list_query(TicketFilter::default(), &surfaces);

    assert!(list.ensure_fresh());
    list.settle().await;
    assert_eq!(list.data().unwrap().data.len(), 1);

    f.api.insert(ticket("xyz", "Monitor"));
    assert!(!list.ensure_fresh());

    surfaces.invalidate(&Surface::TicketList);
    surfaces.invalidate(&Surface::TicketList);
    assert!(list.ensure_fresh());
    list.settle().await;

    assert_eq!(list.data().unwrap().data.len(), 2);
    assert_eq!(f.api.fetches(), 2);
  }

  #[tokio::test]
  async fn test_detail_query_tracks_its_own_ticket() {
    let f = fixture();
    f.api.insert(ticket("abc", "Printer"));
    let client = Arc::new(f.client);
    let surfaces = SurfaceRegistry::new();
    let mut detail = client.detail_query("abc", &surfaces);
    let mut other = client.detail_query("xyz", &surfaces);

    detail.ensure_fresh();
    detail.settle().await;
    other.ensure_fresh();
    other.settle().await;
    assert_eq!(detail.data().unwrap().data.title, "Printer");
    assert!(other.error().is_some());

    surfaces.invalidate(&Surface::TicketDetail("abc".to_string()));
    assert!(detail.is_stale());
    assert!(!other.is_stale());

    f.network.set_offline(true);
    detail.ensure_fresh();
    detail.settle().await;
    assert_eq!(detail.data().unwrap().source, CacheSource::Offline);
  }
}
