//! Surface-bound queries with lazy invalidation.
//!
//! A UI view reads through a `Query<T>` bound to a `Surface`. Push events
//! bump the surface's generation in the shared `SurfaceRegistry`; the query
//! notices on its next `ensure_fresh` and refetches once, so a burst of
//! events costs a single read.
//!
//! # Example
//!
//! ```ignore
//! let mut list = client.list_query(TicketFilter::default(), &surfaces);
//!
//! // Each tick
//! list.ensure_fresh();
//! list.poll();
//! ```

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// A UI-facing data surface that push events can mark stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Surface {
  /// The general ticket list
  TicketList,
  TicketDetail(String),
  /// Dashboard counters derived from tickets
  TicketStats,
  Reports,
  /// Activity timeline for one ticket, or the global one
  Activity(Option<String>),
}

/// Shared invalidation generations for registered surfaces.
#[derive(Debug, Clone, Default)]
pub struct SurfaceRegistry {
  generations: Arc<Mutex<HashMap<Surface, u64>>>,
}

impl SurfaceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start tracking `surface`; returns its current generation.
  pub fn register(&self, surface: &Surface) -> u64 {
    match self.generations.lock() {
      Ok(mut generations) => *generations.entry(surface.clone()).or_insert(0),
      Err(_) => 0,
    }
  }

  pub fn generation(&self, surface: &Surface) -> Option<u64> {
    self
      .generations
      .lock()
      .ok()
      .and_then(|generations| generations.get(surface).copied())
  }

  /// Mark `surface` stale. Unregistered surfaces are ignored; returns
  /// whether anything was marked.
  pub fn invalidate(&self, surface: &Surface) -> bool {
    let Ok(mut generations) = self.generations.lock() else {
      return false;
    };
    match generations.get_mut(surface) {
      Some(generation) => {
        *generation += 1;
        true
      }
      None => false,
    }
  }
}

#[derive(Debug, Clone)]
pub enum QueryState<T> {
  Idle,
  Loading,
  Ready(T),
  Failed(String),
}

type Fetcher<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, String>> + Send + Sync>;

struct Binding {
  surface: Surface,
  registry: SurfaceRegistry,
}

struct InFlight<T> {
  result: oneshot::Receiver<Result<T, String>>,
  /// Surface generation when the fetch started.
  generation: u64,
}

/// Latest result of a fetcher plus the surface generation it reflects.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: Fetcher<T>,
  binding: Option<Binding>,
  in_flight: Option<InFlight<T>>,
  loaded_generation: u64,
}

impl<T: Send + 'static> Query<T> {
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      binding: None,
      in_flight: None,
      loaded_generation: 0,
    }
  }

  /// Invalidating `surface` in `registry` marks this query stale.
  pub fn bind(mut self, surface: Surface, registry: SurfaceRegistry) -> Self {
    self.loaded_generation = registry.register(&surface);
    self.binding = Some(Binding { surface, registry });
    self
  }

  pub fn surface(&self) -> Option<&Surface> {
    self.binding.as_ref().map(|b| &b.surface)
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    match &self.state {
      QueryState::Ready(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match &self.state {
      QueryState::Failed(e) => Some(e),
      _ => None,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.in_flight.is_some()
  }

  /// Whether the bound surface was invalidated after the current result
  /// was fetched. Unbound queries never go stale.
  pub fn is_stale(&self) -> bool {
    if matches!(self.state, QueryState::Idle | QueryState::Loading) {
      return false;
    }
    self.current_generation() > self.loaded_generation
  }

  /// Fetch if nothing was loaded yet or the surface went stale. Returns
  /// whether a fetch started.
  pub fn ensure_fresh(&mut self) -> bool {
    if self.is_loading() {
      return false;
    }
    if matches!(self.state, QueryState::Idle) || self.is_stale() {
      self.refresh();
      return true;
    }
    false
  }

  /// Start a fetch now, abandoning one already in flight.
  pub fn refresh(&mut self) {
    let (tx, rx) = oneshot::channel();
    let future = (self.fetcher)();
    tokio::spawn(async move {
      // Receiver is gone if the fetch was abandoned
      let _ = tx.send(future.await);
    });

    self.in_flight = Some(InFlight {
      result: rx,
      generation: self.current_generation(),
    });
    if !matches!(self.state, QueryState::Ready(_)) {
      self.state = QueryState::Loading;
    }
  }

  /// Take a finished result without waiting. Returns whether the state
  /// changed.
  pub fn poll(&mut self) -> bool {
    let Some(in_flight) = self.in_flight.as_mut() else {
      return false;
    };
    match in_flight.result.try_recv() {
      Ok(result) => self.finish(Ok(result)),
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => self.finish(Err(())),
    }
  }

  /// Wait for the fetch in flight, if any.
  pub async fn settle(&mut self) -> bool {
    let Some(in_flight) = self.in_flight.as_mut() else {
      return false;
    };
    let outcome = (&mut in_flight.result).await.map_err(|_| ());
    self.finish(outcome)
  }

  fn finish(&mut self, outcome: Result<Result<T, String>, ()>) -> bool {
    let Some(in_flight) = self.in_flight.take() else {
      return false;
    };
    match outcome {
      Ok(Ok(data)) => {
        self.state = QueryState::Ready(data);
        // Invalidations during the fetch still count afterwards
        self.loaded_generation = in_flight.generation;
      }
      Ok(Err(error)) => self.state = QueryState::Failed(error),
      Err(()) => self.state = QueryState::Failed("Query was cancelled".to_string()),
    }
    true
  }

  fn current_generation(&self) -> u64 {
    self
      .binding
      .as_ref()
      .and_then(|b| b.registry.generation(&b.surface))
      .unwrap_or(self.loaded_generation)
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("surface", &self.binding.as_ref().map(|b| &b.surface))
      .field("loaded_generation", &self.loaded_generation)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn counting(registry: &SurfaceRegistry, surface: Surface) -> (Query<u32>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let query = Query::new(move || {
      let counter = counter.clone();
      async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
    })
    .bind(surface, registry.clone());
    (query, calls)
  }

  #[tokio::test]
  async fn test_first_ensure_fresh_loads() {
    let registry = SurfaceRegistry::new();
    let (mut query, calls) = counting(&registry, Surface::TicketList);

    assert!(query.ensure_fresh());
    assert!(query.is_loading());
    assert!(query.settle().await);

    assert_eq!(query.data(), Some(&0));
    assert!(!query.ensure_fresh());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_burst_of_invalidations_costs_one_fetch() {
    let registry = SurfaceRegistry::new();
    let (mut query, calls) = counting(&registry, Surface::TicketList);
    query.ensure_fresh();
    query.settle().await;

    for _ in 0..5 {
      registry.invalidate(&Surface::TicketList);
    }
    assert!(query.is_stale());
    assert!(query.ensure_fresh());
    assert!(!query.ensure_fresh());
    query.settle().await;

    assert_eq!(query.data(), Some(&1));
    assert!(!query.is_stale());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_other_surfaces_do_not_affect_query() {
    let registry = SurfaceRegistry::new();
    let (mut query, _) = counting(&registry, Surface::TicketDetail("abc".to_string()));
    registry.register(&Surface::TicketDetail("xyz".to_string()));
    query.ensure_fresh();
    query.settle().await;

    registry.invalidate(&Surface::TicketDetail("xyz".to_string()));

    assert!(!query.is_stale());
  }

  #[tokio::test]
  async fn test_invalidation_during_fetch_keeps_query_stale() {
    let registry = SurfaceRegistry::new();
    let (mut query, _) = counting(&registry, Surface::TicketList);

    query.ensure_fresh();
    registry.invalidate(&Surface::TicketList);
    query.settle().await;

    assert!(query.is_stale());
  }

  #[tokio::test]
  async fn test_failure_is_reported() {
    let mut query: Query<u32> = Query::new(|| async { Err("unavailable offline".to_string()) });

    query.ensure_fresh();
    query.settle().await;

    assert_eq!(query.error(), Some("unavailable offline"));
    assert!(!query.is_loading());
  }

  #[test]
  fn test_unregistered_surface_invalidation_is_noop() {
    let registry = SurfaceRegistry::new();
    assert!(!registry.invalidate(&Surface::TicketDetail("ghost".to_string())));
    assert_eq!(registry.generation(&Surface::TicketDetail("ghost".to_string())), None);
  }
}
