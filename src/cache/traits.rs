//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether the device is currently offline.
pub trait Connectivity: Send + Sync {
  fn is_offline(&self) -> bool;
}

/// Connectivity flag flipped by whatever watches the network.
#[derive(Debug, Default)]
pub struct NetworkStatus {
  offline: AtomicBool,
}

impl NetworkStatus {
  pub fn new(offline: bool) -> Self {
    Self {
      offline: AtomicBool::new(offline),
    }
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }
}

impl Connectivity for NetworkStatus {
  fn is_offline(&self) -> bool {
    self.offline.load(Ordering::SeqCst)
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network, now also cached.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Cached data served because the fetch failed.
  pub fn fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Fallback,
      cached_at: Some(cached_at),
    }
  }

  /// Cached data served because the device is offline.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Fresh data for an anonymous caller; nothing was cached.
  pub fn bypass(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Bypass,
      cached_at: None,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Network fetch failed, serving the last cached value
  Fallback,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// No owner identity, so the cache was not consulted
  Bypass,
}
