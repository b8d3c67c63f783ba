//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{DateTime, Utc};
use color_eyre::{Report, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::scope::Scope;
use super::storage::CacheStore;
use super::traits::{CacheResult, Connectivity};
use crate::error::{OfflineCacheMiss, RemoteError};
use crate::session::Identity;

/// Default timeout for a single remote call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Cache-aside read coordinator.
///
/// Sits between callers and the remote fetchers: offline reads are served
/// from the cache, online reads refresh it, and failed fetches fall back to
/// whatever was cached last. Anonymous callers are never cached.
pub struct CacheLayer<S: CacheStore> {
  storage: Arc<S>,
  identity: Arc<dyn Identity>,
  connectivity: Arc<dyn Connectivity>,
  request_timeout: Duration,
}

impl<S: CacheStore> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(
    storage: Arc<S>,
    identity: Arc<dyn Identity>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Self {
    Self {
      storage,
      identity,
      connectivity,
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
    }
  }

  /// Set the timeout applied to every fetcher.
  pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
    self.request_timeout = request_timeout;
    self
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn identity(&self) -> &Arc<dyn Identity> {
    &self.identity
  }

  pub fn is_offline(&self) -> bool {
    self.connectivity.is_offline()
  }

  pub fn request_timeout(&self) -> Duration {
    self.request_timeout
  }

  /// Fetch `scope` with the cache-aside policy.
  ///
  /// 1. No owner: run the fetcher, never touch the cache
  /// 2. Offline: serve the cached entry, or fail with `OfflineCacheMiss`
  /// 3. Online: fetch and cache; on failure serve the cached entry if any,
  ///    otherwise return the fetch error unchanged
  pub async fn fetch<T, F, Fut>(&self, scope: &Scope, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let Some(owner) = self.identity.owner_id() else {
      let data = self.timed(fetcher).await?;
      return Ok(CacheResult::bypass(data));
    };

    let cached = self.read_entry::<T>(&owner, scope);

    if self.connectivity.is_offline() {
      return match cached {
        Some((data, cached_at)) => {
          tracing::debug!(%scope, "Offline, serving cached entry");
          Ok(CacheResult::offline(data, cached_at))
        }
        None => Err(
          OfflineCacheMiss {
            scope: scope.to_string(),
          }
          .into(),
        ),
      };
    }

    match self.timed(fetcher).await {
      Ok(data) => {
        self.write_entry(&owner, scope, &data);
        Ok(CacheResult::from_network(data))
      }
      Err(err) => match cached {
        Some((data, cached_at)) => {
          tracing::warn!(%scope, error = %err, "Fetch failed, serving cached entry");
          Ok(CacheResult::fallback(data, cached_at))
        }
        None => Err(err),
      },
    }
  }

  /// Write `value` for `scope` without fetching. Returns whether anything was
  /// written; anonymous callers are skipped.
  pub fn prime<T: Serialize>(&self, scope: &Scope, value: &T) -> bool {
    match self.identity.owner_id() {
      Some(owner) => self.write_entry(&owner, scope, value),
      None => false,
    }
  }

  /// Read the cached value for `scope` under the current owner.
  pub fn cached<T: DeserializeOwned>(&self, scope: &Scope) -> Option<T> {
    let owner = self.identity.owner_id()?;
    self.read_entry(&owner, scope).map(|(data, _)| data)
  }

  /// Run a remote call under the request timeout.
  pub async fn timed<T, F, Fut>(&self, fetcher: F) -> Result<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    match tokio::time::timeout(self.request_timeout, fetcher()).await {
      Ok(result) => result,
      Err(_) => Err(Report::new(RemoteError::Timeout(self.request_timeout))),
    }
  }

  fn read_entry<T: DeserializeOwned>(&self, owner: &str, scope: &Scope) -> Option<(T, DateTime<Utc>)> {
    let entry = match self.storage.read(owner, scope) {
      Ok(entry) => entry?,
      Err(err) => {
        tracing::warn!(%scope, error = %err, "Cache read failed, treating as miss");
        return None;
      }
    };

    match serde_json::from_value(entry.payload) {
      Ok(data) => Some((data, entry.cached_at)),
      Err(err) => {
        tracing::warn!(%scope, error = %err, "Cached entry has unexpected shape, ignoring");
        None
      }
    }
  }

  /// Cache writes never fail the caller.
  fn write_entry<T: Serialize>(&self, owner: &str, scope: &Scope, value: &T) -> bool {
    let result = serde_json::to_value(value)
      .map_err(Report::from)
      .and_then(|payload| self.storage.write(owner, scope, &payload));

    match result {
      Ok(()) => true,
      Err(err) => {
        tracing::warn!(%scope, error = %err, "Cache write failed");
        false
      }
    }
  }
}

impl<S: CacheStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      identity: Arc::clone(&self.identity),
      connectivity: Arc::clone(&self.connectivity),
      request_timeout: self.request_timeout,
    }
  }
}
