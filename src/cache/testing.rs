//! Test helpers for cache consumers.

use color_eyre::Result;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::scope::Scope;
use super::storage::{CacheStore, CachedPayload};

/// Wraps a store and counts the calls that reach it.
pub struct CountingStore<S> {
  inner: S,
  reads: AtomicUsize,
  writes: AtomicUsize,
}

impl<S: CacheStore> CountingStore<S> {
  pub fn new(inner: S) -> Self {
    Self {
      inner,
      reads: AtomicUsize::new(0),
      writes: AtomicUsize::new(0),
    }
  }

  pub fn reads(&self) -> usize {
    self.reads.load(Ordering::SeqCst)
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }
}

impl<S: CacheStore> CacheStore for CountingStore<S> {
  fn read(&self, owner: &str, scope: &Scope) -> Result<Option<CachedPayload>> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    self.inner.read(owner, scope)
  }

  fn write(&self, owner: &str, scope: &Scope, payload: &Value) -> Result<()> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.write(owner, scope, payload)
  }

  fn list_scopes(&self, owner: &str, name: &str) -> Result<Vec<Scope>> {
    self.inner.list_scopes(owner, name)
  }
}
