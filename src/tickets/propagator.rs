//! Write-through fan-out of one ticket snapshot to every cached surface.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::cache::{CacheStore, Scope};
use crate::session::Identity;

use super::cache::{detail_scope, TICKET_LIST};

/// Keeps the detail entry and every list entry embedding a ticket in step.
///
/// The detail entry is replaced; list entries are merged field by field and
/// only where the ticket already appears. Lists never gain or lose members
/// here.
pub struct UpsertPropagator<S: CacheStore> {
  storage: Arc<S>,
  identity: Arc<dyn Identity>,
}

impl<S: CacheStore> UpsertPropagator<S> {
  pub fn new(storage: Arc<S>, identity: Arc<dyn Identity>) -> Self {
    Self { storage, identity }
  }

  /// Propagate `snapshot` to its detail scope, `extra_scopes`, and every
  /// cached ticket list. Returns how many list scopes were rewritten.
  pub fn upsert<T: Serialize>(&self, snapshot: &T, extra_scopes: &[Scope]) -> usize {
    self.propagate(snapshot, extra_scopes, None)
  }

  /// Like `upsert`, for a ticket the server confirmed under a new id.
  ///
  /// List entries still carrying `previous_id` are replaced by the snapshot
  /// (or dropped when the list already holds the new id), and the detail
  /// entry under `previous_id` is overwritten so it no longer reads as
  /// pending.
  pub fn upsert_replacing<T: Serialize>(&self, previous_id: &str, snapshot: &T) -> usize {
    self.propagate(snapshot, &[], Some(previous_id))
  }

  fn propagate<T: Serialize>(
    &self,
    snapshot: &T,
    extra_scopes: &[Scope],
    previous_id: Option<&str>,
  ) -> usize {
    let Some(owner) = self.identity.owner_id() else {
      tracing::debug!("No owner identity, skipping cache propagation");
      return 0;
    };

    let value = match serde_json::to_value(snapshot) {
      Ok(value) => value,
      Err(err) => {
        tracing::warn!(error = %err, "Failed to serialize snapshot for propagation");
        return 0;
      }
    };

    let Some(id) = value
      .get("id")
      .and_then(Value::as_str)
      .filter(|id| !id.is_empty())
      .map(str::to_string)
    else {
      return 0;
    };
    let previous_id = previous_id.filter(|previous| *previous != id);

    for detail_id in std::iter::once(id.as_str()).chain(previous_id) {
      if let Err(err) = self.storage.write(&owner, &detail_scope(detail_id), &value) {
        tracing::warn!(ticket_id = %detail_id, error = %err, "Failed to write detail entry");
      }
    }

    let mut candidates: Vec<Scope> = extra_scopes.to_vec();
    match self.storage.list_scopes(&owner, TICKET_LIST) {
      Ok(scopes) => {
        for scope in scopes {
          if !candidates.contains(&scope) {
            candidates.push(scope);
          }
        }
      }
      Err(err) => tracing::warn!(error = %err, "Failed to enumerate list scopes"),
    }

    let mut updated = 0;
    for scope in &candidates {
      let entry = match self.storage.read(&owner, scope) {
        Ok(Some(entry)) => entry,
        Ok(None) => continue,
        Err(err) => {
          tracing::warn!(%scope, error = %err, "Failed to read list entry");
          continue;
        }
      };

      let Value::Array(mut items) = entry.payload else {
        continue;
      };
      let replaced = previous_id.is_some_and(|previous| replace_previous(&mut items, previous, &id, &value));
      let merged = merge_matching(&mut items, &id, &value);
      if !replaced && !merged {
        continue;
      }

      match self.storage.write(&owner, scope, &Value::Array(items)) {
        Ok(()) => updated += 1,
        Err(err) => tracing::warn!(%scope, error = %err, "Failed to write list entry"),
      }
    }

    tracing::debug!(ticket_id = %id, lists = updated, "Propagated ticket snapshot");
    updated
  }
}

fn item_id(item: &Value) -> Option<&str> {
  item.get("id").and_then(Value::as_str)
}

/// Swap entries for `previous` to `snapshot`. If the list already has `id`,
/// the stale entries are removed instead so the ticket appears once.
fn replace_previous(items: &mut Vec<Value>, previous: &str, id: &str, snapshot: &Value) -> bool {
  if !items.iter().any(|item| item_id(item) == Some(previous)) {
    return false;
  }

  if items.iter().any(|item| item_id(item) == Some(id)) {
    items.retain(|item| item_id(item) != Some(previous));
  } else {
    for item in items.iter_mut() {
      if item_id(item) == Some(previous) {
        *item = snapshot.clone();
      }
    }
  }
  true
}

/// Merge `patch` into every item whose `id` matches. Returns whether any did.
fn merge_matching(items: &mut [Value], id: &str, patch: &Value) -> bool {
  let Value::Object(fields) = patch else {
    return false;
  };

  let mut matched = false;
  for item in items.iter_mut() {
    if item_id(item) != Some(id) {
      continue;
    }
    if let Value::Object(existing) = item {
      for (key, value) in fields {
        existing.insert(key.clone(), value.clone());
      }
      matched = true;
    }
  }
  matched
}
