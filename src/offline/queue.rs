//! Durable queue of writes awaiting server confirmation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::session::Identity;
use crate::tickets::{MutationKind, MutationRequest, TicketMutation, Verb};

/// A write recorded while the server could not be reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
  pub id: Uuid,
  pub ticket_id: String,
  pub kind: MutationKind,
  pub verb: Verb,
  pub endpoint: String,
  pub payload: Value,
  /// Display-only hint; never sent to the server.
  pub preview: Option<Value>,
  pub created_at: DateTime<Utc>,
  /// The originating mutation, kept so replay can re-derive requests and
  /// patches.
  pub mutation: TicketMutation,
}

impl PendingMutation {
  pub fn record(mutation: &TicketMutation, now: DateTime<Utc>) -> Self {
    let request = mutation.request();
    Self {
      id: Uuid::new_v4(),
      ticket_id: mutation.ticket_id().to_string(),
      kind: mutation.kind(),
      verb: request.verb,
      endpoint: request.endpoint,
      payload: request.payload,
      preview: mutation.preview(),
      created_at: now,
      mutation: mutation.clone(),
    }
  }

  /// The same queued write aimed at `ticket_id`; id and timestamp are kept.
  pub fn retarget(&self, ticket_id: &str) -> Self {
    let mutation = self.mutation.retarget(ticket_id);
    let request = mutation.request();
    Self {
      ticket_id: ticket_id.to_string(),
      verb: request.verb,
      endpoint: request.endpoint,
      payload: request.payload,
      mutation,
      ..self.clone()
    }
  }

  pub fn request(&self) -> MutationRequest {
    MutationRequest {
      verb: self.verb,
      endpoint: self.endpoint.clone(),
      payload: self.payload.clone(),
    }
  }
}

/// Storage for pending mutations, partitioned by owner and kept in
/// insertion order.
pub trait MutationQueue: Send + Sync {
  fn enqueue(&self, owner: &str, mutation: &PendingMutation) -> Result<()>;

  /// All pending mutations for `owner`, oldest first.
  fn pending(&self, owner: &str) -> Result<Vec<PendingMutation>>;

  /// Pending mutations for one ticket, oldest first.
  fn pending_for(&self, owner: &str, ticket_id: &str) -> Result<Vec<PendingMutation>>;

  /// Remove a confirmed mutation. Removing an unknown id is not an error.
  fn remove(&self, id: &Uuid) -> Result<()>;

  /// Remove the confirmed create `id` and point every remaining write for
  /// `local_id` at `server_id`, as one atomic step. Returns how many writes
  /// were retargeted.
  fn confirm_create(&self, owner: &str, id: &Uuid, local_id: &str, server_id: &str)
    -> Result<usize>;
}

/// SQLite-backed mutation queue.
pub struct SqliteMutationQueue {
  conn: Mutex<Connection>,
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_mutations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    owner_id TEXT NOT NULL,
    ticket_id TEXT NOT NULL,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_mutations_ticket
    ON pending_mutations(owner_id, ticket_id);
"#;

impl SqliteMutationQueue {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open mutation queue at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn select(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<PendingMutation>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows = stmt
      .query_map(params, |row| row.get::<_, Vec<u8>>(0))
      .map_err(|e| eyre!("Failed to query pending mutations: {}", e))?
      .collect::<rusqlite::Result<Vec<Vec<u8>>>>()
      .map_err(|e| eyre!("Failed to read pending mutation: {}", e))?;

    rows
      .iter()
      .map(|data| {
        serde_json::from_slice(data)
          .map_err(|e| eyre!("Failed to deserialize pending mutation: {}", e))
      })
      .collect()
  }
}

impl MutationQueue for SqliteMutationQueue {
  fn enqueue(&self, owner: &str, mutation: &PendingMutation) -> Result<()> {
    let data =
      serde_json::to_vec(mutation).map_err(|e| eyre!("Failed to serialize mutation: {}", e))?;
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_mutations (id, owner_id, ticket_id, data, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          mutation.id.to_string(),
          owner,
          mutation.ticket_id,
          data,
          mutation.created_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    Ok(())
  }

  fn pending(&self, owner: &str) -> Result<Vec<PendingMutation>> {
    self.select(
      "SELECT data FROM pending_mutations WHERE owner_id = ? ORDER BY seq",
      &[&owner],
    )
  }

  fn pending_for(&self, owner: &str, ticket_id: &str) -> Result<Vec<PendingMutation>> {
    self.select(
      "SELECT data FROM pending_mutations WHERE owner_id = ? AND ticket_id = ? ORDER BY seq",
      &[&owner, &ticket_id],
    )
  }

  fn remove(&self, id: &Uuid) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM pending_mutations WHERE id = ?",
        params![id.to_string()],
      )
      .map_err(|e| eyre!("Failed to remove mutation {}: {}", id, e))?;

    Ok(())
  }

  fn confirm_create(
    &self,
    owner: &str,
    id: &Uuid,
    local_id: &str,
    server_id: &str,
  ) -> Result<usize> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to start queue transaction: {}", e))?;

    tx.execute(
      "DELETE FROM pending_mutations WHERE id = ?",
      params![id.to_string()],
    )
    .map_err(|e| eyre!("Failed to remove mutation {}: {}", id, e))?;

    let rows: Vec<(i64, Vec<u8>)> = {
      let mut stmt = tx
        .prepare(
          "SELECT seq, data FROM pending_mutations
           WHERE owner_id = ? AND ticket_id = ? ORDER BY seq",
        )
        .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;
      let rows = stmt
        .query_map(params![owner, local_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| eyre!("Failed to query pending mutations: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read pending mutation: {}", e))?;
      rows
    };

    for (seq, data) in &rows {
      let pending: PendingMutation = serde_json::from_slice(data)
        .map_err(|e| eyre!("Failed to deserialize pending mutation: {}", e))?;
      let data = serde_json::to_vec(&pending.retarget(server_id))
        .map_err(|e| eyre!("Failed to serialize mutation: {}", e))?;
      tx.execute(
        "UPDATE pending_mutations SET ticket_id = ?, data = ? WHERE seq = ?",
        params![server_id, data, seq],
      )
      .map_err(|e| eyre!("Failed to retarget mutation: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit queue transaction: {}", e))?;
    Ok(rows.len())
  }
}

/// A mutation queue bound to the current owner identity.
pub struct OfflineQueue<Q: MutationQueue> {
  queue: Arc<Q>,
  identity: Arc<dyn Identity>,
}

impl<Q: MutationQueue> OfflineQueue<Q> {
  pub fn new(queue: Arc<Q>, identity: Arc<dyn Identity>) -> Self {
    Self { queue, identity }
  }

  pub fn owner_id(&self) -> Option<String> {
    self.identity.owner_id()
  }

  fn owner(&self) -> Result<String> {
    self
      .identity
      .owner_id()
      .ok_or_else(|| eyre!("Cannot queue mutations without a signed-in identity"))
  }

  pub fn enqueue(&self, mutation: &PendingMutation) -> Result<()> {
    self.queue.enqueue(&self.owner()?, mutation)
  }

  /// Pending mutations for the current owner; empty when nobody is signed in.
  pub fn pending(&self) -> Result<Vec<PendingMutation>> {
    match self.identity.owner_id() {
      Some(owner) => self.queue.pending(&owner),
      None => Ok(Vec::new()),
    }
  }

  pub fn pending_for(&self, ticket_id: &str) -> Result<Vec<PendingMutation>> {
    match self.identity.owner_id() {
      Some(owner) => self.queue.pending_for(&owner, ticket_id),
      None => Ok(Vec::new()),
    }
  }

  pub fn has_pending(&self, ticket_id: &str) -> bool {
    match self.pending_for(ticket_id) {
      Ok(pending) => !pending.is_empty(),
      Err(err) => {
        tracing::warn!(ticket_id, error = %err, "Failed to inspect mutation queue");
        false
      }
    }
  }

  pub fn remove(&self, id: &Uuid) -> Result<()> {
    self.queue.remove(id)
  }

  pub fn confirm_create(&self, id: &Uuid, local_id: &str, server_id: &str) -> Result<usize> {
    self
      .queue
      .confirm_create(&self.owner()?, id, local_id, server_id)
  }
}

impl<Q: MutationQueue> Clone for OfflineQueue<Q> {
  fn clone(&self) -> Self {
    Self {
      queue: Arc::clone(&self.queue),
      identity: Arc::clone(&self.identity),
    }
  }
}
