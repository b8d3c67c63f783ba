//! In-memory ticket service for tests.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{Report, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::RemoteError;
use crate::offline::apply_patch;

use super::client::TicketApi;
use super::mutation::{MutationRequest, TicketMutation};
use super::types::{NewTicket, Ticket, TicketChanges, TicketFilter, UserRef};

#[derive(Default)]
pub struct FakeApi {
  tickets: Mutex<BTreeMap<String, Ticket>>,
  sent: Mutex<Vec<MutationRequest>>,
  rejected: Mutex<HashSet<String>>,
  offline: AtomicBool,
  /// Sends allowed before the service becomes unreachable.
  outage_after: Mutex<Option<usize>>,
  fetches: AtomicUsize,
  created: AtomicUsize,
}

impl FakeApi {
  pub fn insert(&self, ticket: Ticket) {
    self.tickets.lock().unwrap().insert(ticket.id.clone(), ticket);
  }

  pub fn sent(&self) -> Vec<MutationRequest> {
    self.sent.lock().unwrap().clone()
  }

  pub fn fetches(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }

  pub fn go_offline(&self) {
    self.offline.store(true, Ordering::SeqCst);
  }

  pub fn go_online(&self) {
    self.offline.store(false, Ordering::SeqCst);
    *self.outage_after.lock().unwrap() = None;
  }

  /// Accept `sends` more writes, then behave as unreachable.
  pub fn go_offline_after(&self, sends: usize) {
    *self.outage_after.lock().unwrap() = Some(sends);
  }

  pub fn reject_endpoint(&self, endpoint: &str) {
    self.rejected.lock().unwrap().insert(endpoint.to_string());
  }

  fn check_reachable(&self) -> Result<()> {
    if self.offline.load(Ordering::SeqCst) {
      return Err(Report::new(RemoteError::Connect("connection refused".to_string())));
    }
    Ok(())
  }

  fn not_found(id: &str) -> Report {
    Report::new(RemoteError::Status {
      status: 404,
      message: format!("ticket {} not found", id),
    })
  }

  /// Interpret a request the way the real service would.
  fn decode(&self, request: &MutationRequest) -> Result<TicketMutation> {
    let segments: Vec<&str> = request.endpoint.trim_matches('/').split('/').collect();
    let decode_err = |e: serde_json::Error| Report::new(RemoteError::Decode(e.to_string()));

    match segments.as_slice() {
      ["tickets"] => {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let draft: NewTicket = serde_json::from_value(request.payload.clone()).map_err(decode_err)?;
        let id = format!("srv-{}", n);
        self.insert(Ticket::skeleton(&id, Utc::now()));
        Ok(TicketMutation::Create { ticket_id: id, draft })
      }
      ["tickets", id] => {
        let changes: TicketChanges =
          serde_json::from_value(request.payload.clone()).map_err(decode_err)?;
        Ok(TicketMutation::Update {
          ticket_id: id.to_string(),
          changes,
        })
      }
      ["tickets", id, "assign"] => Ok(TicketMutation::Assign {
        ticket_id: id.to_string(),
        assignee: UserRef {
          id: request.payload["assigneeId"].as_str().unwrap_or_default().to_string(),
          display_name: None,
        },
      }),
      ["tickets", id, "resolve"] => Ok(TicketMutation::Resolve {
        ticket_id: id.to_string(),
        note: None,
      }),
      _ => Err(Report::new(RemoteError::Status {
        status: 404,
        message: format!("no route for {}", request.endpoint),
      })),
    }
  }
}

#[async_trait]
impl TicketApi for FakeApi {
  async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
    self.check_reachable()?;
    self.fetches.fetch_add(1, Ordering::SeqCst);
    Ok(
      self
        .tickets
        .lock()
        .unwrap()
        .values()
        .filter(|t| filter.status.map_or(true, |s| t.status == s))
        .cloned()
        .collect(),
    )
  }

  async fn get_ticket(&self, id: &str) -> Result<Ticket> {
    self.check_reachable()?;
    self.fetches.fetch_add(1, Ordering::SeqCst);
    self
      .tickets
      .lock()
      .unwrap()
      .get(id)
      .cloned()
      .ok_or_else(|| Self::not_found(id))
  }

  async fn send(&self, request: &MutationRequest) -> Result<Ticket> {
    {
      let mut outage_after = self.outage_after.lock().unwrap();
      if let Some(remaining) = outage_after.as_mut() {
        if *remaining == 0 {
          self.offline.store(true, Ordering::SeqCst);
        } else {
          *remaining -= 1;
        }
      }
    }
    self.check_reachable()?;
    self.sent.lock().unwrap().push(request.clone());

    if self.rejected.lock().unwrap().contains(&request.endpoint) {
      return Err(Report::new(RemoteError::Status {
        status: 422,
        message: "rejected".to_string(),
      }));
    }

    let mutation = self.decode(request)?;
    let mut tickets = self.tickets.lock().unwrap();
    let current = tickets
      .get(mutation.ticket_id())
      .cloned()
      .ok_or_else(|| Self::not_found(mutation.ticket_id()))?;

    let mut updated = apply_patch(&current, &mutation, Utc::now());
    updated.pending_sync = false;
    updated.pending_action = None;
    tickets.insert(updated.id.clone(), updated.clone());
    Ok(updated)
  }
}
