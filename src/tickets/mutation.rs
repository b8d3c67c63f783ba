//! Ticket writes and the HTTP requests that carry them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::{MutationKind, NewTicket, TicketChanges, UserRef};

/// HTTP verb of a recorded mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
  Post,
  Put,
  Patch,
  Delete,
}

impl Verb {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }
}

/// Verb, endpoint and body of a write against the ticket service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
  pub verb: Verb,
  /// Path relative to the API root, e.g. `/tickets/abc/assign`
  pub endpoint: String,
  pub payload: Value,
}

/// A write issued by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TicketMutation {
  Update {
    ticket_id: String,
    changes: TicketChanges,
  },
  Assign {
    ticket_id: String,
    assignee: UserRef,
  },
  Resolve {
    ticket_id: String,
    #[serde(default)]
    note: Option<String>,
  },
  /// `ticket_id` is a locally generated id until the server assigns one.
  Create { ticket_id: String, draft: NewTicket },
}

/// Prefix of ids minted for tickets created offline.
pub const LOCAL_ID_PREFIX: &str = "local-";

impl TicketMutation {
  /// A create mutation with a fresh local id.
  pub fn create(draft: NewTicket) -> Self {
    Self::Create {
      ticket_id: format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4()),
      draft,
    }
  }

  pub fn kind(&self) -> MutationKind {
    match self {
      Self::Update { .. } => MutationKind::Update,
      Self::Assign { .. } => MutationKind::Assign,
      Self::Resolve { .. } => MutationKind::Resolve,
      Self::Create { .. } => MutationKind::Create,
    }
  }

  pub fn ticket_id(&self) -> &str {
    match self {
      Self::Update { ticket_id, .. }
      | Self::Assign { ticket_id, .. }
      | Self::Resolve { ticket_id, .. }
      | Self::Create { ticket_id, .. } => ticket_id,
    }
  }

  /// The same mutation aimed at a different ticket id.
  pub fn retarget(&self, id: &str) -> Self {
    let mut mutation = self.clone();
    match &mut mutation {
      Self::Update { ticket_id, .. }
      | Self::Assign { ticket_id, .. }
      | Self::Resolve { ticket_id, .. }
      | Self::Create { ticket_id, .. } => *ticket_id = id.to_string(),
    }
    mutation
  }

  pub fn request(&self) -> MutationRequest {
    match self {
      Self::Update { ticket_id, changes } => MutationRequest {
        verb: Verb::Patch,
        endpoint: format!("/tickets/{}", ticket_id),
        payload: serde_json::to_value(changes).unwrap_or(Value::Null),
      },
      Self::Assign {
        ticket_id,
        assignee,
      } => MutationRequest {
        verb: Verb::Post,
        endpoint: format!("/tickets/{}/assign", ticket_id),
        payload: json!({ "assigneeId": assignee.id }),
      },
      Self::Resolve { ticket_id, note } => MutationRequest {
        verb: Verb::Post,
        endpoint: format!("/tickets/{}/resolve", ticket_id),
        payload: json!({ "note": note }),
      },
      Self::Create { draft, .. } => MutationRequest {
        verb: Verb::Post,
        endpoint: "/tickets".to_string(),
        payload: serde_json::to_value(draft).unwrap_or(Value::Null),
      },
    }
  }

  /// Display-only hint for pending-change UIs.
  pub fn preview(&self) -> Option<Value> {
    match self {
      Self::Assign { assignee, .. } => serde_json::to_value(assignee).ok(),
      Self::Create { draft, .. } => Some(json!({ "title": draft.title })),
      Self::Update { .. } | Self::Resolve { .. } => None,
    }
  }
}
