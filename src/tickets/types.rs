use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ticket workflow status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
  #[default]
  Open,
  InProgress,
  Resolved,
  Closed,
}

impl TicketStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Open => "open",
      Self::InProgress => "in_progress",
      Self::Resolved => "resolved",
      Self::Closed => "closed",
    }
  }
}

impl std::str::FromStr for TicketStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
      "open" => Ok(Self::Open),
      "in_progress" => Ok(Self::InProgress),
      "resolved" => Ok(Self::Resolved),
      "closed" => Ok(Self::Closed),
      other => Err(format!("unknown status '{}'", other)),
    }
  }
}

/// The kind of write that produced an optimistic snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
  Update,
  Assign,
  Resolve,
  Create,
}

impl MutationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Update => "update",
      Self::Assign => "assign",
      Self::Resolve => "resolve",
      Self::Create => "create",
    }
  }
}

/// Reference to a user embedded in a ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
  pub id: String,
  #[serde(default)]
  pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
  pub id: String,
  pub file_name: String,
  #[serde(default)]
  pub url: Option<String>,
}

/// An open request for someone to take the ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
  pub id: String,
  pub requested_by: UserRef,
  pub requested_at: DateTime<Utc>,
}

/// Full ticket snapshot.
///
/// The same snapshot is stored in the detail entry and embedded in every list
/// entry that contains it. Optional fields always serialize (as `null`) so a
/// merge into a list entry can clear them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub status: TicketStatus,
  #[serde(default)]
  pub priority: Option<String>,
  #[serde(default)]
  pub issue_type: Option<String>,
  #[serde(default)]
  pub assignee: Option<UserRef>,
  #[serde(default)]
  pub attachments: Vec<Attachment>,
  #[serde(default)]
  pub creator: Option<UserRef>,
  #[serde(default)]
  pub assignment_request: Option<AssignmentRequest>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub resolved_at: Option<DateTime<Utc>>,
  /// Set on optimistic snapshots until the server confirms them.
  #[serde(default)]
  pub pending_sync: bool,
  #[serde(default)]
  pub pending_action: Option<MutationKind>,
  /// Server fields this client does not model.
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Ticket {
  /// Empty snapshot for a ticket the cache has never seen.
  pub fn skeleton(id: impl Into<String>, now: DateTime<Utc>) -> Self {
    Self {
      id: id.into(),
      title: String::new(),
      description: None,
      status: TicketStatus::Open,
      priority: None,
      issue_type: None,
      assignee: None,
      attachments: Vec::new(),
      creator: None,
      assignment_request: None,
      created_at: Some(now),
      updated_at: Some(now),
      resolved_at: None,
      pending_sync: false,
      pending_action: None,
      extra: Map::new(),
    }
  }

  pub fn is_optimistic(&self) -> bool {
    self.pending_sync
  }
}

/// List filter; also determines the list cache scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFilter {
  pub status: Option<TicketStatus>,
  pub assignee: Option<String>,
  pub search: Option<String>,
}

/// Changes carried by an update mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketChanges {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<TicketStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub issue_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attachments: Option<Vec<Attachment>>,
}

/// Fields supplied when opening a new ticket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicket {
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub priority: Option<String>,
  #[serde(default)]
  pub issue_type: Option<String>,
}
