//! Push channel event types.
//!
//! Raw `(name, payload)` pairs from the transport are validated here into
//! `PushEvent`, so the reconciler only ever sees well-formed events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happened to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
  Created,
  Updated,
  Deleted,
}

impl ChangeKind {
  /// Parse change kind from the event name suffix.
  pub fn from_event_suffix(suffix: &str) -> Option<Self> {
    match suffix {
      "created" => Some(Self::Created),
      "updated" => Some(Self::Updated),
      "deleted" => Some(Self::Deleted),
      _ => None,
    }
  }
}

/// A ticket was changed by someone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketChanged {
  pub ticket_id: String,
  #[serde(skip)]
  pub change: Option<ChangeKind>,
}

/// An entry in a ticket's activity timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
  /// Unique per activity; used for deduplication.
  pub id: String,
  pub ticket_id: String,
  #[serde(default)]
  pub actor: Option<String>,
  #[serde(default)]
  pub summary: String,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
}

/// A validated push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
  TicketChanged(TicketChanged),
  Activity(ActivityEvent),
}

impl PushEvent {
  /// Validate a raw event.
  ///
  /// # Event names
  ///
  /// `ticket.created`, `ticket.updated`, `ticket.deleted`, `ticket.activity`
  pub fn parse(name: &str, payload: &Value) -> Result<Self, EventParseError> {
    let (entity, action) = name
      .split_once('.')
      .ok_or_else(|| EventParseError::UnknownEvent(name.to_string()))?;
    if entity != "ticket" {
      return Err(EventParseError::UnknownEvent(name.to_string()));
    }

    if action == "activity" {
      let activity: ActivityEvent = serde_json::from_value(payload.clone())
        .map_err(|e| EventParseError::InvalidPayload(name.to_string(), e.to_string()))?;
      if activity.id.is_empty() || activity.ticket_id.is_empty() {
        return Err(EventParseError::InvalidPayload(
          name.to_string(),
          "missing id".to_string(),
        ));
      }
      return Ok(Self::Activity(activity));
    }

    let change = ChangeKind::from_event_suffix(action)
      .ok_or_else(|| EventParseError::UnknownEvent(name.to_string()))?;
    let mut changed: TicketChanged = serde_json::from_value(payload.clone())
      .map_err(|e| EventParseError::InvalidPayload(name.to_string(), e.to_string()))?;
    if changed.ticket_id.is_empty() {
      return Err(EventParseError::InvalidPayload(
        name.to_string(),
        "missing ticketId".to_string(),
      ));
    }
    changed.change = Some(change);
    Ok(Self::TicketChanged(changed))
  }

  pub fn ticket_id(&self) -> &str {
    match self {
      Self::TicketChanged(changed) => &changed.ticket_id,
      Self::Activity(activity) => &activity.ticket_id,
    }
  }
}

/// Errors raised while validating push payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
  #[error("unknown event: {0}")]
  UnknownEvent(String),

  #[error("invalid payload for {0}: {1}")]
  InvalidPayload(String, String),
}

/// A transport-level failure reported by the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct TransportError {
  #[serde(default)]
  pub status: Option<u16>,
  #[serde(default)]
  pub code: Option<String>,
  #[serde(default)]
  pub message: String,
}

const AUTH_CODES: &[&str] = &["token_expired", "invalid_token", "unauthorized"];
const AUTH_MESSAGES: &[&str] = &["jwt expired", "invalid token", "token expired", "unauthorized"];

impl TransportError {
  /// Whether the failure was caused by an expired or invalid credential.
  pub fn is_auth_failure(&self) -> bool {
    if matches!(self.status, Some(401) | Some(403)) {
      return true;
    }
    if let Some(code) = &self.code {
      if AUTH_CODES.contains(&code.to_lowercase().as_str()) {
        return true;
      }
    }
    let message = self.message.to_lowercase();
    AUTH_MESSAGES.iter().any(|m| message.contains(m))
  }
}

/// Channel lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
  Connected,
  Error(TransportError),
  Closed,
}

/// Everything a push channel delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
  Event { name: String, payload: Value },
  Lifecycle(Lifecycle),
}
