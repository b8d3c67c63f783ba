//! Serde-deserializable types matching ticket service responses.
//!
//! The service wraps payloads in small envelopes; these types unwrap them so
//! domain types stay free of transport details.

use serde::Deserialize;

use super::types::Ticket;

#[derive(Debug, Deserialize)]
pub struct ApiTicketList {
  #[serde(default)]
  pub tickets: Vec<Ticket>,
}

/// Single-ticket responses either wrap the ticket or return it bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiTicketEnvelope {
  Wrapped { ticket: Ticket },
  Bare(Ticket),
}

impl ApiTicketEnvelope {
  pub fn into_ticket(self) -> Ticket {
    match self {
      Self::Wrapped { ticket } | Self::Bare(ticket) => ticket,
    }
  }
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
}

impl ApiErrorBody {
  pub fn describe(self, fallback: &str) -> String {
    self
      .message
      .or(self.error)
      .unwrap_or_else(|| fallback.to_string())
  }
}
