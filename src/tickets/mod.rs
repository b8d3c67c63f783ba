//! Ticket domain: types, cache scopes, remote API and the cached client.

mod api_types;
mod cache;
mod cached_client;
mod client;
mod mutation;
mod propagator;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{detail_scope, list_scope, TicketScope, TICKET_DETAIL, TICKET_LIST};
pub use cached_client::CachedTicketClient;
pub use client::{HttpTicketApi, TicketApi};
pub use mutation::{MutationRequest, TicketMutation, Verb, LOCAL_ID_PREFIX};
pub use propagator::UpsertPropagator;
pub use types::{
  AssignmentRequest, Attachment, MutationKind, NewTicket, Ticket, TicketChanges, TicketFilter,
  TicketStatus, UserRef,
};
