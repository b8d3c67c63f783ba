//! Realtime push channel and event reconciliation.
//!
//! This module provides:
//! - Validation of raw push events into typed `PushEvent`s
//! - Ordered credential extraction and fingerprinting
//! - A connection manager that reuses the channel until the credential
//!   rotates, refreshes on auth failure and signs out when refresh fails
//! - A reconciler that marks affected surfaces stale

mod connection;
mod credentials;
mod events;
mod reconciler;

pub use connection::{ConnectionManager, ConnectionState, PushChannel, PushConnector, PushHandle};
pub use credentials::{fingerprint, CredentialExtractor, CredentialStrategy};
pub use events::{
  ActivityEvent, ChangeKind, ChannelMessage, EventParseError, Lifecycle, PushEvent, TicketChanged,
  TransportError,
};
pub use reconciler::{Notification, PendingLookup, Reconciler};
