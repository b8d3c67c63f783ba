//! Typed failure conditions that callers need to tell apart.
//!
//! These travel inside a `color_eyre::Report` and are recovered with
//! `Report::downcast_ref`.

use std::time::Duration;

use color_eyre::Report;

/// Offline, and nothing is cached for the requested scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{scope}' is unavailable offline")]
pub struct OfflineCacheMiss {
  pub scope: String,
}

/// Failures raised by the remote ticket service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("could not reach ticket service: {0}")]
  Connect(String),

  #[error("ticket service returned {status}: {message}")]
  Status { status: u16, message: String },

  #[error("unexpected response from ticket service: {0}")]
  Decode(String),
}

impl RemoteError {
  /// Whether the failure means the service was unreachable rather than
  /// that it rejected the request.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::Timeout(_) | Self::Connect(_))
  }
}

/// Check whether a report wraps an offline cache miss.
pub fn is_offline_miss(err: &Report) -> bool {
  err.downcast_ref::<OfflineCacheMiss>().is_some()
}

/// Check whether a report wraps a connectivity-classified remote failure.
pub fn is_connectivity_failure(err: &Report) -> bool {
  err
    .downcast_ref::<RemoteError>()
    .is_some_and(RemoteError::is_connectivity)
}
