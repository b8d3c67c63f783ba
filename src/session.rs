//! Owner identity and credential access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;

/// Resolves the identity that owns cache entries.
pub trait Identity: Send + Sync {
  /// `None` when nobody is signed in.
  fn owner_id(&self) -> Option<String>;
}

/// An opaque bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub fn expose(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for Credential {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Credential(..)")
  }
}

/// Tokens issued by the sign-in flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTokens {
  pub access_token: Option<String>,
  pub refresh_token: Option<String>,
  pub expires_at: Option<DateTime<Utc>>,
}

/// Everything the auth layer currently knows. Different sign-in paths fill
/// different fields; see `realtime::CredentialExtractor` for precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthState {
  pub session: Option<SessionTokens>,
  /// Token handed over by an external identity provider.
  pub provider_token: Option<String>,
  /// Raw `Authorization: Bearer` value from older clients.
  pub legacy_bearer: Option<String>,
}

/// Session operations needed by the realtime channel.
#[async_trait]
pub trait Session: Identity {
  fn auth_state(&self) -> AuthState;

  /// Exchange the current credential for a fresh one.
  async fn refresh_credential(&self) -> Result<AuthState>;

  /// End the session. Terminal for the channel.
  async fn sign_out(&self);
}

/// Session backed by a fixed user and token, as loaded from config and env.
///
/// Signing out forgets both, so cached data of the former owner is no
/// longer served.
#[derive(Debug, Default)]
pub struct StaticSession {
  owner: RwLock<Option<String>>,
  auth: RwLock<AuthState>,
}

impl StaticSession {
  pub fn new(owner: impl Into<String>, token: Option<String>) -> Self {
    Self {
      owner: RwLock::new(Some(owner.into())),
      auth: RwLock::new(AuthState {
        session: token.map(|access_token| SessionTokens {
          access_token: Some(access_token),
          ..SessionTokens::default()
        }),
        ..AuthState::default()
      }),
    }
  }

  pub fn anonymous() -> Self {
    Self::default()
  }
}

impl Identity for StaticSession {
  fn owner_id(&self) -> Option<String> {
    self.owner.read().ok().and_then(|owner| owner.clone())
  }
}

#[async_trait]
impl Session for StaticSession {
  fn auth_state(&self) -> AuthState {
    self.auth.read().map(|a| a.clone()).unwrap_or_default()
  }

  async fn refresh_credential(&self) -> Result<AuthState> {
    Err(eyre!(
      "Static credentials cannot be refreshed; update TICKETSYNC_TOKEN"
    ))
  }

  async fn sign_out(&self) {
    if let Ok(mut auth) = self.auth.write() {
      *auth = AuthState::default();
    }
    if let Ok(mut owner) = self.owner.write() {
      *owner = None;
    }
  }
}
