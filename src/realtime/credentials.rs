//! Credential extraction with a fixed, ordered set of strategies.

use sha2::{Digest, Sha256};

use crate::session::{AuthState, Credential};

/// Where a credential may be found in the auth state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStrategy {
  /// `session.access_token` from the sign-in flow
  SessionAccessToken,
  /// Token handed over by an external identity provider
  ProviderToken,
  /// Bearer value stored by older clients
  LegacyBearer,
}

impl CredentialStrategy {
  pub fn extract(&self, auth: &AuthState) -> Option<Credential> {
    let token = match self {
      Self::SessionAccessToken => auth.session.as_ref()?.access_token.as_deref(),
      Self::ProviderToken => auth.provider_token.as_deref(),
      Self::LegacyBearer => auth
        .legacy_bearer
        .as_deref()
        .map(|b| b.strip_prefix("Bearer ").unwrap_or(b)),
    }?;

    let token = token.trim();
    (!token.is_empty()).then(|| Credential::new(token))
  }
}

/// Evaluates strategies in order; the first hit wins.
#[derive(Debug, Clone)]
pub struct CredentialExtractor {
  strategies: Vec<CredentialStrategy>,
}

impl Default for CredentialExtractor {
  fn default() -> Self {
    Self {
      strategies: vec![
        CredentialStrategy::SessionAccessToken,
        CredentialStrategy::ProviderToken,
        CredentialStrategy::LegacyBearer,
      ],
    }
  }
}

impl CredentialExtractor {
  pub fn strategies(&self) -> &[CredentialStrategy] {
    &self.strategies
  }

  pub fn extract(&self, auth: &AuthState) -> Option<(CredentialStrategy, Credential)> {
    self
      .strategies
      .iter()
      .find_map(|strategy| strategy.extract(auth).map(|c| (*strategy, c)))
  }
}

/// Stable fingerprint for comparing credentials without keeping them around.
pub fn fingerprint(credential: &Credential) -> String {
  let mut hasher = Sha256::new();
  hasher.update(credential.expose().as_bytes());
  hex::encode(hasher.finalize())
}
