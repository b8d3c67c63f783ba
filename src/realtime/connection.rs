//! Push channel lifecycle: connect, reuse, refresh and sign-out.

use async_trait::async_trait;
use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::session::{AuthState, Credential, Session};

use super::credentials::{fingerprint, CredentialExtractor};
use super::events::{ChannelMessage, Lifecycle, PushEvent, TransportError};
use super::reconciler::{Notification, Reconciler};

/// Channel state as seen by the rest of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  /// No credential, or signed out
  Disconnected,
  /// Credential present, channel being (re)established
  Connecting,
  Connected,
}

/// Control side of an open push connection.
pub trait PushHandle: Send + Sync {
  fn is_connected(&self) -> bool;
  fn close(&self);
}

/// An open push connection and its message stream.
pub struct PushChannel {
  pub handle: Box<dyn PushHandle>,
  pub messages: mpsc::Receiver<ChannelMessage>,
}

/// Opens push connections. The transport keeps retrying on its own after
/// non-auth failures and reports them as `Lifecycle::Error`.
#[async_trait]
pub trait PushConnector: Send + Sync {
  async fn connect(&self, credential: &Credential) -> Result<PushChannel>;
}

struct ActiveChannel {
  fingerprint: String,
  handle: Box<dyn PushHandle>,
}

/// Owns the single push channel for a signed-in client.
///
/// Created once at startup and driven from one task; consumers hold it by
/// handle rather than through global state.
pub struct ConnectionManager {
  connector: Arc<dyn PushConnector>,
  session: Arc<dyn Session>,
  extractor: CredentialExtractor,
  reconciler: Reconciler,
  state: ConnectionState,
  active: Option<ActiveChannel>,
  inbox: Option<mpsc::Receiver<ChannelMessage>>,
}

impl ConnectionManager {
  pub fn new(
    connector: Arc<dyn PushConnector>,
    session: Arc<dyn Session>,
    reconciler: Reconciler,
  ) -> Self {
    Self {
      connector,
      session,
      extractor: CredentialExtractor::default(),
      reconciler,
      state: ConnectionState::Disconnected,
      active: None,
      inbox: None,
    }
  }

  pub fn state(&self) -> ConnectionState {
    self.state
  }

  pub fn reconciler_mut(&mut self) -> &mut Reconciler {
    &mut self.reconciler
  }

  /// Bring the channel in line with the session's current credential.
  ///
  /// An open channel is reused while the credential is unchanged; it is
  /// only torn down when the credential rotates or the channel dropped.
  /// Returns whether a new connection was opened.
  pub async fn sync(&mut self) -> Result<bool> {
    let auth = self.session.auth_state();
    self.sync_with(&auth).await
  }

  async fn sync_with(&mut self, auth: &AuthState) -> Result<bool> {
    let Some((strategy, credential)) = self.extractor.extract(auth) else {
      if self.state != ConnectionState::Disconnected {
        tracing::info!("No credential available, closing push channel");
      }
      self.disconnect();
      return Ok(false);
    };

    let fingerprint = fingerprint(&credential);
    if let Some(active) = &self.active {
      if active.fingerprint == fingerprint && active.handle.is_connected() {
        self.state = ConnectionState::Connected;
        return Ok(false);
      }
    }

    self.disconnect();
    self.state = ConnectionState::Connecting;
    tracing::info!(?strategy, "Opening push channel");

    match self.connector.connect(&credential).await {
      Ok(channel) => {
        self.active = Some(ActiveChannel {
          fingerprint,
          handle: channel.handle,
        });
        self.inbox = Some(channel.messages);
        self.state = ConnectionState::Connected;
        Ok(true)
      }
      Err(err) => {
        tracing::warn!(error = %err, "Failed to open push channel");
        self.state = ConnectionState::Disconnected;
        Err(err)
      }
    }
  }

  /// Close the channel, if any.
  pub fn disconnect(&mut self) {
    if let Some(active) = self.active.take() {
      active.handle.close();
    }
    self.inbox = None;
    self.state = ConnectionState::Disconnected;
  }

  /// Wait for the next message from the open channel. `None` once the
  /// channel is gone.
  pub async fn next_message(&mut self) -> Option<ChannelMessage> {
    let inbox = self.inbox.as_mut()?;
    match inbox.recv().await {
      Some(message) => Some(message),
      None => {
        tracing::debug!("Push channel stream ended");
        self.disconnect();
        None
      }
    }
  }

  pub async fn handle_message(&mut self, message: ChannelMessage) -> Result<()> {
    match message {
      ChannelMessage::Event { name, payload } => {
        match PushEvent::parse(&name, &payload) {
          Ok(event) => {
            let marked = self.reconciler.handle(&event);
            tracing::debug!(event = %name, ticket_id = event.ticket_id(), stale = marked.len(), "Applied push event");
          }
          Err(err) => tracing::warn!(error = %err, "Dropping invalid push event"),
        }
        Ok(())
      }
      ChannelMessage::Lifecycle(Lifecycle::Connected) => {
        if self.active.is_some() {
          self.state = ConnectionState::Connected;
        }
        Ok(())
      }
      ChannelMessage::Lifecycle(Lifecycle::Closed) => {
        self.disconnect();
        Ok(())
      }
      ChannelMessage::Lifecycle(Lifecycle::Error(err)) => self.handle_transport_error(err).await,
    }
  }

  async fn handle_transport_error(&mut self, err: TransportError) -> Result<()> {
    if !err.is_auth_failure() {
      tracing::warn!(message = %err.message, "Push channel degraded, transport retrying");
      self.reconciler.notify(Notification::ServiceDegraded {
        message: err.message,
      });
      return Ok(());
    }

    tracing::info!("Push channel credential rejected, refreshing");
    self.state = ConnectionState::Connecting;

    match self.session.refresh_credential().await {
      Ok(auth) => {
        self.disconnect();
        self.sync_with(&auth).await.map(|_| ())
      }
      Err(refresh_err) => {
        tracing::warn!(error = %refresh_err, "Credential refresh failed, signing out");
        self.disconnect();
        self.session.sign_out().await;
        self.reconciler.notify(Notification::SessionEnded);
        Ok(())
      }
    }
  }

  /// Connect and process messages until the channel closes.
  pub async fn run(mut self) -> Result<()> {
    self.sync().await?;
    while let Some(message) = self.next_message().await {
      self.handle_message(message).await?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query::{Surface, SurfaceRegistry};
  use crate::session::{Identity, SessionTokens};
  use color_eyre::eyre::eyre;
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  struct FakeHandle {
    connected: Arc<AtomicBool>,
  }

  impl PushHandle for FakeHandle {
    fn is_connected(&self) -> bool {
      self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
      self.connected.store(false, Ordering::SeqCst);
    }
  }

  #[derive(Default)]
  struct FakeConnector {
    credentials: Mutex<Vec<String>>,
    links: Mutex<Vec<Arc<AtomicBool>>>,
    senders: Mutex<Vec<mpsc::Sender<ChannelMessage>>>,
  }

  impl FakeConnector {
    fn connects(&self) -> usize {
      self.credentials.lock().unwrap().len()
    }

    fn last_credential(&self) -> Option<String> {
      self.credentials.lock().unwrap().last().cloned()
    }

    fn link(&self, index: usize) -> Arc<AtomicBool> {
      self.links.lock().unwrap()[index].clone()
    }

    fn sender(&self) -> mpsc::Sender<ChannelMessage> {
      self.senders.lock().unwrap().last().unwrap().clone()
    }

    fn drop_senders(&self) {
      self.senders.lock().unwrap().clear();
    }
  }

  #[async_trait]
  impl PushConnector for FakeConnector {
    async fn connect(&self, credential: &Credential) -> Result<PushChannel> {
      let (tx, rx) = mpsc::channel(16);
      let connected = Arc::new(AtomicBool::new(true));
      self.credentials.lock().unwrap().push(credential.expose().to_string());
      self.links.lock().unwrap().push(connected.clone());
      self.senders.lock().unwrap().push(tx);
      Ok(PushChannel {
        handle: Box::new(FakeHandle { connected }),
        messages: rx,
      })
    }
  }

  struct FakeSession {
    auth: Mutex<AuthState>,
    refreshed: Mutex<Option<String>>,
    signed_out: AtomicBool,
  }

  impl FakeSession {
    fn with_token(token: Option<&str>) -> Self {
      let session = Self {
        auth: Mutex::new(AuthState::default()),
        refreshed: Mutex::new(None),
        signed_out: AtomicBool::new(false),
      };
      session.set_token(token);
      session
    }

    fn set_token(&self, token: Option<&str>) {
      *self.auth.lock().unwrap() = auth_with(token);
    }

    fn refresh_to(&self, token: &str) {
      *self.refreshed.lock().unwrap() = Some(token.to_string());
    }
  }

  fn auth_with(token: Option<&str>) -> AuthState {
    AuthState {
      session: token.map(|t| SessionTokens {
        access_token: Some(t.to_string()),
        ..SessionTokens::default()
      }),
      ..AuthState::default()
    }
  }

  impl Identity for FakeSession {
    fn owner_id(&self) -> Option<String> {
      Some("alice".to_string())
    }
  }

  #[async_trait]
  impl Session for FakeSession {
    fn auth_state(&self) -> AuthState {
      self.auth.lock().unwrap().clone()
    }

    async fn refresh_credential(&self) -> Result<AuthState> {
      let refreshed = self.refreshed.lock().unwrap().clone();
      match refreshed {
        Some(token) => {
          self.set_token(Some(&token));
          Ok(auth_with(Some(&token)))
        }
        None => Err(eyre!("refresh token expired")),
      }
    }

    async fn sign_out(&self) {
      self.signed_out.store(true, Ordering::SeqCst);
      self.set_token(None);
    }
  }

  struct Fixture {
    manager: ConnectionManager,
    connector: Arc<FakeConnector>,
    session: Arc<FakeSession>,
    registry: SurfaceRegistry,
    notifications: mpsc::UnboundedReceiver<Notification>,
  }

  fn fixture(token: Option<&str>) -> Fixture {
    let connector = Arc::new(FakeConnector::default());
    let session = Arc::new(FakeSession::with_token(token));
    let registry = SurfaceRegistry::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(
      connector.clone(),
      session.clone(),
      Reconciler::new(registry.clone(), tx),
    );
    Fixture {
      manager,
      connector,
      session,
      registry,
      notifications: rx,
    }
  }

  fn transport_error(status: u16, message: &str) -> ChannelMessage {
    ChannelMessage::Lifecycle(Lifecycle::Error(TransportError {
      status: Some(status),
      code: None,
      message: message.to_string(),
    }))
  }

  #[tokio::test]
  async fn test_no_credential_stays_disconnected() {
    let mut f = fixture(None);
    assert!(!f.manager.sync().await.unwrap());
    assert_eq!(f.manager.state(), ConnectionState::Disconnected);
    assert_eq!(f.connector.connects(), 0);
  }

  #[tokio::test]
  async fn test_same_credential_reuses_connection() {
    let mut f = fixture(Some("tok-1"));

    assert!(f.manager.sync().await.unwrap());
    assert!(!f.manager.sync().await.unwrap());

    assert_eq!(f.manager.state(), ConnectionState::Connected);
    assert_eq!(f.connector.connects(), 1);
  }

  #[tokio::test]
  async fn test_rotated_credential_reconnects() {
    let mut f = fixture(Some("tok-1"));
    f.manager.sync().await.unwrap();

    f.session.set_token(Some("tok-2"));
    assert!(f.manager.sync().await.unwrap());

    assert_eq!(f.connector.connects(), 2);
    assert_eq!(f.connector.last_credential().as_deref(), Some("tok-2"));
    assert!(!f.connector.link(0).load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_dropped_channel_reconnects_with_same_credential() {
    let mut f = fixture(Some("tok-1"));
    f.manager.sync().await.unwrap();
    f.connector.link(0).store(false, Ordering::SeqCst);

    assert!(f.manager.sync().await.unwrap());
    assert_eq!(f.connector.connects(), 2);
  }

  #[tokio::test]
  async fn test_sign_out_disconnects() {
    let mut f = fixture(Some("tok-1"));
    f.manager.sync().await.unwrap();

    f.session.set_token(None);
    f.manager.sync().await.unwrap();

    assert_eq!(f.manager.state(), ConnectionState::Disconnected);
    assert!(!f.connector.link(0).load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_auth_error_refreshes_and_reconnects() {
    let mut f = fixture(Some("tok-1"));
    f.manager.sync().await.unwrap();
    f.session.refresh_to("tok-2");

    f.manager
      .handle_message(transport_error(401, "jwt expired"))
      .await
      .unwrap();

    assert_eq!(f.manager.state(), ConnectionState::Connected);
    assert_eq!(f.connector.connects(), 2);
    assert_eq!(f.connector.last_credential().as_deref(), Some("tok-2"));
    assert!(!f.session.signed_out.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_failed_refresh_signs_out() {
    let mut f = fixture(Some("tok-1"));
    f.manager.sync().await.unwrap();

    f.manager
      .handle_message(transport_error(401, "invalid token"))
      .await
      .unwrap();

    assert_eq!(f.manager.state(), ConnectionState::Disconnected);
    assert!(f.session.signed_out.load(Ordering::SeqCst));
    assert_eq!(f.notifications.try_recv().unwrap(), Notification::SessionEnded);

    // Terminal: nothing to reconnect with
    assert!(!f.manager.sync().await.unwrap());
    assert_eq!(f.connector.connects(), 1);
  }

  #[tokio::test]
  async fn test_transport_error_degrades_without_sign_out() {
    let mut f = fixture(Some("tok-1"));
    f.manager.sync().await.unwrap();

    f.manager
      .handle_message(transport_error(503, "upstream unavailable"))
      .await
      .unwrap();

    assert_eq!(f.manager.state(), ConnectionState::Connected);
    assert_eq!(f.connector.connects(), 1);
    assert!(!f.session.signed_out.load(Ordering::SeqCst));
    assert!(matches!(
      f.notifications.try_recv(),
      Ok(Notification::ServiceDegraded { .. })
    ));
  }

  #[tokio::test]
  async fn test_events_invalidate_and_invalid_events_are_dropped() {
    let mut f = fixture(Some("tok-1"));
    f.registry.register(&Surface::TicketList);
    f.manager.sync().await.unwrap();

    f.manager
      .handle_message(ChannelMessage::Event {
        name: "ticket.updated".to_string(),
        payload: json!({"ticketId": "abc"}),
      })
      .await
      .unwrap();
    f.manager
      .handle_message(ChannelMessage::Event {
        name: "ticket.updated".to_string(),
        payload: json!({"unexpected": true}),
      })
      .await
      .unwrap();

    assert_eq!(f.registry.generation(&Surface::TicketList), Some(1));
  }

  #[tokio::test]
  async fn test_run_processes_until_channel_ends() {
    let f = fixture(Some("tok-1"));
    f.registry.register(&Surface::TicketList);
    let connector = f.connector.clone();
    let registry = f.registry.clone();

    let task = tokio::spawn(f.manager.run());
    while connector.connects() == 0 {
      tokio::task::yield_now().await;
    }
    let sender = connector.sender();
    sender
      .send(ChannelMessage::Event {
        name: "ticket.created".to_string(),
        payload: json!({"ticketId": "new-1"}),
      })
      .await
      .unwrap();
    drop(sender);
    connector.drop_senders();

    task.await.unwrap().unwrap();
    assert_eq!(registry.generation(&Surface::TicketList), Some(1));
  }
}
