use async_trait::async_trait;
use color_eyre::{eyre::eyre, Report, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::RemoteError;
use crate::realtime::CredentialExtractor;
use crate::session::Session;

use super::api_types::{ApiErrorBody, ApiTicketEnvelope, ApiTicketList};
use super::mutation::{MutationRequest, Verb};
use super::types::{Ticket, TicketFilter};

/// Remote ticket service.
#[async_trait]
pub trait TicketApi: Send + Sync {
  async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>>;

  async fn get_ticket(&self, id: &str) -> Result<Ticket>;

  /// Issue a recorded write and return the server's snapshot of the ticket.
  async fn send(&self, request: &MutationRequest) -> Result<Ticket>;
}

/// Ticket service client over HTTP.
#[derive(Clone)]
pub struct HttpTicketApi {
  client: reqwest::Client,
  base_url: Url,
  session: Arc<dyn Session>,
  extractor: CredentialExtractor,
}

impl HttpTicketApi {
  pub fn new(base_url: &str, session: Arc<dyn Session>, timeout: Duration) -> Result<Self> {
    let mut base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid server URL {}: {}", base_url, e))?;
    // Url::join replaces the last segment unless the base ends with '/'
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      session,
      extractor: CredentialExtractor::default(),
    })
  }

  fn url(&self, endpoint: &str) -> Result<Url> {
    self
      .base_url
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid endpoint {}: {}", endpoint, e))
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let builder = self.client.request(method, url);
    match self.extractor.extract(&self.session.auth_state()) {
      Some((_, credential)) => builder.bearer_auth(credential.expose()),
      None => builder,
    }
  }

  async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
    let response = builder.send().await.map_err(classify_transport)?;
    let status = response.status();

    if !status.is_success() {
      let body: ApiErrorBody = response.json().await.unwrap_or_default();
      return Err(Report::new(RemoteError::Status {
        status: status.as_u16(),
        message: body.describe(status.canonical_reason().unwrap_or("request failed")),
      }));
    }

    response
      .json::<T>()
      .await
      .map_err(|e| Report::new(RemoteError::Decode(e.to_string())))
  }
}

#[async_trait]
impl TicketApi for HttpTicketApi {
  async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
    let mut url = self.url("tickets")?;
    {
      let mut query = url.query_pairs_mut();
      if let Some(status) = filter.status {
        query.append_pair("status", status.as_str());
      }
      if let Some(assignee) = &filter.assignee {
        query.append_pair("assignee", assignee);
      }
      if let Some(search) = &filter.search {
        query.append_pair("q", search);
      }
    }
    if url.query() == Some("") {
      url.set_query(None);
    }

    let list: ApiTicketList = self.execute(self.request(Method::GET, url)).await?;
    Ok(list.tickets)
  }

  async fn get_ticket(&self, id: &str) -> Result<Ticket> {
    let url = self.url(&format!("tickets/{}", id))?;
    let envelope: ApiTicketEnvelope = self.execute(self.request(Method::GET, url)).await?;
    Ok(envelope.into_ticket())
  }

  async fn send(&self, request: &MutationRequest) -> Result<Ticket> {
    let url = self.url(&request.endpoint)?;
    let builder = self
      .request(method_for(request.verb), url)
      .json(&request.payload);

    let envelope: ApiTicketEnvelope = self.execute(builder).await?;
    Ok(envelope.into_ticket())
  }
}

fn method_for(verb: Verb) -> Method {
  match verb {
    Verb::Post => Method::POST,
    Verb::Put => Method::PUT,
    Verb::Patch => Method::PATCH,
    Verb::Delete => Method::DELETE,
  }
}

/// Map a reqwest failure that produced no response.
fn classify_transport(err: reqwest::Error) -> Report {
  if err.is_timeout() {
    // reqwest does not report which timeout fired
    Report::new(RemoteError::Timeout(Duration::ZERO))
  } else if err.is_connect() {
    Report::new(RemoteError::Connect(err.to_string()))
  } else if err.is_builder() {
    eyre!("Invalid request: {}", err)
  } else if err.status() == Some(StatusCode::UNAUTHORIZED) {
    Report::new(RemoteError::Status {
      status: 401,
      message: err.to_string(),
    })
  } else {
    Report::new(RemoteError::Decode(err.to_string()))
  }
}
