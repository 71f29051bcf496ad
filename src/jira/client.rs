use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::CacheLayer;
use crate::error::{JiraError, JiraResult};
use crate::jira::types::{Field, SearchResponse, User};

/// Fixed per-request timeout, covering connect through the end of the body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT_VALUE: &str = concat!("jsync/", env!("CARGO_PKG_VERSION"));

const SEARCH_PATH: &str = "/rest/api/3/search";
const MYSELF_PATH: &str = "/rest/api/3/myself";
const FIELDS_PATH: &str = "/rest/api/3/field";

/// Parameters of one search request.
///
/// Default values (empty JQL, zero offset or page size, empty lists) are left
/// out of the request entirely so the server applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
  pub jql: String,
  pub start_at: u64,
  pub max_results: u32,
  pub fields: Vec<String>,
  pub expand: Vec<String>,
}

impl SearchParams {
  pub fn new(jql: impl Into<String>) -> Self {
    Self {
      jql: jql.into(),
      ..Self::default()
    }
  }

  pub fn page(mut self, start_at: u64, max_results: u32) -> Self {
    self.start_at = start_at;
    self.max_results = max_results;
    self
  }

  pub fn with_fields<I, S>(mut self, fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.fields = fields.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_expand<I, S>(mut self, expand: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.expand = expand.into_iter().map(Into::into).collect();
    self
  }

  /// Request parameters in their fixed order, defaults omitted.
  pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if !self.jql.is_empty() {
      pairs.push(("jql", self.jql.clone()));
    }
    if self.start_at > 0 {
      pairs.push(("startAt", self.start_at.to_string()));
    }
    if self.max_results > 0 {
      pairs.push(("maxResults", self.max_results.to_string()));
    }
    if !self.fields.is_empty() {
      pairs.push(("fields", self.fields.join(",")));
    }
    if !self.expand.is_empty() {
      pairs.push(("expand", self.expand.join(",")));
    }
    pairs
  }
}

/// The remote calls the loader depends on.
pub trait IssueSource: Send + Sync {
  /// Fetch one page of search results.
  fn fetch_page(
    &self,
    params: SearchParams,
  ) -> impl Future<Output = JiraResult<SearchResponse>> + Send;

  /// Fetch the profile of the authenticated user.
  fn current_user(&self) -> impl Future<Output = JiraResult<User>> + Send;
}

/// Jira REST client with read-through response caching.
///
/// Cache identities are the complete request URLs, so every distinct
/// combination of host, endpoint and parameters gets its own entry.
#[derive(Clone)]
pub struct JiraClient {
  http: reqwest::Client,
  base_url: Url,
  email: String,
  token: String,
  cache: CacheLayer,
}

impl JiraClient {
  pub fn new(
    host: &str,
    email: impl Into<String>,
    token: impl Into<String>,
    cache: CacheLayer,
  ) -> JiraResult<Self> {
    Self::with_timeout(host, email, token, cache, REQUEST_TIMEOUT)
  }

  pub(crate) fn with_timeout(
    host: &str,
    email: impl Into<String>,
    token: impl Into<String>,
    cache: CacheLayer,
    timeout: Duration,
  ) -> JiraResult<Self> {
    let base_url = Url::parse(host).map_err(|source| JiraError::Url {
      url: host.to_string(),
      source,
    })?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(USER_AGENT_VALUE)
      .build()
      .map_err(JiraError::Client)?;

    Ok(Self {
      http,
      base_url,
      email: email.into(),
      token: token.into(),
      cache,
    })
  }

  /// Search for issues using JQL
  pub async fn search(&self, params: &SearchParams) -> JiraResult<SearchResponse> {
    self.get_cached(self.search_url(params), "search response").await
  }

  /// Get the authenticated user's profile
  pub async fn myself(&self) -> JiraResult<User> {
    self.get_cached(self.endpoint(MYSELF_PATH), "user profile").await
  }

  /// List all fields known to the instance
  pub async fn fields(&self) -> JiraResult<Vec<Field>> {
    self.get_cached(self.endpoint(FIELDS_PATH), "field list").await
  }

  /// Full search URL for `params`, which doubles as its cache identity.
  pub fn search_url(&self, params: &SearchParams) -> Url {
    let mut url = self.endpoint(SEARCH_PATH);
    let pairs = params.query_pairs();
    if !pairs.is_empty() {
      url.query_pairs_mut().extend_pairs(pairs);
    }
    url
  }

  fn endpoint(&self, path: &str) -> Url {
    let mut url = self.base_url.clone();
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}{path}"));
    url.set_query(None);
    url.set_fragment(None);
    url
  }

  /// Fetch and decode `url`, going through the cache.
  ///
  /// A body is only stored once it decodes, so an unexpected 200 (a login
  /// page from a proxy, say) is retried on the next call.
  async fn get_cached<T: DeserializeOwned>(&self, url: Url, what: &'static str) -> JiraResult<T> {
    let mut fresh = None;
    let (slot, target) = (&mut fresh, &url);
    let body = self
      .cache
      .remember(url.as_str(), move || async move {
        let body = self.get(target).await?;
        *slot = Some(decode::<T>(what, &body)?);
        Ok::<_, JiraError>(body)
      })
      .await?;

    match fresh {
      Some(value) => Ok(value),
      None => decode(what, &body),
    }
  }

  async fn get(&self, url: &Url) -> JiraResult<Vec<u8>> {
    debug!(url = %url, "GET");
    let transport = |source: reqwest::Error| JiraError::Transport {
      url: url.to_string(),
      source,
    };

    let response = self
      .http
      .get(url.clone())
      .basic_auth(&self.email, Some(&self.token))
      .send()
      .await
      .map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
      warn!(url = %url, status = status.as_u16(), "Jira request failed");
      return Err(JiraError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }

    let body = response.bytes().await.map_err(transport)?;
    Ok(body.to_vec())
  }
}

impl IssueSource for JiraClient {
  async fn fetch_page(&self, params: SearchParams) -> JiraResult<SearchResponse> {
    self.search(&params).await
  }

  async fn current_user(&self) -> JiraResult<User> {
    self.myself().await
  }
}

fn decode<T: DeserializeOwned>(what: &'static str, body: &[u8]) -> JiraResult<T> {
  serde_json::from_slice(body).map_err(|source| JiraError::Decode { what, source })
}
