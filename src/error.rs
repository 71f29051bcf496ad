//! Error types for the Jira client and the synchronization loader.

/// Errors from a single Jira API call.
#[derive(Debug, thiserror::Error)]
pub enum JiraError {
  /// Connection failure, timeout, or an interrupted response body.
  #[error("request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  /// The server answered with a non-success status.
  #[error("request to {url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  /// The response body could not be decoded.
  #[error("failed to decode {what}: {source}")]
  Decode {
    what: &'static str,
    #[source]
    source: serde_json::Error,
  },

  /// The configured host is not a usable base URL.
  #[error("invalid Jira URL {url}: {source}")]
  Url {
    url: String,
    #[source]
    source: url::ParseError,
  },

  /// The HTTP client could not be constructed.
  #[error("failed to create HTTP client: {0}")]
  Client(#[source] reqwest::Error),
}

/// Fatal errors that end a synchronization run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// The probe request for the total record count failed.
  #[error("failed to determine total issue count: {0}")]
  Probe(#[source] JiraError),

  /// A page fetch failed; all other in-flight fetches were aborted.
  #[error("failed to fetch issues at offset {offset}: {source}")]
  Page {
    offset: u64,
    #[source]
    source: JiraError,
  },

  /// Fetching the current user's profile failed.
  #[error("failed to fetch current user: {0}")]
  CurrentUser(#[source] JiraError),

  /// A fetch task panicked.
  #[error("fetch task failed: {0}")]
  Task(#[from] tokio::task::JoinError),

  /// The caller requested shutdown before synchronization finished.
  #[error("synchronization cancelled")]
  Cancelled,
}

pub type JiraResult<T> = Result<T, JiraError>;
