//! Paginated, bounded-concurrency synchronization of a JQL search.
//!
//! A sync run probes the total issue count with a single-issue request,
//! fans out one task per page behind a semaphore, and collects pages as they
//! complete. The first failed page ends the run with an error and aborts every
//! fetch still in flight; nothing partial is returned.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::{JiraResult, SyncError};
use crate::jira::client::{IssueSource, SearchParams};
use crate::jira::issues::Issues;
use crate::jira::types::{SearchResponse, User};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_CONCURRENCY: usize = 10;

/// What to synchronize and how hard to push the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
  pub jql: String,
  pub page_size: u32,
  /// Maximum number of page requests in flight at once
  pub concurrency: usize,
  pub fields: Vec<String>,
  pub expand: Vec<String>,
}

impl SyncOptions {
  pub fn new(jql: impl Into<String>) -> Self {
    Self {
      jql: jql.into(),
      page_size: DEFAULT_PAGE_SIZE,
      concurrency: DEFAULT_CONCURRENCY,
      fields: Vec::new(),
      expand: vec!["changelog".to_string()],
    }
  }
}

/// Immutable result of a completed sync.
#[derive(Debug, Clone, Serialize)]
pub struct JiraSnapshot {
  pub issues: Issues,
  pub my_user: User,
  pub synced_at: DateTime<Utc>,
}

/// Phases of a sync run, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
  Probing,
  Fetching,
  Aggregating,
  Done,
}

impl fmt::Display for SyncPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Probing => "probing",
      Self::Fetching => "fetching",
      Self::Aggregating => "aggregating",
      Self::Done => "done",
    };
    f.write_str(name)
  }
}

/// Number of full pages needed to cover `total` issues.
pub fn page_count(total: u64, page_size: u32) -> u64 {
  total.div_ceil(u64::from(page_size.max(1)))
}

/// Offsets requested for `total` issues.
///
/// This deliberately includes one page past the last full one: the total is
/// read from a separate probe request and issues created in between would
/// otherwise be missed at the tail.
pub fn page_offsets(total: u64, page_size: u32) -> Vec<u64> {
  let step = u64::from(page_size.max(1));
  (0..=page_count(total, page_size))
    .map(|page| page * step)
    .collect()
}

/// Drives sync runs against an [`IssueSource`].
pub struct Loader<S> {
  source: Arc<S>,
  options: SyncOptions,
}

impl<S> Loader<S>
where
  S: IssueSource + 'static,
{
  pub fn new(source: Arc<S>, mut options: SyncOptions) -> Self {
    // A zero page size would be dropped from the request and let the server
    // pick one, breaking the offset arithmetic.
    options.page_size = options.page_size.max(1);
    Self { source, options }
  }

  pub fn options(&self) -> &SyncOptions {
    &self.options
  }

  /// Run a full sync to completion.
  pub async fn sync(&self) -> Result<JiraSnapshot, SyncError> {
    self.sync_until(std::future::pending()).await
  }

  /// Run a full sync, giving up with [`SyncError::Cancelled`] as soon as
  /// `shutdown` resolves. In-flight page requests are aborted either way.
  pub async fn sync_until<F>(&self, shutdown: F) -> Result<JiraSnapshot, SyncError>
  where
    F: Future<Output = ()>,
  {
    tokio::pin!(shutdown);

    tokio::select! {
      biased;
      () = &mut shutdown => {
        info!("sync cancelled");
        Err(SyncError::Cancelled)
      }
      result = self.run() => result,
    }
  }

  async fn run(&self) -> Result<JiraSnapshot, SyncError> {
    info!(phase = %SyncPhase::Probing, jql = %self.options.jql, "sync started");
    let total = self.probe().await?;

    let offsets = page_offsets(total, self.options.page_size);
    info!(
      phase = %SyncPhase::Fetching,
      total,
      requests = offsets.len(),
      "fetching pages"
    );
    let issues = self.fetch_pages(&offsets).await?;
    info!(phase = %SyncPhase::Aggregating, issues = issues.len(), "pages collected");

    let my_user = self
      .source
      .current_user()
      .await
      .map_err(SyncError::CurrentUser)?;

    info!(phase = %SyncPhase::Done, issues = issues.len(), "sync finished");
    Ok(JiraSnapshot {
      issues,
      my_user,
      synced_at: Utc::now(),
    })
  }

  async fn probe(&self) -> Result<u64, SyncError> {
    let params = SearchParams::new(self.options.jql.clone()).page(0, 1);
    let page = self
      .source
      .fetch_page(params)
      .await
      .map_err(SyncError::Probe)?;
    Ok(page.total)
  }

  async fn fetch_pages(&self, offsets: &[u64]) -> Result<Issues, SyncError> {
    let permits = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
    // Dropping the set aborts whatever is still running.
    let mut tasks: JoinSet<(u64, JiraResult<SearchResponse>)> = JoinSet::new();

    for &offset in offsets {
      let source = Arc::clone(&self.source);
      let permits = Arc::clone(&permits);
      let params = SearchParams::new(self.options.jql.clone())
        .page(offset, self.options.page_size)
        .with_fields(self.options.fields.iter().cloned())
        .with_expand(self.options.expand.iter().cloned());

      tasks.spawn(async move {
        // The semaphore is never closed, so acquire only fails if it were.
        let _permit = permits.acquire_owned().await.ok();
        debug!(offset, "fetching page");
        (offset, source.fetch_page(params).await)
      });
    }

    let mut issues = Issues::default();
    let mut received = 0;
    while let Some(joined) = tasks.join_next().await {
      let (offset, result) = joined?;
      match result {
        Ok(page) => {
          received += 1;
          debug!(
            offset,
            issues = page.issues.len(),
            received,
            expected = offsets.len(),
            "page received"
          );
          issues.extend(page.issues);
        }
        Err(source) => {
          tasks.abort_all();
          return Err(SyncError::Page { offset, source });
        }
      }
    }

    debug_assert_eq!(received, offsets.len());
    Ok(issues)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::JiraError;
  use crate::jira::types::Issue;
  use std::collections::{BTreeSet, HashSet};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;

  /// In-memory source serving `total` issues, with optional failures.
  #[derive(Default)]
  struct FakeSource {
    total: u64,
    delay: Duration,
    fail_probe: bool,
    fail_user: bool,
    fail_offsets: HashSet<u64>,
    calls: Mutex<Vec<SearchParams>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
  }

  impl FakeSource {
    fn with_total(total: u64) -> Self {
      Self {
        total,
        ..Default::default()
      }
    }

    fn page_offsets_requested(&self) -> BTreeSet<u64> {
      self
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|p| p.max_results != 1)
        .map(|p| p.start_at)
        .collect()
    }

    fn failure() -> JiraError {
      JiraError::Status {
        url: "https://jira.example.com/rest/api/3/search".to_string(),
        status: 500,
      }
    }
  }

  impl IssueSource for FakeSource {
    async fn fetch_page(&self, params: SearchParams) -> JiraResult<SearchResponse> {
      self.calls.lock().unwrap().push(params.clone());
      let is_probe = params.max_results == 1;

      let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_in_flight.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(self.delay).await;
      self.in_flight.fetch_sub(1, Ordering::SeqCst);
      self.completed.fetch_add(1, Ordering::SeqCst);

      let fails = if is_probe {
        self.fail_probe
      } else {
        self.fail_offsets.contains(&params.start_at)
      };
      if fails {
        return Err(Self::failure());
      }

      let end = (params.start_at + u64::from(params.max_results)).min(self.total);
      let issues = (params.start_at..end)
        .map(|n| Issue {
          key: format!("PROJ-{n}"),
          ..Default::default()
        })
        .collect();
      Ok(SearchResponse {
        issues,
        total: self.total,
        start_at: params.start_at,
        max_results: u64::from(params.max_results),
      })
    }

    async fn current_user(&self) -> JiraResult<User> {
      if self.fail_user {
        return Err(Self::failure());
      }
      Ok(User {
        display_name: "Ada".to_string(),
        ..Default::default()
      })
    }
  }

  fn loader(source: &Arc<FakeSource>) -> Loader<FakeSource> {
    Loader::new(Arc::clone(source), SyncOptions::new("project = PROJ"))
  }

  #[test]
  fn test_page_arithmetic() {
    assert_eq!(page_count(125, 50), 3);
    assert_eq!(page_offsets(125, 50), vec![0, 50, 100, 150]);
    assert_eq!(page_count(100, 50), 2);
    assert_eq!(page_offsets(100, 50), vec![0, 50, 100]);
    assert_eq!(page_offsets(0, 50), vec![0]);
    assert_eq!(page_offsets(3, 0), vec![0, 1, 2, 3]);
  }

  #[tokio::test]
  async fn test_sync_requests_every_page_plus_one() {
    let source = Arc::new(FakeSource::with_total(125));

    let snapshot = loader(&source).sync().await.expect("sync should succeed");

    assert_eq!(snapshot.issues.len(), 125);
    assert_eq!(snapshot.my_user.display_name, "Ada");
    assert_eq!(
      source.page_offsets_requested(),
      BTreeSet::from([0, 50, 100, 150])
    );

    let calls = source.calls.lock().unwrap();
    assert_eq!(calls.len(), 5, "one probe plus four pages");
    let probe = &calls[0];
    assert_eq!((probe.start_at, probe.max_results), (0, 1));
    assert!(probe.expand.is_empty());
    assert!(calls[1..].iter().all(|p| p.expand == ["changelog"]));
  }

  #[tokio::test]
  async fn test_empty_result_set_still_fetches_first_page() {
    let source = Arc::new(FakeSource::with_total(0));

    let snapshot = loader(&source).sync().await.expect("sync should succeed");

    assert!(snapshot.issues.is_empty());
    assert_eq!(source.page_offsets_requested(), BTreeSet::from([0]));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_in_flight_requests_are_bounded() {
    let source = Arc::new(FakeSource {
      total: 25 * 50,
      delay: Duration::from_millis(20),
      ..Default::default()
    });

    let snapshot = loader(&source).sync().await.expect("sync should succeed");

    assert_eq!(snapshot.issues.len(), 1250);
    let max = source.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= DEFAULT_CONCURRENCY, "max in flight was {max}");
    assert!(max > 1, "pages should be fetched concurrently");
  }

  #[tokio::test]
  async fn test_custom_concurrency_is_respected() {
    let source = Arc::new(FakeSource {
      total: 500,
      delay: Duration::from_millis(5),
      ..Default::default()
    });
    let options = SyncOptions {
      concurrency: 2,
      ..SyncOptions::new("project = PROJ")
    };

    Loader::new(Arc::clone(&source), options)
      .sync()
      .await
      .expect("sync should succeed");

    assert!(source.max_in_flight.load(Ordering::SeqCst) <= 2);
  }

  #[tokio::test]
  async fn test_one_failed_page_fails_the_sync() {
    let source = Arc::new(FakeSource {
      total: 500,
      fail_offsets: HashSet::from([200]),
      ..Default::default()
    });

    let result = loader(&source).sync().await;

    match result {
      Err(SyncError::Page { offset, source }) => {
        assert_eq!(offset, 200);
        assert!(matches!(source, JiraError::Status { status: 500, .. }));
      }
      other => panic!("expected page failure, got {other:?}"),
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_failure_aborts_outstanding_fetches() {
    let source = Arc::new(FakeSource {
      total: 50 * 50,
      delay: Duration::from_millis(30),
      fail_offsets: page_offsets(50 * 50, 50).into_iter().collect(),
      ..Default::default()
    });
    let options = SyncOptions {
      concurrency: 1,
      ..SyncOptions::new("project = PROJ")
    };

    let result = Loader::new(Arc::clone(&source), options).sync().await;
    assert!(matches!(result, Err(SyncError::Page { .. })));

    tokio::time::sleep(Duration::from_millis(100)).await;
    // Probe plus at most a couple of pages ran before the abort landed.
    let completed = source.completed.load(Ordering::SeqCst);
    assert!(completed < 10, "{completed} fetches completed after abort");
  }

  #[tokio::test]
  async fn test_probe_failure_is_fatal() {
    let source = Arc::new(FakeSource {
      total: 10,
      fail_probe: true,
      ..Default::default()
    });

    let result = loader(&source).sync().await;

    assert!(matches!(result, Err(SyncError::Probe(_))));
    assert_eq!(source.calls.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_current_user_failure_is_fatal() {
    let source = Arc::new(FakeSource {
      total: 10,
      fail_user: true,
      ..Default::default()
    });

    let result = loader(&source).sync().await;

    assert!(matches!(result, Err(SyncError::CurrentUser(_))));
  }

  #[tokio::test]
  async fn test_shutdown_cancels_sync() {
    let source = Arc::new(FakeSource {
      total: 500,
      delay: Duration::from_secs(5),
      ..Default::default()
    });

    let result = loader(&source)
      .sync_until(tokio::time::sleep(Duration::from_millis(20)))
      .await;

    assert!(matches!(result, Err(SyncError::Cancelled)));
  }
}
