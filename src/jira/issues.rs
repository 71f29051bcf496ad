//! In-memory issue collection with parallel filtering.
//!
//! Filtering is a set operation: the result holds exactly the matching issues
//! but in no particular order.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use super::types::Issue;

/// Chunks handed out per worker, so a slow chunk doesn't stall the scan.
const CHUNKS_PER_WORKER: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Issues(Vec<Issue>);

impl Issues {
  pub fn new(issues: Vec<Issue>) -> Self {
    Self(issues)
  }

  pub fn into_inner(self) -> Vec<Issue> {
    self.0
  }

  pub fn extend(&mut self, other: Issues) {
    self.0.extend(other.0);
  }

  /// Issues matching `predicate`, scanned on one thread per available core.
  pub fn filter<P>(&self, predicate: P) -> Issues
  where
    P: Fn(&Issue) -> bool + Sync,
  {
    let workers = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    self.filter_with_workers(predicate, workers)
  }

  /// Issues matching `predicate`, scanned by up to `workers` threads.
  ///
  /// Workers pull fixed-size chunks from a shared cursor until the collection
  /// is exhausted, collect matches locally, and merge them into the result
  /// under a single lock once they run dry.
  pub fn filter_with_workers<P>(&self, predicate: P, workers: usize) -> Issues
  where
    P: Fn(&Issue) -> bool + Sync,
  {
    let items = self.0.as_slice();
    if items.is_empty() {
      return Issues::default();
    }

    let workers = workers.clamp(1, items.len());
    let chunk_size = (items.len() / (workers * CHUNKS_PER_WORKER)).max(1);
    let cursor = AtomicUsize::new(0);
    let matched = Mutex::new(Vec::new());

    thread::scope(|scope| {
      for _ in 0..workers {
        scope.spawn(|| {
          let mut local = Vec::new();
          loop {
            let start = cursor.fetch_add(chunk_size, Ordering::Relaxed);
            if start >= items.len() {
              break;
            }
            let chunk = &items[start..(start + chunk_size).min(items.len())];
            local.extend(chunk.iter().filter(|&issue| predicate(issue)).cloned());
          }

          if !local.is_empty() {
            matched
              .lock()
              .unwrap_or_else(PoisonError::into_inner)
              .append(&mut local);
          }
        });
      }
    });

    Issues(matched.into_inner().unwrap_or_else(PoisonError::into_inner))
  }

  /// The first `limit` issues in their current order.
  pub fn limit(&self, limit: usize) -> Issues {
    Issues(self.0.iter().take(limit).cloned().collect())
  }

  /// Keys of all issues, in their current order.
  pub fn keys(&self) -> Vec<String> {
    self.0.iter().map(|issue| issue.key.clone()).collect()
  }
}

impl Deref for Issues {
  type Target = [Issue];

  fn deref(&self) -> &[Issue] {
    &self.0
  }
}

impl From<Vec<Issue>> for Issues {
  fn from(issues: Vec<Issue>) -> Self {
    Self(issues)
  }
}

impl FromIterator<Issue> for Issues {
  fn from_iter<I: IntoIterator<Item = Issue>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl IntoIterator for Issues {
  type Item = Issue;
  type IntoIter = std::vec::IntoIter<Issue>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}

/// A single filter criterion over issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
  /// Case-sensitive substring of the summary or the description text
  TextContains(String),
  /// Exact status name
  Status(String),
  /// Exact assignee display name, `""` for unassigned
  Assignee(String),
  /// Has a resolution date
  Resolved,
  /// Has no resolution date
  Unresolved,
}

impl Criterion {
  pub fn matches(&self, issue: &Issue) -> bool {
    match self {
      Self::TextContains(text) => {
        issue.fields.summary.contains(text.as_str())
          || issue.description_text().contains(text.as_str())
      }
      Self::Status(status) => issue.status_name() == status,
      // Unassigned issues have an empty display name.
      Self::Assignee(name) => issue.assignee_name().unwrap_or_default() == name.as_str(),
      Self::Resolved => issue.is_resolved(),
      Self::Unresolved => !issue.is_resolved(),
    }
  }
}

/// Default page length for [`IssueQuery`] results.
pub const DEFAULT_QUERY_LIMIT: usize = 10;

/// A read-only query over a synchronized collection: criteria then a limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueQuery {
  pub criteria: Vec<Criterion>,
  pub limit: usize,
}

/// Result of an [`IssueQuery`]: the limited issues and the unlimited count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
  pub issues: Issues,
  pub total: usize,
}

impl Default for IssueQuery {
  fn default() -> Self {
    Self {
      criteria: Vec::new(),
      limit: DEFAULT_QUERY_LIMIT,
    }
  }
}

impl IssueQuery {
  pub fn with(mut self, criterion: Criterion) -> Self {
    self.criteria.push(criterion);
    self
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = limit;
    self
  }

  /// Apply each criterion as its own filter pass, then truncate.
  pub fn apply(&self, issues: &Issues) -> QueryResult {
    let mut filtered = issues.clone();
    for criterion in &self.criteria {
      filtered = filtered.filter(|issue| criterion.matches(issue));
    }

    QueryResult {
      total: filtered.len(),
      issues: filtered.limit(self.limit),
    }
  }
}
