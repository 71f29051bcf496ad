//! Serde types for the Jira REST API responses this crate consumes.
//!
//! Only the fields that filtering inspects are typed. Everything else is kept
//! in `extra` so records survive a decode/encode cycle unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::description::extract_description;
use super::issues::Issues;

/// A single issue as returned by the search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
  #[serde(default)]
  pub id: String,
  pub key: String,
  #[serde(default)]
  pub fields: IssueFields,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub changelog: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueFields {
  #[serde(default)]
  pub summary: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<Status>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assignee: Option<User>,
  #[serde(
    rename = "resolutiondate",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub resolution_date: Option<String>,
  // Plain string (API v2) or an Atlassian document (API v3)
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
  #[serde(default)]
  pub name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A Jira user, as embedded in issues or returned by `/myself`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
  #[serde(rename = "accountId", default)]
  pub account_id: String,
  #[serde(rename = "displayName", default)]
  pub display_name: String,
  #[serde(
    rename = "emailAddress",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub email_address: Option<String>,
  #[serde(default)]
  pub active: bool,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// An entry of the field listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Field {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub key: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub custom: bool,
}

/// One page of the search endpoint.
///
/// `total` is only relied upon for the probe request; later pages may carry
/// fewer issues than requested at the tail of the result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
  #[serde(default)]
  pub issues: Issues,
  #[serde(default)]
  pub total: u64,
  #[serde(rename = "startAt", default)]
  pub start_at: u64,
  #[serde(rename = "maxResults", default)]
  pub max_results: u64,
}

impl Issue {
  pub fn status_name(&self) -> &str {
    self
      .fields
      .status
      .as_ref()
      .map(|s| s.name.as_str())
      .unwrap_or_default()
  }

  pub fn assignee_name(&self) -> Option<&str> {
    self.fields.assignee.as_ref().map(|u| u.display_name.as_str())
  }

  /// An issue is resolved when it carries a non-empty resolution date.
  pub fn is_resolved(&self) -> bool {
    self
      .fields
      .resolution_date
      .as_deref()
      .is_some_and(|d| !d.is_empty())
  }

  /// Description flattened to plain text, empty when absent.
  pub fn description_text(&self) -> String {
    self
      .fields
      .description
      .as_ref()
      .and_then(extract_description)
      .unwrap_or_default()
  }
}
