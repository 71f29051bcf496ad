//! Synchronize a Jira issue search into memory and query it.
//!
//! [`loader::Loader`] pulls every page of a JQL search through a
//! [`jira::JiraClient`], whose responses are cached on disk by
//! [`cache::CacheLayer`]. The resulting [`jira::Issues`] can then be filtered
//! in parallel.

pub mod cache;
pub mod config;
pub mod error;
pub mod jira;
pub mod loader;
pub mod logging;

pub use error::{JiraError, SyncError};
