pub mod client;
pub mod description;
pub mod issues;
pub mod types;

pub use client::{IssueSource, JiraClient, SearchParams};
pub use issues::{Criterion, IssueQuery, Issues, QueryResult};
pub use types::{Field, Issue, SearchResponse, User};
