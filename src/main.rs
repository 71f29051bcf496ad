use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use jsync::config::Config;
use jsync::jira::issues::DEFAULT_QUERY_LIMIT;
use jsync::jira::{Criterion, IssueQuery, Issues, JiraClient};
use jsync::loader::Loader;

#[derive(Parser, Debug)]
#[command(name = "jsync")]
#[command(about = "Synchronize a Jira issue search into memory and query it")]
#[command(version)]
struct Cli {
  /// Path to config file (default: ./jsync.yaml, then $XDG_CONFIG_HOME/jsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// The Jira host URL
  #[arg(long, global = true)]
  host: Option<String>,

  /// The Jira username (account email)
  #[arg(long, global = true)]
  user: Option<String>,

  /// The Jira API token (default: $JSYNC_JIRA_TOKEN or $JIRA_API_TOKEN)
  #[arg(long, global = true)]
  token: Option<String>,

  /// The JQL query to synchronize
  #[arg(long, global = true)]
  jql: Option<String>,

  /// Also append logs to this file
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Synchronize and print matching issues
  Issues(Filters),
  /// Synchronize and print the keys of matching issues
  Keys(Filters),
  /// Print the authenticated user
  Myself,
  /// List the fields known to the Jira instance
  Fields,
}

#[derive(Args, Debug)]
struct Filters {
  /// Exact status name
  #[arg(long)]
  status: Option<String>,

  /// Case-sensitive text in the summary or description
  #[arg(long)]
  text: Option<String>,

  /// Exact assignee display name
  #[arg(long)]
  assignee: Option<String>,

  /// Only resolved issues
  #[arg(long, conflicts_with = "unresolved")]
  resolved: bool,

  /// Only unresolved issues
  #[arg(long)]
  unresolved: bool,

  /// Maximum number of issues to print
  #[arg(long, default_value_t = DEFAULT_QUERY_LIMIT)]
  limit: usize,
}

impl Filters {
  fn query(&self) -> IssueQuery {
    let mut query = IssueQuery::default().with_limit(self.limit);
    if let Some(status) = &self.status {
      query = query.with(Criterion::Status(status.clone()));
    }
    if let Some(text) = &self.text {
      query = query.with(Criterion::TextContains(text.clone()));
    }
    if let Some(assignee) = &self.assignee {
      query = query.with(Criterion::Assignee(assignee.clone()));
    }
    if self.resolved {
      query = query.with(Criterion::Resolved);
    }
    if self.unresolved {
      query = query.with(Criterion::Unresolved);
    }
    query
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueKeysResponse {
  issue_keys: Vec<String>,
  total: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Cli::parse();
  let _log_guard = jsync::logging::init(args.log_file.as_deref())?;

  // Load configuration, then let command line flags override it
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(host) = args.host {
    config.jira.url = host;
  }
  if let Some(user) = args.user {
    config.jira.email = user;
  }
  if let Some(jql) = args.jql {
    config.jql = jql;
  }

  match &args.command {
    Command::Myself | Command::Fields => config.validate_connection()?,
    Command::Issues(_) | Command::Keys(_) => config.validate()?,
  }

  let token = Config::api_token(args.token)?;

  let client = JiraClient::new(
    &config.jira.url,
    config.jira.email.clone(),
    token,
    config.cache_layer(),
  )?;

  match args.command {
    Command::Myself => print_json(&client.myself().await?),
    Command::Fields => print_json(&client.fields().await?),
    Command::Issues(filters) => {
      let issues = sync(client, &config).await?;
      print_json(&filters.query().apply(&issues))
    }
    Command::Keys(filters) => {
      let issues = sync(client, &config).await?;
      let result = filters.query().apply(&issues);
      print_json(&IssueKeysResponse {
        issue_keys: result.issues.keys(),
        total: result.total,
      })
    }
  }
}

async fn sync(client: JiraClient, config: &Config) -> Result<Issues> {
  let loader = Loader::new(Arc::new(client), config.sync_options());
  let snapshot = loader.sync_until(ctrl_c()).await?;

  info!(
    issues = snapshot.issues.len(),
    user = %snapshot.my_user.display_name,
    synced_at = %snapshot.synced_at,
    "synchronized"
  );
  Ok(snapshot.issues)
}

/// Resolves on Ctrl-C; never resolves if the handler can't be installed.
async fn ctrl_c() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
