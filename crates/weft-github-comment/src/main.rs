//! GitHub issue-comment extension.
//!
//! One-shot workflow extension that posts a comment on a GitHub issue and
//! reports the created comment's id and URL in the outcome envelope.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use weft_contract::{ChannelSet, ExtensionError, InputRecord, WorkflowContext};
use weft_runtime::{
    ActionInvoker, ExtensionRuntime, ExtensionRuntimeConfig, InputSchema, RunMode,
};
use weft_transport::{RedisBusConnector, RedisConnectorConfig};

const HTTP_TIMEOUT_SECONDS: u64 = 30;
const GITHUB_API_BASE_DEFAULT: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("weft-github-comment/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Parser)]
#[command(
    name = "weft-github-comment",
    about = "Workflow extension that adds a comment to a GitHub issue"
)]
struct Cli {
    #[arg(long, env = "WORKFLOW_ID")]
    workflow_id: Option<String>,
    #[arg(long, env = "WORKFLOW_INSTANCE_ID")]
    workflow_instance_id: String,
    #[arg(long, env = "WORKFLOW_EXTENSION_ID")]
    workflow_extension_id: String,
    #[arg(long, env = "REDIS_HOST_URL")]
    redis_host_url: String,
    #[arg(long, env = "REDIS_USERNAME")]
    redis_username: Option<String>,
    #[arg(long, env = "REDIS_PASSWORD")]
    redis_password: Option<String>,
    #[arg(long, env = "REDIS_CHANNEL_IN")]
    redis_channel_in: String,
    #[arg(long, env = "REDIS_CHANNEL_OUT")]
    redis_channel_out: String,
    #[arg(long, env = "REDIS_CHANNEL_READY")]
    redis_channel_ready: String,
    #[arg(long, env = "GITHUB_API_BASE", default_value = GITHUB_API_BASE_DEFAULT)]
    github_api_base: String,
    /// Keep serving messages instead of exiting after the first.
    #[arg(long, env = "WEFT_CONTINUOUS")]
    continuous: bool,
    /// Bound, in milliseconds, on waiting for the workflow message.
    #[arg(long, env = "WEFT_RECEIVE_TIMEOUT_MS")]
    receive_timeout_ms: Option<u64>,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_inputs() -> InputSchema {
    InputSchema::new()
        .required("repo_owner")
        .required("repo_name")
        .required("issue_number")
        .required("comment_body")
        .required("access_token")
}

/// Posts `comment_body` to the issue named by the inputs via the GitHub
/// REST API.
struct GithubCommentAction {
    client: reqwest::Client,
    api_base: String,
}

impl GithubCommentAction {
    fn new(api_base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }
}

#[async_trait]
impl ActionInvoker for GithubCommentAction {
    async fn invoke(&self, record: &InputRecord) -> Result<Value, ExtensionError> {
        let repo_owner = record.require_str("repo_owner")?;
        let repo_name = record.require_str("repo_name")?;
        let issue_number = record.require_i64("issue_number")?;
        let comment_body = record.require_str("comment_body")?;
        let access_token = record.require_str("access_token")?;

        let url = format!(
            "{}/repos/{repo_owner}/{repo_name}/issues/{issue_number}/comments",
            self.api_base
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("token {access_token}"))
            .header("Accept", "application/vnd.github.v3+json")
            .json(&json!({"body": comment_body}))
            .send()
            .await
            .map_err(|error| ExtensionError::Action(format!("github request failed: {error}")))?;

        let status = response.status();
        match status.as_u16() {
            201 => {
                let created: Value = response.json().await.map_err(|error| {
                    ExtensionError::Action(format!("undecodable github response: {error}"))
                })?;
                info!(issue_number, repo_owner, repo_name, "comment created");
                Ok(json!({
                    "success": true,
                    "comment_id": created["id"],
                    "comment_url": created["html_url"],
                }))
            }
            403 => Err(ExtensionError::Action("rate limit exceeded".into())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ExtensionError::Action(format!(
                    "failed to add comment: {} {body}",
                    status.as_u16()
                )))
            }
        }
    }
}

fn runtime_config(cli: &Cli) -> ExtensionRuntimeConfig {
    let context = WorkflowContext::new(
        cli.workflow_id.clone(),
        cli.workflow_instance_id.clone(),
        cli.workflow_extension_id.clone(),
    );
    let channels = ChannelSet::new(
        cli.redis_channel_in.clone(),
        cli.redis_channel_out.clone(),
        cli.redis_channel_ready.clone(),
    );
    let mut config = ExtensionRuntimeConfig::new(context, channels);
    if cli.continuous {
        config.mode = RunMode::Continuous;
    }
    config.receive_timeout = cli.receive_timeout_ms.map(Duration::from_millis);
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let connector = RedisBusConnector::new(RedisConnectorConfig {
        url: cli.redis_host_url.clone(),
        username: cli.redis_username.clone(),
        password: cli.redis_password.clone(),
    });
    let invoker = Arc::new(GithubCommentAction::new(cli.github_api_base.clone())?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let mut runtime = ExtensionRuntime::new(runtime_config(&cli), required_inputs(), invoker)
        .with_shutdown(shutdown_rx);
    let summary = runtime
        .run(&connector)
        .await
        .context("extension runtime failed")?;

    println!(
        "github comment summary: processed={} completed={} failed={} control_skipped={} shutdown={} teardown_clean={}",
        summary.data_messages_processed,
        summary.completed_envelopes,
        summary.failed_envelopes,
        summary.control_messages_skipped,
        summary.shutdown_requested,
        summary.teardown_clean
    );
    Ok(())
}
