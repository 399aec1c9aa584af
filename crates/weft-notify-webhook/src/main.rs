//! Webhook notification extension.
//!
//! One-shot workflow extension that POSTs a JSON notification to the
//! `notificationUrl` input and reports the outcome envelope on the output
//! channel.

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

#[derive(Debug, Parser)]
#[command(
    name = "weft-notify-webhook",
    about = "Workflow extension that delivers a webhook notification"
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
        .required("notificationUrl")
        .required("title")
        .required("body")
}

/// POSTs `{"title","body"}` to the notification URL from the inputs.
struct WebhookNotifyAction {
    client: reqwest::Client,
}

impl WebhookNotifyAction {
    fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ActionInvoker for WebhookNotifyAction {
    async fn invoke(&self, record: &InputRecord) -> Result<Value, ExtensionError> {
        let notification_url = record.require_str("notificationUrl")?;
        let title = record.require_str("title")?;
        let body = record.require_str("body")?;

        let response = self
            .client
            .post(notification_url)
            .json(&json!({"title": title, "body": body}))
            .send()
            .await
            .map_err(|error| {
                ExtensionError::Action(format!("notification request failed: {error}"))
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtensionError::Action(format!(
                "notification endpoint returned status {}",
                status.as_u16()
            )));
        }
        info!(notification_url, "notification delivered");
        Ok(json!({
            "success": true,
            "notification_url": notification_url,
            "title": title,
            "body": body,
        }))
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
    let invoker = Arc::new(WebhookNotifyAction::new()?);

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
        "notify webhook summary: processed={} completed={} failed={} control_skipped={} shutdown={} teardown_clean={}",
        summary.data_messages_processed,
        summary.completed_envelopes,
        summary.failed_envelopes,
        summary.control_messages_skipped,
        summary.shutdown_requested,
        summary.teardown_clean
    );
    Ok(())
}
