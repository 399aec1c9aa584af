//! Extension runtime state machine.
//!
//! One runtime instance owns one bus connection for its whole life:
//! connect, subscribe, announce readiness, wait for work, invoke, publish
//! the outcome, tear down. Every failure below the processing boundary is
//! converted into a `failed` envelope; failures at or above the
//! connect/publish boundary propagate, because no further protocol action
//! is possible without a connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use weft_contract::{ChannelSet, ExtensionError, InputRecord, WorkflowContext};
use weft_transport::{BusConnection, BusConnector, BusSubscription};

use crate::input_decoder::{decode_input, InputSchema};
use crate::result_envelope::{build_failure, build_success, encode_envelope};

/// The readiness signal is the publication itself; its payload is empty.
pub const READY_PAYLOAD: &str = "";

#[async_trait]
/// Trait contract for `ActionInvoker` behavior.
///
/// One invocation per data message; domain failures are
/// `ExtensionError::Action` and are reported downstream, never raised out
/// of the runtime. The runtime imposes no timeout on invocation.
pub trait ActionInvoker: Send + Sync {
    async fn invoke(&self, record: &InputRecord) -> Result<Value, ExtensionError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Enumerates supported `RunMode` values.
pub enum RunMode {
    /// Process exactly one data message, then terminate.
    #[default]
    OneShot,
    /// Keep re-entering the wait after each envelope; an explicit
    /// configuration choice, never inferred.
    Continuous,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneShot => "one-shot",
            Self::Continuous => "continuous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `RuntimeState` values.
pub enum RuntimeState {
    Connecting,
    ReadyAnnounced,
    AwaitingMessage,
    Processing,
    Publishing,
    Teardown,
    Terminated,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::ReadyAnnounced => "ready_announced",
            Self::AwaitingMessage => "awaiting_message",
            Self::Processing => "processing",
            Self::Publishing => "publishing",
            Self::Teardown => "teardown",
            Self::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone)]
/// Public struct `ExtensionRuntimeConfig` used across Weft components.
pub struct ExtensionRuntimeConfig {
    pub context: WorkflowContext,
    pub channels: ChannelSet,
    pub mode: RunMode,
    /// Bound on each wait for a data message. Off by default: the
    /// dispatching orchestrator is the authority on work assignment.
    pub receive_timeout: Option<Duration>,
}

impl ExtensionRuntimeConfig {
    pub fn new(context: WorkflowContext, channels: ChannelSet) -> Self {
        Self {
            context,
            channels,
            mode: RunMode::default(),
            receive_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Per-run counters reported after the runtime terminates.
pub struct RunSummary {
    pub data_messages_processed: usize,
    pub control_messages_skipped: usize,
    pub completed_envelopes: usize,
    pub failed_envelopes: usize,
    pub shutdown_requested: bool,
    pub teardown_clean: bool,
}

enum WaitResult {
    Work(String),
    Closed,
    TimedOut,
    Shutdown,
}

/// The extension runtime state machine.
pub struct ExtensionRuntime {
    config: ExtensionRuntimeConfig,
    schema: InputSchema,
    invoker: Arc<dyn ActionInvoker>,
    shutdown: Option<watch::Receiver<bool>>,
    state: RuntimeState,
}

impl ExtensionRuntime {
    pub fn new(
        config: ExtensionRuntimeConfig,
        schema: InputSchema,
        invoker: Arc<dyn ActionInvoker>,
    ) -> Self {
        Self {
            config,
            schema,
            invoker,
            shutdown: None,
            state: RuntimeState::Connecting,
        }
    }

    /// Attaches a shutdown signal. A raised signal stops the runtime from
    /// accepting new work; an in-flight invocation always finishes and its
    /// envelope is published before teardown.
    pub fn with_shutdown(mut self, receiver: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(receiver);
        self
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Drives the full protocol against the given bus.
    ///
    /// Returns the run summary on normal completion, including runs whose
    /// only outcome was a `failed` envelope. Returns an error when no
    /// envelope could ever be owed or delivered: connect/subscribe/ready
    /// failures, a severed or timed-out wait, or a result publish failure.
    pub async fn run(&mut self, connector: &dyn BusConnector) -> Result<RunSummary, ExtensionError> {
        self.transition(RuntimeState::Connecting);
        let connection = connector.connect().await?;
        let mut summary = RunSummary::default();

        // Subscribe before announcing readiness. The orchestrator only
        // dispatches after observing the ready signal, so registering the
        // subscription first means work sent immediately afterwards cannot
        // land in an unsubscribed gap.
        let mut subscription = match connection.subscribe(&self.config.channels.input).await {
            Ok(subscription) => subscription,
            Err(subscribe_error) => {
                if let Err(close_error) = connection.close().await {
                    warn!(error = %close_error, "connection close failed after subscribe error");
                }
                return Err(subscribe_error);
            }
        };
        if let Err(announce_error) = connection
            .publish(&self.config.channels.ready, READY_PAYLOAD)
            .await
        {
            self.teardown(subscription.as_mut(), connection.as_ref(), &mut summary)
                .await;
            return Err(announce_error);
        }
        self.transition(RuntimeState::ReadyAnnounced);
        info!(
            channel = %self.config.channels.ready,
            mode = self.config.mode.as_str(),
            "readiness announced"
        );

        let outcome = self
            .message_loop(subscription.as_mut(), connection.as_ref(), &mut summary)
            .await;
        self.teardown(subscription.as_mut(), connection.as_ref(), &mut summary)
            .await;
        self.transition(RuntimeState::Terminated);
        outcome.map(|()| summary)
    }

    async fn message_loop(
        &mut self,
        subscription: &mut dyn BusSubscription,
        connection: &dyn BusConnection,
        summary: &mut RunSummary,
    ) -> Result<(), ExtensionError> {
        loop {
            self.transition(RuntimeState::AwaitingMessage);
            let payload = match self.wait_for_work(subscription, summary).await? {
                WaitResult::Work(payload) => payload,
                WaitResult::Shutdown => {
                    summary.shutdown_requested = true;
                    info!("shutdown requested while awaiting work");
                    return Ok(());
                }
                WaitResult::Closed => {
                    return Err(ExtensionError::Transport(
                        "input subscription closed before a workflow message arrived".into(),
                    ));
                }
                WaitResult::TimedOut => {
                    return Err(ExtensionError::Transport(
                        "timed out waiting for a workflow message".into(),
                    ));
                }
            };

            self.transition(RuntimeState::Processing);
            summary.data_messages_processed += 1;
            // The single catch-and-classify point: nothing below this
            // boundary terminates the process.
            let envelope = match self.process(&payload).await {
                Ok(output) => build_success(&self.config.context, output),
                Err(invoke_error) => {
                    warn!(
                        kind = invoke_error.kind(),
                        error = %invoke_error,
                        "processing failed; reporting failed envelope"
                    );
                    build_failure(&self.config.context, &invoke_error)
                }
            };

            self.transition(RuntimeState::Publishing);
            let encoded = encode_envelope(&envelope)?;
            if let Err(publish_error) = connection
                .publish(&self.config.channels.output, &encoded)
                .await
            {
                error!(
                    error = %publish_error,
                    "workflow result could not be published; the orchestrator will never observe this outcome"
                );
                return Err(publish_error);
            }
            if envelope.is_completed() {
                summary.completed_envelopes += 1;
            } else {
                summary.failed_envelopes += 1;
            }
            debug!(
                envelope_type = envelope.type_name(),
                channel = %self.config.channels.output,
                "result envelope published"
            );

            match self.config.mode {
                RunMode::OneShot => return Ok(()),
                RunMode::Continuous => continue,
            }
        }
    }

    async fn wait_for_work(
        &mut self,
        subscription: &mut dyn BusSubscription,
        summary: &mut RunSummary,
    ) -> Result<WaitResult, ExtensionError> {
        match self.config.receive_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.next_data_message(subscription, summary))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Ok(WaitResult::TimedOut),
                }
            }
            None => self.next_data_message(subscription, summary).await,
        }
    }

    async fn next_data_message(
        &mut self,
        subscription: &mut dyn BusSubscription,
        summary: &mut RunSummary,
    ) -> Result<WaitResult, ExtensionError> {
        loop {
            let next = subscription.next_message();
            let received = tokio::select! {
                result = next => result?,
                () = shutdown_signal(self.shutdown.as_mut()) => {
                    return Ok(WaitResult::Shutdown);
                }
            };
            match received {
                Some(message) if message.is_data() => {
                    return Ok(WaitResult::Work(message.payload));
                }
                Some(message) => {
                    debug!(
                        kind = message.kind.as_str(),
                        channel = %message.channel,
                        "discarding transport control message"
                    );
                    summary.control_messages_skipped += 1;
                }
                None => return Ok(WaitResult::Closed),
            }
        }
    }

    async fn process(&self, payload: &str) -> Result<Value, ExtensionError> {
        let record = decode_input(payload, &self.schema)?;
        self.invoker.invoke(&record).await
    }

    async fn teardown(
        &mut self,
        subscription: &mut dyn BusSubscription,
        connection: &dyn BusConnection,
        summary: &mut RunSummary,
    ) {
        self.transition(RuntimeState::Teardown);
        summary.teardown_clean = true;
        if let Err(unsubscribe_error) = subscription.unsubscribe().await {
            warn!(error = %unsubscribe_error, "unsubscribe failed during teardown");
            summary.teardown_clean = false;
        }
        if let Err(close_error) = connection.close().await {
            warn!(error = %close_error, "connection close failed during teardown");
            summary.teardown_clean = false;
        }
    }

    fn transition(&mut self, next: RuntimeState) {
        debug!(
            from = self.state.as_str(),
            to = next.as_str(),
            "runtime state transition"
        );
        self.state = next;
    }
}

/// Resolves only when a configured shutdown signal is raised. Without a
/// signal, or once the sender side is gone, the wait is unbounded and the
/// subscription is the only wake source.
async fn shutdown_signal(receiver: Option<&mut watch::Receiver<bool>>) {
    match receiver {
        Some(receiver) => {
            if receiver.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}
