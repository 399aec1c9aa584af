//! End-to-end protocol runs over the in-process bus, driven the way the
//! dispatching orchestrator drives a real extension: wait for readiness,
//! dispatch one message, consume the outcome envelope.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::sleep;
use weft_contract::{ChannelSet, ExtensionError, InputRecord, WorkflowContext};
use weft_runtime::{
    ActionInvoker, ExtensionRuntime, ExtensionRuntimeConfig, InputSchema, RunMode,
};
use weft_transport::{BusConnection, BusConnector, BusSubscription, MemoryBus};

const CHANNEL_IN: &str = "wf-in";
const CHANNEL_OUT: &str = "wf-out";
const CHANNEL_READY: &str = "wf-ready";

struct ScriptedAction {
    outcomes: Mutex<VecDeque<Result<Value, ExtensionError>>>,
}

impl ScriptedAction {
    fn new(outcomes: Vec<Result<Value, ExtensionError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::from(outcomes)),
        })
    }
}

#[async_trait]
impl ActionInvoker for ScriptedAction {
    async fn invoke(&self, _record: &InputRecord) -> Result<Value, ExtensionError> {
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or_else(|| Err(ExtensionError::Action("scripted outcomes exhausted".into())))
    }
}

fn extension_config(mode: RunMode) -> ExtensionRuntimeConfig {
    let mut config = ExtensionRuntimeConfig::new(
        WorkflowContext::new(Some("wf-1".into()), "instance-7", "ext-42"),
        ChannelSet::new(CHANNEL_IN, CHANNEL_OUT, CHANNEL_READY),
    );
    config.mode = mode;
    config
}

async fn wait_for_ready_count(bus: &MemoryBus, expected: usize) {
    for _ in 0..400 {
        if bus.published_on(CHANNEL_READY).len() >= expected {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected} readiness announcements");
}

#[tokio::test]
async fn integration_orchestrator_receives_completed_envelope_over_the_bus() {
    let bus = MemoryBus::new();

    // The orchestrator side holds its own connection and watches the
    // output channel, exactly like the upstream dispatcher would.
    let orchestrator = bus.connector().connect().await.expect("connect");
    let mut outcomes = orchestrator
        .subscribe(CHANNEL_OUT)
        .await
        .expect("subscribe outcomes");

    let invoker = ScriptedAction::new(vec![Ok(json!({"success": true, "count": 2}))]);
    let schema = InputSchema::new().required("title");
    let mut runtime = ExtensionRuntime::new(extension_config(RunMode::OneShot), schema, invoker);
    let connector = bus.connector();
    let extension = tokio::spawn(async move { runtime.run(&connector).await });

    wait_for_ready_count(&bus, 1).await;
    bus.send(CHANNEL_IN, r#"{"inputs":{"title":"Hi"}}"#);

    let summary = extension.await.expect("join").expect("run");
    assert_eq!(summary.completed_envelopes, 1);

    // Skip the orchestrator's own subscribe confirmation, then read the
    // envelope off the wire.
    let envelope = loop {
        let message = outcomes
            .next_message()
            .await
            .expect("next message")
            .expect("outcome message");
        if message.is_data() {
            break serde_json::from_str::<Value>(&message.payload).expect("envelope json");
        }
    };
    assert_eq!(envelope["type"], "completed");
    assert_eq!(envelope["workflowId"], "wf-1");
    assert_eq!(envelope["workflowInstanceId"], "instance-7");
    assert_eq!(envelope["workflowExtensionId"], "ext-42");
    assert_eq!(envelope["output"], json!({"success": true, "count": 2}));
}

#[tokio::test]
async fn integration_one_shot_respawn_cycle_serves_one_message_per_instance() {
    let bus = MemoryBus::new();

    for round in 1..=2 {
        let invoker = ScriptedAction::new(vec![Ok(json!({"round": round}))]);
        let mut runtime =
            ExtensionRuntime::new(extension_config(RunMode::OneShot), InputSchema::new(), invoker);
        let connector = bus.connector();
        let extension = tokio::spawn(async move { runtime.run(&connector).await });

        wait_for_ready_count(&bus, round).await;
        bus.send(CHANNEL_IN, r#"{"inputs":{}}"#);

        let summary = extension.await.expect("join").expect("run");
        assert_eq!(summary.data_messages_processed, 1);
        assert!(summary.teardown_clean);
        // The instance released its subscription before terminating.
        assert_eq!(bus.subscriber_count(CHANNEL_IN), 0);
    }

    assert_eq!(bus.published_on(CHANNEL_READY).len(), 2);
    let envelopes: Vec<Value> = bus
        .published_on(CHANNEL_OUT)
        .iter()
        .map(|payload| serde_json::from_str(payload).expect("envelope json"))
        .collect();
    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[0]["output"]["round"], 1);
    assert_eq!(envelopes[1]["output"]["round"], 2);
}

#[tokio::test]
async fn integration_continuous_service_reports_every_outcome_and_outlives_failures() {
    let bus = MemoryBus::new();
    let invoker = ScriptedAction::new(vec![
        Ok(json!({"n": 1})),
        Err(ExtensionError::Action("vendor unavailable".into())),
        Ok(json!({"n": 3})),
    ]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut runtime = ExtensionRuntime::new(
        extension_config(RunMode::Continuous),
        InputSchema::new().required("seq"),
        invoker,
    )
    .with_shutdown(shutdown_rx);
    let connector = bus.connector();
    let extension = tokio::spawn(async move { runtime.run(&connector).await });

    wait_for_ready_count(&bus, 1).await;
    bus.send(CHANNEL_IN, r#"{"inputs":{"seq":1}}"#);
    bus.send(CHANNEL_IN, r#"{"inputs":{}}"#);
    bus.send(CHANNEL_IN, r#"{"inputs":{"seq":3}}"#);

    for _ in 0..400 {
        if bus.published_on(CHANNEL_OUT).len() >= 3 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    shutdown_tx.send(true).expect("send shutdown");

    let summary = extension.await.expect("join").expect("run");
    assert_eq!(summary.data_messages_processed, 3);
    assert_eq!(summary.completed_envelopes, 1);
    assert_eq!(summary.failed_envelopes, 2);
    assert!(summary.shutdown_requested);

    let envelopes: Vec<Value> = bus
        .published_on(CHANNEL_OUT)
        .iter()
        .map(|payload| serde_json::from_str(payload).expect("envelope json"))
        .collect();
    assert_eq!(envelopes[0]["type"], "completed");
    // The second message failed validation before the invoker ran, so the
    // scripted vendor failure surfaces on the third message instead.
    assert_eq!(envelopes[1]["type"], "failed");
    assert_eq!(envelopes[1]["error"], "missing required field: seq");
    assert_eq!(envelopes[2]["type"], "failed");
    assert_eq!(envelopes[2]["error"], "vendor unavailable");
}

#[tokio::test]
async fn integration_startup_connection_failure_means_no_ready_and_no_envelope() {
    let bus = MemoryBus::refusing_connections();
    let invoker = ScriptedAction::new(vec![Ok(json!({}))]);
    let mut runtime =
        ExtensionRuntime::new(extension_config(RunMode::OneShot), InputSchema::new(), invoker);

    let error = runtime
        .run(&bus.connector())
        .await
        .expect_err("connect refused");
    assert_eq!(error.kind(), "connection");
    assert!(bus.published_on(CHANNEL_READY).is_empty());
    assert!(bus.published_on(CHANNEL_OUT).is_empty());
}
