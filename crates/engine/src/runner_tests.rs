//! End-to-end tests for the workflow engine.
//!
//! Everything runs against `MemoryStore`, `MockNode`s for action nodes and a
//! recording notification sink, so no Postgres connection is required.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use uuid::Uuid;

use db::models::{
    ExecutionLogRow, ExecutionPatch, ExecutionRow, ExecutionStatus, NewExecution, NewExecutionLog,
    NewWorkflow, RuntimeUpdate, WorkflowRow, WorkflowStatus, WorkflowUpdate,
};
use db::{DbError, MemoryStore, Store};
use nodes::mock::MockNode;
use nodes::{ExecutableNode, ExecutionContext, NodeError, NodeOutput, NodeRegistry};

use crate::notify::recording::RecordingSink;
use crate::notify::EngineEvent;
use crate::{
    EngineConfig, EngineError, TriggeredBy, WebhookError, WebhookRequest, WorkflowDefinition,
    WorkflowEngine,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Harness {
    engine: WorkflowEngine,
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    user: Uuid,
}

fn harness(registry: NodeRegistry) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let engine = WorkflowEngine::new(
        store.clone(),
        Arc::new(registry),
        sink.clone(),
        EngineConfig::default(),
    );
    Harness {
        engine,
        store,
        sink,
        user: Uuid::new_v4(),
    }
}

fn node(id: &str, node_type: &str, config: Value) -> Value {
    json!({ "id": id, "type": node_type, "config": config })
}

fn edge(source: &str, target: &str) -> Value {
    json!({ "id": format!("{source}->{target}"), "source": source, "target": target })
}

fn edge_on(source: &str, handle: &str, target: &str) -> Value {
    json!({
        "id": format!("{source}:{handle}->{target}"),
        "source": source,
        "sourceHandle": handle,
        "target": target,
    })
}

impl Harness {
    async fn workflow(&self, nodes: Vec<Value>, edges: Vec<Value>) -> Uuid {
        let definition =
            WorkflowDefinition::from_value(&json!({ "nodes": nodes, "edges": edges })).unwrap();
        self.engine
            .create_workflow(self.user, "test", None, definition)
            .await
            .unwrap()
            .id
    }

    async fn execution(&self, id: Uuid) -> ExecutionRow {
        self.store.get_execution(id).await.unwrap()
    }

    /// Poll until the execution reaches a terminal status.
    async fn settled(&self, id: Uuid) -> ExecutionRow {
        for _ in 0..1000 {
            let row = self.execution(id).await;
            if row.status().unwrap().is_terminal() {
                return row;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution {id} never settled");
    }

    /// Node ids with a log row, in append order.
    async fn logged_nodes(&self, execution_id: Uuid) -> Vec<String> {
        self.store
            .list_execution_logs(execution_id)
            .await
            .unwrap()
            .into_iter()
            .map(|log| log.node_id)
            .collect()
    }
}

fn output_keys(row: &ExecutionRow) -> BTreeSet<String> {
    row.node_outputs
        .as_object()
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default()
}

/// Blocks inside `execute` until released, so tests can act mid-run.
struct GateNode {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl ExecutableNode for GateNode {
    async fn execute(
        &self,
        _config: &Value,
        input: Value,
        _ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(NodeOutput::new(input))
    }
}

fn if_workflow() -> (Vec<Value>, Vec<Value>) {
    (
        vec![
            node("t", "trigger.manual", json!({})),
            node("check", "logic.if", json!({ "field": "$input.x", "operator": "gt", "value": "5" })),
            node("log", "utility.log", json!({ "message": "big" })),
            node("stop", "utility.stop", json!({ "status": "failure" })),
        ],
        vec![
            edge("t", "check"),
            edge_on("check", "true", "log"),
            edge_on("check", "false", "stop"),
        ],
    )
}

// ============================================================
// Traversal
// ============================================================

#[tokio::test]
async fn true_branch_completes_and_logs_once() {
    let h = harness(NodeRegistry::with_builtins());
    let (nodes, edges) = if_workflow();
    let wf = h.workflow(nodes, edges).await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({ "x": 10 })).await.unwrap();

    let row = h.execution(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Completed);
    assert!(row.completed_at.is_some());
    let logged = h.logged_nodes(exec).await;
    assert_eq!(logged.iter().filter(|n| *n == "log").count(), 1);
    assert!(!logged.contains(&"stop".to_string()));
    let expected: BTreeSet<String> = ["check", "log", "t"].iter().map(|s| s.to_string()).collect();
    assert_eq!(output_keys(&row), expected);

    let workflow = h.store.get_workflow(wf).await.unwrap();
    assert_eq!((workflow.run_count, workflow.success_count, workflow.failure_count), (1, 1, 0));
    assert!(workflow.last_run_at.is_some());
    assert!(h.engine.live_executions().is_empty());
}

#[tokio::test]
async fn false_branch_stops_with_failure() {
    let h = harness(NodeRegistry::with_builtins());
    let (nodes, edges) = if_workflow();
    let wf = h.workflow(nodes, edges).await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({ "x": 1 })).await.unwrap();

    let row = h.execution(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Failed);
    assert!(row.error_message.is_some());
    assert!(!h.logged_nodes(exec).await.contains(&"log".to_string()));

    let workflow = h.store.get_workflow(wf).await.unwrap();
    assert_eq!((workflow.run_count, workflow.success_count, workflow.failure_count), (1, 0, 1));
    assert_eq!(h.sink.count(EngineEvent::ExecutionFailed), 1);
}

#[tokio::test]
async fn set_variable_stores_value_and_passes_input_through() {
    let h = harness(NodeRegistry::with_builtins());
    let wf = h
        .workflow(
            vec![
                node("t", "trigger.manual", json!({})),
                node("set", "data.setVariable", json!({ "variableName": "total", "valueExpression": "$input.count" })),
            ],
            vec![edge("t", "set")],
        )
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({ "count": 7 })).await.unwrap();

    let row = h.execution(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Completed);
    assert_eq!(row.variables["total"], json!(7));
    assert_eq!(row.node_outputs["set"], json!({ "count": 7 }));
}

#[tokio::test]
async fn fan_out_is_depth_first_in_edge_order() {
    let mut registry = NodeRegistry::with_builtins();
    for name in ["a", "b", "c"] {
        registry.register_executor(format!("action.test.{name}"), Arc::new(MockNode::returning(name, json!({}))));
    }
    let h = harness(registry);
    let wf = h
        .workflow(
            vec![
                node("t", "trigger.manual", json!({})),
                node("a", "action.test.a", json!({})),
                node("b", "action.test.b", json!({})),
                node("c", "action.test.c", json!({})),
            ],
            vec![edge("t", "a"), edge("t", "b"), edge("a", "c")],
        )
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({})).await.unwrap();

    assert_eq!(h.logged_nodes(exec).await, vec!["t", "a", "c", "b"]);
}

#[tokio::test]
async fn unmatched_handle_ends_the_branch() {
    let mut registry = NodeRegistry::with_builtins();
    let left = Arc::new(MockNode::branching("left", "left"));
    let never = Arc::new(MockNode::returning("never", json!({})));
    registry.register_executor("action.test.left", left.clone());
    registry.register_executor("action.test.never", never.clone());
    let h = harness(registry);
    let wf = h
        .workflow(
            vec![
                node("t", "trigger.manual", json!({})),
                node("br", "action.test.left", json!({})),
                node("x", "action.test.never", json!({})),
            ],
            vec![edge("t", "br"), edge_on("br", "right", "x")],
        )
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({})).await.unwrap();

    assert_eq!(h.execution(exec).await.status().unwrap(), ExecutionStatus::Completed);
    assert_eq!(left.call_count(), 1);
    assert_eq!(never.call_count(), 0);
}

#[tokio::test]
async fn node_error_fails_fast() {
    let mut registry = NodeRegistry::with_builtins();
    let after = Arc::new(MockNode::returning("after", json!({})));
    registry.register_executor("action.test.boom", Arc::new(MockNode::failing("boom", "bot disconnected")));
    registry.register_executor("action.test.after", after.clone());
    let h = harness(registry);
    let wf = h
        .workflow(
            vec![
                node("t", "trigger.manual", json!({})),
                node("boom", "action.test.boom", json!({})),
                node("after", "action.test.after", json!({})),
            ],
            vec![edge("t", "boom"), edge("boom", "after")],
        )
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({})).await.unwrap();

    let row = h.execution(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Failed);
    let message = row.error_message.unwrap();
    assert!(message.contains("boom"), "{message}");
    assert!(message.contains("bot disconnected"), "{message}");
    assert_eq!(after.call_count(), 0);

    let logs = h.store.list_execution_logs(exec).await.unwrap();
    let failed = logs.iter().find(|l| l.node_id == "boom").unwrap();
    assert_eq!(failed.level, "error");
    assert!(failed.output_data.is_none());

    assert_eq!(h.sink.count(EngineEvent::NodeError), 1);
    assert_eq!(h.store.get_workflow(wf).await.unwrap().failure_count, 1);
}

#[tokio::test]
async fn unregistered_action_type_fails_the_execution() {
    let h = harness(NodeRegistry::with_builtins());
    let wf = h
        .workflow(
            vec![node("t", "trigger.manual", json!({})), node("dig", "action.bot.dig", json!({}))],
            vec![edge("t", "dig")],
        )
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({})).await.unwrap();

    let row = h.execution(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Failed);
    assert!(row.error_message.unwrap().contains("action.bot.dig"));
}

#[tokio::test]
async fn data_mapping_builds_downstream_input() {
    let mut registry = NodeRegistry::with_builtins();
    let sink_node = Arc::new(MockNode::returning("sink", json!({})));
    registry.register_executor("action.test.sink", sink_node.clone());
    let h = harness(registry);
    let mut mapped = edge("t", "s");
    mapped["dataMapping"] = json!({ "who": "$input.name", "sum": "2 + 3", "label": "hello" });
    let wf = h
        .workflow(
            vec![node("t", "trigger.manual", json!({})), node("s", "action.test.sink", json!({}))],
            vec![mapped],
        )
        .await;

    h.engine.run(wf, TriggeredBy::Manual, json!({ "name": "steve" })).await.unwrap();

    assert_eq!(sink_node.inputs(), vec![json!({ "who": "steve", "sum": 5, "label": "hello" })]);
}

#[tokio::test]
async fn data_mapping_error_is_charged_to_the_target_node() {
    let mut registry = NodeRegistry::with_builtins();
    let sink_node = Arc::new(MockNode::returning("sink", json!({})));
    registry.register_executor("action.test.sink", sink_node.clone());
    let h = harness(registry);
    let mut mapped = edge("t", "s");
    mapped["dataMapping"] = json!({ "ratio": "1 / 0" });
    let wf = h
        .workflow(
            vec![node("t", "trigger.manual", json!({})), node("s", "action.test.sink", json!({}))],
            vec![mapped],
        )
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({})).await.unwrap();

    let row = h.execution(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Failed);
    assert_eq!(sink_node.call_count(), 0);

    let logs = h.store.list_execution_logs(exec).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].node_id, "s");
    assert_eq!(logs[1].level, "error");
    assert_eq!(h.sink.count(EngineEvent::NodeError), 1);
    assert_eq!(h.sink.count(EngineEvent::ExecutionFailed), 1);
}

/// Panics on every call, like a buggy domain action.
struct PanickingNode;

#[async_trait]
impl ExecutableNode for PanickingNode {
    async fn execute(
        &self,
        _config: &Value,
        _input: Value,
        _ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, NodeError> {
        panic!("inventory index out of range");
    }
}

#[tokio::test]
async fn panicking_node_fails_the_execution() {
    let mut registry = NodeRegistry::with_builtins();
    registry.register_executor("action.test.panic", Arc::new(PanickingNode));
    let h = harness(registry);
    let wf = h
        .workflow(
            vec![node("t", "trigger.manual", json!({})), node("p", "action.test.panic", json!({}))],
            vec![edge("t", "p")],
        )
        .await;

    let exec = h.engine.start(wf, TriggeredBy::Manual, json!({})).await.unwrap();
    let row = h.settled(exec).await;

    assert_eq!(row.status().unwrap(), ExecutionStatus::Failed);
    let message = row.error_message.unwrap();
    assert!(message.contains("inventory index out of range"), "{message}");
    assert!(h.engine.live_executions().is_empty());
    assert_eq!(h.sink.count(EngineEvent::NodeError), 1);
    assert_eq!(h.sink.count(EngineEvent::ExecutionFailed), 1);
    assert_eq!(h.store.get_workflow(wf).await.unwrap().failure_count, 1);
}

#[tokio::test]
async fn oversized_delay_fails_instead_of_stranding_the_run() {
    let h = harness(NodeRegistry::with_builtins());
    let wf = h
        .workflow(
            vec![
                node("t", "trigger.manual", json!({})),
                node("d", "utility.delay", json!({ "duration": 1e20 })),
            ],
            vec![edge("t", "d")],
        )
        .await;

    let exec = h.engine.start(wf, TriggeredBy::Manual, json!({})).await.unwrap();
    let row = h.settled(exec).await;

    assert_eq!(row.status().unwrap(), ExecutionStatus::Failed);
    assert!(row.error_message.unwrap().contains("duration"));
    assert!(h.engine.live_executions().is_empty());
}

#[tokio::test]
async fn stop_success_completes_without_running_successors() {
    let mut registry = NodeRegistry::with_builtins();
    let after = Arc::new(MockNode::returning("after", json!({})));
    registry.register_executor("action.test.after", after.clone());
    let h = harness(registry);
    let wf = h
        .workflow(
            vec![
                node("t", "trigger.manual", json!({})),
                node("stop", "utility.stop", json!({ "status": "success" })),
                node("after", "action.test.after", json!({})),
            ],
            vec![edge("t", "stop"), edge("stop", "after")],
        )
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({})).await.unwrap();

    assert_eq!(h.execution(exec).await.status().unwrap(), ExecutionStatus::Completed);
    assert_eq!(after.call_count(), 0);
}

#[tokio::test]
async fn notifications_follow_the_run() {
    let h = harness(NodeRegistry::with_builtins());
    let wf = h
        .workflow(
            vec![node("t", "trigger.manual", json!({})), node("log", "utility.log", json!({}))],
            vec![edge("t", "log")],
        )
        .await;

    h.engine.run(wf, TriggeredBy::Manual, json!({})).await.unwrap();

    assert_eq!(
        h.sink.names(),
        vec![
            "executionStarted",
            "nodeStarted",
            "nodeCompleted",
            "nodeStarted",
            "nodeCompleted",
            "executionCompleted",
        ]
    );
    let events = h.sink.events.lock().unwrap();
    assert!(events.iter().all(|(user, _, _)| *user == h.user));
}

#[tokio::test]
async fn definition_errors_create_no_execution() {
    let h = harness(NodeRegistry::with_builtins());
    let wf = h
        .workflow(vec![node("log", "utility.log", json!({}))], vec![])
        .await;

    let err = h.engine.run(wf, TriggeredBy::Manual, json!({})).await.unwrap_err();

    assert!(matches!(err, EngineError::MissingTriggerNode));
    assert!(err.is_definition_error());
    assert!(h.store.list_executions(wf).await.unwrap().is_empty());
}

// ============================================================
// Cancellation
// ============================================================

#[tokio::test]
async fn cancel_before_node_stops_the_rest() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut registry = NodeRegistry::with_builtins();
    registry.register_executor(
        "action.test.gate",
        Arc::new(GateNode {
            entered: entered.clone(),
            release: release.clone(),
        }),
    );
    let next = Arc::new(MockNode::returning("next", json!({})));
    registry.register_executor("action.test.next", next.clone());
    let h = harness(registry);
    let wf = h
        .workflow(
            vec![
                node("t", "trigger.manual", json!({})),
                node("gate", "action.test.gate", json!({})),
                node("k", "action.test.next", json!({})),
                node("k2", "action.test.next", json!({})),
            ],
            vec![edge("t", "gate"), edge("gate", "k"), edge("k", "k2")],
        )
        .await;

    let exec = h.engine.start(wf, TriggeredBy::Manual, json!({})).await.unwrap();
    entered.notified().await;
    assert_eq!(h.engine.live_executions(), vec![exec]);
    h.engine.cancel_execution(exec).unwrap();
    release.notify_one();

    let row = h.settled(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Cancelled);
    assert_eq!(h.logged_nodes(exec).await, vec!["t", "gate"]);
    assert_eq!(next.call_count(), 0);
    assert_eq!(h.sink.count(EngineEvent::ExecutionCancelled), 1);

    assert!(matches!(
        h.engine.cancel_execution(exec),
        Err(EngineError::ExecutionNotLive(id)) if id == exec
    ));
}

// ============================================================
// Event waits and event triggers
// ============================================================

fn event_trigger(config: Value) -> Vec<Value> {
    vec![node("t", "trigger.event", config), node("a", "action.test.a", json!({}))]
}

#[tokio::test(start_paused = true)]
async fn manual_run_of_event_trigger_times_out() {
    let mut registry = NodeRegistry::with_builtins();
    let a = Arc::new(MockNode::returning("a", json!({})));
    registry.register_executor("action.test.a", a.clone());
    let h = harness(registry);
    let wf = h
        .workflow(event_trigger(json!({ "expectedEvent": "health_low" })), vec![edge("t", "a")])
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, Value::Null).await.unwrap();
    assert_eq!(h.execution(exec).await.status().unwrap(), ExecutionStatus::Waiting);
    assert_eq!(h.sink.count(EngineEvent::Waiting), 1);

    tokio::time::sleep(Duration::from_secs(301)).await;
    let row = h.settled(exec).await;

    assert_eq!(row.status().unwrap(), ExecutionStatus::Failed);
    assert!(row.error_message.unwrap().contains("Timed out"));
    assert!(h.engine.live_executions().is_empty());

    let late = h
        .engine
        .on_external_event("bot-1", "health_low", json!({}))
        .await
        .unwrap();
    assert!(late.resolved_waits.is_empty());
    assert_eq!(h.execution(exec).await.status().unwrap(), ExecutionStatus::Failed);
    assert_eq!(a.call_count(), 0);
    assert_eq!(h.store.get_workflow(wf).await.unwrap().failure_count, 1);
}

#[tokio::test]
async fn matching_event_resumes_waiting_execution_once() {
    let mut registry = NodeRegistry::with_builtins();
    let a = Arc::new(MockNode::returning("a", json!({})));
    registry.register_executor("action.test.a", a.clone());
    let h = harness(registry);
    let wf = h
        .workflow(
            event_trigger(json!({ "sourceId": "bot-1", "expectedEvent": "health_low", "filter": { "hp": 3 } })),
            vec![edge("t", "a")],
        )
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, Value::Null).await.unwrap();

    let miss = h.engine.on_external_event("bot-1", "health_low", json!({ "hp": 9 })).await.unwrap();
    assert!(miss.resolved_waits.is_empty());

    let hit = h.engine.on_external_event("bot-1", "health_low", json!({ "hp": 3 })).await.unwrap();
    assert_eq!(hit.resolved_waits, vec![exec]);
    let again = h.engine.on_external_event("bot-1", "health_low", json!({ "hp": 3 })).await.unwrap();
    assert!(again.resolved_waits.is_empty());

    let row = h.settled(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Completed);
    let expected = json!({ "event": { "hp": 3 }, "source": "bot-1", "eventType": "health_low" });
    assert_eq!(row.trigger_data, expected);
    assert_eq!(a.inputs(), vec![expected]);
}

#[tokio::test]
async fn cancelling_a_waiting_execution() {
    let mut registry = NodeRegistry::with_builtins();
    registry.register_executor("action.test.a", Arc::new(MockNode::returning("a", json!({}))));
    let h = harness(registry);
    let wf = h
        .workflow(event_trigger(json!({ "expectedEvent": "death" })), vec![edge("t", "a")])
        .await;

    let exec = h.engine.run(wf, TriggeredBy::Manual, Value::Null).await.unwrap();
    h.engine.cancel_execution(exec).unwrap();

    let row = h.settled(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Cancelled);
    assert!(h.logged_nodes(exec).await.is_empty());
}

#[tokio::test]
async fn active_event_trigger_starts_runs_from_live_config() {
    let mut registry = NodeRegistry::with_builtins();
    let a = Arc::new(MockNode::returning("a", json!({})));
    registry.register_executor("action.test.a", a.clone());
    let h = harness(registry);
    let wf = h
        .workflow(
            event_trigger(json!({ "sourceId": "bot-1", "expectedEvent": "health_low", "filter": { "player": "steve" } })),
            vec![edge("t", "a")],
        )
        .await;

    // Not active yet.
    let none = h.engine.on_external_event("bot-1", "health_low", json!({ "player": "steve" })).await.unwrap();
    assert!(none.started.is_empty());

    h.engine.set_status(wf, WorkflowStatus::Active).await.unwrap();
    assert!(h.engine.is_armed(wf));

    for (source, payload) in [("bot-2", json!({ "player": "steve" })), ("bot-1", json!({ "player": "alex" }))] {
        let d = h.engine.on_external_event(source, "health_low", payload).await.unwrap();
        assert!(d.started.is_empty());
    }

    let hit = h.engine.on_external_event("bot-1", "health_low", json!({ "player": "steve" })).await.unwrap();
    assert_eq!(hit.started.len(), 1);
    let row = h.settled(hit.started[0]).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Completed);
    assert_eq!(row.triggered_by, "event");
    assert_eq!(row.trigger_data["source"], "bot-1");

    // A definition edit takes effect on the next event.
    let edited = WorkflowDefinition::from_value(&json!({
        "nodes": event_trigger(json!({ "sourceId": "bot-1", "expectedEvent": "death" })),
        "edges": [edge("t", "a")],
    }))
    .unwrap();
    h.engine.update_definition(wf, edited).await.unwrap();
    let old = h.engine.on_external_event("bot-1", "health_low", json!({ "player": "steve" })).await.unwrap();
    assert!(old.started.is_empty());
    let new = h.engine.on_external_event("bot-1", "death", json!({})).await.unwrap();
    assert_eq!(new.started.len(), 1);
    h.settled(new.started[0]).await;

    h.engine.set_status(wf, WorkflowStatus::Paused).await.unwrap();
    assert!(!h.engine.is_armed(wf));
    let paused = h.engine.on_external_event("bot-1", "death", json!({})).await.unwrap();
    assert!(paused.started.is_empty());
    assert_eq!(a.call_count(), 2);
}

// ============================================================
// Webhooks
// ============================================================

#[tokio::test]
async fn webhook_checks_status_method_and_secret() {
    let h = harness(NodeRegistry::with_builtins());
    let wf = h
        .workflow(
            vec![
                node("t", "trigger.webhook", json!({ "method": "put", "requireAuth": true, "secret": "s3cret" })),
                node("log", "utility.log", json!({ "message": "$input.body.item" })),
            ],
            vec![edge("t", "log")],
        )
        .await;
    let token = h.store.get_workflow(wf).await.unwrap().webhook_token.unwrap();

    let request = |method: &str, secret: Option<&str>| WebhookRequest {
        method: method.into(),
        secret: secret.map(str::to_owned),
        body: json!({ "item": "diamond" }),
        headers: Map::new(),
        query: json!({ "page": "1" }).as_object().cloned().unwrap(),
    };

    assert!(matches!(
        h.engine.handle_webhook(&token, request("PUT", Some("s3cret"))).await,
        Err(WebhookError::Inactive)
    ));
    h.engine.set_status(wf, WorkflowStatus::Active).await.unwrap();

    assert!(matches!(
        h.engine.handle_webhook("nope", request("PUT", Some("s3cret"))).await,
        Err(WebhookError::NotFound)
    ));
    assert!(matches!(
        h.engine.handle_webhook(&token, request("POST", Some("s3cret"))).await,
        Err(WebhookError::MethodNotAllowed { .. })
    ));
    assert!(matches!(
        h.engine.handle_webhook(&token, request("PUT", None)).await,
        Err(WebhookError::Unauthorized)
    ));
    assert!(matches!(
        h.engine.handle_webhook(&token, request("PUT", Some("wrong"))).await,
        Err(WebhookError::Unauthorized)
    ));

    let exec = h.engine.handle_webhook(&token, request("put", Some("s3cret"))).await.unwrap();
    let row = h.settled(exec).await;
    assert_eq!(row.status().unwrap(), ExecutionStatus::Completed);
    assert_eq!(row.triggered_by, "webhook");
    assert_eq!(row.trigger_data["query"]["page"], "1");
    let logs = h.store.list_execution_logs(exec).await.unwrap();
    assert_eq!(logs.last().unwrap().message, "diamond");
}

// ============================================================
// Lifecycle
// ============================================================

#[tokio::test]
async fn export_then_import_round_trips_the_definition() {
    let h = harness(NodeRegistry::with_builtins());
    let (nodes, edges) = if_workflow();
    let wf = h.workflow(nodes, edges).await;
    h.engine.set_status(wf, WorkflowStatus::Active).await.unwrap();

    let exported = h.engine.export_workflow(wf).await.unwrap();
    let text = serde_json::to_string(&exported).unwrap();
    let imported = h
        .engine
        .import_workflow(h.user, serde_json::from_str(&text).unwrap())
        .await
        .unwrap();

    assert_ne!(imported.id, wf);
    assert_eq!(imported.status().unwrap(), WorkflowStatus::Draft);
    let original = h.store.get_workflow(wf).await.unwrap();
    assert_eq!(imported.definition, original.definition);
}

#[tokio::test]
async fn activation_rejects_invalid_definitions() {
    let h = harness(NodeRegistry::with_builtins());
    let wf = h
        .workflow(
            vec![node("t", "trigger.manual", json!({})), node("a", "utility.log", json!({}))],
            vec![edge("t", "a"), edge("a", "t")],
        )
        .await;

    let err = h.engine.set_status(wf, WorkflowStatus::Active).await.unwrap_err();
    assert!(matches!(err, EngineError::CycleDetected));
    assert_eq!(h.store.get_workflow(wf).await.unwrap().status().unwrap(), WorkflowStatus::Draft);
}

#[tokio::test]
async fn reconcile_arms_active_workflows() {
    let h = harness(NodeRegistry::with_builtins());
    let schedule = h
        .workflow(vec![node("t", "trigger.schedule", json!({ "cronExpression": "*/5 * * * *" }))], vec![])
        .await;
    let event = h
        .workflow(vec![node("t", "trigger.event", json!({ "expectedEvent": "chest_full" }))], vec![])
        .await;
    let inert = h
        .workflow(vec![node("t", "trigger.schedule", json!({ "cronExpression": "0 9 * * MON" }))], vec![])
        .await;
    let draft = h
        .workflow(vec![node("t", "trigger.schedule", json!({ "cronExpression": "* * * * *" }))], vec![])
        .await;

    // Rows flipped to ACTIVE behind the engine's back, as after a restart.
    for id in [schedule, event, inert] {
        h.store
            .update_workflow(
                id,
                WorkflowUpdate {
                    status: Some(WorkflowStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    assert_eq!(h.engine.reconcile().await.unwrap(), 3);
    assert!(h.engine.is_armed(schedule));
    assert!(h.engine.is_armed(event));
    assert!(!h.engine.is_armed(inert));
    assert!(!h.engine.is_armed(draft));

    h.engine.deactivate(schedule).await.unwrap();
    h.engine.deactivate(schedule).await.unwrap();
    assert!(!h.engine.is_armed(schedule));
    assert!(h.store.get_workflow(schedule).await.unwrap().next_run_at.is_none());
}

#[tokio::test]
async fn delete_disarms_and_removes_history() {
    let h = harness(NodeRegistry::with_builtins());
    let wf = h
        .workflow(vec![node("t", "trigger.schedule", json!({ "cronExpression": "* * * * *" }))], vec![])
        .await;
    h.engine.set_status(wf, WorkflowStatus::Active).await.unwrap();
    assert!(h.engine.is_armed(wf));
    let exec = h.engine.run(wf, TriggeredBy::Manual, json!({})).await.unwrap();

    h.engine.delete_workflow(wf).await.unwrap();

    assert!(!h.engine.is_armed(wf));
    assert!(h.store.get_workflow(wf).await.is_err());
    assert!(h.store.get_execution(exec).await.is_err());
}

#[tokio::test]
async fn webhook_token_survives_definition_edits() {
    let h = harness(NodeRegistry::with_builtins());
    let wf = h.workflow(vec![node("t", "trigger.webhook", json!({}))], vec![]).await;
    let token = h.store.get_workflow(wf).await.unwrap().webhook_token;
    assert!(token.is_some());

    let edited = WorkflowDefinition::from_value(&json!({
        "nodes": [node("t", "trigger.webhook", json!({ "method": "GET" })), node("l", "utility.log", json!({}))],
        "edges": [edge("t", "l")],
    }))
    .unwrap();
    let row = h.engine.update_definition(wf, edited).await.unwrap();
    assert_eq!(row.webhook_token, token);
    assert_eq!(row.trigger_type.as_deref(), Some("webhook"));

    let manual = WorkflowDefinition::from_value(&json!({
        "nodes": [node("t", "trigger.manual", json!({}))],
        "edges": [],
    }))
    .unwrap();
    let row = h.engine.update_definition(wf, manual).await.unwrap();
    assert_eq!(row.webhook_token, None);
    assert_eq!(row.trigger_type.as_deref(), Some("manual"));
}

/// `MemoryStore` that fails `get_workflow` for one chosen id.
struct FlakyStore {
    inner: MemoryStore,
    broken: std::sync::Mutex<Option<Uuid>>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            broken: std::sync::Mutex::new(None),
        }
    }

    fn break_workflow(&self, id: Uuid) {
        *self.broken.lock().unwrap() = Some(id);
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn create_workflow(&self, new: NewWorkflow) -> Result<WorkflowRow, DbError> {
        self.inner.create_workflow(new).await
    }
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        if *self.broken.lock().unwrap() == Some(id) {
            return Err(DbError::InvalidValue("connection reset".into()));
        }
        self.inner.get_workflow(id).await
    }
    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        self.inner.list_workflows().await
    }
    async fn list_workflows_by_status(&self, status: WorkflowStatus) -> Result<Vec<WorkflowRow>, DbError> {
        self.inner.list_workflows_by_status(status).await
    }
    async fn find_workflow_by_webhook_token(&self, token: &str) -> Result<WorkflowRow, DbError> {
        self.inner.find_workflow_by_webhook_token(token).await
    }
    async fn update_workflow(&self, id: Uuid, update: WorkflowUpdate) -> Result<WorkflowRow, DbError> {
        self.inner.update_workflow(id, update).await
    }
    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        self.inner.delete_workflow(id).await
    }
    async fn update_workflow_runtime(&self, id: Uuid, update: RuntimeUpdate) -> Result<(), DbError> {
        self.inner.update_workflow_runtime(id, update).await
    }
    async fn create_execution(&self, new: NewExecution) -> Result<ExecutionRow, DbError> {
        self.inner.create_execution(new).await
    }
    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError> {
        self.inner.get_execution(id).await
    }
    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError> {
        self.inner.list_executions(workflow_id).await
    }
    async fn update_execution(&self, id: Uuid, patch: ExecutionPatch) -> Result<(), DbError> {
        self.inner.update_execution(id, patch).await
    }
    async fn append_execution_log(&self, entry: NewExecutionLog) -> Result<ExecutionLogRow, DbError> {
        self.inner.append_execution_log(entry).await
    }
    async fn list_execution_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLogRow>, DbError> {
        self.inner.list_execution_logs(execution_id).await
    }
}

#[tokio::test]
async fn unreadable_subscriber_does_not_block_the_rest_of_the_event() {
    let mut registry = NodeRegistry::with_builtins();
    registry.register_executor("action.test.a", Arc::new(MockNode::returning("a", json!({}))));
    let store = Arc::new(FlakyStore::new());
    let engine = WorkflowEngine::new(
        store.clone(),
        Arc::new(registry),
        Arc::new(RecordingSink::default()),
        EngineConfig::default(),
    );
    let user = Uuid::new_v4();
    let definition = WorkflowDefinition::from_value(&json!({
        "nodes": event_trigger(json!({ "sourceId": "bot-1", "expectedEvent": "death" })),
        "edges": [edge("t", "a")],
    }))
    .unwrap();

    let mut active = Vec::new();
    for name in ["first", "second"] {
        let wf = engine
            .create_workflow(user, name, None, definition.clone())
            .await
            .unwrap()
            .id;
        engine.set_status(wf, WorkflowStatus::Active).await.unwrap();
        active.push(wf);
    }
    active.sort();
    // A draft run manually waits for the same event.
    let draft = engine.create_workflow(user, "draft", None, definition).await.unwrap().id;
    let waiting = engine.run(draft, TriggeredBy::Manual, json!({})).await.unwrap();

    // The subscriber visited first can no longer be read.
    store.break_workflow(active[0]);
    let dispatch = engine.on_external_event("bot-1", "death", json!({})).await.unwrap();

    assert_eq!(dispatch.resolved_waits, vec![waiting]);
    assert_eq!(dispatch.started.len(), 1);
    let started = store.get_execution(dispatch.started[0]).await.unwrap();
    assert_eq!(started.workflow_id, active[1]);
}
