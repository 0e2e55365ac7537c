//! `WorkflowEngine`: the execution core.
//!
//! Responsibilities:
//! 1. Create the execution row and the in-memory context for a run.
//! 2. Walk the graph depth-first from the trigger node, following the
//!    handle each node produced, in edge-definition order.
//! 3. Persist one log row per node invocation and stream progress to the
//!    [`NotificationSink`].
//! 4. Finalise the execution (COMPLETED / FAILED / CANCELLED) and update
//!    the workflow's counters.
//!
//! Any node error aborts the whole run. Cancellation is cooperative: the
//! flag is checked before each node starts.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::models::{
    ExecutionPatch, ExecutionStatus, NewExecution, NewExecutionLog, RuntimeUpdate, WorkflowRow,
};
use db::Store;
use nodes::{ExecutionContext, NodeError, NodeOutput, NodeRegistry, StopOutcome};

use crate::dag::{validate_definition, GraphIndex};
use crate::events::{EventBridge, WaitHandle};
use crate::models::{Edge, EventTrigger, Node, TriggerSpec, TriggeredBy, WorkflowDefinition};
use crate::notify::{EngineEvent, NotificationSink};
use crate::scheduler::Scheduler;
use crate::{EngineError, WaitError};

/// Tunables for a [`WorkflowEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a manual run of an event-triggered workflow waits when the
    /// trigger sets no `timeoutMs`.
    pub default_wait_timeout: Duration,
    /// Longest single timer sleep; longer schedule delays are chained.
    pub max_timer_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_wait_timeout: crate::models::DEFAULT_EVENT_WAIT,
            max_timer_delay: Duration::from_millis((1 << 31) - 1),
        }
    }
}

pub(crate) struct LiveExecution {
    pub(crate) workflow_id: Uuid,
    pub(crate) cancelled: Arc<AtomicBool>,
}

pub(crate) struct EngineInner {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) sink: Arc<dyn NotificationSink>,
    pub(crate) config: EngineConfig,
    pub(crate) live: Mutex<HashMap<Uuid, LiveExecution>>,
    pub(crate) scheduler: Scheduler,
    pub(crate) events: EventBridge,
}

/// Cloneable handle to one engine instance. Construct once at startup and
/// share it with the HTTP layer.
#[derive(Clone)]
pub struct WorkflowEngine {
    pub(crate) inner: Arc<EngineInner>,
}

/// A run whose execution row exists and is tracked as live.
struct PreparedRun {
    workflow: WorkflowRow,
    definition: WorkflowDefinition,
    execution_id: Uuid,
    trigger_data: Value,
    cancelled: Arc<AtomicBool>,
}

enum Launch {
    Ready(PreparedRun),
    Waiting(PreparedRun, EventTrigger, WaitHandle),
}

enum WalkOutcome {
    Finished,
    Stopped(StopOutcome),
    Cancelled,
}

/// One entry of the depth-first worklist.
struct Pending<'d> {
    node: &'d Node,
    via: Option<&'d Edge>,
    source_output: Value,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<NodeRegistry>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        let scheduler = Scheduler::new(config.max_timer_delay);
        Self {
            inner: Arc::new(EngineInner {
                store,
                registry,
                sink,
                config,
                live: Mutex::new(HashMap::new()),
                scheduler,
                events: EventBridge::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn emit(&self, user_id: Uuid, event: EngineEvent, payload: Value) {
        self.inner.sink.emit(user_id, event, payload);
    }

    fn live(&self) -> MutexGuard<'_, HashMap<Uuid, LiveExecution>> {
        self.inner.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ids of executions currently tracked in memory, sorted.
    pub fn live_executions(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.live().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Executions of `workflow_id` currently tracked in memory.
    pub fn live_executions_of(&self, workflow_id: Uuid) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .live()
            .iter()
            .filter(|(_, live)| live.workflow_id == workflow_id)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Run a workflow to a terminal status and return the execution id.
    ///
    /// A manual run of an event-triggered workflow returns as soon as its
    /// WAITING execution exists; the rest happens once the event arrives.
    /// Node failures are recorded on the execution, not returned.
    #[instrument(skip(self, trigger_data))]
    pub async fn run(
        &self,
        workflow_id: Uuid,
        triggered_by: TriggeredBy,
        trigger_data: Value,
    ) -> Result<Uuid, EngineError> {
        match self.prepare(workflow_id, triggered_by, trigger_data).await? {
            Launch::Ready(run) => {
                let id = run.execution_id;
                self.drive(run).await;
                Ok(id)
            }
            Launch::Waiting(run, trigger, handle) => {
                let id = run.execution_id;
                self.spawn_wait(run, trigger, handle);
                Ok(id)
            }
        }
    }

    /// Like [`run`](Self::run) but drives the execution on a background
    /// task. Returns once the execution row exists.
    #[instrument(skip(self, trigger_data))]
    pub async fn start(
        &self,
        workflow_id: Uuid,
        triggered_by: TriggeredBy,
        trigger_data: Value,
    ) -> Result<Uuid, EngineError> {
        match self.prepare(workflow_id, triggered_by, trigger_data).await? {
            Launch::Ready(run) => {
                let id = run.execution_id;
                let engine = self.clone();
                tokio::spawn(async move {
                    engine.drive(run).await;
                });
                Ok(id)
            }
            Launch::Waiting(run, trigger, handle) => {
                let id = run.execution_id;
                self.spawn_wait(run, trigger, handle);
                Ok(id)
            }
        }
    }

    /// Request cancellation. A waiting execution is rejected right away;
    /// a running one stops before its next node.
    pub fn cancel_execution(&self, execution_id: Uuid) -> Result<(), EngineError> {
        if self.inner.events.cancel_wait(execution_id) {
            info!(%execution_id, "cancelled waiting execution");
            return Ok(());
        }
        match self.live().get(&execution_id) {
            Some(live) => {
                live.cancelled.store(true, Ordering::SeqCst);
                info!(%execution_id, "cancellation requested");
                Ok(())
            }
            None => Err(EngineError::ExecutionNotLive(execution_id)),
        }
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    async fn prepare(
        &self,
        workflow_id: Uuid,
        triggered_by: TriggeredBy,
        trigger_data: Value,
    ) -> Result<Launch, EngineError> {
        let workflow = self.inner.store.get_workflow(workflow_id).await?;
        let definition = WorkflowDefinition::from_value(&workflow.definition)?;
        validate_definition(&definition)?;

        let event_trigger = match definition.trigger() {
            Some(TriggerSpec::Event(trigger)) if triggered_by == TriggeredBy::Manual => Some(trigger),
            _ => None,
        };
        let status = if event_trigger.is_some() {
            ExecutionStatus::Waiting
        } else {
            ExecutionStatus::Running
        };

        let execution = self
            .inner
            .store
            .create_execution(NewExecution {
                workflow_id,
                triggered_by: triggered_by.as_str().to_owned(),
                trigger_data: trigger_data.clone(),
                status,
            })
            .await?;

        if let Err(e) = self
            .inner
            .store
            .update_workflow_runtime(workflow_id, RuntimeUpdate::started(execution.started_at))
            .await
        {
            warn!(%workflow_id, error = %e, "failed to record run start");
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        self.live().insert(
            execution.id,
            LiveExecution {
                workflow_id,
                cancelled: cancelled.clone(),
            },
        );

        info!(execution_id = %execution.id, %status, "execution created");
        self.emit(
            workflow.user_id,
            EngineEvent::ExecutionStarted,
            json!({
                "executionId": execution.id,
                "workflowId": workflow_id,
                "triggeredBy": triggered_by,
                "status": status,
            }),
        );

        let run = PreparedRun {
            workflow,
            definition,
            execution_id: execution.id,
            trigger_data,
            cancelled,
        };

        Ok(match event_trigger {
            Some(trigger) => {
                let handle = self
                    .inner
                    .events
                    .register_wait(run.execution_id, workflow_id, trigger.matcher.clone());
                Launch::Waiting(run, trigger, handle)
            }
            None => Launch::Ready(run),
        })
    }

    fn spawn_wait(&self, mut run: PreparedRun, trigger: EventTrigger, handle: WaitHandle) {
        let timeout = trigger.timeout.unwrap_or(self.inner.config.default_wait_timeout);
        self.emit(
            run.workflow.user_id,
            EngineEvent::Waiting,
            json!({
                "executionId": run.execution_id,
                "workflowId": run.workflow.id,
                "expectedEvent": trigger.matcher.event,
                "sourceId": trigger.matcher.source_id,
                "timeoutMs": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        );

        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.inner.events.wait(handle, timeout).await;
            match result {
                Ok(_) if run.cancelled.load(Ordering::SeqCst) => {
                    engine.finish(&run, None, ExecutionStatus::Cancelled, None).await;
                }
                Ok(trigger_data) => {
                    debug!(execution_id = %run.execution_id, "event arrived, resuming");
                    if let Err(e) = engine
                        .inner
                        .store
                        .update_execution(
                            run.execution_id,
                            ExecutionPatch {
                                status: Some(ExecutionStatus::Running),
                                trigger_data: Some(trigger_data.clone()),
                                ..Default::default()
                            },
                        )
                        .await
                    {
                        warn!(execution_id = %run.execution_id, error = %e, "failed to mark execution running");
                    }
                    run.trigger_data = trigger_data;
                    engine.drive(run).await;
                }
                Err(WaitError::Timeout(after)) => {
                    let message = format!(
                        "Timed out after {}s waiting for event '{}'",
                        after.as_secs(),
                        trigger.matcher.event
                    );
                    warn!(execution_id = %run.execution_id, "{message}");
                    engine
                        .finish(&run, None, ExecutionStatus::Failed, Some(message))
                        .await;
                }
                Err(WaitError::Cancelled) => {
                    engine.finish(&run, None, ExecutionStatus::Cancelled, None).await;
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    async fn drive(&self, run: PreparedRun) -> ExecutionStatus {
        let mut ctx = ExecutionContext::new(
            run.workflow.id,
            run.execution_id,
            run.workflow.user_id,
            run.trigger_data.clone(),
        );

        let (status, message) = match self.walk(&run, &mut ctx).await {
            Ok(WalkOutcome::Finished) | Ok(WalkOutcome::Stopped(StopOutcome::Completed { .. })) => {
                (ExecutionStatus::Completed, None)
            }
            Ok(WalkOutcome::Stopped(StopOutcome::Failed { message })) => (
                ExecutionStatus::Failed,
                Some(message.unwrap_or_else(|| "Workflow stopped with failure".to_owned())),
            ),
            Ok(WalkOutcome::Cancelled) => (ExecutionStatus::Cancelled, None),
            Err(e) => {
                error!(execution_id = %run.execution_id, error = %e, "execution failed");
                (ExecutionStatus::Failed, Some(e.to_string()))
            }
        };

        self.finish(&run, Some(&ctx), status, message).await;
        status
    }

    async fn walk(&self, run: &PreparedRun, ctx: &mut ExecutionContext) -> Result<WalkOutcome, EngineError> {
        let index = GraphIndex::new(&run.definition);
        let trigger = run
            .definition
            .trigger_node()
            .ok_or(EngineError::MissingTriggerNode)?;

        let mut stack = vec![Pending {
            node: trigger,
            via: None,
            source_output: run.trigger_data.clone(),
        }];

        while let Some(Pending { node, via, source_output }) = stack.pop() {
            if run.cancelled.load(Ordering::SeqCst) {
                debug!(execution_id = %run.execution_id, node_id = %node.id, "cancelled before node");
                return Ok(WalkOutcome::Cancelled);
            }

            let input = match via.and_then(|edge| edge.data_mapping.as_ref().map(|m| (edge, m))) {
                Some((edge, mapping)) => match map_input(ctx, edge, mapping, &source_output) {
                    Ok(mapped) => mapped,
                    Err(err) => {
                        // Attributed to the target node.
                        ctx.current_node_id = Some(node.id.clone());
                        self.record_node_failure(run, node, source_output, &err, 0).await;
                        return Err(err);
                    }
                },
                None => source_output,
            };

            let output = self.execute_node(run, node, input, ctx).await?;

            if let Some(outcome) = output.stop {
                run.cancelled.store(true, Ordering::SeqCst);
                return Ok(WalkOutcome::Stopped(outcome));
            }

            let edges = index.successors(&node.id, output.handle.as_deref());
            // Reverse so the first edge is popped first.
            for edge in edges.into_iter().rev() {
                let target = index.node(&edge.target).ok_or_else(|| EngineError::UnknownNodeReference {
                    edge_id: edge.id.clone(),
                    node_id: edge.target.clone(),
                    side: "target",
                })?;
                stack.push(Pending {
                    node: target,
                    via: Some(edge),
                    source_output: output.data.clone(),
                });
            }
        }

        Ok(WalkOutcome::Finished)
    }

    async fn execute_node(
        &self,
        run: &PreparedRun,
        node: &Node,
        input: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let store = &self.inner.store;
        let user_id = run.workflow.user_id;
        let execution_id = run.execution_id;

        ctx.current_node_id = Some(node.id.clone());
        if let Err(e) = store
            .update_execution(
                execution_id,
                ExecutionPatch {
                    current_node_id: Some(node.id.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(%execution_id, node_id = %node.id, error = %e, "failed to record current node");
        }

        self.emit(
            user_id,
            EngineEvent::NodeStarted,
            json!({
                "executionId": execution_id,
                "nodeId": node.id,
                "nodeType": node.node_type,
                "nodeName": node.display_name(),
            }),
        );
        debug!(%execution_id, node_id = %node.id, node_type = %node.node_type, "executing node");

        let started = Instant::now();
        let result = match self.inner.registry.resolve(&node.node_type) {
            Some(executor) => {
                let call = AssertUnwindSafe(executor.execute(&node.config, input.clone(), ctx));
                let outcome = match call.catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => Err(NodeError::Failed(format!(
                        "node panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                };
                outcome.map_err(|source| EngineError::NodeFailed {
                    node_id: node.id.clone(),
                    source,
                })
            }
            None => Err(EngineError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            }),
        };
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        match result {
            Ok(output) => {
                ctx.node_outputs.insert(node.id.clone(), output.data.clone());

                let (level, message) = match &output.log {
                    Some((level, message)) => (log_level(*level), message.clone()),
                    None => (db::models::LogLevel::Info, format!("{} completed", node.display_name())),
                };
                store
                    .append_execution_log(NewExecutionLog {
                        execution_id,
                        node_id: node.id.clone(),
                        node_name: node.display_name().to_owned(),
                        node_type: node.node_type.clone(),
                        level,
                        message,
                        input_data: input,
                        output_data: Some(output.data.clone()),
                        duration_ms,
                    })
                    .await?;

                self.emit(
                    user_id,
                    EngineEvent::NodeCompleted,
                    json!({
                        "executionId": execution_id,
                        "nodeId": node.id,
                        "output": output.data,
                        "durationMs": duration_ms,
                    }),
                );
                Ok(output)
            }
            Err(err) => {
                self.record_node_failure(run, node, input, &err, duration_ms).await;
                Err(err)
            }
        }
    }

    /// Error log row plus `nodeError` for a node that did not complete.
    async fn record_node_failure(
        &self,
        run: &PreparedRun,
        node: &Node,
        input: Value,
        err: &EngineError,
        duration_ms: i64,
    ) {
        let execution_id = run.execution_id;
        error!(%execution_id, node_id = %node.id, error = %err, "node failed");
        if let Err(e) = self
            .inner
            .store
            .append_execution_log(NewExecutionLog {
                execution_id,
                node_id: node.id.clone(),
                node_name: node.display_name().to_owned(),
                node_type: node.node_type.clone(),
                level: db::models::LogLevel::Error,
                message: err.to_string(),
                input_data: input,
                output_data: None,
                duration_ms,
            })
            .await
        {
            warn!(%execution_id, error = %e, "failed to persist error log");
        }
        self.emit(
            run.workflow.user_id,
            EngineEvent::NodeError,
            json!({
                "executionId": execution_id,
                "nodeId": node.id,
                "error": err.to_string(),
            }),
        );
    }

    // ------------------------------------------------------------------
    // Finalisation
    // ------------------------------------------------------------------

    async fn finish(
        &self,
        run: &PreparedRun,
        ctx: Option<&ExecutionContext>,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) {
        let execution_id = run.execution_id;
        let workflow_id = run.workflow.id;
        let store = &self.inner.store;

        let patch = ExecutionPatch {
            status: Some(status),
            variables: ctx.map(|c| Value::Object(c.variables.clone())),
            node_outputs: ctx.map(|c| Value::Object(c.node_outputs.clone())),
            error_message: error_message.clone(),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(e) = store.update_execution(execution_id, patch).await {
            error!(%execution_id, error = %e, "failed to finalise execution");
        }

        let runtime = match status {
            ExecutionStatus::Completed => Some(RuntimeUpdate::succeeded()),
            ExecutionStatus::Failed => Some(RuntimeUpdate::failed()),
            _ => None,
        };
        if let Some(update) = runtime {
            if let Err(e) = store.update_workflow_runtime(workflow_id, update).await {
                warn!(%workflow_id, error = %e, "failed to update run counters");
            }
        }

        self.live().remove(&execution_id);

        let event = match status {
            ExecutionStatus::Completed => EngineEvent::ExecutionCompleted,
            ExecutionStatus::Cancelled => EngineEvent::ExecutionCancelled,
            _ => EngineEvent::ExecutionFailed,
        };
        info!(%execution_id, %workflow_id, %status, "execution finished");
        self.emit(
            run.workflow.user_id,
            event,
            json!({
                "executionId": execution_id,
                "workflowId": workflow_id,
                "status": status,
                "error": error_message,
            }),
        );
    }
}

fn map_input(
    ctx: &ExecutionContext,
    edge: &Edge,
    mapping: &BTreeMap<String, String>,
    source_output: &Value,
) -> Result<Value, EngineError> {
    let mut mapped = Map::new();
    for (key, expr) in mapping {
        let value = ctx
            .evaluate(expr, source_output)
            .map_err(|source| EngineError::DataMapping {
                edge_id: edge.id.clone(),
                source,
            })?;
        mapped.insert(key.clone(), value);
    }
    Ok(Value::Object(mapped))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn log_level(level: nodes::LogLevel) -> db::models::LogLevel {
    match level {
        nodes::LogLevel::Debug => db::models::LogLevel::Debug,
        nodes::LogLevel::Info => db::models::LogLevel::Info,
        nodes::LogLevel::Warn => db::models::LogLevel::Warn,
        nodes::LogLevel::Error => db::models::LogLevel::Error,
    }
}
