//! EventBridge: pending "wait for event" registrations and event-trigger
//! subscriptions.
//!
//! Both tables are plain mutex-guarded maps owned by the engine instance.
//! Locks are never held across an `.await`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use nodes::expression::lookup_path;

use crate::models::event_trigger_data;
use crate::WaitError;

/// What an inbound event must look like to satisfy a trigger or a wait.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventMatcher {
    /// `None` accepts events from any source.
    pub source_id: Option<String>,
    pub event: String,
    /// Dotted payload path → required value (strict equality).
    pub filter: Map<String, Value>,
}

impl EventMatcher {
    pub fn matches(&self, source_id: &str, event_type: &str, payload: &Value) -> bool {
        if let Some(expected) = &self.source_id {
            if expected != source_id {
                return false;
            }
        }
        if self.event != event_type {
            return false;
        }
        self.filter
            .iter()
            .all(|(path, expected)| lookup_path(payload, path) == Some(expected))
    }
}

/// Receiving side of a registered wait.
pub struct WaitHandle {
    execution_id: Uuid,
    rx: oneshot::Receiver<Result<Value, WaitError>>,
}

struct PendingWait {
    workflow_id: Uuid,
    matcher: EventMatcher,
    tx: oneshot::Sender<Result<Value, WaitError>>,
}

/// Routes external events to suspended executions and subscribed workflows.
#[derive(Default)]
pub struct EventBridge {
    waits: Mutex<HashMap<Uuid, PendingWait>>,
    /// Source filter → subscribed workflows; `None` is "any source".
    subscriptions: Mutex<HashMap<Option<String>, HashSet<Uuid>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Pending waits
    // ------------------------------------------------------------------

    /// Register a wait. The registration is live as soon as this returns,
    /// so a matching event can resolve it before [`wait`](Self::wait) runs.
    pub fn register_wait(&self, execution_id: Uuid, workflow_id: Uuid, matcher: EventMatcher) -> WaitHandle {
        let (tx, rx) = oneshot::channel();
        lock(&self.waits).insert(
            execution_id,
            PendingWait {
                workflow_id,
                matcher,
                tx,
            },
        );
        debug!(%execution_id, %workflow_id, "registered event wait");
        WaitHandle { execution_id, rx }
    }

    /// Suspend until the registration is resolved, cancelled, or `timeout`
    /// elapses. The registration is gone once this returns.
    pub async fn wait(&self, handle: WaitHandle, timeout: Duration) -> Result<Value, WaitError> {
        let WaitHandle { execution_id, mut rx } = handle;
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(result) => result.unwrap_or(Err(WaitError::Cancelled)),
            Err(_) => {
                if lock(&self.waits).remove(&execution_id).is_some() {
                    debug!(%execution_id, "event wait timed out");
                    return Err(WaitError::Timeout(timeout));
                }
                // Resolved or cancelled between the deadline and the lock.
                rx.await.unwrap_or(Err(WaitError::Cancelled))
            }
        }
    }

    pub async fn wait_for(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
        matcher: EventMatcher,
        timeout: Duration,
    ) -> Result<Value, WaitError> {
        let handle = self.register_wait(execution_id, workflow_id, matcher);
        self.wait(handle, timeout).await
    }

    /// Resolve every pending wait matching the event with its trigger data
    /// (`{event, source, eventType}`); returns the resolved execution ids.
    pub fn resolve_waits(&self, source_id: &str, event_type: &str, payload: &Value) -> Vec<Uuid> {
        let matched: Vec<(Uuid, PendingWait)> = {
            let mut waits = lock(&self.waits);
            let ids: Vec<Uuid> = waits
                .iter()
                .filter(|(_, w)| w.matcher.matches(source_id, event_type, payload))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| waits.remove(&id).map(|w| (id, w)))
                .collect()
        };

        let mut resolved = Vec::with_capacity(matched.len());
        for (id, wait) in matched {
            debug!(execution_id = %id, workflow_id = %wait.workflow_id, event_type, "event wait resolved");
            // A dropped receiver means the waiter is already gone.
            if wait
                .tx
                .send(Ok(event_trigger_data(source_id, event_type, payload.clone())))
                .is_ok()
            {
                resolved.push(id);
            }
        }
        resolved.sort();
        resolved
    }

    /// Reject a pending wait. Returns false when nothing was waiting.
    pub fn cancel_wait(&self, execution_id: Uuid) -> bool {
        match lock(&self.waits).remove(&execution_id) {
            Some(wait) => {
                let _ = wait.tx.send(Err(WaitError::Cancelled));
                true
            }
            None => false,
        }
    }

    pub fn is_waiting(&self, execution_id: Uuid) -> bool {
        lock(&self.waits).contains_key(&execution_id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.waits).len()
    }

    // ------------------------------------------------------------------
    // Trigger subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe(&self, workflow_id: Uuid, source_id: Option<String>) {
        lock(&self.subscriptions)
            .entry(source_id)
            .or_default()
            .insert(workflow_id);
    }

    /// Drop every subscription of `workflow_id`. Idempotent.
    pub fn unsubscribe_all(&self, workflow_id: Uuid) {
        let mut subs = lock(&self.subscriptions);
        subs.values_mut().for_each(|set| {
            set.remove(&workflow_id);
        });
        subs.retain(|_, set| !set.is_empty());
    }

    pub fn is_subscribed(&self, workflow_id: Uuid) -> bool {
        lock(&self.subscriptions)
            .values()
            .any(|set| set.contains(&workflow_id))
    }

    /// Workflows subscribed to `source_id` or to any source, in id order.
    pub fn subscribers_for(&self, source_id: &str) -> Vec<Uuid> {
        let subs = lock(&self.subscriptions);
        let mut out = BTreeSet::new();
        for key in [Some(source_id.to_owned()), None] {
            if let Some(set) = subs.get(&key) {
                out.extend(set.iter().copied());
            }
        }
        out.into_iter().collect()
    }
}
