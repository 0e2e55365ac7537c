//! `engine` crate: workflow definitions, validation, triggers and the
//! execution engine.
//!
//! [`WorkflowEngine`] is the single service object: it owns the live
//! execution table, the schedule timers and the event bridge, and is
//! cloned into whatever needs to drive it (HTTP handlers, the startup
//! reconciliation pass).

pub mod dag;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod runner;
pub mod scheduler;
pub mod triggers;
pub mod webhook;

pub use dag::validate_definition;
pub use error::{EngineError, WaitError, WebhookError};
pub use events::EventMatcher;
pub use models::{Edge, Node, TriggerSpec, TriggeredBy, WorkflowDefinition, WorkflowExport};
pub use notify::{BroadcastSink, EngineEvent, Notification, NotificationSink, NullSink};
pub use runner::{EngineConfig, WorkflowEngine};
pub use scheduler::{compute_next_fire_time, upcoming_fire_times};
pub use triggers::EventDispatch;
pub use webhook::{WebhookRequest, SECRET_HEADER};

#[cfg(test)]
mod runner_tests;
