pub mod catalog;
pub mod events;
pub mod executions;
pub mod webhooks;
pub mod workflows;
