//! `nodes` crate: the `ExecutableNode` trait, the node-type registry, the
//! expression evaluator and the built-in node implementations.
//!
//! Every node, built-in or domain action, must implement
//! [`ExecutableNode`]. The engine crate dispatches execution through this
//! trait object after resolving it in a [`NodeRegistry`].

pub mod builtin;
pub mod catalog;
pub mod condition;
pub mod config;
pub mod error;
pub mod expression;
pub mod mock;
pub mod registry;
pub mod traits;

pub use catalog::{Catalog, EventDescriptor, NodeDescriptor};
pub use error::{ExpressionError, NodeError};
pub use registry::NodeRegistry;
pub use traits::{ExecutableNode, ExecutionContext, LogLevel, NodeOutput, StopOutcome};
