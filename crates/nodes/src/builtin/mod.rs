//! Built-in node executors: triggers, control flow, data shaping, utilities.

pub mod data;
pub mod logic;
pub mod trigger;
pub mod utility;

use std::sync::Arc;

use serde_json::json;

use crate::catalog::{ConfigField, FieldKind, NodeCategory, NodeDescriptor};
use crate::registry::NodeRegistry;

const OPERATORS: &[&str] = &[
    "eq", "neq", "gt", "gte", "lt", "lte", "contains", "notContains", "startsWith", "endsWith",
    "isEmpty", "isNotEmpty",
];

pub(crate) fn register_all(registry: &mut NodeRegistry) {
    use FieldKind::*;
    use NodeCategory::*;

    // Triggers
    registry.register(
        NodeDescriptor::new("trigger.manual", "Manual trigger", Trigger).inputs(&[]),
        Arc::new(trigger::TriggerNode),
    );
    registry.register(
        NodeDescriptor::new("trigger.schedule", "Schedule", Trigger)
            .inputs(&[])
            .field(ConfigField::new("cronExpression", "Cron expression", Cron).required()),
        Arc::new(trigger::TriggerNode),
    );
    registry.register(
        NodeDescriptor::new("trigger.event", "On event", Trigger)
            .inputs(&[])
            .field(ConfigField::new("sourceId", "Source", String))
            .field(ConfigField::new("expectedEvent", "Event", String).required())
            .field(ConfigField::new("filter", "Payload filter", Json))
            .field(ConfigField::new("timeoutMs", "Manual-run wait (ms)", Number).default_value(json!(300_000))),
        Arc::new(trigger::TriggerNode),
    );
    registry.register(
        NodeDescriptor::new("trigger.webhook", "Webhook", Trigger)
            .inputs(&[])
            .field(
                ConfigField::new("method", "HTTP method", Select)
                    .default_value(json!("POST"))
                    .options(&["GET", "POST", "PUT", "PATCH", "DELETE"]),
            )
            .field(ConfigField::new("requireAuth", "Require secret", Boolean).default_value(json!(false)))
            .field(ConfigField::new("secret", "Secret", String)),
        Arc::new(trigger::TriggerNode),
    );

    // Logic
    registry.register(
        NodeDescriptor::new("logic.if", "If", Logic)
            .outputs(&["true", "false"])
            .field(ConfigField::new("field", "Field", Expression).required())
            .field(ConfigField::new("operator", "Operator", Select).default_value(json!("eq")).options(OPERATORS))
            .field(ConfigField::new("value", "Value", Expression)),
        Arc::new(logic::IfNode),
    );
    registry.register(
        NodeDescriptor::new("logic.switch", "Switch", Logic)
            .outputs(&["default"])
            .field(ConfigField::new("field", "Field", Expression).required())
            .field(ConfigField::new("cases", "Cases", Json).required()),
        Arc::new(logic::SwitchNode),
    );
    registry.register(
        NodeDescriptor::new("logic.loop", "Loop", Logic)
            .field(ConfigField::new("itemsExpression", "Items", Expression).default_value(json!("$input.items")))
            .field(ConfigField::new("count", "Count", Number))
            .field(ConfigField::new("maxIterations", "Max iterations", Number).default_value(json!(logic::DEFAULT_MAX_ITERATIONS))),
        Arc::new(logic::LoopNode),
    );
    registry.register(
        NodeDescriptor::new("logic.merge", "Merge", Logic)
            .field(ConfigField::new("nodeIds", "Nodes", String))
            .field(ConfigField::new("mode", "Mode", Select).default_value(json!("merge")).options(&["merge", "append"])),
        Arc::new(logic::MergeNode),
    );

    // Data
    registry.register(
        NodeDescriptor::new("data.setVariable", "Set variable", Data)
            .field(ConfigField::new("variableName", "Variable", String).required())
            .field(ConfigField::new("valueExpression", "Value", Expression).required()),
        Arc::new(data::SetVariableNode),
    );
    registry.register(
        NodeDescriptor::new("data.transform", "Transform", Data)
            .field(ConfigField::new("mapping", "Mapping", Json).required()),
        Arc::new(data::TransformNode),
    );
    registry.register(
        NodeDescriptor::new("data.filter", "Filter", Data)
            .field(ConfigField::new("itemsExpression", "Items", Expression))
            .field(ConfigField::new("field", "Field", String))
            .field(ConfigField::new("operator", "Operator", Select).default_value(json!("eq")).options(OPERATORS))
            .field(ConfigField::new("value", "Value", Expression)),
        Arc::new(data::FilterNode),
    );
    registry.register(
        NodeDescriptor::new("data.httpRequest", "HTTP request", Data)
            .field(ConfigField::new("url", "URL", Expression).required())
            .field(
                ConfigField::new("method", "Method", Select)
                    .default_value(json!("GET"))
                    .options(&["GET", "POST", "PUT", "PATCH", "DELETE"]),
            )
            .field(ConfigField::new("headers", "Headers", Json))
            .field(ConfigField::new("body", "Body", Json))
            .field(ConfigField::new("timeoutMs", "Timeout (ms)", Number).default_value(json!(data::DEFAULT_HTTP_TIMEOUT_MS)))
            .field(ConfigField::new("failOnError", "Fail on error status", Boolean).default_value(json!(true))),
        Arc::new(data::HttpRequestNode::new()),
    );

    // Utility
    registry.register(
        NodeDescriptor::new("utility.delay", "Delay", Utility)
            .field(ConfigField::new("durationMs", "Duration (ms)", Number).required()),
        Arc::new(utility::DelayNode),
    );
    registry.register(
        NodeDescriptor::new("utility.log", "Log", Utility)
            .field(ConfigField::new("message", "Message", Expression).required())
            .field(
                ConfigField::new("level", "Level", Select)
                    .default_value(json!("info"))
                    .options(&["debug", "info", "warn", "error"]),
            ),
        Arc::new(utility::LogNode),
    );
    registry.register(
        NodeDescriptor::new("utility.stop", "Stop", Utility)
            .outputs(&[])
            .field(
                ConfigField::new("status", "Outcome", Select)
                    .default_value(json!("success"))
                    .options(&["success", "failure"]),
            )
            .field(ConfigField::new("message", "Message", String)),
        Arc::new(utility::StopNode),
    );
}
