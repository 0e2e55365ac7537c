//! Static descriptions of node types and domain events, served to the editor.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Trigger,
    Logic,
    Data,
    Utility,
    Action,
}

impl NodeCategory {
    /// Category implied by the dotted prefix of a node type.
    pub fn from_type(node_type: &str) -> Option<Self> {
        match node_type.split('.').next()? {
            "trigger" => Some(Self::Trigger),
            "logic" => Some(Self::Logic),
            "data" => Some(Self::Data),
            "utility" => Some(Self::Utility),
            "action" => Some(Self::Action),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Select,
    Json,
    Expression,
    Cron,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigField {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ConfigField {
    pub fn new(name: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            required: false,
            default: None,
            options: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|s| (*s).to_owned()).collect();
        self
    }
}

/// Editor-facing description of one node type.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub category: NodeCategory,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub config_fields: Vec<ConfigField>,
}

impl NodeDescriptor {
    /// Descriptor with one `main` input and one `main` output.
    pub fn new(node_type: &str, name: &str, category: NodeCategory) -> Self {
        Self {
            node_type: node_type.into(),
            name: name.into(),
            category,
            inputs: vec!["main".into()],
            outputs: vec!["main".into()],
            config_fields: Vec::new(),
        }
    }

    pub fn inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn field(mut self, field: ConfigField) -> Self {
        self.config_fields.push(field);
        self
    }
}

/// An event a domain can emit into the engine (e.g. a bot's `health_low`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDescriptor {
    pub event: String,
    pub description: String,
    /// Payload keys usable in an event trigger's filter.
    pub payload_fields: Vec<String>,
}

/// Everything the catalog endpoint returns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub nodes: Vec<NodeDescriptor>,
    pub events: std::collections::BTreeMap<String, Vec<EventDescriptor>>,
}
