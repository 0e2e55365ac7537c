//! Definition validation and the adjacency index the runner walks.
//!
//! Rules enforced by [`validate_definition`]:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every edge must reference valid node IDs (both `source` and `target`).
//! 3. Exactly one node has a `trigger.*` type.
//! 4. The directed graph must be acyclic (topological sort must succeed).

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Edge, Node, WorkflowDefinition};
use crate::EngineError;

/// Validate the definition and return its node IDs in topological order.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
/// - [`EngineError::MissingTriggerNode`] / [`EngineError::MultipleTriggerNodes`].
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<Vec<String>, EngineError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &definition.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    for edge in &definition.edges {
        for (node_id, side) in [(&edge.source, "source"), (&edge.target, "target")] {
            if !seen_ids.contains(node_id.as_str()) {
                return Err(EngineError::UnknownNodeReference {
                    edge_id: edge.id.clone(),
                    node_id: node_id.clone(),
                    side,
                });
            }
        }
    }

    match definition.nodes.iter().filter(|n| n.is_trigger()).count() {
        0 => return Err(EngineError::MissingTriggerNode),
        1 => {}
        n => return Err(EngineError::MultipleTriggerNodes(n)),
    }

    // Kahn's algorithm; seeding in definition order keeps the result stable.
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> =
        definition.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();

    for edge in &definition.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
        *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = definition
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(definition.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        for &neighbour in adjacency.get(node_id).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(neighbour) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    if sorted.len() != definition.nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

/// Lookup tables built once per execution.
pub struct GraphIndex<'d> {
    nodes: HashMap<&'d str, &'d Node>,
    outgoing: HashMap<&'d str, Vec<&'d Edge>>,
}

impl<'d> GraphIndex<'d> {
    pub fn new(definition: &'d WorkflowDefinition) -> Self {
        let nodes = definition.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for edge in &definition.edges {
            outgoing.entry(edge.source.as_str()).or_default().push(edge);
        }
        Self { nodes, outgoing }
    }

    pub fn node(&self, id: &str) -> Option<&'d Node> {
        self.nodes.get(id).copied()
    }

    /// Outgoing edges of `node_id` that follow `handle`, in definition order.
    pub fn successors(&self, node_id: &str, handle: Option<&str>) -> Vec<&'d Edge> {
        self.outgoing
            .get(node_id)
            .map(|edges| edges.iter().copied().filter(|e| e.follows(handle)).collect())
            .unwrap_or_default()
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;
    use serde_json::Value;

    fn make_node(id: &str, node_type: &str) -> Node {
        Node {
            id: id.to_string(),
            node_type: node_type.into(),
            position: Position::default(),
            label: String::new(),
            config: Value::Null,
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: format!("{source}-{target}"),
            source: source.into(),
            source_handle: None,
            target: target.into(),
            target_handle: None,
            data_mapping: None,
        }
    }

    fn make_definition(ids: &[&str], edges: Vec<Edge>) -> WorkflowDefinition {
        let nodes = ids
            .iter()
            .enumerate()
            .map(|(i, id)| make_node(id, if i == 0 { "trigger.manual" } else { "utility.log" }))
            .collect();
        WorkflowDefinition { nodes, edges, viewport: None }
    }

    #[test]
    fn valid_linear_definition_returns_sorted_order() {
        let def = make_definition(&["a", "b", "c"], vec![edge("a", "b"), edge("b", "c")]);
        let sorted = validate_definition(&def).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let def = make_definition(
            &["a", "b", "c", "d"],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        );
        let sorted = validate_definition(&def).expect("should be valid");
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let def = make_definition(&["a", "a"], vec![]);
        assert!(matches!(
            validate_definition(&def),
            Err(EngineError::DuplicateNodeId(id)) if id == "a"
        ));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let def = make_definition(&["a"], vec![edge("a", "ghost")]);
        assert!(matches!(
            validate_definition(&def),
            Err(EngineError::UnknownNodeReference { node_id, side: "target", .. }) if node_id == "ghost"
        ));
    }

    #[test]
    fn trigger_count_must_be_one() {
        let mut def = make_definition(&["a", "b"], vec![edge("a", "b")]);
        def.nodes[0].node_type = "utility.log".into();
        assert!(matches!(validate_definition(&def), Err(EngineError::MissingTriggerNode)));

        def.nodes[0].node_type = "trigger.manual".into();
        def.nodes[1].node_type = "trigger.webhook".into();
        assert!(matches!(validate_definition(&def), Err(EngineError::MultipleTriggerNodes(2))));
    }

    #[test]
    fn cycle_is_detected() {
        let def = make_definition(
            &["a", "b", "c"],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "b")],
        );
        assert!(matches!(validate_definition(&def), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn successors_filter_by_handle_in_definition_order() {
        let mut yes = edge("if", "x");
        yes.source_handle = Some("true".into());
        let mut no = edge("if", "y");
        no.source_handle = Some("false".into());
        let always = edge("if", "z");
        let def = make_definition(&["t", "if", "x", "y", "z"], vec![yes, no, always]);
        let index = GraphIndex::new(&def);

        let targets: Vec<_> = index.successors("if", Some("true")).iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["x", "z"]);
        assert!(index.successors("z", None).is_empty());
    }
}
