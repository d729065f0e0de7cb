//! Narrative program graphs.
//!
//! A `NarrativeProgram` is an immutable, versioned graph of nodes and edges
//! authored outside the runtime. The node set is closed: dialogue, choice,
//! action-block, and branch. Structural integrity is checked once at load
//! time; a program that validates can never fail structurally mid-execution.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::expression::Expression;
use crate::ids::{ChoiceId, EdgeId, NodeId, ProgramId};
use crate::relationship::RelationshipDelta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramKind {
    Dialogue,
    Scene,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueMode {
    Static,
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionBlockMode {
    Query,
    Fixed,
}

/// Structured tag filter sent to the generation provider for query-mode
/// action blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagQuery {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// One selectable option on a choice node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub id: ChoiceId,
    pub text: String,
    pub target_node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expression>,
    /// Relationship effects applied when this choice is taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effects: Option<RelationshipDelta>,
}

/// One conditional arm of a branch node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub condition: Expression,
    pub target_node_id: NodeId,
}

/// Node payloads, discriminated by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Produces a line of dialogue and chains to the next node.
    Dialogue {
        mode: DialogueMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Sub-program invoked instead of producing a line (generated mode)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        program_ref: Option<ProgramId>,
        /// Prompt key handed to the generation subsystem (generated mode)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt_ref: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effects: Option<RelationshipDelta>,
    },
    /// Suspends awaiting a player-selected choice id.
    Choice {
        prompt: String,
        choices: Vec<Choice>,
        /// Fallback target when every choice is gated out
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_target_node_id: Option<NodeId>,
    },
    /// Suspends awaiting an external generation/action-selection result.
    ActionBlock {
        mode: ActionBlockMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<TagQuery>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
    },
    /// Server-side fork; never suspends.
    Branch {
        branches: Vec<Branch>,
        default_target_node_id: NodeId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Explicitly marked end of the program; required for nodes with no way
    /// to proceed
    #[serde(default)]
    pub terminal: bool,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expression>,
}

/// Immutable, versioned dialogue/scene graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeProgram {
    pub id: ProgramId,
    pub version: String,
    pub kind: ProgramKind,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    pub entry_node_id: NodeId,
    /// Opaque authoring metadata (content rating, tags)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Outcome of structural validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self { ok: errors.is_empty(), errors }
    }
}

impl NarrativeProgram {
    /// Cache key for the validated-program cache.
    pub fn cache_key(&self) -> String {
        format!("{}@{}", self.id, self.version)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn edges_from<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |edge| &edge.from == id)
    }

    /// Structural validation, run exactly once per distinct program version.
    ///
    /// Checks: node id uniqueness, edge endpoint existence,
    /// embedded target existence, entry reachability for every node,
    /// at-most-one unconditional edge per node declared last, and that every
    /// node can proceed unless explicitly marked terminal.
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        if self.nodes.is_empty() {
            errors.push("program has no nodes".to_string());
            return ValidationResult::from_errors(errors);
        }

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(node.id.clone()) {
                errors.push(format!("duplicate node id '{}'", node.id));
            }
        }

        if self.node(&self.entry_node_id).is_none() {
            errors.push(format!("entry node '{}' does not exist", self.entry_node_id));
        }

        let mut edge_ids = HashSet::new();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id.clone()) {
                errors.push(format!("duplicate edge id '{}'", edge.id));
            }
            if !node_ids.contains(&edge.from) {
                errors.push(format!("edge '{}' leaves unknown node '{}'", edge.id, edge.from));
            }
            if !node_ids.contains(&edge.to) {
                errors.push(format!("edge '{}' targets unknown node '{}'", edge.id, edge.to));
            }
        }

        for node in &self.nodes {
            self.check_edge_ordering(node, &mut errors);
            self.check_embedded_targets(node, &node_ids, &mut errors);
            self.check_can_proceed(node, &mut errors);
        }

        self.check_reachability(&mut errors);

        ValidationResult::from_errors(errors)
    }

    /// At most one unconditional edge per node, and it must be declared last
    /// among that node's outgoing edges; anything else makes edge selection
    /// ambiguous.
    fn check_edge_ordering(&self, node: &Node, errors: &mut Vec<String>) {
        let outgoing: Vec<&Edge> = self.edges_from(&node.id).collect();
        let unconditional: Vec<usize> = outgoing
            .iter()
            .enumerate()
            .filter(|(_, edge)| edge.condition.is_none())
            .map(|(index, _)| index)
            .collect();
        if unconditional.len() > 1 {
            errors.push(format!(
                "node '{}' has {} unconditional edges; at most one fallback is allowed",
                node.id,
                unconditional.len()
            ));
        } else if let Some(&index) = unconditional.first() {
            if index != outgoing.len() - 1 {
                errors.push(format!(
                    "node '{}' declares its unconditional edge before conditional ones",
                    node.id
                ));
            }
        }
    }

    fn check_embedded_targets(
        &self,
        node: &Node,
        node_ids: &HashSet<NodeId>,
        errors: &mut Vec<String>,
    ) {
        match &node.kind {
            NodeKind::Choice {
                choices,
                default_target_node_id,
                ..
            } => {
                let mut choice_ids = HashSet::new();
                for choice in choices {
                    if !choice_ids.insert(choice.id.clone()) {
                        errors.push(format!(
                            "node '{}' has duplicate choice id '{}'",
                            node.id, choice.id
                        ));
                    }
                    if !node_ids.contains(&choice.target_node_id) {
                        errors.push(format!(
                            "choice '{}' on node '{}' targets unknown node '{}'",
                            choice.id, node.id, choice.target_node_id
                        ));
                    }
                }
                if choices.is_empty() {
                    errors.push(format!("choice node '{}' has no choices", node.id));
                }
                if let Some(target) = default_target_node_id {
                    if !node_ids.contains(target) {
                        errors.push(format!(
                            "default target of choice node '{}' is unknown node '{}'",
                            node.id, target
                        ));
                    }
                }
            }
            NodeKind::Branch {
                branches,
                default_target_node_id,
            } => {
                for branch in branches {
                    if !node_ids.contains(&branch.target_node_id) {
                        errors.push(format!(
                            "branch '{}' on node '{}' targets unknown node '{}'",
                            branch.id, node.id, branch.target_node_id
                        ));
                    }
                }
                if !node_ids.contains(default_target_node_id) {
                    errors.push(format!(
                        "default target of branch node '{}' is unknown node '{}'",
                        node.id, default_target_node_id
                    ));
                }
            }
            NodeKind::Dialogue {
                mode,
                text,
                program_ref,
                ..
            } => {
                if *mode == DialogueMode::Static && text.is_none() {
                    errors.push(format!(
                        "static dialogue node '{}' has no text",
                        node.id
                    ));
                }
                if *mode == DialogueMode::Static && program_ref.is_some() {
                    errors.push(format!(
                        "static dialogue node '{}' cannot carry a program ref",
                        node.id
                    ));
                }
            }
            NodeKind::ActionBlock { mode, query, block_id } => {
                if *mode == ActionBlockMode::Query && query.is_none() {
                    errors.push(format!(
                        "query action block '{}' has no tag query",
                        node.id
                    ));
                }
                if *mode == ActionBlockMode::Fixed && block_id.is_none() {
                    errors.push(format!(
                        "fixed action block '{}' has no block id",
                        node.id
                    ));
                }
            }
        }
    }

    /// A node with no outgoing edge and no embedded target can never proceed;
    /// that is only legal when explicitly marked terminal.
    fn check_can_proceed(&self, node: &Node, errors: &mut Vec<String>) {
        if node.terminal {
            return;
        }
        let has_outgoing = self.edges_from(&node.id).next().is_some();
        let has_embedded = matches!(
            node.kind,
            NodeKind::Choice { .. } | NodeKind::Branch { .. }
        );
        if !has_outgoing && !has_embedded {
            errors.push(format!(
                "node '{}' can never proceed and is not marked terminal",
                node.id
            ));
        }
    }

    fn check_reachability(&self, errors: &mut Vec<String>) {
        if self.node(&self.entry_node_id).is_none() {
            return; // already reported
        }
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue = VecDeque::from([self.entry_node_id.clone()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for edge in self.edges_from(&id) {
                queue.push_back(edge.to.clone());
            }
            if let Some(node) = self.node(&id) {
                match &node.kind {
                    NodeKind::Choice {
                        choices,
                        default_target_node_id,
                        ..
                    } => {
                        for choice in choices {
                            queue.push_back(choice.target_node_id.clone());
                        }
                        if let Some(target) = default_target_node_id {
                            queue.push_back(target.clone());
                        }
                    }
                    NodeKind::Branch {
                        branches,
                        default_target_node_id,
                    } => {
                        for branch in branches {
                            queue.push_back(branch.target_node_id.clone());
                        }
                        queue.push_back(default_target_node_id.clone());
                    }
                    _ => {}
                }
            }
        }
        for node in &self.nodes {
            if !seen.contains(&node.id) {
                errors.push(format!(
                    "node '{}' is unreachable from the entry node",
                    node.id
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialogue(id: &str, text: &str) -> Node {
        Node {
            id: NodeId::new(id),
            terminal: false,
            kind: NodeKind::Dialogue {
                mode: DialogueMode::Static,
                text: Some(text.to_string()),
                program_ref: None,
                prompt_ref: None,
                effects: None,
            },
        }
    }

    fn terminal(mut node: Node) -> Node {
        node.terminal = true;
        node
    }

    fn edge(id: &str, from: &str, to: &str, condition: Option<&str>) -> Edge {
        Edge {
            id: EdgeId::new(id),
            from: NodeId::new(from),
            to: NodeId::new(to),
            condition: condition.map(|src| Expression::parse(src).expect("condition")),
        }
    }

    fn two_node_program() -> NarrativeProgram {
        NarrativeProgram {
            id: ProgramId::new("greeting"),
            version: "1".to_string(),
            kind: ProgramKind::Dialogue,
            nodes: vec![dialogue("a", "Hi"), terminal(dialogue("b", "Bye"))],
            edges: vec![edge("e1", "a", "b", None)],
            entry_node_id: NodeId::new("a"),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_valid_program_passes() {
        let result = two_node_program().validate();
        assert!(result.ok, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let mut program = two_node_program();
        program.nodes.push(dialogue("a", "again"));
        let result = program.validate();
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.contains("duplicate node id")));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut program = two_node_program();
        program.edges.push(edge("e2", "b", "ghost", None));
        let result = program.validate();
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.contains("unknown node 'ghost'")));
    }

    #[test]
    fn test_unconditional_edge_must_be_last() {
        let mut program = two_node_program();
        program.nodes.push(terminal(dialogue("c", "alt")));
        // Unconditional declared before a conditional one - ambiguous
        program.edges = vec![
            edge("e1", "a", "b", None),
            edge("e2", "a", "c", Some("affinity >= 50")),
        ];
        let result = program.validate();
        assert!(!result.ok);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("unconditional edge before conditional")));
    }

    #[test]
    fn test_two_unconditional_edges_rejected() {
        let mut program = two_node_program();
        program.nodes.push(terminal(dialogue("c", "alt")));
        program.edges = vec![edge("e1", "a", "b", None), edge("e2", "a", "c", None)];
        let result = program.validate();
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.contains("at most one fallback")));
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let mut program = two_node_program();
        program.nodes.push(terminal(dialogue("island", "unseen")));
        let result = program.validate();
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.contains("unreachable")));
    }

    #[test]
    fn test_dead_end_requires_terminal_marker() {
        let mut program = two_node_program();
        // 'b' is a dead end; clearing the marker must reject the program
        program.nodes[1].terminal = false;
        let result = program.validate();
        assert!(!result.ok);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("can never proceed")));
    }

    #[test]
    fn test_program_round_trips_through_json() {
        let json = serde_json::json!({
            "id": "tavern_intro",
            "version": "2",
            "kind": "hybrid",
            "entry_node_id": "hello",
            "nodes": [
                {"id": "hello", "type": "dialogue", "mode": "static", "text": "Hi."},
                {
                    "id": "pick",
                    "type": "choice",
                    "prompt": "What do you say?",
                    "choices": [
                        {
                            "id": "flirt",
                            "text": "You look lovely tonight.",
                            "target_node_id": "end",
                            "condition": "chemistry >= 40"
                        },
                        {"id": "chat", "text": "Nice weather.", "target_node_id": "end"}
                    ]
                },
                {"id": "end", "type": "dialogue", "mode": "static", "text": "Bye.", "terminal": true}
            ],
            "edges": [{"id": "e1", "from": "hello", "to": "pick"}]
        });
        let program: NarrativeProgram = serde_json::from_value(json).expect("deserialize");
        assert!(program.validate().ok);
        assert_eq!(program.cache_key(), "tavern_intro@2");

        let back = serde_json::to_value(&program).expect("serialize");
        let again: NarrativeProgram = serde_json::from_value(back).expect("round trip");
        assert!(again.validate().ok);
    }

    #[test]
    fn test_malformed_condition_fails_at_deserialize_time() {
        let json = serde_json::json!({
            "id": "p", "version": "1", "kind": "dialogue", "entry_node_id": "a",
            "nodes": [{"id": "a", "type": "dialogue", "mode": "static", "text": "x", "terminal": true}],
            "edges": [{"id": "e", "from": "a", "to": "a", "condition": "affinity >="}]
        });
        let result: Result<NarrativeProgram, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }
}
