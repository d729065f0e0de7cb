//! Response types for the narrative runtime API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reverie_domain::{ExecutionStatus, TagQuery};

/// One produced line of dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueLineData {
    pub node_id: String,
    pub text: String,
    /// Whether the line came from the generation subsystem
    #[serde(default)]
    pub generated: bool,
}

/// A choice offered to the player, already filtered by conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferedChoiceData {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceOfferData {
    pub node_id: String,
    pub prompt: String,
    /// Author-declared order is preserved; no implicit reordering
    pub choices: Vec<OfferedChoiceData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Dialogue,
    ActionBlock,
}

/// Context echoed back by the provider so the result can be routed to the
/// right suspended state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackContextData {
    pub execution_state_id: Uuid,
    pub session_id: Uuid,
    pub npc_id: Uuid,
    pub program_id: String,
    pub node_id: String,
}

/// Request emitted toward the generation provider boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequestData {
    pub kind: GenerationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<TagQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_ref: Option<String>,
    pub callback_context: CallbackContextData,
}

/// Uniform output shape for `start` and `resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeResponse {
    pub execution_state_id: Uuid,
    pub state: ExecutionStatus,
    /// Dialogue produced while stepping to the suspension point
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<DialogueLineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<ChoiceOfferData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_request: Option<GenerationRequestData>,
}

/// Diagnostic counts for the runtime migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatusResponse {
    pub world_id: Uuid,
    /// Execution states started through the runtime-native API
    pub native_states: u64,
    /// Calls served through the legacy shim layer
    pub shim_calls: u64,
}

// =============================================================================
// Legacy shim responses (frozen pre-runtime shapes, camelCase on the wire)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDialogueResponse {
    pub npc_id: Uuid,
    pub session_id: Uuid,
    pub dialogue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyActionSelectResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_block_id: Option<String>,
    pub matched_tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrative_response_omits_empty_fields() {
        let response = NarrativeResponse {
            execution_state_id: Uuid::new_v4(),
            state: ExecutionStatus::Completed,
            lines: Vec::new(),
            offer: None,
            generation_request: None,
        };
        let json = serde_json::to_value(&response).expect("serialize");
        assert!(json.get("lines").is_none());
        assert!(json.get("offer").is_none());
        assert_eq!(json["state"], "completed");
    }

    #[test]
    fn test_legacy_dialogue_response_shape_is_frozen() {
        let response = LegacyDialogueResponse {
            npc_id: Uuid::nil(),
            session_id: Uuid::nil(),
            dialogue: "Hello.".to_string(),
        };
        let json = serde_json::to_string(&response).expect("serialize");
        assert_eq!(
            json,
            "{\"npcId\":\"00000000-0000-0000-0000-000000000000\",\
             \"sessionId\":\"00000000-0000-0000-0000-000000000000\",\
             \"dialogue\":\"Hello.\"}"
        );
    }
}
