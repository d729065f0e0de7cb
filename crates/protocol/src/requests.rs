//! Request payload types for the narrative runtime API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reverie_domain::TimeOfDay;

/// Start (or idempotently re-enter) a program for a (session, npc) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub session_id: Uuid,
    pub npc_id: Uuid,
    pub world_id: Uuid,
    pub program_id: String,
    /// Specific program version; latest published when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Explicit time-of-day context; derived from the server clock when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
    /// Free-text player input available to `input` predicates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_input: Option<String>,
}

/// The external provider's answer to a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResultData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_block_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, serde_json::Value>,
}

/// What the caller is resuming with; exactly one of the two shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResumeInput {
    Choice { choice_id: String },
    Generation { generation_result: GenerationResultData },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub execution_state_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_input: Option<String>,
    #[serde(flatten)]
    pub input: ResumeInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortRequest {
    pub execution_state_id: Uuid,
}

// =============================================================================
// Legacy shim requests (frozen pre-runtime shapes, camelCase on the wire)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDialogueRequest {
    pub npc_id: Uuid,
    pub session_id: Uuid,
    pub world_id: Uuid,
    pub player_input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyActionSelectRequest {
    pub world_id: Uuid,
    pub session_id: Uuid,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_request_accepts_choice_shape() {
        let json = serde_json::json!({
            "execution_state_id": Uuid::new_v4(),
            "choice_id": "flirt"
        });
        let request: ResumeRequest = serde_json::from_value(json).expect("deserialize");
        assert!(matches!(request.input, ResumeInput::Choice { .. }));
    }

    #[test]
    fn test_resume_request_accepts_generation_shape() {
        let json = serde_json::json!({
            "execution_state_id": Uuid::new_v4(),
            "generation_result": { "text": "A line.", "meta": {} }
        });
        let request: ResumeRequest = serde_json::from_value(json).expect("deserialize");
        assert!(matches!(request.input, ResumeInput::Generation { .. }));
    }

    #[test]
    fn test_legacy_request_uses_camel_case() {
        let request = LegacyDialogueRequest {
            npc_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            world_id: Uuid::new_v4(),
            player_input: "hello".to_string(),
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert!(json.get("playerInput").is_some());
        assert!(json.get("player_input").is_none());
    }
}
