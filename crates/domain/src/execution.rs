//! Resumable execution state for one program invocation.
//!
//! One `ExecutionState` exists per (session, npc, program) triple. It is an
//! explicit, externally-persisted record: the engine loads it, advances it to
//! the next suspension point, and saves it back, holding no references in
//! between. The record is JSON-serializable so it can round-trip through any
//! store without behavioral drift.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ExecutionId, NodeId, NpcId, ProgramId, SessionId, WorldId};

/// Where the interpreter currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Actively advancing; no player input needed
    Running,
    /// Suspended at a choice node
    AwaitingChoice,
    /// Suspended at an action block pending the external provider
    AwaitingGeneration,
    /// Terminal node reached
    Completed,
    /// Explicitly cancelled or expired
    Aborted,
}

impl ExecutionStatus {
    /// Live states are those a `start` call must not duplicate.
    pub fn is_live(&self) -> bool {
        !matches!(self, ExecutionStatus::Completed | ExecutionStatus::Aborted)
    }

    pub fn is_suspended(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::AwaitingChoice | ExecutionStatus::AwaitingGeneration
        )
    }
}

/// One level of nested sub-program invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    /// The caller's program
    pub program_id: ProgramId,
    /// The caller's node to resume past once the sub-program completes
    pub return_node_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: ExecutionId,
    pub session_id: SessionId,
    pub npc_id: NpcId,
    pub world_id: WorldId,
    /// Root program this state was started for (part of the storage key)
    pub program_id: ProgramId,
    /// Program currently executing; differs from `program_id` inside a
    /// nested call
    pub current_program_id: ProgramId,
    pub current_node_id: NodeId,
    pub status: ExecutionStatus,
    /// Visited node ids, most-recent-last, capped
    pub history: VecDeque<NodeId>,
    pub history_cap: usize,
    pub call_stack: Vec<CallFrame>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency commit counter; bumped on every save
    pub version: u64,
    /// Whether this state was synthesized by the legacy shim layer
    #[serde(default)]
    pub legacy_shim: bool,
}

impl ExecutionState {
    pub fn new(
        session_id: SessionId,
        npc_id: NpcId,
        world_id: WorldId,
        program_id: ProgramId,
        entry_node_id: NodeId,
        history_cap: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            session_id,
            npc_id,
            world_id,
            program_id: program_id.clone(),
            current_program_id: program_id,
            current_node_id: entry_node_id,
            status: ExecutionStatus::Running,
            history: VecDeque::new(),
            history_cap,
            call_stack: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
            legacy_shim: false,
        }
    }

    /// Append to history, evicting the oldest entry past the cap.
    pub fn record_visit(&mut self, node_id: NodeId) {
        self.history.push_back(node_id);
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }
    }

    pub fn push_frame(&mut self, frame: CallFrame) {
        self.call_stack.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        self.call_stack.pop()
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn abort(&mut self, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Aborted;
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ExecutionState {
        ExecutionState::new(
            SessionId::new(),
            NpcId::new(),
            WorldId::new(),
            ProgramId::new("intro"),
            NodeId::new("entry"),
            3,
            Utc::now(),
        )
    }

    #[test]
    fn test_history_evicts_oldest_past_cap() {
        let mut s = state();
        for id in ["a", "b", "c", "d"] {
            s.record_visit(NodeId::new(id));
        }
        let ids: Vec<&str> = s.history.iter().map(|n| n.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_complete_sets_timestamps_and_status() {
        let mut s = state();
        assert!(s.status.is_live());
        s.complete(Utc::now());
        assert_eq!(s.status, ExecutionStatus::Completed);
        assert!(!s.status.is_live());
        assert!(s.completed_at.is_some());
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut s = state();
        s.record_visit(NodeId::new("a"));
        s.push_frame(CallFrame {
            program_id: ProgramId::new("sub"),
            return_node_id: NodeId::new("entry"),
        });
        s.status = ExecutionStatus::AwaitingChoice;

        let json = serde_json::to_string(&s).expect("serialize");
        let back: ExecutionState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, s.id);
        assert_eq!(back.status, ExecutionStatus::AwaitingChoice);
        assert_eq!(back.call_stack, s.call_stack);
        assert_eq!(back.history, s.history);
        assert_eq!(back.version, s.version);
    }
}
