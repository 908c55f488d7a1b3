//! Per-thread execution state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input key holding the caller's primary message.
pub const PRIMARY_INPUT: &str = "user_input";

/// Author of a [`Message`]. Only the caller writes to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// One entry of a thread's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Lifecycle of the most recent run on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Everything the engine persists for one thread.
///
/// A node's key is absent from `outputs` until that node has completed in
/// the current run, and is never overwritten while the run lasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Node id to coerced output, in completion order.
    pub outputs: Map<String, Value>,
    /// Inputs of the current run.
    pub inputs: Map<String, Value>,
    /// Conversation log; one user message per run.
    pub messages: Vec<Message>,
    /// Number of runs started on this thread, starting at 1.
    pub turn: u32,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Fresh state for a thread's first run.
    pub fn new(inputs: Map<String, Value>) -> Self {
        let mut state = Self {
            outputs: Map::new(),
            inputs: Map::new(),
            messages: Vec::new(),
            turn: 0,
            status: RunStatus::Running,
            updated_at: Utc::now(),
        };
        state.begin_turn(inputs);
        state
    }

    /// Start a new run on an existing thread: outputs are cleared, inputs
    /// replaced, the primary input appended to the log, and the turn
    /// counter advanced.
    pub fn begin_turn(&mut self, inputs: Map<String, Value>) {
        if let Some(text) = primary_text(&inputs) {
            self.messages.push(Message::user(text));
        }
        self.outputs.clear();
        self.inputs = inputs;
        self.turn += 1;
        self.status = RunStatus::Running;
        self.touch();
    }

    /// Whether an interrupted run with these inputs can pick up where it
    /// stopped.
    pub fn can_resume(&self, inputs: &Map<String, Value>) -> bool {
        self.status != RunStatus::Completed && &self.inputs == inputs
    }

    pub fn has_output(&self, node_id: &str) -> bool {
        self.outputs.contains_key(node_id)
    }

    /// Record a completed node. Returns `false`, leaving the state alone,
    /// if the node already has an output in this run.
    pub fn record(&mut self, node_id: &str, output: Value) -> bool {
        if self.outputs.contains_key(node_id) {
            return false;
        }
        self.outputs.insert(node_id.to_string(), output);
        self.touch();
        true
    }

    pub fn mark(&mut self, status: RunStatus) {
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Text of the primary input, stringifying non-string values.
fn primary_text(inputs: &Map<String, Value>) -> Option<String> {
    match inputs.get(PRIMARY_INPUT)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
