//! `ensemble-types` – the action protocol shared by every node.
//!
//! Clients and servers exchange exactly four contracts: a [`Goal`] going
//! down, zero or more [`Feedback`] messages and one terminal
//! [`ActionResult`] coming back up, and the [`GoalStatus`] the client
//! derives from them.  None of these types carry logic beyond construction
//! helpers; a value sent by one side must be observed unchanged by the other.
//!
//! # Modules
//!
//! - [`command`] – [`ActionCommand`]: the typed form of `Goal::action`,
//!   resolved once per goal instead of matching strings at call time.
//! - [`lifecycle`] – [`ServiceState`] and the [`ServiceLifecycle`] guard that
//!   keeps a ServiceManager's state transitions legal.

pub mod command;
pub mod lifecycle;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use command::ActionCommand;
pub use lifecycle::{ServiceLifecycle, ServiceState};

/// Literal used on the wire for a goal that must be dispatched immediately.
pub const UNCONDITIONAL: &str = "unconditional";

/// Deadline applied to a goal that does not specify one.
pub const DEFAULT_GOAL_TIMEOUT: Duration = Duration::from_secs(10);

// ─────────────────────────────────────────────────────────────────────────────
// Goal
// ─────────────────────────────────────────────────────────────────────────────

/// Precondition that must be observed before a controller dispatches a goal.
///
/// Encoded as a plain string: [`UNCONDITIONAL`] (or an empty string) means
/// no precondition, anything else names the event to wait for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Condition {
    #[default]
    Unconditional,
    /// Wait until the named event has been signalled.
    Event(String),
}

impl Condition {
    /// The event name this condition waits on, if any.
    pub fn event(&self) -> Option<&str> {
        match self {
            Condition::Unconditional => None,
            Condition::Event(name) => Some(name),
        }
    }
}

impl From<String> for Condition {
    fn from(raw: String) -> Self {
        if raw.is_empty() || raw == UNCONDITIONAL {
            Condition::Unconditional
        } else {
            Condition::Event(raw)
        }
    }
}

impl From<&str> for Condition {
    fn from(raw: &str) -> Self {
        Condition::from(raw.to_string())
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        match condition {
            Condition::Unconditional => UNCONDITIONAL.to_string(),
            Condition::Event(name) => name,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Unconditional => f.write_str(UNCONDITIONAL),
            Condition::Event(name) => f.write_str(name),
        }
    }
}

/// A request unit sent from a client to a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    /// Command identifier, e.g. `"do"`, `"request"`, `"start_stt_default"`.
    pub action: String,
    /// Opaque payload interpreted by the receiving ServiceManager.
    #[serde(default)]
    pub optional_data: String,
    #[serde(default)]
    pub condition: Condition,
    /// Target node; only meaningful to a controller.
    #[serde(default)]
    pub child: String,
    /// Action forwarded to the child.  Controllers fall back to `action`
    /// when this is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_action: Option<String>,
    /// Maximum time to await a terminal outcome.
    #[serde(with = "duration_ms", default = "default_goal_timeout")]
    pub timeout: Duration,
}

fn default_goal_timeout() -> Duration {
    DEFAULT_GOAL_TIMEOUT
}

impl Goal {
    /// Create an unconditional goal for `action` with no payload.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            optional_data: String::new(),
            condition: Condition::Unconditional,
            child: String::new(),
            child_action: None,
            timeout: DEFAULT_GOAL_TIMEOUT,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.optional_data = data.into();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<Condition>) -> Self {
        self.condition = condition.into();
        self
    }

    /// Address the goal to a controller's child.
    pub fn for_child(mut self, child: impl Into<String>) -> Self {
        self.child = child.into();
        self
    }

    pub fn with_child_action(mut self, action: impl Into<String>) -> Self {
        self.child_action = Some(action.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve `action` into a typed command for the service named `service`.
    ///
    /// # Errors
    ///
    /// See [`ActionCommand::parse`].
    pub fn command(&self, service: &str) -> Result<ActionCommand, ActionError> {
        ActionCommand::parse(&self.action, &self.optional_data, service)
    }
}

/// Unique identifier of one goal on one client/server pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalId(pub Uuid);

impl GoalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GoalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status, feedback and result
// ─────────────────────────────────────────────────────────────────────────────

/// Client-side status of an outstanding goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalStatus {
    /// Sent, not yet accepted by the server.
    Pending,
    /// The server is executing the goal.
    Active,
    Preempted,
    Succeeded,
    Aborted,
    /// No goal is tracked, or the target cannot be reached.
    Lost,
}

impl GoalStatus {
    /// `true` once no further feedback can arrive for the goal.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            GoalStatus::Preempted | GoalStatus::Succeeded | GoalStatus::Aborted | GoalStatus::Lost
        )
    }

    pub const fn is_active(self) -> bool {
        matches!(self, GoalStatus::Pending | GoalStatus::Active)
    }

    pub const fn label(self) -> &'static str {
        match self {
            GoalStatus::Pending => "PENDING",
            GoalStatus::Active => "ACTIVE",
            GoalStatus::Preempted => "PREEMPTED",
            GoalStatus::Succeeded => "SUCCEEDED",
            GoalStatus::Aborted => "ABORTED",
            GoalStatus::Lost => "LOST",
        }
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// In-progress update for an active goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Strictly increasing per goal, starting at 1.
    pub seq: u64,
    pub state: ServiceState,
    pub message: String,
    pub stamp: DateTime<Utc>,
}

/// The single terminal outcome of a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Whether the caller's higher-level flow should proceed.
    pub do_continue: bool,
    pub message: String,
}

impl ActionResult {
    pub fn new(do_continue: bool, message: impl Into<String>) -> Self {
        Self {
            do_continue,
            message: message.into(),
        }
    }

    /// A result that tells the caller to stop its flow.
    pub fn halt(message: impl Into<String>) -> Self {
        Self::new(false, message)
    }
}

/// Terminal status paired with the result a server reports for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub status: GoalStatus,
    pub result: ActionResult,
}

impl Completion {
    pub fn succeeded(result: ActionResult) -> Self {
        Self {
            status: GoalStatus::Succeeded,
            result,
        }
    }

    pub fn preempted(message: impl Into<String>) -> Self {
        Self {
            status: GoalStatus::Preempted,
            result: ActionResult::halt(message),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            status: GoalStatus::Aborted,
            result: ActionResult::halt(message),
        }
    }
}

impl From<ActionError> for Completion {
    fn from(err: ActionError) -> Self {
        Completion::aborted(err.to_string())
    }
}

/// One message on a goal's reply stream, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalUpdate {
    Status(GoalStatus),
    Feedback(Feedback),
    /// Always the last message for a goal.
    Result(Completion),
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type spanning goal validation, routing, connectivity and service
/// failures.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionError {
    #[error("Server '{0}' is busy with another goal")]
    Busy(String),

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Malformed goal: {0}")]
    MalformedGoal(String),

    #[error("Command '{command}' is not supported by {service}")]
    UnsupportedCommand { service: String, command: String },

    #[error("Unknown child '{0}'")]
    UnknownChild(String),

    #[error("Server '{0}' is unavailable")]
    ServerUnavailable(String),

    #[error("Service failure on {service}: {details}")]
    ServiceFailure { service: String, details: String },

    #[error("Child '{child}' timed out after {after_ms} ms")]
    Timeout { child: String, after_ms: u64 },

    #[error("Child '{0}' dropped the goal without a result")]
    ChildLost(String),

    #[error("Condition '{event}' was not observed within {after_ms} ms")]
    ConditionTimeout { event: String, after_ms: u64 },

    #[error("Illegal lifecycle transition {from} -> {to}")]
    Lifecycle { from: ServiceState, to: ServiceState },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Milliseconds, saturating at `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serde adapter that encodes a [`Duration`] as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_survives_json_transit_unchanged() {
        let goal = Goal::new("do_speaker")
            .with_data("hello.wav")
            .with_condition("face_detected")
            .for_child("speaker")
            .with_child_action("do")
            .with_timeout(Duration::from_millis(5_000));
        let json = serde_json::to_string(&goal).unwrap();
        let back: Goal = serde_json::from_str(&json).unwrap();
        assert_eq!(goal, back);
    }

    #[test]
    fn condition_uses_plain_string_encoding() {
        let json = serde_json::to_string(&Condition::Unconditional).unwrap();
        assert_eq!(json, "\"unconditional\"");
        let json = serde_json::to_string(&Condition::Event("tts_done".into())).unwrap();
        assert_eq!(json, "\"tts_done\"");
    }

    #[test]
    fn empty_condition_is_unconditional() {
        assert_eq!(Condition::from(""), Condition::Unconditional);
        assert_eq!(Condition::from("unconditional").event(), None);
        assert_eq!(Condition::from("door_open").event(), Some("door_open"));
    }

    #[test]
    fn goal_defaults_fill_missing_fields() {
        let goal: Goal = serde_json::from_str(r#"{"action":"do"}"#).unwrap();
        assert_eq!(goal.condition, Condition::Unconditional);
        assert!(goal.optional_data.is_empty());
        assert_eq!(goal.child_action, None);
        assert_eq!(goal.timeout, DEFAULT_GOAL_TIMEOUT);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!GoalStatus::Pending.is_terminal());
        assert!(!GoalStatus::Active.is_terminal());
        for status in [
            GoalStatus::Preempted,
            GoalStatus::Succeeded,
            GoalStatus::Aborted,
            GoalStatus::Lost,
        ] {
            assert!(status.is_terminal(), "{status} must be terminal");
            assert!(!status.is_active());
        }
    }

    #[test]
    fn error_converts_into_halting_completion() {
        let completion = Completion::from(ActionError::UnknownChild("arm".into()));
        assert_eq!(completion.status, GoalStatus::Aborted);
        assert!(!completion.result.do_continue);
        assert!(completion.result.message.contains("arm"));
    }

    #[test]
    fn timeout_error_display_names_child() {
        let err = ActionError::Timeout {
            child: "gesture".into(),
            after_ms: 200,
        };
        assert_eq!(err.to_string(), "Child 'gesture' timed out after 200 ms");
    }
}
