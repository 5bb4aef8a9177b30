//! [`Controller`] – a node that serves goals upward and forwards each one
//! to a named child.
//!
//! ```text
//!            Goal{condition, child, action, data}
//!                        │
//!              ┌─────────▼─────────┐
//!              │ gate on condition │  EventBoard::wait_for (bounded)
//!              └─────────┬─────────┘
//!              ┌─────────▼─────────┐
//!              │  route by child   │  unknown child → ABORTED
//!              └─────────┬─────────┘
//!              ┌─────────▼─────────┐
//!              │ relay with timeout│  ActionClient::send_goal(wait = true)
//!              └─────────┬─────────┘
//!                        ▼
//!        child Result passed through, or Timeout + cancel of the child goal
//! ```
//!
//! A child may be bound under an endpoint name that differs from its child
//! name.  Its server checks `verb_<service>` suffixes against the endpoint,
//! so the controller strips a `_<child>` suffix before forwarding.
//!
//! The children map is fixed at construction.  A controller is itself a
//! [`GoalHandler`], so it is hosted by an ordinary
//! [`ActionServer`][ensemble_action::ActionServer] and can be the child of
//! another controller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ensemble_action::{
    ActionClient, ClientConfig, ExecutionContext, GoalCallbacks, GoalHandler,
};
use ensemble_middleware::{EventBoard, Transport};
use ensemble_types::{ActionError, Completion, Goal, GoalStatus, duration_ms, millis};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// ControllerConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Per-controller settings.
///
/// Durations are written in milliseconds in config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Deadline for a child's terminal result.
    #[serde(with = "duration_ms", default = "default_timeout")]
    pub timeout_for_result: Duration,
    /// How long start-up waits for each child endpoint.
    #[serde(with = "duration_ms", default = "default_timeout")]
    pub timeout_for_server: Duration,
    /// Bound on the condition gate; zero waits forever.
    #[serde(with = "duration_ms", default = "default_condition_timeout")]
    pub condition_timeout: Duration,
    /// Child name → endpoint name of the server it addresses.
    #[serde(default)]
    pub children: BTreeMap<String, String>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_condition_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timeout_for_result: default_timeout(),
            timeout_for_server: default_timeout(),
            condition_timeout: default_condition_timeout(),
            children: BTreeMap::new(),
        }
    }
}

impl ControllerConfig {
    /// Add a child addressed by its own name.
    pub fn with_child(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.with_child_at(name.clone(), name)
    }

    /// Add a child whose server is bound under `endpoint`.
    pub fn with_child_at(mut self, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.children.insert(name.into(), endpoint.into());
        self
    }

    pub fn with_timeout_for_result(mut self, timeout: Duration) -> Self {
        self.timeout_for_result = timeout;
        self
    }

    pub fn with_condition_timeout(mut self, timeout: Duration) -> Self {
        self.condition_timeout = timeout;
        self
    }

    /// The gate bound, `None` meaning unbounded.
    pub fn condition_limit(&self) -> Option<Duration> {
        (!self.condition_timeout.is_zero()).then_some(self.condition_timeout)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

pub struct Controller {
    name: String,
    config: ControllerConfig,
    events: EventBoard,
    children: HashMap<String, ActionClient>,
}

impl Controller {
    /// Build a controller with one [`ActionClient`] per configured child.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        name: impl Into<String>,
        config: ControllerConfig,
        transport: Arc<dyn Transport>,
        events: EventBoard,
        client: ClientConfig,
    ) -> Self {
        let name = name.into();
        let children = config
            .children
            .iter()
            .map(|(child, endpoint)| {
                let client = ActionClient::new(endpoint.clone(), Arc::clone(&transport), client.clone());
                (child.clone(), client)
            })
            .collect();
        info!(controller = %name, children = config.children.len(), "controller created");
        Self {
            name,
            config,
            events,
            children,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Child names, sorted.
    pub fn children(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.children.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Latest goal status observed on `child`'s client.
    pub fn child_state(&self, child: &str) -> Option<GoalStatus> {
        self.children.get(child).map(ActionClient::get_state)
    }

    /// Wait up to `timeout_for_server` for every child endpoint.
    ///
    /// Returns the children that stayed unreachable.  Unreachable children
    /// are not fatal: their clients keep retrying in the background.
    pub async fn wait_for_children(&self) -> Vec<String> {
        let timeout = self.config.timeout_for_server;
        let checks = self.children.iter().map(|(child, client)| async move {
            (child.clone(), client.wait_for_server(timeout).await)
        });

        let mut missing: Vec<String> = join_all(checks)
            .await
            .into_iter()
            .filter_map(|(child, up)| (!up).then_some(child))
            .collect();
        missing.sort();
        for child in &missing {
            warn!(controller = %self.name, %child, "child server not available");
        }
        missing
    }

    fn forwarded(&self, goal: &Goal) -> Goal {
        let action = goal.child_action.as_deref().unwrap_or(&goal.action);
        let action = match self.config.children.get(&goal.child) {
            Some(endpoint) if endpoint != &goal.child => readdressed(action, &goal.child),
            _ => action,
        };
        Goal::new(action)
            .with_data(goal.optional_data.clone())
            .with_timeout(self.config.timeout_for_result)
    }
}

/// `verb_<child>` becomes `verb`; anything else is left alone.
fn readdressed<'a>(action: &'a str, child: &str) -> &'a str {
    match action.strip_suffix(child).and_then(|rest| rest.strip_suffix('_')) {
        Some(verb) if !verb.is_empty() => verb,
        _ => action,
    }
}

#[async_trait]
impl GoalHandler for Controller {
    async fn execute(&mut self, goal: Goal, ctx: &ExecutionContext) -> Completion {
        if let Some(event) = goal.condition.event() {
            info!(controller = %self.name, goal_id = %ctx.goal_id(), event, "waiting for condition");
            tokio::select! {
                biased;
                _ = ctx.preempted() => {
                    info!(controller = %self.name, event, "preempted while gated");
                    return Completion::preempted(format!("{} preempted before dispatch", self.name));
                }
                gate = self.events.wait_for(event, self.config.condition_limit()) => {
                    if let Err(e) = gate {
                        warn!(controller = %self.name, event, error = %e, "condition not observed");
                        return e.into();
                    }
                }
            }
            debug!(controller = %self.name, event, "condition observed");
        }

        let Some(client) = self.children.get(&goal.child) else {
            error!(controller = %self.name, child = %goal.child, "goal names an unknown child");
            return ActionError::UnknownChild(goal.child).into();
        };

        let child_goal = self.forwarded(&goal);
        info!(
            controller = %self.name,
            child = %goal.child,
            action = %child_goal.action,
            "forwarding goal"
        );

        let feedback = ctx.feedback();
        let callbacks = GoalCallbacks::new()
            .on_feedback(move |fb| feedback.publish(fb.state, fb.message.clone()));

        let dispatched = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = ctx.preempted() => {
                info!(controller = %self.name, child = %goal.child, "preempted; cancelling child");
                if let Some(goal_id) = client.current_goal() {
                    client.cancel_goal(goal_id);
                }
                return Completion::preempted(format!("{} preempted", self.name));
            }
            outcome = client.send_goal(child_goal, callbacks, true) => outcome,
        };

        match outcome.result {
            Some(result) if outcome.status.is_terminal() => {
                debug!(controller = %self.name, child = %goal.child, status = %outcome.status, "child finished");
                Completion {
                    status: outcome.status,
                    result,
                }
            }
            _ if dispatched.elapsed() < self.config.timeout_for_result => {
                warn!(controller = %self.name, child = %goal.child, status = %outcome.status, "child lost the goal");
                client.cancel_goal(outcome.goal_id);
                ActionError::ChildLost(goal.child).into()
            }
            _ => {
                let after_ms = millis(self.config.timeout_for_result);
                warn!(controller = %self.name, child = %goal.child, after_ms, "child timed out; cancelling");
                client.cancel_goal(outcome.goal_id);
                ActionError::Timeout {
                    child: goal.child,
                    after_ms,
                }
                .into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_documented_values() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.timeout_for_result, Duration::from_secs(10));
        assert_eq!(cfg.timeout_for_server, Duration::from_secs(10));
        assert_eq!(cfg.condition_limit(), Some(Duration::from_secs(30)));
        assert!(cfg.children.is_empty());
    }

    #[test]
    fn zero_condition_timeout_waits_forever() {
        let cfg = ControllerConfig::default().with_condition_timeout(Duration::ZERO);
        assert_eq!(cfg.condition_limit(), None);
    }

    #[test]
    fn config_reads_milliseconds_and_children() {
        let cfg: ControllerConfig = serde_json::from_str(
            r#"{"timeout_for_result": 200, "children": {"speaker": "robot/speaker"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.timeout_for_result, Duration::from_millis(200));
        assert_eq!(cfg.timeout_for_server, Duration::from_secs(10));
        assert_eq!(cfg.children.get("speaker").map(String::as_str), Some("robot/speaker"));
    }

    #[tokio::test]
    async fn forwarded_goal_uses_child_action_and_controller_deadline() {
        let transport: Arc<dyn Transport> = Arc::new(ensemble_middleware::LocalTransport::new());
        let controller = Controller::new(
            "greeter",
            ControllerConfig::default()
                .with_child("speaker")
                .with_timeout_for_result(Duration::from_millis(750)),
            transport,
            EventBoard::new(),
            ClientConfig::default(),
        );

        let upward = Goal::new("greet")
            .with_data("hello.wav")
            .with_condition("face_seen")
            .for_child("speaker")
            .with_child_action("do_speaker");
        let forwarded = controller.forwarded(&upward);

        assert_eq!(forwarded.action, "do_speaker");
        assert_eq!(forwarded.optional_data, "hello.wav");
        assert!(forwarded.condition.event().is_none());
        assert_eq!(forwarded.timeout, Duration::from_millis(750));

        let passthrough = controller.forwarded(&Goal::new("do_speaker").for_child("speaker"));
        assert_eq!(passthrough.action, "do_speaker");
        assert_eq!(controller.children(), vec!["speaker"]);
    }

    #[tokio::test]
    async fn child_suffix_is_dropped_for_renamed_endpoint() {
        let transport: Arc<dyn Transport> = Arc::new(ensemble_middleware::LocalTransport::new());
        let controller = Controller::new(
            "listener",
            ControllerConfig::default()
                .with_child_at("speaker", "robot/speaker")
                .with_child_at("stt_default", "stt"),
            transport,
            EventBoard::new(),
            ClientConfig::default(),
        );

        let forward = |action: &str, child: &str| controller.forwarded(&Goal::new(action).for_child(child)).action;
        assert_eq!(forward("do_speaker", "speaker"), "do");
        assert_eq!(forward("do", "speaker"), "do");
        assert_eq!(forward("stop_stt_default", "stt_default"), "stop");
        assert_eq!(forward("do_gesture", "speaker"), "do_gesture");
        assert_eq!(readdressed("_speaker", "speaker"), "_speaker");
    }
}
