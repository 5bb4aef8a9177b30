//! [`ActionClient`] – submits goals to one named server and tracks them.
//!
//! The client keeps a background connector task that looks the target up on
//! the [`Transport`] every `reconnect_backoff`, so a server that starts late
//! or restarts is picked up without caller involvement.  While the target
//! cannot be reached, [`ActionClient::get_state`] reports
//! [`GoalStatus::Lost`].
//!
//! Each goal gets a relay task that reads its reply stream in order:
//!
//! - `Status` updates move the tracked status forward until it is terminal.
//! - `Feedback` is handed to the feedback callback; stale sequence numbers
//!   are dropped.
//! - The single `Result` is handed to the result callback, then recorded.
//!
//! A reply stream that closes without a result marks the goal `LOST`.

use std::sync::Arc;
use std::time::Duration;

use ensemble_middleware::{ServerLink, ServerRequest, Transport};
use ensemble_types::{
    ActionResult, Completion, Feedback, Goal, GoalId, GoalStatus, GoalUpdate, duration_ms,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Delay between connection attempts while the target is unreachable.
    #[serde(with = "duration_ms", default = "default_reconnect_backoff")]
    pub reconnect_backoff: Duration,
}

fn default_reconnect_backoff() -> Duration {
    Duration::from_millis(500)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: default_reconnect_backoff(),
        }
    }
}

pub type FeedbackCallback = Box<dyn FnMut(&Feedback) + Send>;
pub type ResultCallback = Box<dyn FnOnce(GoalStatus, &ActionResult) + Send>;

/// Optional per-goal callbacks.
///
/// Feedback callbacks run only while the goal is non-terminal; the result
/// callback runs at most once.
#[derive(Default)]
pub struct GoalCallbacks {
    on_feedback: Option<FeedbackCallback>,
    on_result: Option<ResultCallback>,
}

impl GoalCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_feedback(mut self, callback: impl FnMut(&Feedback) + Send + 'static) -> Self {
        self.on_feedback = Some(Box::new(callback));
        self
    }

    pub fn on_result(
        mut self,
        callback: impl FnOnce(GoalStatus, &ActionResult) + Send + 'static,
    ) -> Self {
        self.on_result = Some(Box::new(callback));
        self
    }
}

/// What [`ActionClient::send_goal`] observed before returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub goal_id: GoalId,
    pub status: GoalStatus,
    /// Present once the goal reached a terminal status with a result.
    pub result: Option<ActionResult>,
}

impl SendOutcome {
    fn lost(goal_id: GoalId) -> Self {
        Self {
            goal_id,
            status: GoalStatus::Lost,
            result: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    goal_id: Option<GoalId>,
    status: GoalStatus,
    result: Option<ActionResult>,
}

struct ClientShared {
    target: String,
    transport: Arc<dyn Transport>,
    link: RwLock<Option<ServerLink>>,
    connected: watch::Sender<bool>,
    tracked: watch::Sender<Tracked>,
}

impl ClientShared {
    /// Drop a dead link and try to establish a new one.
    fn refresh_link(&self) -> Option<ServerLink> {
        let mut link = self.link.write();
        if link.as_ref().is_some_and(ServerLink::is_closed) {
            warn!(server = %self.target, "lost connection to server");
            *link = None;
            self.connected.send_replace(false);
        }
        if link.is_none()
            && let Some(fresh) = self.transport.connect(&self.target)
        {
            info!(server = %self.target, "connected to server");
            *link = Some(fresh);
            self.connected.send_replace(true);
        }
        link.clone()
    }

    fn link_alive(&self) -> bool {
        self.link.read().as_ref().is_some_and(|l| !l.is_closed())
    }

    fn current_link(&self) -> Option<ServerLink> {
        self.link.read().clone().filter(|l| !l.is_closed())
    }

    fn set_status(&self, goal_id: GoalId, status: GoalStatus) {
        self.tracked.send_if_modified(|tracked| {
            if tracked.goal_id != Some(goal_id) || tracked.status.is_terminal() {
                return false;
            }
            tracked.status = status;
            true
        });
    }

    fn finish(&self, goal_id: GoalId, completion: Option<&Completion>) {
        self.tracked.send_if_modified(|tracked| {
            if tracked.goal_id != Some(goal_id) || tracked.status.is_terminal() {
                return false;
            }
            match completion {
                Some(completion) => {
                    tracked.status = completion.status;
                    tracked.result = Some(completion.result.clone());
                }
                None => tracked.status = GoalStatus::Lost,
            }
            true
        });
    }
}

/// Client for the server bound under one name.
///
/// Must be created within a Tokio runtime.  Dropping the client stops its
/// connector task; relay tasks for in-flight goals finish on their own.
pub struct ActionClient {
    shared: Arc<ClientShared>,
    connector: JoinHandle<()>,
}

impl ActionClient {
    pub fn new(target: impl Into<String>, transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (connected, _) = watch::channel(false);
        let (tracked, _) = watch::channel(Tracked {
            goal_id: None,
            status: GoalStatus::Lost,
            result: None,
        });
        let shared = Arc::new(ClientShared {
            target: target.into(),
            transport,
            link: RwLock::new(None),
            connected,
            tracked,
        });

        let connector = tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                loop {
                    shared.refresh_link();
                    tokio::time::sleep(config.reconnect_backoff).await;
                }
            }
        });

        Self { shared, connector }
    }

    pub fn target(&self) -> &str {
        &self.shared.target
    }

    pub fn is_connected(&self) -> bool {
        self.shared.link_alive()
    }

    /// Wait up to `timeout` for the server to become reachable.
    pub async fn wait_for_server(&self, timeout: Duration) -> bool {
        self.link_within(timeout).await.is_some()
    }

    async fn link_within(&self, timeout: Duration) -> Option<ServerLink> {
        if let Some(link) = self.shared.refresh_link() {
            return Some(link);
        }
        let mut connected = self.shared.connected.subscribe();
        match tokio::time::timeout(timeout, connected.wait_for(|up| *up)).await {
            Ok(Ok(_)) => self.shared.current_link(),
            _ => None,
        }
    }

    /// Submit `goal`, replacing any goal this client was tracking.
    ///
    /// With `wait = false` the call returns once the goal is sent, reporting
    /// `PENDING`.  With `wait = true` it blocks until the goal is terminal
    /// or `goal.timeout` elapses, whichever comes first; an elapsed deadline
    /// reports `LOST` and leaves the goal running on the server.
    ///
    /// An unreachable target reports `LOST` without sending anything.
    pub async fn send_goal(&self, goal: Goal, callbacks: GoalCallbacks, wait: bool) -> SendOutcome {
        let goal_id = GoalId::new();
        let deadline = goal.timeout;
        let started = Instant::now();

        let link = if wait {
            self.link_within(deadline).await
        } else {
            self.shared.refresh_link()
        };
        let Some(link) = link else {
            warn!(server = %self.shared.target, %goal_id, "server unreachable; goal not sent");
            return SendOutcome::lost(goal_id);
        };

        self.shared.tracked.send_replace(Tracked {
            goal_id: Some(goal_id),
            status: GoalStatus::Pending,
            result: None,
        });

        let (replies, updates) = mpsc::unbounded_channel();
        debug!(server = %self.shared.target, %goal_id, action = %goal.action, "sending goal");
        if let Err(e) = link.send(ServerRequest::SendGoal {
            goal_id,
            goal,
            replies,
        }) {
            warn!(server = %self.shared.target, %goal_id, error = %e, "goal could not be sent");
            self.shared.finish(goal_id, None);
            return SendOutcome::lost(goal_id);
        }
        tokio::spawn(relay(Arc::clone(&self.shared), goal_id, updates, callbacks));

        if !wait {
            return SendOutcome {
                goal_id,
                status: GoalStatus::Pending,
                result: None,
            };
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        let mut tracked = self.shared.tracked.subscribe();
        let observed = match tokio::time::timeout(
            remaining,
            tracked.wait_for(|t| t.goal_id != Some(goal_id) || t.status.is_terminal()),
        )
        .await
        {
            Ok(Ok(t)) => Some(t.clone()),
            _ => None,
        };

        match observed {
            Some(t) if t.goal_id == Some(goal_id) => SendOutcome {
                goal_id,
                status: t.status,
                result: t.result,
            },
            Some(_) => {
                debug!(server = %self.shared.target, %goal_id, "goal superseded while waiting");
                SendOutcome::lost(goal_id)
            }
            None => {
                debug!(server = %self.shared.target, %goal_id, "wait deadline elapsed");
                SendOutcome::lost(goal_id)
            }
        }
    }

    /// Status of the most recently sent goal; never blocks.
    ///
    /// `LOST` when no goal has been sent or the target is unreachable.
    pub fn get_state(&self) -> GoalStatus {
        if !self.shared.link_alive() {
            return GoalStatus::Lost;
        }
        let tracked = self.shared.tracked.borrow();
        match tracked.goal_id {
            Some(_) => tracked.status,
            None => GoalStatus::Lost,
        }
    }

    /// Id of the most recently sent goal.
    pub fn current_goal(&self) -> Option<GoalId> {
        self.shared.tracked.borrow().goal_id
    }

    /// Result of the most recently sent goal, once it has one.
    pub fn get_result(&self) -> Option<ActionResult> {
        self.shared.tracked.borrow().result.clone()
    }

    /// Ask the server to preempt whatever it is executing.  Best effort.
    pub fn cancel_all_goals(&self) {
        self.send_cancel(None);
    }

    /// Ask the server to preempt `goal_id` if it is still executing.
    pub fn cancel_goal(&self, goal_id: GoalId) {
        self.send_cancel(Some(goal_id));
    }

    fn send_cancel(&self, goal_id: Option<GoalId>) {
        match self.shared.current_link() {
            Some(link) => match link.send(ServerRequest::Cancel { goal_id }) {
                Ok(()) => info!(server = %self.shared.target, ?goal_id, "cancel sent"),
                Err(e) => warn!(server = %self.shared.target, error = %e, "cancel not delivered"),
            },
            None => warn!(server = %self.shared.target, "cancel skipped; server unreachable"),
        }
    }
}

impl Drop for ActionClient {
    fn drop(&mut self) {
        self.connector.abort();
    }
}

async fn relay(
    shared: Arc<ClientShared>,
    goal_id: GoalId,
    mut updates: mpsc::UnboundedReceiver<GoalUpdate>,
    mut callbacks: GoalCallbacks,
) {
    let mut last_seq = 0;
    while let Some(update) = updates.recv().await {
        match update {
            GoalUpdate::Status(status) => shared.set_status(goal_id, status),
            GoalUpdate::Feedback(feedback) => {
                if feedback.seq <= last_seq {
                    warn!(server = %shared.target, %goal_id, seq = feedback.seq, "stale feedback dropped");
                    continue;
                }
                last_seq = feedback.seq;
                if let Some(on_feedback) = callbacks.on_feedback.as_mut() {
                    on_feedback(&feedback);
                }
            }
            GoalUpdate::Result(completion) => {
                if let Some(on_result) = callbacks.on_result.take() {
                    on_result(completion.status, &completion.result);
                }
                shared.finish(goal_id, Some(&completion));
                return;
            }
        }
    }
    warn!(server = %shared.target, %goal_id, "reply stream closed without a result");
    shared.finish(goal_id, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ActionServer, ExecutionContext, GoalHandler, ServerConfig};
    use async_trait::async_trait;
    use ensemble_middleware::LocalTransport;
    use ensemble_types::ServiceState;
    use parking_lot::Mutex;

    /// Reports `ticks` feedback messages, then echoes the payload.
    struct Echo {
        ticks: u64,
    }

    #[async_trait]
    impl GoalHandler for Echo {
        async fn execute(&mut self, goal: Goal, ctx: &ExecutionContext) -> Completion {
            for tick in 0..self.ticks {
                ctx.publish_feedback(ServiceState::Start, format!("tick {tick}"));
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                    _ = ctx.preempted() => return Completion::preempted("cancelled"),
                }
            }
            Completion::succeeded(ActionResult::new(true, goal.optional_data))
        }
    }

    fn fast() -> ClientConfig {
        ClientConfig {
            reconnect_backoff: Duration::from_millis(10),
        }
    }

    fn serve(transport: &LocalTransport, name: &str, ticks: u64) -> (ActionServer, JoinHandle<()>) {
        let server = ActionServer::spawn(name, Echo { ticks }, ServerConfig::default());
        let intake = server.serve(transport).unwrap();
        (server, intake)
    }

    #[tokio::test]
    async fn waited_goal_returns_result_and_runs_callbacks_in_order() {
        let transport = LocalTransport::new();
        let _server = serve(&transport, "echo", 3);
        let client = ActionClient::new("echo", Arc::new(transport.clone()), fast());

        let events = Arc::new(Mutex::new(Vec::new()));
        let callbacks = GoalCallbacks::new()
            .on_feedback({
                let events = Arc::clone(&events);
                move |fb| events.lock().push(format!("feedback {}", fb.seq))
            })
            .on_result({
                let events = Arc::clone(&events);
                move |status, result| events.lock().push(format!("{status} {}", result.message))
            });

        let outcome = client
            .send_goal(Goal::new("do").with_data("hi"), callbacks, true)
            .await;

        assert_eq!(outcome.status, GoalStatus::Succeeded);
        assert_eq!(outcome.result, Some(ActionResult::new(true, "hi")));
        assert_eq!(
            *events.lock(),
            vec!["feedback 1", "feedback 2", "feedback 3", "SUCCEEDED hi"]
        );
        assert_eq!(client.get_result(), Some(ActionResult::new(true, "hi")));
    }

    #[tokio::test]
    async fn unreachable_target_is_lost() {
        let transport = LocalTransport::new();
        let client = ActionClient::new("nobody", Arc::new(transport), fast());

        assert_eq!(client.get_state(), GoalStatus::Lost);
        let outcome = client
            .send_goal(Goal::new("do"), GoalCallbacks::new(), false)
            .await;
        assert_eq!(outcome.status, GoalStatus::Lost);

        let waited = client
            .send_goal(
                Goal::new("do").with_timeout(Duration::from_millis(50)),
                GoalCallbacks::new(),
                true,
            )
            .await;
        assert_eq!(waited.status, GoalStatus::Lost);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn fire_and_forget_goal_is_pending_then_tracked() {
        let transport = LocalTransport::new();
        let _server = serve(&transport, "echo", 2);
        let client = ActionClient::new("echo", Arc::new(transport.clone()), fast());
        assert!(client.wait_for_server(Duration::from_millis(100)).await);

        let outcome = client
            .send_goal(Goal::new("do"), GoalCallbacks::new(), false)
            .await;
        assert_eq!(outcome.status, GoalStatus::Pending);

        let mut status = client.get_state();
        for _ in 0..50 {
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = client.get_state();
        }
        assert_eq!(status, GoalStatus::Succeeded);
        assert_eq!(client.get_state(), client.get_state());
    }

    #[tokio::test]
    async fn deadline_elapsing_reports_lost() {
        let transport = LocalTransport::new();
        let _server = serve(&transport, "echo", 1_000);
        let client = ActionClient::new("echo", Arc::new(transport.clone()), fast());

        let outcome = client
            .send_goal(
                Goal::new("do").with_timeout(Duration::from_millis(60)),
                GoalCallbacks::new(),
                true,
            )
            .await;
        assert_eq!(outcome.status, GoalStatus::Lost);
        assert_eq!(outcome.result, None);
    }

    #[tokio::test]
    async fn cancel_all_goals_preempts_server() {
        let transport = LocalTransport::new();
        let (server, _intake) = serve(&transport, "echo", 1_000);
        let client = ActionClient::new("echo", Arc::new(transport.clone()), fast());

        client
            .send_goal(Goal::new("do"), GoalCallbacks::new(), false)
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        client.cancel_all_goals();

        assert!(server.wait_idle(Duration::from_millis(200)).await);
        assert_eq!(server.last_outcome(), Some(GoalStatus::Preempted));
    }

    #[tokio::test]
    async fn late_server_is_picked_up_by_backoff() {
        let transport = LocalTransport::new();
        let client = ActionClient::new("late", Arc::new(transport.clone()), fast());
        assert!(!client.wait_for_server(Duration::from_millis(20)).await);

        let _server = serve(&transport, "late", 0);
        assert!(client.wait_for_server(Duration::from_millis(200)).await);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn server_going_away_marks_client_lost() {
        let transport = LocalTransport::new();
        let (server, intake) = serve(&transport, "echo", 0);
        let client = ActionClient::new("echo", Arc::new(transport.clone()), fast());

        let outcome = client
            .send_goal(Goal::new("do"), GoalCallbacks::new(), true)
            .await;
        assert_eq!(outcome.status, GoalStatus::Succeeded);
        assert_eq!(client.get_state(), GoalStatus::Succeeded);

        intake.abort();
        let _ = intake.await;
        drop(server);
        assert_eq!(client.get_state(), GoalStatus::Lost);
    }
}
