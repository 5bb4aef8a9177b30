//! [`ActionServer`] – per-node goal endpoint.
//!
//! ```text
//!          submit                      handler returns
//!   IDLE ──────────► EXECUTING ──────────────────────► SUCCEEDED | PREEMPTED | FAILED ──► IDLE
//! ```
//!
//! The server owns a single executor task.  [`ActionServer::submit`] hands a
//! goal to that task and returns at once; the goal's [`GoalUpdate`]s
//! (`Status(ACTIVE)`, `Feedback*`, `Result`) arrive on the returned
//! [`GoalExecution`] in emission order.
//!
//! # Busy handling
//!
//! A direct `submit` while a goal is executing fails with
//! [`ActionError::Busy`].  Goals arriving through [`ActionServer::serve`]
//! instead preempt the running goal, wait up to
//! [`ServerConfig::preempt_grace`] for it to drain, then start.  Remote
//! goals are admitted one at a time in arrival order; a cancel naming a goal
//! that is still waiting for admission withdraws it, and it ends
//! `PREEMPTED` without running.
//!
//! # Preemption
//!
//! [`ActionServer::preempt`] raises a per-goal flag that the handler
//! observes through [`ExecutionContext::preempted`].  Preemption is
//! cooperative: a handler stops at its next poll tick, and the goal ends
//! `PREEMPTED` with `do_continue = false`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ensemble_middleware::{ServerRequest, Transport};
use ensemble_types::{
    ActionError, Completion, Feedback, Goal, GoalId, GoalStatus, GoalUpdate, ServiceState,
    duration_ms,
};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interval at which handlers poll their completion signal.  Raised to
    /// 1 ms when zero.
    #[serde(with = "duration_ms", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// How long an incoming goal waits for a preempted goal to drain.
    #[serde(with = "duration_ms", default = "default_preempt_grace")]
    pub preempt_grace: Duration,
}

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_preempt_grace() -> Duration {
    Duration::from_secs(1)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            preempt_grace: default_preempt_grace(),
        }
    }
}

/// Observable state of a server.
///
/// The terminal variants are held only while the result is being published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Executing,
    Succeeded,
    Preempted,
    Failed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler seam
// ─────────────────────────────────────────────────────────────────────────────

/// The work a server performs for each accepted goal.
#[async_trait]
pub trait GoalHandler: Send + 'static {
    /// Run `goal` to a terminal outcome.
    ///
    /// Implementations must return promptly once
    /// [`ExecutionContext::preempted`] resolves.
    async fn execute(&mut self, goal: Goal, ctx: &ExecutionContext) -> Completion;
}

/// Per-goal handle given to a [`GoalHandler`].
pub struct ExecutionContext {
    goal_id: GoalId,
    server: String,
    poll_interval: Duration,
    preempt: watch::Receiver<bool>,
    feedback: FeedbackPublisher,
}

impl ExecutionContext {
    pub fn goal_id(&self) -> GoalId {
        self.goal_id
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_preempt_requested(&self) -> bool {
        *self.preempt.borrow()
    }

    /// Resolves once preemption of this goal has been requested.
    pub async fn preempted(&self) {
        let mut preempt = self.preempt.clone();
        // A closed channel means the server is gone; treat it as preemption.
        let _ = preempt.wait_for(|requested| *requested).await;
    }

    pub fn publish_feedback(&self, state: ServiceState, message: impl Into<String>) {
        self.feedback.publish(state, message);
    }

    /// A cloneable publisher for forwarding feedback from other tasks.
    pub fn feedback(&self) -> FeedbackPublisher {
        self.feedback.clone()
    }
}

/// Emits numbered feedback for one goal.
///
/// Once the goal's result has been published, further feedback is dropped,
/// so no feedback can ever trail the result.
#[derive(Clone, Debug)]
pub struct FeedbackPublisher {
    sink: Arc<ReplySink>,
}

impl FeedbackPublisher {
    pub fn publish(&self, state: ServiceState, message: impl Into<String>) {
        self.sink.feedback(state, message.into());
    }
}

#[derive(Debug)]
struct ReplySink {
    inner: Mutex<SinkState>,
}

#[derive(Debug)]
struct SinkState {
    seq: u64,
    replies: Option<mpsc::UnboundedSender<GoalUpdate>>,
}

impl ReplySink {
    fn new(replies: mpsc::UnboundedSender<GoalUpdate>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SinkState {
                seq: 0,
                replies: Some(replies),
            }),
        })
    }

    fn status(&self, status: GoalStatus) {
        if let Some(replies) = &self.inner.lock().replies {
            let _ = replies.send(GoalUpdate::Status(status));
        }
    }

    fn feedback(&self, state: ServiceState, message: String) {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let feedback = Feedback {
            seq: inner.seq,
            state,
            message,
            stamp: Utc::now(),
        };
        if let Some(replies) = &inner.replies {
            let _ = replies.send(GoalUpdate::Feedback(feedback));
        }
    }

    /// Publish the terminal result and close the stream.
    fn finish(&self, completion: Completion) {
        if let Some(replies) = self.inner.lock().replies.take() {
            let _ = replies.send(GoalUpdate::Result(completion));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Goal execution stream
// ─────────────────────────────────────────────────────────────────────────────

/// Updates for one goal submitted with [`ActionServer::submit`].
#[derive(Debug)]
pub struct GoalExecution {
    pub id: GoalId,
    updates: mpsc::UnboundedReceiver<GoalUpdate>,
}

impl GoalExecution {
    /// The next update, or `None` after the result has been delivered.
    pub async fn next(&mut self) -> Option<GoalUpdate> {
        self.updates.recv().await
    }

    /// Drain the stream and return the terminal outcome.
    pub async fn completion(mut self) -> Completion {
        while let Some(update) = self.updates.recv().await {
            if let GoalUpdate::Result(completion) = update {
                return completion;
            }
        }
        Completion::aborted("server dropped the goal without a result")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionServer
// ─────────────────────────────────────────────────────────────────────────────

struct Job {
    goal_id: GoalId,
    goal: Goal,
    sink: Arc<ReplySink>,
    preempt: watch::Receiver<bool>,
}

struct ActiveGoal {
    id: GoalId,
    preempt: watch::Sender<bool>,
}

/// A remote goal waiting for the server to take it.
struct Admission {
    goal_id: GoalId,
    goal: Goal,
    replies: mpsc::UnboundedSender<GoalUpdate>,
    withdrawn: watch::Receiver<bool>,
}

struct Shared {
    name: String,
    config: ServerConfig,
    state: watch::Sender<ServerState>,
    current: Mutex<Option<ActiveGoal>>,
    /// Remote goals not yet admitted, with their withdrawal flags.
    /// Locked before `current` when both are needed.
    queued: Mutex<HashMap<GoalId, watch::Sender<bool>>>,
    last_outcome: Mutex<Option<GoalStatus>>,
}

/// Cheaply cloneable handle to a running server.
///
/// The executor task stops once every handle has been dropped.
#[derive(Clone)]
pub struct ActionServer {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl ActionServer {
    /// Start a server named `name` that runs goals through `handler`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(name: impl Into<String>, handler: impl GoalHandler, config: ServerConfig) -> Self {
        let (state, _) = watch::channel(ServerState::Idle);
        let shared = Arc::new(Shared {
            name: name.into(),
            config,
            state,
            current: Mutex::new(None),
            queued: Mutex::new(HashMap::new()),
            last_outcome: Mutex::new(None),
        });
        let (jobs, job_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_executor(Arc::clone(&shared), Box::new(handler), job_rx));
        info!(server = %shared.name, "action server started");
        Self { shared, jobs }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ServerState {
        *self.shared.state.borrow()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == ServerState::Idle
    }

    /// Terminal status of the most recently finished goal.
    pub fn last_outcome(&self) -> Option<GoalStatus> {
        *self.shared.last_outcome.lock()
    }

    /// Start `goal` if the server is idle.
    ///
    /// # Errors
    ///
    /// - [`ActionError::Busy`] – a goal is already executing.
    /// - [`ActionError::ServerUnavailable`] – the executor has stopped.
    pub fn submit(&self, goal: Goal) -> Result<GoalExecution, ActionError> {
        let id = GoalId::new();
        let (replies, updates) = mpsc::unbounded_channel();
        self.submit_with(id, goal, replies)?;
        Ok(GoalExecution { id, updates })
    }

    /// Start `goal` under `goal_id`, streaming its updates into `replies`.
    ///
    /// # Errors
    ///
    /// Same as [`ActionServer::submit`].
    pub fn submit_with(
        &self,
        goal_id: GoalId,
        goal: Goal,
        replies: mpsc::UnboundedSender<GoalUpdate>,
    ) -> Result<(), ActionError> {
        let mut current = self.shared.current.lock();
        if current.is_some() || !self.is_idle() {
            return Err(ActionError::Busy(self.shared.name.clone()));
        }

        let (preempt_tx, preempt_rx) = watch::channel(false);
        let job = Job {
            goal_id,
            goal,
            sink: ReplySink::new(replies),
            preempt: preempt_rx,
        };
        *current = Some(ActiveGoal {
            id: goal_id,
            preempt: preempt_tx,
        });
        self.shared.state.send_replace(ServerState::Executing);

        if self.jobs.send(job).is_err() {
            *current = None;
            self.shared.state.send_replace(ServerState::Idle);
            return Err(ActionError::ServerUnavailable(self.shared.name.clone()));
        }
        Ok(())
    }

    /// Request preemption of the executing goal.  No effect while idle.
    pub fn preempt(&self) {
        if let Some(active) = self.shared.current.lock().as_ref() {
            info!(server = %self.shared.name, goal_id = %active.id, "preemption requested");
            active.preempt.send_replace(true);
        }
    }

    /// Preempt `goal_id` if it is the executing goal, or withdraw it if it
    /// is still waiting for admission.  `None` preempts whatever is
    /// executing and withdraws every waiting goal.
    pub fn cancel(&self, goal_id: Option<GoalId>) {
        let queued = self.shared.queued.lock();
        let withdrawn = match goal_id {
            None => {
                queued.values().for_each(|flag| {
                    flag.send_replace(true);
                });
                !queued.is_empty()
            }
            Some(id) => queued.get(&id).map(|flag| flag.send_replace(true)).is_some(),
        };

        let current = self.shared.current.lock();
        match (current.as_ref(), goal_id) {
            (Some(active), None) => {
                info!(server = %self.shared.name, goal_id = %active.id, "preemption requested");
                active.preempt.send_replace(true);
            }
            (Some(active), Some(id)) if active.id == id => {
                info!(server = %self.shared.name, goal_id = %active.id, "preemption requested");
                active.preempt.send_replace(true);
            }
            _ if withdrawn => {
                debug!(server = %self.shared.name, ?goal_id, "waiting goal withdrawn");
            }
            _ => debug!(server = %self.shared.name, ?goal_id, "cancel ignored; goal not executing"),
        }
    }

    /// Wait until the server is idle.  Returns `false` if `timeout` elapses
    /// first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.subscribe();
        matches!(
            tokio::time::timeout(timeout, state.wait_for(|s| *s == ServerState::Idle)).await,
            Ok(Ok(_))
        )
    }

    /// Bind this server's name on `transport` and accept goals from remote
    /// clients until the endpoint is dropped.
    ///
    /// Cancels are handled as they arrive; goals go to a separate admission
    /// task, so a cancel never waits behind a draining goal.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] if the name is already bound.
    pub fn serve(&self, transport: &dyn Transport) -> Result<JoinHandle<()>, ActionError> {
        let mut inbox = transport.bind(&self.shared.name)?;
        let (admit_tx, mut admit_rx) = mpsc::unbounded_channel::<Admission>();

        let admitter = self.clone();
        tokio::spawn(async move {
            while let Some(admission) = admit_rx.recv().await {
                admitter.admit(admission).await;
            }
        });

        let server = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(request) = inbox.recv().await {
                match request {
                    ServerRequest::SendGoal {
                        goal_id,
                        goal,
                        replies,
                    } => {
                        let (flag, withdrawn) = watch::channel(false);
                        server.shared.queued.lock().insert(goal_id, flag);
                        let admission = Admission {
                            goal_id,
                            goal,
                            replies,
                            withdrawn,
                        };
                        if admit_tx.send(admission).is_err() {
                            server.shared.queued.lock().remove(&goal_id);
                        }
                    }
                    ServerRequest::Cancel { goal_id } => server.cancel(goal_id),
                }
            }
            debug!(server = %server.shared.name, "endpoint closed");
        }))
    }

    async fn admit(&self, admission: Admission) {
        let Admission {
            goal_id,
            goal,
            replies,
            mut withdrawn,
        } = admission;

        if !self.is_idle() && !*withdrawn.borrow() {
            info!(server = %self.shared.name, %goal_id, "new goal preempts the executing goal");
            self.preempt();
            let drained = tokio::select! {
                biased;
                _ = withdrawn.wait_for(|w| *w) => true,
                idle = self.wait_idle(self.shared.config.preempt_grace) => idle,
            };
            if !drained {
                self.shared.queued.lock().remove(&goal_id);
                warn!(server = %self.shared.name, %goal_id, "executing goal did not drain; rejecting");
                let busy = ActionError::Busy(self.shared.name.clone());
                let _ = replies.send(GoalUpdate::Result(busy.into()));
                return;
            }
        }

        let mut queued = self.shared.queued.lock();
        let cancelled = queued.remove(&goal_id).is_some_and(|flag| *flag.borrow());
        if cancelled {
            drop(queued);
            info!(server = %self.shared.name, %goal_id, "goal cancelled before it started");
            let reply =
                Completion::preempted(format!("{} goal cancelled before it started", self.shared.name));
            let _ = replies.send(GoalUpdate::Result(reply));
            return;
        }
        let submitted = self.submit_with(goal_id, goal, replies.clone());
        drop(queued);
        if let Err(e) = submitted {
            warn!(server = %self.shared.name, %goal_id, error = %e, "goal rejected");
            let _ = replies.send(GoalUpdate::Result(e.into()));
        }
    }
}

async fn run_executor(
    shared: Arc<Shared>,
    mut handler: Box<dyn GoalHandler>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = jobs.recv().await {
        let Job {
            goal_id,
            goal,
            sink,
            preempt,
        } = job;
        info!(server = %shared.name, %goal_id, action = %goal.action, "goal accepted");
        sink.status(GoalStatus::Active);

        let ctx = ExecutionContext {
            goal_id,
            server: shared.name.clone(),
            poll_interval: shared.config.poll_interval.max(MIN_POLL_INTERVAL),
            preempt,
            feedback: FeedbackPublisher {
                sink: Arc::clone(&sink),
            },
        };

        let completion = match AssertUnwindSafe(handler.execute(goal, &ctx))
            .catch_unwind()
            .await
        {
            Ok(completion) => completion,
            Err(_) => {
                error!(server = %shared.name, %goal_id, "goal handler panicked");
                Completion::aborted(format!("{} failed unexpectedly", shared.name))
            }
        };

        let terminal = match completion.status {
            GoalStatus::Succeeded => ServerState::Succeeded,
            GoalStatus::Preempted => ServerState::Preempted,
            _ => ServerState::Failed,
        };
        shared.state.send_replace(terminal);
        *shared.last_outcome.lock() = Some(completion.status);
        info!(
            server = %shared.name,
            %goal_id,
            status = %completion.status,
            do_continue = completion.result.do_continue,
            "goal finished"
        );
        sink.finish(completion);

        shared.current.lock().take();
        shared.state.send_replace(ServerState::Idle);
    }
    debug!(server = %shared.name, "executor stopped");
}
