//! [`ServiceHost`] – runs goals against the ServiceManager a node hosts.
//!
//! # Dispatch table
//!
//! | Command | Hardware | Web | Internal |
//! |---|---|---|---|
//! | `do` | `do_action(data)` | – | – |
//! | `request` | – | `request(data)` | – |
//! | `start` | – | – | `start(rate)` |
//! | `pause` | – | – | `pause()` |
//! | `stop` | – | – | `stop()` |
//!
//! Any other pairing aborts with [`ActionError::UnsupportedCommand`].
//!
//! After dispatch the host polls the variant's completion signal once per
//! poll interval, racing every tick against preemption.  An internal goal
//! completes when `status()` reaches the state its command aims for:
//!
//! | Command | Done when status is |
//! |---|---|
//! | `start` | `START` or `SUCCESS` |
//! | `pause` | `PAUSE` or `SUCCESS` |
//! | `stop` | `SUCCESS` or `INIT` |
//!
//! `FAILED` aborts the goal.

use async_trait::async_trait;
use ensemble_services::ServiceManager;
use ensemble_types::{
    ActionCommand, ActionError, ActionResult, Completion, Goal, ServiceState,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::server::{ExecutionContext, GoalHandler};

/// The [`GoalHandler`] that drives one hosted [`ServiceManager`].
#[derive(Debug)]
pub struct ServiceHost {
    name: String,
    manager: ServiceManager,
}

enum Progress {
    Running(ServiceState),
    Done(ActionResult),
    Failed(String),
}

impl ServiceHost {
    /// Wrap `manager`, running its self-test once.
    ///
    /// A failed self-test is logged and hosting continues.
    pub fn new(name: impl Into<String>, mut manager: ServiceManager) -> Self {
        let name = name.into();
        if manager.test() {
            info!(service = %name, kind = %manager.kind(), "service self-test passed");
        } else {
            warn!(service = %name, kind = %manager.kind(), "service self-test failed; hosting anyway");
        }
        Self { name, manager }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn begin(
        &mut self,
        command: &ActionCommand,
        data: &str,
    ) -> Result<(ServiceState, String), ActionError> {
        match (&mut self.manager, command) {
            (ServiceManager::Hardware(service), ActionCommand::Do) => {
                service.do_action(data)?;
                Ok((ServiceState::Start, "Doing action".to_string()))
            }
            (ServiceManager::Web(service), ActionCommand::Request) => {
                service.request(data)?;
                Ok((ServiceState::Start, "Processing".to_string()))
            }
            (ServiceManager::Internal(service), ActionCommand::Start { rate }) => {
                service.start(*rate)?;
                Ok((service.status(), "start requested".to_string()))
            }
            (ServiceManager::Internal(service), ActionCommand::Pause) => {
                service.pause()?;
                Ok((service.status(), "pause requested".to_string()))
            }
            (ServiceManager::Internal(service), ActionCommand::Stop) => {
                service.stop()?;
                Ok((service.status(), "stop requested".to_string()))
            }
            _ => Err(ActionError::UnsupportedCommand {
                service: self.name.clone(),
                command: command.to_string(),
            }),
        }
    }

    fn poll(&self, command: &ActionCommand) -> Progress {
        if let Some(details) = self.manager.fault() {
            return Progress::Failed(details);
        }
        match &self.manager {
            ServiceManager::Hardware(service) => {
                if service.action_completed() {
                    Progress::Done(ActionResult::new(service.cont(), service.return_msg()))
                } else {
                    Progress::Running(ServiceState::Start)
                }
            }
            ServiceManager::Web(service) => {
                if service.response_received() {
                    Progress::Done(ActionResult::new(service.cont(), service.return_msg()))
                } else {
                    Progress::Running(ServiceState::Start)
                }
            }
            ServiceManager::Internal(service) => {
                let status = service.status();
                let reached = match command {
                    ActionCommand::Start { .. } => {
                        matches!(status, ServiceState::Start | ServiceState::Success)
                    }
                    ActionCommand::Pause => {
                        matches!(status, ServiceState::Pause | ServiceState::Success)
                    }
                    ActionCommand::Stop => {
                        matches!(status, ServiceState::Success | ServiceState::Init)
                    }
                    _ => false,
                };
                if status == ServiceState::Failed {
                    Progress::Failed(format!("{} reported FAILED", self.name))
                } else if reached {
                    Progress::Done(ActionResult::new(true, format!("{} is {status}", self.name)))
                } else {
                    Progress::Running(status)
                }
            }
        }
    }

    /// Return the manager to its initial state once a goal is over.
    fn finish(&mut self, command: &ActionCommand) {
        match (&mut self.manager, command) {
            (ServiceManager::Internal(service), ActionCommand::Stop) => service.reset_init(),
            (ServiceManager::Internal(_), _) => {}
            (manager, _) => manager.reset_init(),
        }
    }
}

#[async_trait]
impl GoalHandler for ServiceHost {
    async fn execute(&mut self, goal: Goal, ctx: &ExecutionContext) -> Completion {
        let command = match goal.command(&self.name) {
            Ok(command) => command,
            Err(e) => {
                warn!(service = %self.name, action = %goal.action, error = %e, "goal rejected");
                return e.into();
            }
        };

        let (state, message) = match self.begin(&command, &goal.optional_data) {
            Ok(started) => started,
            Err(e) => {
                error!(service = %self.name, %command, error = %e, "dispatch failed");
                self.finish(&command);
                return e.into();
            }
        };
        debug!(service = %self.name, %command, "command dispatched");
        ctx.publish_feedback(state, message);

        let mut ticker = tokio::time::interval(ctx.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_state = state;

        let completion = loop {
            tokio::select! {
                biased;
                _ = ctx.preempted() => {
                    info!(service = %self.name, %command, "goal preempted");
                    break Completion::preempted(format!("{} preempted", self.name));
                }
                _ = ticker.tick() => {}
            }

            match self.poll(&command) {
                Progress::Done(result) => break Completion::succeeded(result),
                Progress::Failed(details) => {
                    error!(service = %self.name, %command, %details, "service failed");
                    break ActionError::ServiceFailure {
                        service: self.name.clone(),
                        details,
                    }
                    .into();
                }
                Progress::Running(state) if state != last_state => {
                    ctx.publish_feedback(state, format!("{} is {state}", self.name));
                    last_state = state;
                }
                Progress::Running(_) => {}
            }
        };

        self.finish(&command);
        completion
    }
}
