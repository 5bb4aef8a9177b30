//! In-process ServiceManagers for running a node tree without hardware or
//! network access.
//!
//! Each stand-in records the payloads it receives in a shared
//! [`CommandLog`] and completes after a configurable delay, so headless runs
//! and tests can exercise the full goal path.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use ensemble_services::sim::SimActuator;
//! use ensemble_services::HardwareControl;
//!
//! let mut speaker = SimActuator::new("speaker").with_duration(Duration::ZERO);
//! speaker.do_action("hello.wav").unwrap();
//! assert!(speaker.action_completed());
//! assert_eq!(speaker.log().entries(), vec!["hello.wav".to_string()]);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use ensemble_types::{ActionError, ServiceLifecycle, ServiceState};
use parking_lot::Mutex;
use tracing::debug;

use crate::manager::{HardwareControl, InternalProcessing, ManagedService, WebService};

/// Shared record of the payloads a simulated service received.
#[derive(Clone, Debug, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Hardware control
// ────────────────────────────────────────────────────────────────────────────

/// A simulated actuator (speaker, gesture arm, face display) that finishes
/// each action after a fixed duration.
pub struct SimActuator {
    id: String,
    duration: Duration,
    self_test: bool,
    faults_left: u32,
    fault: Option<String>,
    started: Option<(Instant, String)>,
    log: CommandLog,
}

impl SimActuator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            duration: Duration::from_millis(200),
            self_test: true,
            faults_left: 0,
            fault: None,
            started: None,
            log: CommandLog::default(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// An actuator whose actions never complete.
    pub fn stalled(self) -> Self {
        self.with_duration(Duration::MAX)
    }

    /// Make [`ManagedService::test`] report failure.
    pub fn failing_self_test(mut self) -> Self {
        self.self_test = false;
        self
    }

    /// Jam on the next action: it never completes and reports a fault.
    /// Later actions behave normally.
    pub fn faulting_once(mut self) -> Self {
        self.faults_left = 1;
        self
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl ManagedService for SimActuator {
    fn test(&mut self) -> bool {
        self.self_test
    }

    fn reset_init(&mut self) {
        self.started = None;
        self.fault = None;
    }

    fn fault(&self) -> Option<String> {
        self.fault.clone()
    }
}

impl HardwareControl for SimActuator {
    fn do_action(&mut self, data: &str) -> Result<(), ActionError> {
        debug!(actuator = %self.id, data, "simulated action started");
        self.log.push(data);
        self.started = Some((Instant::now(), data.to_string()));
        if self.faults_left > 0 {
            self.faults_left -= 1;
            self.fault = Some(format!("{} jammed on '{data}'", self.id));
        }
        Ok(())
    }

    fn action_completed(&self) -> bool {
        self.fault.is_none()
            && self
                .started
                .as_ref()
                .is_some_and(|(at, _)| at.elapsed() >= self.duration)
    }

    fn cont(&self) -> bool {
        true
    }

    fn return_msg(&self) -> String {
        match &self.started {
            Some((_, data)) => format!("{} finished '{data}'", self.id),
            None => String::new(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Web service
// ────────────────────────────────────────────────────────────────────────────

/// A simulated external API that echoes each request after a latency.
pub struct SimWebService {
    id: String,
    latency: Duration,
    reachable: bool,
    pending: Option<(Instant, String)>,
    log: CommandLog,
}

impl SimWebService {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            latency: Duration::from_millis(100),
            reachable: true,
            pending: None,
            log: CommandLog::default(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// A service whose requests fail to send.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl ManagedService for SimWebService {
    fn test(&mut self) -> bool {
        self.reachable
    }

    fn reset_init(&mut self) {
        self.pending = None;
    }
}

impl WebService for SimWebService {
    fn request(&mut self, data: &str) -> Result<(), ActionError> {
        if !self.reachable {
            return Err(ActionError::ServiceFailure {
                service: self.id.clone(),
                details: "endpoint unreachable".to_string(),
            });
        }
        self.log.push(data);
        self.pending = Some((Instant::now(), data.to_string()));
        Ok(())
    }

    fn response_received(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|(at, _)| at.elapsed() >= self.latency)
    }

    fn cont(&self) -> bool {
        self.pending.as_ref().is_some_and(|(_, data)| !data.is_empty())
    }

    fn return_msg(&self) -> String {
        match &self.pending {
            Some((_, data)) => format!("{} answered: {data}", self.id),
            None => String::new(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal processing
// ────────────────────────────────────────────────────────────────────────────

/// A simulated stream processor (microphone, speech recogniser) that moves
/// through its lifecycle immediately on each command.
pub struct SimStream {
    id: String,
    lifecycle: ServiceLifecycle,
    rate: Option<u32>,
    fail_on_stop: bool,
    log: CommandLog,
}

impl SimStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lifecycle: ServiceLifecycle::new(),
            rate: None,
            fail_on_stop: false,
            log: CommandLog::default(),
        }
    }

    /// A stream that reports `FAILED` when asked to stop.
    pub fn failing_on_stop(mut self) -> Self {
        self.fail_on_stop = true;
        self
    }

    pub fn rate(&self) -> Option<u32> {
        self.rate
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl ManagedService for SimStream {
    fn test(&mut self) -> bool {
        true
    }

    fn reset_init(&mut self) {
        self.lifecycle.reset();
        self.rate = None;
    }
}

impl InternalProcessing for SimStream {
    fn start(&mut self, rate: Option<u32>) -> Result<(), ActionError> {
        debug!(stream = %self.id, ?rate, "simulated stream started");
        self.log.push(format!("start {}", rate.map_or("-".to_string(), |r| r.to_string())));
        self.rate = rate;
        self.lifecycle.start();
        Ok(())
    }

    fn pause(&mut self) -> Result<(), ActionError> {
        self.log.push("pause");
        self.lifecycle.pause()
    }

    fn stop(&mut self) -> Result<(), ActionError> {
        self.log.push("stop");
        if self.fail_on_stop {
            self.lifecycle.fail();
            return Ok(());
        }
        match self.lifecycle.state() {
            ServiceState::Init => Ok(()),
            _ => self.lifecycle.succeed(),
        }
    }

    fn status(&self) -> ServiceState {
        self.lifecycle.state()
    }
}
