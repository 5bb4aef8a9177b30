//! Capability traits a ServiceManager implements to be hosted by a server.
//!
//! All three variants share the [`ManagedService`] lifecycle shape (`test`,
//! `reset_init`) and differ in which operations are meaningful:
//!
//! | Variant | Operations | Completion signal |
//! |---|---|---|
//! | [`HardwareControl`] | `do_action(data)` | `action_completed()` |
//! | [`WebService`] | `request(data)` | `response_received()` |
//! | [`InternalProcessing`] | `start(rate)`, `pause()`, `stop()` | `status()` |
//!
//! The variant is fixed when the [`ServiceManager`] is built, never probed
//! at call time.

use std::fmt;

use ensemble_types::{ActionError, ServiceState};

/// Operations common to every ServiceManager.
pub trait ManagedService: Send {
    /// Exercise the service once with a default input.
    ///
    /// Returns `false` when the service is not usable; hosting continues
    /// regardless.
    fn test(&mut self) -> bool;

    /// Return every observable field to its initial value.
    fn reset_init(&mut self);

    /// An unrecoverable failure observed since the current operation began.
    fn fault(&self) -> Option<String> {
        None
    }
}

/// A service that formulates goal data into an action for some hardware.
pub trait HardwareControl: ManagedService {
    /// Begin acting on `data`.  Must return promptly; progress is reported
    /// through [`action_completed`][HardwareControl::action_completed].
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::ServiceFailure`] when the action cannot be
    /// started.
    fn do_action(&mut self, data: &str) -> Result<(), ActionError>;

    fn action_completed(&self) -> bool;

    /// Whether the caller's flow should continue after this action.
    fn cont(&self) -> bool;

    fn return_msg(&self) -> String;
}

/// A service that formulates goal data into a request to an external API.
pub trait WebService: ManagedService {
    /// Begin a request carrying `data`.  Must return promptly; progress is
    /// reported through [`response_received`][WebService::response_received].
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::ServiceFailure`] when the request cannot be
    /// sent.
    fn request(&mut self, data: &str) -> Result<(), ActionError>;

    fn response_received(&self) -> bool;

    fn cont(&self) -> bool;

    fn return_msg(&self) -> String;
}

/// A long-running processing service driven through its lifecycle.
pub trait InternalProcessing: ManagedService {
    /// Start processing, at `rate` Hz when given.
    fn start(&mut self, rate: Option<u32>) -> Result<(), ActionError>;

    fn pause(&mut self) -> Result<(), ActionError>;

    fn stop(&mut self) -> Result<(), ActionError>;

    fn status(&self) -> ServiceState;
}

/// Which capability variant a [`ServiceManager`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Hardware,
    Web,
    Internal,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Hardware => f.write_str("hardware-control"),
            ServiceKind::Web => f.write_str("web-service"),
            ServiceKind::Internal => f.write_str("internal-processing"),
        }
    }
}

/// The ServiceManager hosted by exactly one server.
pub enum ServiceManager {
    Hardware(Box<dyn HardwareControl>),
    Web(Box<dyn WebService>),
    Internal(Box<dyn InternalProcessing>),
}

impl ServiceManager {
    pub fn hardware(service: impl HardwareControl + 'static) -> Self {
        ServiceManager::Hardware(Box::new(service))
    }

    pub fn web(service: impl WebService + 'static) -> Self {
        ServiceManager::Web(Box::new(service))
    }

    pub fn internal(service: impl InternalProcessing + 'static) -> Self {
        ServiceManager::Internal(Box::new(service))
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            ServiceManager::Hardware(_) => ServiceKind::Hardware,
            ServiceManager::Web(_) => ServiceKind::Web,
            ServiceManager::Internal(_) => ServiceKind::Internal,
        }
    }

    pub fn test(&mut self) -> bool {
        match self {
            ServiceManager::Hardware(s) => s.test(),
            ServiceManager::Web(s) => s.test(),
            ServiceManager::Internal(s) => s.test(),
        }
    }

    pub fn reset_init(&mut self) {
        match self {
            ServiceManager::Hardware(s) => s.reset_init(),
            ServiceManager::Web(s) => s.reset_init(),
            ServiceManager::Internal(s) => s.reset_init(),
        }
    }

    pub fn fault(&self) -> Option<String> {
        match self {
            ServiceManager::Hardware(s) => s.fault(),
            ServiceManager::Web(s) => s.fault(),
            ServiceManager::Internal(s) => s.fault(),
        }
    }
}

impl fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceManager").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockStream {
        status: ServiceState,
    }

    impl ManagedService for MockStream {
        fn test(&mut self) -> bool {
            false
        }
        fn reset_init(&mut self) {
            self.status = ServiceState::Init;
        }
    }

    impl InternalProcessing for MockStream {
        fn start(&mut self, _rate: Option<u32>) -> Result<(), ActionError> {
            self.status = ServiceState::Start;
            Ok(())
        }
        fn pause(&mut self) -> Result<(), ActionError> {
            self.status = ServiceState::Pause;
            Ok(())
        }
        fn stop(&mut self) -> Result<(), ActionError> {
            self.status = ServiceState::Success;
            Ok(())
        }
        fn status(&self) -> ServiceState {
            self.status
        }
    }

    #[test]
    fn variant_is_fixed_at_construction() {
        let mut manager = ServiceManager::internal(MockStream {
            status: ServiceState::Start,
        });
        assert_eq!(manager.kind(), ServiceKind::Internal);
        assert!(!manager.test());
        assert_eq!(manager.fault(), None);
        manager.reset_init();
        match &manager {
            ServiceManager::Internal(s) => assert_eq!(s.status(), ServiceState::Init),
            other => panic!("unexpected variant {other:?}"),
        }
        assert_eq!(format!("{manager:?}"), "ServiceManager(Internal)");
    }
}
