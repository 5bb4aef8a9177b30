//! [`Node`] – an [`ActionServer`] bound on a transport.
//!
//! A node is either a service node (hosting one
//! [`ServiceManager`][ensemble_services::ServiceManager]) or a controller
//! node.  Dropping the node releases its endpoint name and stops goal
//! intake; a goal already executing runs to its result.

use std::sync::Arc;

use ensemble_action::{ActionServer, ServerConfig, ServiceHost};
use ensemble_middleware::Transport;
use ensemble_services::ServiceManager;
use ensemble_types::ActionError;
use tokio::task::JoinHandle;
use tracing::info;

use crate::controller::Controller;

pub struct Node {
    server: ActionServer,
    intake: JoinHandle<()>,
    transport: Arc<dyn Transport>,
}

impl Node {
    /// Host `manager` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] if `name` is already bound.
    pub fn service(
        name: impl Into<String>,
        manager: ServiceManager,
        transport: Arc<dyn Transport>,
        config: ServerConfig,
    ) -> Result<Self, ActionError> {
        let name = name.into();
        let host = ServiceHost::new(name.clone(), manager);
        Self::bind(ActionServer::spawn(name, host, config), transport)
    }

    /// Serve `controller` under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] if the name is already bound.
    pub fn controller(
        controller: Controller,
        transport: Arc<dyn Transport>,
        config: ServerConfig,
    ) -> Result<Self, ActionError> {
        let name = controller.name().to_string();
        Self::bind(ActionServer::spawn(name, controller, config), transport)
    }

    fn bind(server: ActionServer, transport: Arc<dyn Transport>) -> Result<Self, ActionError> {
        let intake = server.serve(transport.as_ref())?;
        info!(node = %server.name(), "node online");
        Ok(Self {
            server,
            intake,
            transport,
        })
    }

    pub fn name(&self) -> &str {
        self.server.name()
    }

    pub fn server(&self) -> &ActionServer {
        &self.server
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.transport.unbind(self.server.name());
        self.intake.abort();
        info!(node = %self.server.name(), "node offline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_middleware::LocalTransport;
    use ensemble_services::sim::SimActuator;

    #[tokio::test]
    async fn service_node_binds_and_releases_its_name() {
        let transport = LocalTransport::new();
        let shared: Arc<dyn Transport> = Arc::new(transport.clone());

        let node = Node::service(
            "speaker",
            ServiceManager::hardware(SimActuator::new("speaker")),
            Arc::clone(&shared),
            ServerConfig::default(),
        )
        .unwrap();
        assert_eq!(node.name(), "speaker");
        assert_eq!(transport.bound_names(), vec!["speaker".to_string()]);

        let clash = Node::service(
            "speaker",
            ServiceManager::hardware(SimActuator::new("speaker")),
            Arc::clone(&shared),
            ServerConfig::default(),
        );
        assert!(matches!(clash, Err(ActionError::Transport(_))));

        drop(node);
        assert!(transport.connect("speaker").is_none());
    }
}
