//! Bring-up of the configured node tree on the in-process transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use ensemble_action::{ActionClient, ServerState};
use ensemble_middleware::{EventBoard, LocalTransport, Transport};
use ensemble_runtime::{Controller, Node};
use ensemble_services::ServiceManager;
use ensemble_services::sim::{SimActuator, SimStream, SimWebService};
use ensemble_types::{ActionError, GoalStatus};
use tracing::{info, warn};

use crate::config::{Config, ServiceKind, ServiceSpec};

/// One row of `/status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub name: String,
    pub state: ServerState,
    pub last_outcome: Option<GoalStatus>,
}

pub struct Topology {
    events: EventBoard,
    nodes: Vec<Node>,
    /// Operator-side client per controller.
    clients: BTreeMap<String, Arc<ActionClient>>,
}

impl Topology {
    /// Start every service node, then every controller.
    ///
    /// Must run inside a Tokio runtime.
    pub async fn launch(cfg: &Config) -> Result<Self, ActionError> {
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());
        let events = EventBoard::new();
        let mut nodes = Vec::new();

        for service in &cfg.services {
            let node = Node::service(
                service.name.clone(),
                simulated(service),
                Arc::clone(&transport),
                cfg.server.clone(),
            )?;
            info!(node = %service.name, kind = %service.kind, "service node started");
            nodes.push(node);
        }

        let mut clients = BTreeMap::new();
        for (name, controller_cfg) in &cfg.controllers {
            let controller = Controller::new(
                name.clone(),
                controller_cfg.clone(),
                Arc::clone(&transport),
                events.clone(),
                cfg.client.clone(),
            );
            let missing = controller.wait_for_children().await;
            if !missing.is_empty() {
                warn!(controller = %name, ?missing, "starting with unavailable children");
            }
            nodes.push(Node::controller(
                controller,
                Arc::clone(&transport),
                cfg.server.clone(),
            )?);

            let client = ActionClient::new(name.clone(), Arc::clone(&transport), cfg.client.clone());
            clients.insert(name.clone(), Arc::new(client));
        }

        Ok(Self {
            events,
            nodes,
            clients,
        })
    }

    pub fn events(&self) -> &EventBoard {
        &self.events
    }

    pub fn client(&self, controller: &str) -> Option<&Arc<ActionClient>> {
        self.clients.get(controller)
    }

    pub fn controllers(&self) -> impl Iterator<Item = (&String, &Arc<ActionClient>)> {
        self.clients.iter()
    }

    /// Handles for cancelling from outside the runtime (Ctrl-C).
    pub fn client_handles(&self) -> Vec<Arc<ActionClient>> {
        self.clients.values().cloned().collect()
    }

    pub fn status(&self) -> Vec<NodeStatus> {
        self.nodes
            .iter()
            .map(|node| NodeStatus {
                name: node.name().to_string(),
                state: node.server().state(),
                last_outcome: node.server().last_outcome(),
            })
            .collect()
    }

    pub fn cancel_all(&self) {
        for client in self.clients.values() {
            client.cancel_all_goals();
        }
    }
}

fn simulated(service: &ServiceSpec) -> ServiceManager {
    match service.kind {
        ServiceKind::Hardware => {
            ServiceManager::hardware(SimActuator::new(service.name.clone()).with_duration(service.delay))
        }
        ServiceKind::Web => {
            ServiceManager::web(SimWebService::new(service.name.clone()).with_latency(service.delay))
        }
        ServiceKind::Internal => ServiceManager::internal(SimStream::new(service.name.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_action::GoalCallbacks;
    use ensemble_types::Goal;
    use std::time::Duration;

    fn quick_config() -> Config {
        let mut cfg = Config::default();
        for service in &mut cfg.services {
            service.delay = Duration::from_millis(10);
        }
        cfg.server.poll_interval = Duration::from_millis(10);
        cfg.client.reconnect_backoff = Duration::from_millis(10);
        for controller in cfg.controllers.values_mut() {
            controller.timeout_for_server = Duration::from_millis(200);
        }
        cfg
    }

    #[tokio::test]
    async fn default_topology_serves_goals() {
        let topology = Topology::launch(&quick_config()).await.unwrap();
        assert_eq!(topology.status().len(), 6);
        assert!(topology
            .status()
            .iter()
            .all(|node| node.state == ServerState::Idle));

        let greeter = topology.client("greeter").unwrap();
        let outcome = greeter
            .send_goal(
                Goal::new("do_speaker").for_child("speaker").with_data("hello.wav"),
                GoalCallbacks::new(),
                true,
            )
            .await;
        assert_eq!(outcome.status, GoalStatus::Succeeded);

        let listener = topology.client("listener").unwrap();
        let outcome = listener
            .send_goal(
                Goal::new("start_mic").for_child("mic").with_data("16"),
                GoalCallbacks::new(),
                true,
            )
            .await;
        assert_eq!(outcome.status, GoalStatus::Succeeded);
    }

    #[tokio::test]
    async fn duplicate_node_names_fail_launch() {
        let mut cfg = quick_config();
        let first = cfg.services[0].clone();
        cfg.services.push(first);
        assert!(matches!(
            Topology::launch(&cfg).await,
            Err(ActionError::Transport(_))
        ));
    }
}
