//! Point-to-point delivery between named clients and named servers.
//!
//! Servers [`bind`][Transport::bind] a name and receive [`ServerRequest`]s;
//! clients [`connect`][Transport::connect] to a name and get a
//! [`ServerLink`].  Every goal carries its own reply channel, so all
//! [`GoalUpdate`]s for one goal arrive in the order the server emitted them.
//!
//! [`LocalTransport`] is the in-process implementation used when every node
//! lives in the same runtime.  Any substrate that keeps per-goal ordering can
//! implement [`Transport`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ensemble_types::{ActionError, Goal, GoalId, GoalUpdate};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A request addressed to one server.
#[derive(Debug)]
pub enum ServerRequest {
    /// Start `goal`, streaming every update for it into `replies`.
    SendGoal {
        goal_id: GoalId,
        goal: Goal,
        replies: mpsc::UnboundedSender<GoalUpdate>,
    },
    /// Preempt `goal_id`, or whatever is executing when `None`.
    Cancel { goal_id: Option<GoalId> },
}

/// Client-side handle to a bound server endpoint.
#[derive(Clone, Debug)]
pub struct ServerLink {
    target: String,
    requests: mpsc::UnboundedSender<ServerRequest>,
}

impl ServerLink {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// `true` once the server has dropped its endpoint.
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    /// # Errors
    ///
    /// Returns [`ActionError::ServerUnavailable`] when the endpoint is gone.
    pub fn send(&self, request: ServerRequest) -> Result<(), ActionError> {
        self.requests
            .send(request)
            .map_err(|_| ActionError::ServerUnavailable(self.target.clone()))
    }
}

/// Substrate that connects clients to servers by name.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Claim `name` and return the stream of requests addressed to it.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] if a live server already owns
    /// `name`.
    fn bind(&self, name: &str) -> Result<mpsc::UnboundedReceiver<ServerRequest>, ActionError>;

    /// Release `name` so new connections fail.  Existing links stay usable
    /// until the server drops its request stream.
    fn unbind(&self, name: &str);

    /// Look up a live endpoint; `None` when nothing is bound to `name`.
    fn connect(&self, name: &str) -> Option<ServerLink>;
}

/// In-process [`Transport`] backed by Tokio unbounded channels.
///
/// Clone it cheaply; all clones share one endpoint table.
#[derive(Clone, Debug, Default)]
pub struct LocalTransport {
    endpoints: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<ServerRequest>>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names with a live server behind them.
    pub fn bound_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .endpoints
            .read()
            .iter()
            .filter(|(_, sender)| !sender.is_closed())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Transport for LocalTransport {
    fn bind(&self, name: &str) -> Result<mpsc::UnboundedReceiver<ServerRequest>, ActionError> {
        let mut endpoints = self.endpoints.write();
        if endpoints.get(name).is_some_and(|sender| !sender.is_closed()) {
            return Err(ActionError::Transport(format!(
                "endpoint '{name}' is already bound"
            )));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        endpoints.insert(name.to_string(), sender);
        info!(endpoint = name, "endpoint bound");
        Ok(receiver)
    }

    fn unbind(&self, name: &str) {
        if self.endpoints.write().remove(name).is_some() {
            debug!(endpoint = name, "endpoint released");
        }
    }

    fn connect(&self, name: &str) -> Option<ServerLink> {
        self.endpoints
            .read()
            .get(name)
            .filter(|sender| !sender.is_closed())
            .map(|sender| ServerLink {
                target: name.to_string(),
                requests: sender.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_types::GoalStatus;

    #[tokio::test]
    async fn goal_request_reaches_bound_server() {
        let transport = LocalTransport::new();
        let mut inbox = transport.bind("speaker").unwrap();
        let link = transport.connect("speaker").expect("endpoint must be live");

        let (replies, mut reply_rx) = mpsc::unbounded_channel();
        let goal = Goal::new("do").with_data("hello.wav");
        link.send(ServerRequest::SendGoal {
            goal_id: GoalId::new(),
            goal: goal.clone(),
            replies,
        })
        .unwrap();

        match inbox.recv().await {
            Some(ServerRequest::SendGoal { goal: received, replies, .. }) => {
                assert_eq!(received, goal);
                replies.send(GoalUpdate::Status(GoalStatus::Active)).unwrap();
            }
            other => panic!("unexpected request: {other:?}"),
        }
        assert_eq!(
            reply_rx.recv().await,
            Some(GoalUpdate::Status(GoalStatus::Active))
        );
    }

    #[test]
    fn connect_to_unknown_endpoint_is_none() {
        let transport = LocalTransport::new();
        assert!(transport.connect("ghost").is_none());
    }

    #[test]
    fn double_bind_is_rejected_while_server_lives() {
        let transport = LocalTransport::new();
        let _inbox = transport.bind("gesture").unwrap();
        assert!(matches!(
            transport.bind("gesture"),
            Err(ActionError::Transport(_))
        ));
    }

    #[test]
    fn dropped_server_frees_its_name() {
        let transport = LocalTransport::new();
        let inbox = transport.bind("gesture").unwrap();
        let link = transport.connect("gesture").unwrap();
        drop(inbox);

        assert!(link.is_closed());
        assert!(transport.connect("gesture").is_none());
        assert!(transport.bind("gesture").is_ok());
    }

    #[test]
    fn unbind_stops_new_connections() {
        let transport = LocalTransport::new();
        let _inbox = transport.bind("tts").unwrap();
        assert_eq!(transport.bound_names(), vec!["tts".to_string()]);

        transport.unbind("tts");
        assert!(transport.connect("tts").is_none());
        assert!(transport.bound_names().is_empty());
    }
}
