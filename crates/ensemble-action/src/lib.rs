//! `ensemble-action` – goal execution on both ends of a node link.
//!
//! ```text
//! ActionClient ──SendGoal──► ActionServer ──execute──► GoalHandler
//!      ▲                          │                  (ServiceHost → ServiceManager)
//!      └──── Status / Feedback* / Result ◄───────────┘
//! ```
//!
//! # Modules
//!
//! - [`server`] – [`ActionServer`]: accepts one goal at a time, runs it on a
//!   dedicated executor task through a [`GoalHandler`], streams feedback and
//!   publishes exactly one terminal result.  Supports cooperative preemption.
//! - [`host`] – [`ServiceHost`]: the [`GoalHandler`] that drives a hosted
//!   [`ServiceManager`][ensemble_services::ServiceManager] through the
//!   command dispatch table and polls its completion signal.
//! - [`client`] – [`ActionClient`]: submits goals to a named server, tracks
//!   their [`GoalStatus`][ensemble_types::GoalStatus], delivers callbacks and
//!   reconnects in the background.

pub mod client;
pub mod host;
pub mod server;

pub use client::{ActionClient, ClientConfig, GoalCallbacks, SendOutcome};
pub use host::ServiceHost;
pub use server::{
    ActionServer, ExecutionContext, FeedbackPublisher, GoalExecution, GoalHandler, ServerConfig,
    ServerState,
};
