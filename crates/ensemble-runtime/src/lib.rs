//! `ensemble-runtime` – composing nodes into a tree.
//!
//! # Modules
//!
//! - [`controller`] – [`Controller`]: gates a goal on a named condition,
//!   routes it to one of its children and relays the child's result under
//!   a deadline, cancelling the child when the deadline passes.
//! - [`node`] – [`Node`]: an [`ActionServer`][ensemble_action::ActionServer]
//!   bound on a [`Transport`][ensemble_middleware::Transport], hosting either
//!   a ServiceManager or a controller.
//! - [`telemetry`] – [`init_tracing`]: the global `tracing` subscriber with
//!   an optional OTLP span exporter.

pub mod controller;
pub mod node;
pub mod telemetry;

pub use controller::{Controller, ControllerConfig};
pub use node::Node;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
