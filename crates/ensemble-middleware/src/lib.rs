//! `ensemble-middleware` – plumbing between nodes.
//!
//! Carries goals, replies and condition events between nodes without caring
//! what they mean.
//!
//! # Modules
//!
//! - [`events`] – [`EventBoard`]: process-wide table of named condition
//!   signals that controllers block on before dispatching gated goals.
//! - [`transport`] – [`Transport`] and the in-process [`LocalTransport`]:
//!   named server endpoints, a request channel per server and an ordered
//!   reply channel per goal.

pub mod events;
pub mod transport;

pub use events::EventBoard;
pub use transport::{LocalTransport, ServerLink, ServerRequest, Transport};
