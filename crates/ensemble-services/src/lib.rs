//! `ensemble-services` – the ServiceManager capability contract.
//!
//! A ServiceManager is the leaf object that performs a node's real work
//! (moving a motor, calling a cloud API, running a recogniser).  Servers
//! only ever talk to the traits in [`manager`], so drivers can be swapped
//! without touching dispatch or orchestration.
//!
//! # Modules
//!
//! - [`manager`] – [`ManagedService`] plus the three capability variants
//!   ([`HardwareControl`], [`WebService`], [`InternalProcessing`]) and the
//!   tagged [`ServiceManager`] a server hosts.
//! - [`sim`] – in-process stand-ins for each variant, used for headless runs
//!   and tests.

pub mod manager;
pub mod sim;

pub use manager::{
    HardwareControl, InternalProcessing, ManagedService, ServiceKind, ServiceManager, WebService,
};
