/// TCP server implementation for the EMS store daemon.
///
/// This module provides the [`Router`] which handles incoming TCP connections
/// and dispatches commands to the underlying document store.
pub mod router;

pub use router::Router;
