/// Client side of the store: a remote TCP client and URI-based discovery.
pub mod client;
/// Opens the configured store (remote, file-backed or in-memory).
pub mod discovery;

pub use client::Client;
pub use discovery::connect;
