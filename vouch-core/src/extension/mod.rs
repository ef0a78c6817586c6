//! Ecosystem extensions: the process-isolated adapters that turn a project
//! directory into package identities.

pub mod process;
pub mod protocol;
pub mod registry;
pub mod server;

pub use process::{ExtensionClient, ExtensionCommand, ExtensionDescriptor, DEFAULT_TIMEOUT};
pub use registry::{find_manifests, EcosystemDiscovery, ExtensionRegistry};
pub use server::{serve, serve_stdio, ExtensionHandler};
