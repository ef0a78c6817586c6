//! Peer synchronization: fetching peers' review repositories into the local
//! store and publishing local reviews to the user's own repository.

pub mod engine;
pub mod git;
pub mod layout;
pub mod peers;
pub mod repository;
pub mod transport;

pub use engine::{PeerSyncReport, PublishReport, StageFailure, SyncEngine};
pub use peers::{PeerDescriptor, PeerRegistry};
pub use repository::{DirectoryRepository, GitRepository, OutgoingRepository, PushOutcome};
pub use transport::{
    AutoTransport, DirectoryPeerTransport, GitPeerTransport, PeerTransport, RemoteBatch,
    RemoteFile,
};
