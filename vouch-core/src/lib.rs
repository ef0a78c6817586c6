//! Vouch core library exports

pub mod aggregate;
pub mod check;
pub mod config;
pub mod error;
pub mod extension;
pub mod keys;
pub mod package;
pub mod paths;
pub mod review;
pub mod store;
pub mod sync;

pub use error::{ExtensionError, IntegrityError, PublishError, PutError, StoreError, SyncError};
pub use package::PackageIdentity;
pub use review::ReviewRecord;
