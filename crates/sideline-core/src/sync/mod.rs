//! Remote synchronization: queue, backoff, merge, and the drain engine.

mod backoff;
mod engine;
mod http;
mod merge;
mod queue;
mod remote;
mod status;

pub use backoff::BackoffPolicy;
pub use engine::{DrainReport, RemoteSyncEngine};
pub use http::HttpRemoteStore;
pub use merge::merge_snapshots;
pub use queue::SyncQueue;
pub use remote::{MemoryRemoteStore, RemoteRecord, RemoteStore, UpsertOutcome};
pub use status::{SyncState, SyncStatus};
