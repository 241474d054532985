//! Snapshot persistence and the in-memory cache in front of it.
//!
//! - `storage`: one JSON file per partition, written atomically
//! - `layer`: read-through cache keyed by partition, single load per miss
//! - `traits`: the backing-store seam between the two

mod layer;
mod storage;
mod traits;

pub use layer::{CacheStore, Records};
pub use storage::SnapshotStore;
