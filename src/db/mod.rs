pub mod pool;
pub mod queries;
pub mod snapshot;

pub use pool::create_pool;
pub use queries::*;
pub use snapshot::{fetch_snapshot, load_store, populate_store, Snapshot};
