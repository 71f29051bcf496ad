//! Content-addressed response cache with time-based expiry.
//!
//! Payloads are opaque bytes keyed by the SHA-256 digest of a caller-built
//! identity string. Storage is best-effort: write failures are logged and
//! dropped, and expired entries are simply treated as misses.

mod layer;
mod storage;

pub use layer::CacheLayer;
pub use storage::{cache_key, CacheStorage, FileStorage, NoopStorage};
