//! In-memory TTL key-value cache for in-flight payment sessions.
//!
//! Values are stored JSON-serialized, mirroring the string-valued
//! cache the original deployment used. Entries expire after their TTL;
//! expired entries read as absent. Nothing in this cache is
//! authoritative: callers must re-validate against the ledger before
//! acting on cached state.

pub mod error;
pub mod store;

pub use error::CacheError;
pub use store::SessionCache;
