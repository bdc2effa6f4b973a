//! Bounded caches used to memoize store lookups.

mod lru;

pub use lru::LruCache;
