//! Query and statement caches

pub mod query;
pub mod statement;

pub use query::{CacheStats, CachedValue, QueryCache};
pub use statement::StatementCache;
