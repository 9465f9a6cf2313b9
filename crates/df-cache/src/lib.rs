//! Shared stores for a browsing context: HTTP responses and CORS preflight outcomes.

pub mod freshness;
pub mod key;
pub mod preflight_cache;
pub mod response_cache;

pub use freshness::CacheControl;
pub use freshness::Freshness;
pub use key::CacheKey;
pub use preflight_cache::PreflightCacheStore;
pub use preflight_cache::PreflightEntry;
pub use preflight_cache::PreflightKey;
pub use response_cache::CacheEntry;
pub use response_cache::CacheLookup;
pub use response_cache::PendingWrite;
pub use response_cache::ResponseCacheStore;

use std::sync::LockResult;

/// A poisoned lock still guards consistent data here: every writer replaces
/// whole entries, so recover the guard instead of failing the fetch.
pub(crate) fn recover<G>(result: LockResult<G>) -> G {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
