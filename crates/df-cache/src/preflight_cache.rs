//! Outcomes of successful CORS preflight probes.

use crate::recover;
use df_net::HttpMethod;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use std::time::SystemTime;
use url::Url;

/// Preflights are remembered per calling origin and target URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreflightKey {
    origin: String,
    url: String,
}

impl PreflightKey {
    pub fn new(caller_origin: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            origin: caller_origin.to_owned(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightEntry {
    /// `*` or one serialized origin.
    pub allow_origin: String,
    /// Upper-case method names; empty allows every method.
    pub allow_methods: Vec<String>,
    /// From `Access-Control-Max-Age`. `None` keeps the entry until cleared.
    pub max_age: Option<Duration>,
    pub stored_at: SystemTime,
}

impl PreflightEntry {
    pub fn new(allow_origin: &str, allow_methods: Vec<String>, max_age: Option<Duration>) -> Self {
        Self {
            allow_origin: allow_origin.trim().to_owned(),
            allow_methods: allow_methods
                .into_iter()
                .map(|method| method.trim().to_ascii_uppercase())
                .filter(|method| !method.is_empty())
                .collect(),
            max_age,
            stored_at: SystemTime::now(),
        }
    }

    pub fn allows_origin(&self, caller_origin: &str) -> bool {
        self.allow_origin == "*" || self.allow_origin == caller_origin
    }

    pub fn allows_method(&self, method: HttpMethod) -> bool {
        self.allow_methods.is_empty()
            || self
                .allow_methods
                .iter()
                .any(|allowed| allowed == method.as_str())
    }

    pub fn permits(&self, caller_origin: &str, method: HttpMethod) -> bool {
        self.allows_origin(caller_origin) && self.allows_method(method)
    }

    fn expired_at(&self, now: SystemTime) -> bool {
        self.max_age.is_some_and(|max_age| {
            now.duration_since(self.stored_at).unwrap_or_default() >= max_age
        })
    }
}

#[derive(Debug, Default)]
pub struct PreflightCacheStore {
    entries: RwLock<HashMap<PreflightKey, PreflightEntry>>,
}

impl PreflightCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &PreflightKey) -> Option<PreflightEntry> {
        self.lookup_at(key, SystemTime::now())
    }

    pub fn lookup_at(&self, key: &PreflightKey, now: SystemTime) -> Option<PreflightEntry> {
        let entries = recover(self.entries.read());
        entries
            .get(key)
            .filter(|entry| !entry.expired_at(now))
            .cloned()
    }

    pub fn insert(&self, key: PreflightKey, entry: PreflightEntry) {
        recover(self.entries.write()).insert(key, entry);
    }

    pub fn clear(&self) {
        recover(self.entries.write()).clear();
    }

    pub fn len(&self) -> usize {
        recover(self.entries.read()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::PreflightCacheStore;
    use super::PreflightEntry;
    use super::PreflightKey;
    use df_net::HttpMethod;
    use std::time::Duration;
    use std::time::SystemTime;
    use url::Url;

    fn key(origin: &str) -> PreflightKey {
        match Url::parse("https://api.example.com/items#frag") {
            Ok(url) => PreflightKey::new(origin, &url),
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn empty_method_list_allows_everything() {
        let entry = PreflightEntry::new("*", Vec::new(), None);
        assert!(entry.permits("https://app.example", HttpMethod::Delete));
    }

    #[test]
    fn exact_origin_and_method_list_are_enforced() {
        let entry = PreflightEntry::new(
            "https://app.example",
            vec!["get".to_owned(), " PUT ".to_owned()],
            None,
        );
        assert!(entry.permits("https://app.example", HttpMethod::Put));
        assert!(!entry.permits("https://app.example", HttpMethod::Delete));
        assert!(!entry.permits("https://evil.example", HttpMethod::Get));
    }

    #[test]
    fn entries_are_scoped_by_caller_origin() {
        let store = PreflightCacheStore::new();
        store.insert(key("https://a.example"), PreflightEntry::new("*", Vec::new(), None));
        assert!(store.lookup(&key("https://a.example")).is_some());
        assert!(store.lookup(&key("https://b.example")).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn max_age_expires_entries() {
        let store = PreflightCacheStore::new();
        let entry = PreflightEntry::new("*", Vec::new(), Some(Duration::from_secs(10)));
        let stored_at = entry.stored_at;
        store.insert(key("https://a.example"), entry);

        let inside = stored_at + Duration::from_secs(9);
        let outside = stored_at + Duration::from_secs(10);
        assert!(store.lookup_at(&key("https://a.example"), inside).is_some());
        assert!(store.lookup_at(&key("https://a.example"), outside).is_none());

        store.clear();
        assert!(store.lookup_at(&key("https://a.example"), SystemTime::now()).is_none());
    }
}
