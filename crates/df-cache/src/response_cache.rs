//! Shared HTTP response cache.
//!
//! Entries are written in two phases. `begin_write` installs the response
//! head with `waiting_for_body` set and hands back a ticket; `complete`
//! publishes the body. Until then lookups treat the key as a miss, so a
//! reader can never observe a half-written entry. Every write replaces the
//! whole entry under the store lock.

use crate::CacheKey;
use crate::freshness::CacheControl;
use crate::freshness::Freshness;
use crate::freshness::freshness_at;
use crate::recover;
use df_net::HeaderList;
use df_net::Response;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

/// Headers a 304 is allowed to update on the stored response.
const REFRESHABLE_HEADERS: [&str; 5] = [
    "cache-control",
    "expires",
    "etag",
    "last-modified",
    "date",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub response: Response,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub stale_while_revalidate: bool,
    pub must_revalidate: bool,
    pub waiting_for_body: bool,
    pub stored_at: SystemTime,
    /// Request header values named by the response's `Vary`, as sent.
    vary: Vec<(String, Option<String>)>,
    generation: u64,
}

impl CacheEntry {
    fn new(
        response: Response,
        request_headers: &HeaderList,
        stored_at: SystemTime,
        generation: u64,
    ) -> Self {
        let vary = response
            .headers
            .get_all("vary")
            .flat_map(|value| value.split(','))
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .map(|name| {
                let sent = request_headers.get(&name).map(ToOwned::to_owned);
                (name, sent)
            })
            .collect();

        let mut entry = Self {
            response,
            etag: None,
            last_modified: None,
            stale_while_revalidate: false,
            must_revalidate: false,
            waiting_for_body: true,
            stored_at,
            vary,
            generation,
        };
        entry.sync_validators();
        entry
    }

    fn sync_validators(&mut self) {
        let control = CacheControl::from_headers(&self.response.headers);
        self.etag = self.response.headers.get("etag").map(ToOwned::to_owned);
        self.last_modified = self
            .response
            .headers
            .get("last-modified")
            .map(ToOwned::to_owned);
        self.stale_while_revalidate = control.stale_while_revalidate;
        self.must_revalidate = control.must_revalidate;
    }

    pub fn freshness_at(&self, now: SystemTime) -> Freshness {
        freshness_at(&self.response.headers, self.stored_at, now)
    }

    pub fn is_virtual(&self) -> bool {
        self.response.virtual_path.is_some()
    }

    /// Serving stale while refreshing in the background is only allowed for
    /// `stale-while-revalidate` entries without an ETag to validate against.
    pub fn allows_background_refresh(&self) -> bool {
        self.stale_while_revalidate && !self.must_revalidate && self.etag.is_none()
    }

    fn matches_vary(&self, request_headers: &HeaderList) -> bool {
        self.vary
            .iter()
            .all(|(name, sent)| request_headers.get(name) == sent.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Miss,
}

/// Ticket for a write started with [`ResponseCacheStore::begin_write`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pending write keeps its key invisible until completed or abandoned"]
pub struct PendingWrite {
    key: CacheKey,
    generation: u64,
}

impl PendingWrite {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Debug, Default)]
struct Slots {
    entries: HashMap<CacheKey, CacheEntry>,
    next_generation: u64,
}

#[derive(Debug, Default)]
pub struct ResponseCacheStore {
    slots: RwLock<Slots>,
}

impl ResponseCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &CacheKey, request_headers: &HeaderList) -> CacheLookup {
        self.lookup_at(key, request_headers, SystemTime::now())
    }

    pub fn lookup_at(
        &self,
        key: &CacheKey,
        request_headers: &HeaderList,
        now: SystemTime,
    ) -> CacheLookup {
        let slots = recover(self.slots.read());
        let Some(entry) = slots.entries.get(key) else {
            return CacheLookup::Miss;
        };

        if entry.waiting_for_body {
            log::debug!("cache entry for {key} is still waiting for its body");
            return CacheLookup::Miss;
        }

        if !entry.matches_vary(request_headers) {
            return CacheLookup::Miss;
        }

        match entry.freshness_at(now) {
            Freshness::Fresh => CacheLookup::Fresh(entry.clone()),
            // A stale local file is simply read again.
            Freshness::Stale if entry.is_virtual() => CacheLookup::Miss,
            Freshness::Stale => CacheLookup::Stale(entry.clone()),
        }
    }

    /// Installs `response`'s head under `key`, replacing any previous entry.
    ///
    /// The body carried by `response` is ignored; it is supplied to
    /// [`Self::complete`]. Returns `None` (and evicts the key) when the
    /// response varies on `*`.
    pub fn begin_write(
        &self,
        key: CacheKey,
        request_headers: &HeaderList,
        response: &Response,
    ) -> Option<PendingWrite> {
        let mut slots = recover(self.slots.write());
        if response.headers.has_token("vary", "*") {
            slots.entries.remove(&key);
            return None;
        }

        slots.next_generation += 1;
        let generation = slots.next_generation;
        let head = Response {
            body: Vec::new(),
            ..response.clone()
        };
        let entry = CacheEntry::new(head, request_headers, SystemTime::now(), generation);
        slots.entries.insert(key.clone(), entry);

        Some(PendingWrite { key, generation })
    }

    /// Publishes the body. Returns `false` when a later write superseded the ticket.
    pub fn complete(&self, ticket: PendingWrite, body: Vec<u8>) -> bool {
        let mut slots = recover(self.slots.write());
        match slots.entries.get_mut(&ticket.key) {
            Some(entry) if entry.generation == ticket.generation => {
                entry.response.body = body;
                entry.waiting_for_body = false;
                log::debug!("cached {}", ticket.key);
                true
            }
            _ => false,
        }
    }

    /// Drops an entry whose body never arrived, unless it was superseded.
    pub fn abandon(&self, ticket: PendingWrite) {
        let mut slots = recover(self.slots.write());
        let owned = slots
            .entries
            .get(&ticket.key)
            .is_some_and(|entry| entry.generation == ticket.generation);
        if owned {
            slots.entries.remove(&ticket.key);
        }
    }

    /// Single-step write for responses whose body is already in hand.
    pub fn store(&self, key: CacheKey, request_headers: &HeaderList, response: Response) -> bool {
        match self.begin_write(key, request_headers, &response) {
            Some(ticket) => self.complete(ticket, response.body),
            None => false,
        }
    }

    /// Applies a 304's validators and freshness headers to the stored entry
    /// and restarts its freshness clock. Returns the refreshed entry.
    pub fn refresh_not_modified(
        &self,
        key: &CacheKey,
        not_modified: &HeaderList,
    ) -> Option<CacheEntry> {
        let mut slots = recover(self.slots.write());
        let entry = slots.entries.get_mut(key)?;
        if entry.waiting_for_body {
            return None;
        }

        for name in REFRESHABLE_HEADERS {
            let mut values = not_modified.get_all(name).peekable();
            if values.peek().is_none() {
                continue;
            }
            entry.response.headers.remove(name);
            for value in values {
                // Values came from a parsed header list and are already valid.
                let _ = entry.response.headers.append(name, value);
            }
        }
        entry.sync_validators();
        entry.stored_at = SystemTime::now();

        let refreshed = entry.clone();
        if CacheControl::from_headers(&refreshed.response.headers).no_store {
            slots.entries.remove(key);
        }
        Some(refreshed)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        recover(self.slots.write()).entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        recover(self.slots.write()).entries.clear();
    }

    pub fn len(&self) -> usize {
        recover(self.slots.read()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
