#![forbid(unsafe_code)]

//! Deduplicating resource cache.
//!
//! The cache is a host-driven state machine: it never performs I/O itself.
//! [`ResourceCache::load`] either answers from cache, parks the caller's
//! waiter on an in-flight request, or hands back a [`LoadTicket`] telling the
//! host to start exactly one fetch. The host reports the result through
//! [`ResourceCache::complete`], which releases every parked waiter at once.
//!
//! # Policy
//!
//! - At most one in-flight load per key.
//! - Success caches the handle. Every waiter, present or future, gets a
//!   clone of the same handle.
//! - Failure is remembered for the current batch of waiters only. The next
//!   `load` of that key starts a fresh attempt.
//! - [`ResourceCache::clear`] drops every entry and bumps the generation.
//!   Completions for tickets issued before the clear are discarded without
//!   error.
//!
//! Handles are configured for sampling (see [`SamplingPolicy`]) before they
//! enter the cache.

use std::collections::HashMap;
use std::fmt;

/// Why a resource could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Fetch failed (HTTP error, CORS, offline).
    Network(String),
    /// Bytes arrived but could not be decoded or uploaded.
    Decode(String),
    /// Dropped because the component was torn down.
    Cancelled,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::Cancelled => write!(f, "load cancelled"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Texture addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
}

/// Texture filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// How a cached image is sampled when drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplingPolicy {
    pub address: AddressMode,
    pub filter: FilterMode,
}

impl SamplingPolicy {
    /// Tile images: no wrapping, linear filtering. Textures are uploaded
    /// with a single mip level.
    pub const TILE: Self = Self {
        address: AddressMode::ClampToEdge,
        filter: FilterMode::Linear,
    };
}

/// A handle the cache can store.
///
/// Clones must share the underlying resource, so that every waiter sees the
/// same content and dropping a tile's clone never frees it.
pub trait CachedResource: Clone {
    /// Apply the sampling policy before the handle is published.
    fn configure_sampling(&mut self, policy: SamplingPolicy);
}

/// Permission to perform one fetch. Must be returned through
/// [`ResourceCache::complete`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadTicket {
    key: Box<str>,
    generation: u64,
    serial: u64,
}

impl LoadTicket {
    /// Resource key (URL) to fetch.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Immediate answer from [`ResourceCache::load`].
#[derive(Debug)]
pub enum LoadOutcome<H> {
    /// Already loaded. The waiter was not stored.
    Ready(H),
    /// A fetch for this key is already running; the waiter was parked on it.
    Joined,
    /// The caller must start a fetch for this ticket. The waiter was parked.
    Started(LoadTicket),
}

/// Result of a completed fetch, fanned out to all parked waiters.
#[derive(Debug)]
pub struct Settled<H, W> {
    pub key: Box<str>,
    pub result: Result<H, LoadError>,
    pub waiters: Vec<W>,
}

/// Counters for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `load` answered from a ready entry.
    pub hits: u64,
    /// `load` parked on an in-flight request.
    pub joins: u64,
    /// Fetches started.
    pub fetches: u64,
    /// Completions that failed.
    pub failures: u64,
    /// Completions discarded as stale.
    pub discarded: u64,
}

#[derive(Debug)]
enum Entry<H, W> {
    Pending { serial: u64, waiters: Vec<W> },
    Ready(H),
}

/// Key → handle cache with request coalescing.
///
/// `H` is the shared handle type; `W` identifies whoever is waiting (for
/// tiles, a tile id plus build epoch).
#[derive(Debug)]
pub struct ResourceCache<H, W> {
    entries: HashMap<Box<str>, Entry<H, W>>,
    policy: SamplingPolicy,
    generation: u64,
    next_serial: u64,
    stats: CacheStats,
}

impl<H: CachedResource, W> Default for ResourceCache<H, W> {
    fn default() -> Self {
        Self::new(SamplingPolicy::TILE)
    }
}

impl<H: CachedResource, W> ResourceCache<H, W> {
    #[must_use]
    pub fn new(policy: SamplingPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
            generation: 0,
            next_serial: 0,
            stats: CacheStats::default(),
        }
    }

    /// Request `key` on behalf of `waiter`.
    pub fn load(&mut self, key: &str, waiter: W) -> LoadOutcome<H> {
        match self.entries.get_mut(key) {
            Some(Entry::Ready(handle)) => {
                self.stats.hits += 1;
                LoadOutcome::Ready(handle.clone())
            }
            Some(Entry::Pending { waiters, .. }) => {
                self.stats.joins += 1;
                waiters.push(waiter);
                LoadOutcome::Joined
            }
            None => {
                let serial = self.next_serial;
                self.next_serial += 1;
                self.stats.fetches += 1;
                self.entries.insert(
                    key.into(),
                    Entry::Pending {
                        serial,
                        waiters: vec![waiter],
                    },
                );
                crate::debug!(key, serial, "resource load started");
                LoadOutcome::Started(LoadTicket {
                    key: key.into(),
                    generation: self.generation,
                    serial,
                })
            }
        }
    }

    /// Report the outcome of the fetch `ticket` authorised.
    ///
    /// Returns `None` when the ticket is stale (issued before a
    /// [`clear`](Self::clear), or superseded); the result is dropped.
    pub fn complete(
        &mut self,
        ticket: LoadTicket,
        result: Result<H, LoadError>,
    ) -> Option<Settled<H, W>> {
        if ticket.generation != self.generation {
            self.stats.discarded += 1;
            crate::debug!(key = %ticket.key, "stale completion after clear discarded");
            return None;
        }
        let matches = matches!(
            self.entries.get(&ticket.key),
            Some(Entry::Pending { serial, .. }) if *serial == ticket.serial
        );
        if !matches {
            self.stats.discarded += 1;
            return None;
        }
        let Some(Entry::Pending { waiters, .. }) = self.entries.remove(&ticket.key) else {
            return None;
        };

        let result = match result {
            Ok(mut handle) => {
                handle.configure_sampling(self.policy);
                self.entries
                    .insert(ticket.key.clone(), Entry::Ready(handle.clone()));
                crate::debug!(key = %ticket.key, waiters = waiters.len(), "resource ready");
                Ok(handle)
            }
            Err(err) => {
                self.stats.failures += 1;
                crate::warn!(key = %ticket.key, error = %err, "resource load failed");
                Err(err)
            }
        };

        Some(Settled {
            key: ticket.key,
            result,
            waiters,
        })
    }

    /// Cached handle for `key`, if loaded.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&H> {
        match self.entries.get(key) {
            Some(Entry::Ready(h)) => Some(h),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(Entry::Pending { .. }))
    }

    /// Number of fetches currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::Pending { .. }))
            .count()
    }

    /// Number of ready handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() - self.in_flight()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove a ready entry; the only path that releases cached content.
    pub fn evict(&mut self, key: &str) -> Option<H> {
        match self.entries.get(key) {
            Some(Entry::Ready(_)) => match self.entries.remove(key) {
                Some(Entry::Ready(h)) => Some(h),
                _ => None,
            },
            _ => None,
        }
    }

    /// Drop every entry and invalidate outstanding tickets.
    ///
    /// Returns the number of ready handles released.
    pub fn clear(&mut self) -> usize {
        let released = self.len();
        let abandoned = self.in_flight();
        self.entries.clear();
        self.generation += 1;
        crate::debug!(released, abandoned, "resource cache cleared");
        released
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[derive(Debug, Clone)]
    struct Tex {
        id: Rc<u32>,
        policy: Option<SamplingPolicy>,
    }

    impl CachedResource for Tex {
        fn configure_sampling(&mut self, policy: SamplingPolicy) {
            self.policy = Some(policy);
        }
    }

    fn tex(id: u32) -> Tex {
        Tex {
            id: Rc::new(id),
            policy: None,
        }
    }

    fn started(o: LoadOutcome<Tex>) -> LoadTicket {
        match o {
            LoadOutcome::Started(t) => t,
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_loads_share_one_fetch() {
        let mut cache: ResourceCache<Tex, &str> = ResourceCache::default();
        let ticket = started(cache.load("a.jpg", "first"));
        assert!(matches!(cache.load("a.jpg", "second"), LoadOutcome::Joined));
        assert_eq!(cache.stats().fetches, 1);

        let settled = cache.complete(ticket, Ok(tex(7))).expect("settled");
        assert_eq!(settled.waiters, vec!["first", "second"]);
        let handle = settled.result.expect("ok");
        assert_eq!(handle.policy, Some(SamplingPolicy::TILE));

        match cache.load("a.jpg", "third") {
            LoadOutcome::Ready(h) => assert!(Rc::ptr_eq(&h.id, &handle.id)),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn sampling_policy_is_keyed_by_address_and_filter() {
        use std::collections::HashSet;

        let nearest = SamplingPolicy {
            filter: FilterMode::Nearest,
            ..SamplingPolicy::TILE
        };
        let repeat = SamplingPolicy {
            address: AddressMode::Repeat,
            ..SamplingPolicy::TILE
        };
        let keys: HashSet<SamplingPolicy> =
            [SamplingPolicy::TILE, nearest, repeat, SamplingPolicy::TILE].into_iter().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(
            SamplingPolicy::TILE,
            SamplingPolicy {
                address: AddressMode::ClampToEdge,
                filter: FilterMode::Linear,
            }
        );

        let cache: ResourceCache<Tex, u8> = ResourceCache::new(nearest);
        assert_eq!(cache.policy(), nearest);
    }

    #[test]
    fn failure_settles_waiters_and_allows_retry() {
        let mut cache: ResourceCache<Tex, u8> = ResourceCache::default();
        let ticket = started(cache.load("bad.jpg", 1));
        cache.load("bad.jpg", 2);
        let settled = cache
            .complete(ticket, Err(LoadError::Network("404".into())))
            .expect("settled");
        assert_eq!(settled.waiters, vec![1, 2]);
        assert!(settled.result.is_err());
        assert_eq!(cache.stats().failures, 1);

        let retry = started(cache.load("bad.jpg", 3));
        assert_eq!(retry.key(), "bad.jpg");
        assert_eq!(cache.stats().fetches, 2);
    }

    #[test]
    fn completion_after_clear_is_discarded() {
        let mut cache: ResourceCache<Tex, u8> = ResourceCache::default();
        let ticket = started(cache.load("a.jpg", 1));
        cache.clear();
        assert!(cache.complete(ticket, Ok(tex(1))).is_none());
        assert!(cache.get("a.jpg").is_none());
        assert_eq!(cache.stats().discarded, 1);
    }

    #[test]
    fn duplicate_completion_is_ignored() {
        let mut cache: ResourceCache<Tex, u8> = ResourceCache::default();
        let ticket = started(cache.load("a.jpg", 1));
        assert!(cache.complete(ticket.clone(), Ok(tex(1))).is_some());
        assert!(cache.complete(ticket, Ok(tex(2))).is_none());
        assert_eq!(*cache.get("a.jpg").expect("ready").id, 1);
    }

    #[test]
    fn clear_releases_ready_handles() {
        let mut cache: ResourceCache<Tex, u8> = ResourceCache::default();
        let shared = tex(9);
        let t = started(cache.load("a.jpg", 1));
        cache.complete(t, Ok(shared.clone()));
        assert_eq!(Rc::strong_count(&shared.id), 2);
        assert_eq!(cache.clear(), 1);
        assert_eq!(Rc::strong_count(&shared.id), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_only_touches_ready_entries() {
        let mut cache: ResourceCache<Tex, u8> = ResourceCache::default();
        let t = started(cache.load("a.jpg", 1));
        assert!(cache.evict("a.jpg").is_none());
        cache.complete(t, Ok(tex(1)));
        assert!(cache.evict("a.jpg").is_some());
        assert!(cache.get("a.jpg").is_none());
    }

    #[test]
    fn load_error_display() {
        assert_eq!(LoadError::Cancelled.to_string(), "load cancelled");
        assert_eq!(
            LoadError::Decode("bad png".into()).to_string(),
            "decode error: bad png"
        );
    }
}
