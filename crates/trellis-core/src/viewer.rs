//! The acting identity for one logical request, with its request-scoped cache.
//!
//! A `Viewer` is created per request and dropped at request end; its cache
//! holds viewer-specific projections and must never be shared across
//! requests. Concurrent loads of the same key on one viewer are coalesced:
//! the first caller registers itself as the loader, later callers wait on a
//! watch channel that closes when the loader is done (or gives up).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::entity::{Edge, Object};
use crate::types::TypeCode;

/// Cache key for one resolved read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Object(Uuid),
    Edge {
        from_id: Uuid,
        edge_type: TypeCode,
        to_id: Uuid,
    },
    EdgeList {
        from_id: Uuid,
        edge_type: TypeCode,
    },
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Object(id) => write!(f, "{id}"),
            CacheKey::Edge {
                from_id,
                edge_type,
                to_id,
            } => write!(f, "{from_id}:{edge_type}:{to_id}"),
            CacheKey::EdgeList { from_id, edge_type } => write!(f, "{from_id}:{edge_type}"),
        }
    }
}

/// A cached read result. `None` records a confirmed (or privacy-masked) absence.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    Object(Option<Object>),
    Edge(Option<Edge>),
    Edges(Vec<Edge>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerKind {
    Standard,
    /// Bypasses every `cansee` check.
    ReadAll,
    /// Bypasses every check, read and write.
    WriteAll,
}

struct Pending {
    generation: u64,
    receiver: watch::Receiver<()>,
}

#[derive(Default)]
struct ViewerState {
    cache: HashMap<CacheKey, CacheEntry>,
    pending: HashMap<CacheKey, Pending>,
    generation: u64,
}

pub struct Viewer {
    id: Uuid,
    kind: ViewerKind,
    state: Mutex<ViewerState>,
    read_all: OnceLock<Box<Viewer>>,
    queries: AtomicU64,
}

/// Outcome of [`Viewer::claim`].
pub enum Claim<'v> {
    Cached(CacheEntry),
    Load(LoadGuard<'v>),
}

/// Held by the single caller responsible for loading a key.
///
/// Dropping the guard without calling [`LoadGuard::finish`] releases the
/// waiters, who then retry the load themselves.
pub struct LoadGuard<'v> {
    viewer: &'v Viewer,
    key: CacheKey,
    generation: u64,
    _sender: watch::Sender<()>,
}

impl LoadGuard<'_> {
    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// Publish the loaded value to the cache and wake all waiters.
    pub fn finish(self, entry: CacheEntry) {
        self.viewer.set_cache(self.key, entry);
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.viewer.state.lock();
        let ours = state
            .pending
            .get(&self.key)
            .is_some_and(|p| p.generation == self.generation);
        if ours {
            state.pending.remove(&self.key);
        }
    }
}

impl Viewer {
    fn with_kind(id: Uuid, kind: ViewerKind) -> Self {
        Self {
            id,
            kind,
            state: Mutex::new(ViewerState::default()),
            read_all: OnceLock::new(),
            queries: AtomicU64::new(0),
        }
    }

    pub fn new(id: Uuid) -> Self {
        Self::with_kind(id, ViewerKind::Standard)
    }

    /// Anonymous viewer; its id is the nil uuid.
    pub fn logged_out() -> Self {
        Self::new(Uuid::nil())
    }

    /// Fresh all-seeing viewer for internal referential-integrity lookups.
    pub fn read_all() -> Self {
        Self::with_kind(Uuid::nil(), ViewerKind::ReadAll)
    }

    /// Fresh all-writing viewer for system-initiated writes.
    pub fn write_all() -> Self {
        Self::with_kind(Uuid::nil(), ViewerKind::WriteAll)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ViewerKind {
        self.kind
    }

    pub fn is_read_all(&self) -> bool {
        matches!(self.kind, ViewerKind::ReadAll | ViewerKind::WriteAll)
    }

    pub fn is_write_all(&self) -> bool {
        self.kind == ViewerKind::WriteAll
    }

    pub fn is_logged_out(&self) -> bool {
        self.id.is_nil()
    }

    /// The all-seeing companion of this viewer, sharing its id and lifetime.
    pub fn read_all_viewer(&self) -> &Viewer {
        if self.is_read_all() {
            return self;
        }
        self.read_all
            .get_or_init(|| Box::new(Viewer::with_kind(self.id, ViewerKind::ReadAll)))
    }

    // ── Cache ────────────────────────────────────────────────────

    pub fn exists_cache(&self, key: &CacheKey) -> bool {
        self.state.lock().cache.contains_key(key)
    }

    pub fn from_cache(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.lock().cache.get(key).cloned()
    }

    /// Store a value and clear any pending marker for the key.
    pub fn set_cache(&self, key: CacheKey, entry: CacheEntry) {
        let mut state = self.state.lock();
        state.pending.remove(&key);
        state.cache.insert(key, entry);
    }

    /// Forget a key here and on the all-seeing companion.
    pub fn delete_cache(&self, key: &CacheKey) {
        self.state.lock().cache.remove(key);
        if let Some(companion) = self.read_all.get() {
            companion.delete_cache(key);
        }
    }

    pub fn exists_pending(&self, key: &CacheKey) -> bool {
        self.state.lock().pending.contains_key(key)
    }

    /// Resolve `key` from the cache, wait out an in-flight load of it, or
    /// become its loader.
    ///
    /// A waiter re-checks at most `attempts` times, waiting up to `wait` each
    /// time; after that it loads the key itself. The bound also releases a
    /// load that re-enters itself through privacy evaluation.
    pub async fn claim(&self, key: CacheKey, attempts: u32, wait: Duration) -> Claim<'_> {
        for _ in 0..attempts {
            let mut waiter = {
                let mut state = self.state.lock();
                if let Some(entry) = state.cache.get(&key) {
                    return Claim::Cached(entry.clone());
                }
                match state.pending.get(&key) {
                    Some(pending) => pending.receiver.clone(),
                    None => return Claim::Load(self.register(&mut state, key)),
                }
            };
            // Nothing is ever sent: this resolves when the loader drops its sender.
            let _ = tokio::time::timeout(wait, waiter.changed()).await;
        }

        let mut state = self.state.lock();
        if let Some(entry) = state.cache.get(&key) {
            return Claim::Cached(entry.clone());
        }
        tracing::debug!(key = %key, "Coalescing attempts exhausted, loading directly");
        Claim::Load(self.register(&mut state, key))
    }

    fn register(&self, state: &mut ViewerState, key: CacheKey) -> LoadGuard<'_> {
        state.generation += 1;
        let generation = state.generation;
        let (sender, receiver) = watch::channel(());
        state.pending.insert(
            key,
            Pending {
                generation,
                receiver,
            },
        );
        LoadGuard {
            viewer: self,
            key,
            generation,
            _sender: sender,
        }
    }

    // ── Accounting ───────────────────────────────────────────────

    /// Count one storage read performed on behalf of this viewer.
    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Viewer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Viewer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
