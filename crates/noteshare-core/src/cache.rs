//! Short-lived note cache with request coalescing.
//!
//! Concurrent `get_note` calls for the same id share one REST request. Results
//! are kept for a few seconds so navigating back and forth does not refetch.

use crate::api::{ApiError, NoteApi, Result};
use crate::note::Note;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long fetched notes stay fresh.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Upper bound on a single coalesced fetch.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub request_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Option<Note>>>>;

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, (Note, Instant)>,
    in_flight: HashMap<String, InFlight>,
    next_generation: u64,
}

impl CacheState {
    fn fresh(&mut self, id: &str, ttl: Duration) -> Option<Note> {
        match self.entries.get(id) {
            Some((note, at)) if at.elapsed() < ttl => Some(note.clone()),
            Some(_) => {
                self.entries.remove(id);
                None
            }
            None => None,
        }
    }
}

/// Caching front for `NoteApi::get_note`.
pub struct NoteCache {
    api: Arc<dyn NoteApi>,
    config: CacheConfig,
    state: Arc<Mutex<CacheState>>,
}

impl NoteCache {
    pub fn new(api: Arc<dyn NoteApi>, config: CacheConfig) -> Self {
        Self {
            api,
            config,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        lock(&self.state)
    }

    /// Fetch a note, served from cache when fresh and shared with any fetch
    /// for the same id already in flight.
    ///
    /// A fetch that exceeds the request timeout fails with
    /// `ApiError::Timeout` and frees the slot, so the next call retries.
    pub async fn get_note(&self, id: &str) -> Result<Option<Note>> {
        let fetch = {
            let mut state = self.lock();
            if let Some(note) = state.fresh(id, self.config.ttl) {
                debug!("Cache hit for note {}", id);
                return Ok(Some(note));
            }
            match state.in_flight.get(id) {
                Some(in_flight) => {
                    debug!("Joining in-flight fetch for note {}", id);
                    in_flight.fetch.clone()
                }
                None => {
                    state.next_generation += 1;
                    let generation = state.next_generation;
                    let fetch = self.start_fetch(id.to_string(), generation);
                    state.in_flight.insert(
                        id.to_string(),
                        InFlight {
                            generation,
                            fetch: fetch.clone(),
                        },
                    );
                    fetch
                }
            }
        };
        fetch.await
    }

    fn start_fetch(&self, id: String, generation: u64) -> SharedFetch {
        let api = Arc::clone(&self.api);
        let state = Arc::downgrade(&self.state);
        let timeout = self.config.request_timeout;

        async move {
            let result = match tokio::time::timeout(timeout, api.get_note(&id)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Fetching note {} timed out after {:?}", id, timeout);
                    Err(ApiError::Timeout)
                }
            };
            settle(&state, &id, generation, &result);
            result
        }
        .boxed()
        .shared()
    }

    /// Fresh cached copy, without fetching.
    pub fn get_cached(&self, id: &str) -> Option<Note> {
        self.lock().fresh(id, self.config.ttl)
    }

    /// Store a note obtained elsewhere (e.g. just created).
    pub fn insert(&self, note: Note) {
        self.lock()
            .entries
            .insert(note.id.clone(), (note, Instant::now()));
    }

    pub fn invalidate(&self, id: &str) {
        self.lock().entries.remove(id);
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Release the in-flight slot and cache a found note.
fn settle(state: &Weak<Mutex<CacheState>>, id: &str, generation: u64, result: &Result<Option<Note>>) {
    let Some(state) = state.upgrade() else { return };
    let mut state = lock(&state);
    if state
        .in_flight
        .get(id)
        .is_some_and(|f| f.generation == generation)
    {
        state.in_flight.remove(id);
    }
    if let Ok(Some(note)) = result {
        state
            .entries
            .insert(id.to_string(), (note.clone(), Instant::now()));
    }
}
