//! Shared usage statistics cache
//!
//! Many consumers (dashboards, pollers, one-shot commands) ask for the same
//! statistics independently. The cache answers from memory while the data is
//! fresh, funnels concurrent requests for the same backend into one network
//! call, and never lets data from one backend show up under another.
//!
//! Superseded requests are cancelled logically: every request takes a token
//! from a monotonic counter, and [`commit`] drops any result whose token is no
//! longer current. All state changes after a fetch go through [`commit`].

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use cpascope_client::{ClientError, ConnectionHandle, UsageResponse, UsageSource};
use cpascope_types::{Connection, UsageSnapshot};

use crate::extract::build_snapshot;

/// How long cached statistics are served without refetching
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(240);

/// Options for [`UsageStatsCache::load`]
#[derive(Clone, Copy, Debug)]
pub struct LoadOptions {
    /// Refetch even if the cached data is fresh
    pub force: bool,

    /// Maximum age of cached data that is still served
    pub stale_time: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            force: false,
            stale_time: DEFAULT_STALE_TIME,
        }
    }
}

impl LoadOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn with_stale_time(stale_time: Duration) -> Self {
        Self {
            stale_time,
            ..Self::default()
        }
    }
}

/// Failure shared by every caller waiting on the same request
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("failed to load usage statistics: {0}")]
    Fetch(String),
}

type LoadResult = Result<Arc<UsageSnapshot>, UsageError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

struct InFlight {
    scope_key: String,
    token: u64,
    load: SharedLoad,
}

#[derive(Default)]
struct CacheState {
    snapshot: Arc<UsageSnapshot>,

    /// Monotonic time of the last successful commit
    refreshed_at: Option<Instant>,

    last_error: Option<String>,

    /// Token of the newest request; anything older is discarded on arrival
    request_token: u64,

    in_flight: Option<InFlight>,
}

impl CacheState {
    fn is_fresh(&self, stale_time: Duration) -> bool {
        self.refreshed_at
            .is_some_and(|at| at.elapsed() < stale_time)
    }

    /// Forget everything cached and orphan any in-flight request
    fn reset(&mut self) {
        self.request_token += 1;
        self.snapshot = Arc::new(UsageSnapshot::default());
        self.refreshed_at = None;
        self.last_error = None;
        self.in_flight = None;
    }
}

enum Plan {
    Cached(Arc<UsageSnapshot>),
    Await(SharedLoad),
}

/// Shared, deduplicated, staleness-aware usage statistics
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct UsageStatsCache {
    connection: ConnectionHandle,
    source: Arc<dyn UsageSource>,
    state: Arc<Mutex<CacheState>>,
}

impl UsageStatsCache {
    /// Create an empty cache reading the live connection from `connection`
    pub fn new(connection: ConnectionHandle, source: Arc<dyn UsageSource>) -> Self {
        Self {
            connection,
            source,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Return usage statistics, fetching only when needed
    pub async fn load(&self, options: LoadOptions) -> LoadResult {
        match self.plan(self.connection.current(), options) {
            Plan::Cached(snapshot) => Ok(snapshot),
            Plan::Await(load) => load.await,
        }
    }

    /// Currently cached statistics (empty if never loaded for this backend)
    pub fn snapshot(&self) -> Arc<UsageSnapshot> {
        Arc::clone(&self.state.lock().snapshot)
    }

    /// Message of the most recent failed load, cleared by the next success
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    /// Drop all cached data; any in-flight result will be discarded
    pub fn invalidate(&self) {
        debug!("usage cache invalidated");
        self.state.lock().reset();
    }

    /// Tear the cache down; pending waiters still receive their result
    pub fn dispose(self) {
        self.invalidate();
    }

    fn plan(&self, connection: Connection, options: LoadOptions) -> Plan {
        let scope_key = connection.scope_key();
        let mut state = self.state.lock();

        if let Some(in_flight) = &state.in_flight {
            if in_flight.scope_key == scope_key {
                debug!(token = in_flight.token, "joining in-flight usage request");
                return Plan::Await(in_flight.load.clone());
            }
            debug!(
                token = in_flight.token,
                "superseding usage request for another backend"
            );
            state.request_token += 1;
            state.in_flight = None;
        }

        if state
            .snapshot
            .scope_key
            .as_deref()
            .is_some_and(|cached| cached != scope_key)
        {
            debug!("backend changed, dropping cached usage");
            state.reset();
        }

        if !options.force && state.is_fresh(options.stale_time) {
            debug!("serving cached usage");
            return Plan::Cached(Arc::clone(&state.snapshot));
        }

        state.request_token += 1;
        let token = state.request_token;
        let load = self.start_load(connection, scope_key.clone(), token);
        state.in_flight = Some(InFlight {
            scope_key,
            token,
            load: load.clone(),
        });
        Plan::Await(load)
    }

    fn start_load(&self, connection: Connection, scope_key: String, token: u64) -> SharedLoad {
        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);

        async move {
            let result = source.fetch_usage(&connection).await;
            commit(&state, token, &scope_key, result)
        }
        .boxed()
        .shared()
    }
}

/// Apply a finished request to the cache if it is still the newest one
fn commit(
    state: &Mutex<CacheState>,
    token: u64,
    scope_key: &str,
    result: Result<UsageResponse, ClientError>,
) -> LoadResult {
    let mut state = state.lock();
    let current = state.request_token == token;
    if state.in_flight.as_ref().is_some_and(|f| f.token == token) {
        state.in_flight = None;
    }

    match result {
        Ok(response) => {
            let snapshot = Arc::new(build_snapshot(response.usage, scope_key));
            if current {
                debug!(
                    token,
                    records = snapshot.usage_details.len(),
                    "usage statistics committed"
                );
                state.snapshot = Arc::clone(&snapshot);
                state.refreshed_at = Some(Instant::now());
                state.last_error = None;
            } else {
                debug!(token, "discarding superseded usage response");
            }
            Ok(snapshot)
        }
        Err(err) => {
            let message = err.to_string();
            if current {
                warn!(token, error = %message, "usage fetch failed");
                state.last_error = Some(message.clone());
            }
            Err(UsageError::Fetch(message))
        }
    }
}
