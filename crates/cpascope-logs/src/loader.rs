use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use cpascope_client::{ClientError, ConnectionHandle, LogSource, LogsResponse};
use cpascope_types::Connection;

use crate::{BufferLimits, LogBuffer};

#[derive(Debug, Error)]
pub enum LogsError {
    #[error("failed to load logs: {0}")]
    Fetch(#[source] ClientError),

    #[error("failed to clear logs: {0}")]
    Clear(#[source] ClientError),
}

/// What a call to [`LogLoader::load`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Response applied to the buffer; `full` when it replaced the contents
    Committed {
        received: usize,
        dropped: usize,
        full: bool,
    },

    /// A fetch was running; a full reload runs once it settles
    Deferred,

    /// A fetch was running; incremental requests are dropped
    Skipped,

    /// The backend or the buffer changed while the fetch was running
    Discarded,
}

struct LoaderState {
    buffer: LogBuffer,

    /// `latest-timestamp` of the newest applied response, sent as `after`
    latest_timestamp: Option<i64>,

    /// Backend the buffered lines belong to
    scope_key: Option<String>,

    loading: bool,
    pending_reload: bool,

    /// Bumped by `clear`; fetches started under an older epoch are discarded
    epoch: u64,

    last_error: Option<String>,
}

struct Request {
    connection: Connection,
    scope_key: String,
    after: Option<i64>,
    epoch: u64,
}

enum Begin {
    Busy(LoadOutcome),
    Fetch(Request),
}

/// Clears the loading flag when a `load` future is dropped mid-fetch
struct InFlight<'a> {
    state: &'a Mutex<LoaderState>,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!("log fetch abandoned");
            self.state.lock().loading = false;
        }
    }
}

/// Fetches backend logs into a [`LogBuffer`], one request at a time
///
/// Cloning is cheap; clones share the same buffer.
#[derive(Clone)]
pub struct LogLoader {
    connection: ConnectionHandle,
    source: Arc<dyn LogSource>,
    state: Arc<Mutex<LoaderState>>,
}

impl LogLoader {
    pub fn new(connection: ConnectionHandle, source: Arc<dyn LogSource>) -> Self {
        Self::with_limits(connection, source, BufferLimits::default())
    }

    pub fn with_limits(
        connection: ConnectionHandle,
        source: Arc<dyn LogSource>,
        limits: BufferLimits,
    ) -> Self {
        Self {
            connection,
            source,
            state: Arc::new(Mutex::new(LoaderState {
                buffer: LogBuffer::new(limits),
                latest_timestamp: None,
                scope_key: None,
                loading: false,
                pending_reload: false,
                epoch: 0,
                last_error: None,
            })),
        }
    }

    /// Fetch logs: everything (`incremental == false`) or only lines after the
    /// last seen timestamp.
    ///
    /// A failed fetch leaves the buffer untouched. Dropping the future mid-fetch
    /// returns the loader to idle; a reload deferred behind it runs on the next call.
    pub async fn load(&self, incremental: bool) -> Result<LoadOutcome, LogsError> {
        let mut incremental = incremental;
        loop {
            let request = match self.begin(incremental) {
                Begin::Busy(outcome) => return Ok(outcome),
                Begin::Fetch(request) => request,
            };

            let mut in_flight = InFlight {
                state: &self.state,
                settled: false,
            };
            let result = self
                .source
                .fetch_logs(&request.connection, request.after)
                .await;
            in_flight.settled = true;

            let (outcome, reload) = self.finish(request, result);
            if !reload {
                return outcome;
            }
            debug!("running deferred log reload");
            incremental = false;
        }
    }

    fn begin(&self, mut incremental: bool) -> Begin {
        let connection = self.connection.current();
        let scope_key = connection.scope_key();
        let mut state = self.state.lock();

        if state.loading {
            if incremental {
                return Begin::Busy(LoadOutcome::Skipped);
            }
            state.pending_reload = true;
            return Begin::Busy(LoadOutcome::Deferred);
        }

        // left over from an abandoned fetch
        if std::mem::take(&mut state.pending_reload) {
            incremental = false;
        }

        if state.scope_key.as_deref() != Some(scope_key.as_str()) {
            if state.scope_key.is_some() {
                debug!("backend changed, dropping buffered logs");
            }
            state.buffer.clear();
            state.latest_timestamp = None;
            state.last_error = None;
            state.scope_key = Some(scope_key.clone());
        }

        state.loading = true;
        Begin::Fetch(Request {
            connection,
            scope_key,
            after: if incremental {
                state.latest_timestamp
            } else {
                None
            },
            epoch: state.epoch,
        })
    }

    /// Apply a settled fetch; the flag says whether a reload was requested meanwhile
    fn finish(
        &self,
        request: Request,
        result: Result<LogsResponse, ClientError>,
    ) -> (Result<LoadOutcome, LogsError>, bool) {
        let live_scope = self.connection.scope_key();
        let mut state = self.state.lock();
        state.loading = false;
        let reload = std::mem::take(&mut state.pending_reload);

        if live_scope != request.scope_key {
            debug!("discarding log response for a previous backend");
            state.buffer.clear();
            state.latest_timestamp = None;
            state.last_error = None;
            state.scope_key = None;
            return (Ok(LoadOutcome::Discarded), reload);
        }
        if state.epoch != request.epoch {
            debug!("discarding log response fetched before clear");
            return (Ok(LoadOutcome::Discarded), reload);
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "log fetch failed");
                state.last_error = Some(err.to_string());
                return (Err(LogsError::Fetch(err)), reload);
            }
        };

        let received = response.lines.len();
        let dropped = match request.after {
            Some(after) => {
                state.latest_timestamp = response
                    .latest_timestamp
                    .map_or(Some(after), |ts| Some(ts.max(after)));
                state.buffer.append(response.lines)
            }
            None => {
                state.latest_timestamp = response.latest_timestamp;
                let dropped = received.saturating_sub(state.buffer.limits().max_lines);
                state.buffer.replace(response.lines);
                dropped
            }
        };
        state.last_error = None;

        debug!(
            received,
            dropped,
            total = state.buffer.len(),
            "log lines committed"
        );
        (
            Ok(LoadOutcome::Committed {
                received,
                dropped,
                full: request.after.is_none(),
            }),
            reload,
        )
    }

    /// Run `f` against the buffer
    pub fn with_buffer<R>(&self, f: impl FnOnce(&LogBuffer) -> R) -> R {
        f(&self.state.lock().buffer)
    }

    /// Reveal up to `count` earlier lines
    pub fn load_more(&self, count: usize) -> usize {
        self.state.lock().buffer.load_more(count)
    }

    pub fn load_more_step(&self) -> usize {
        self.state.lock().buffer.load_more_step()
    }

    pub fn set_stick_to_bottom(&self, stick: bool) {
        self.state.lock().buffer.set_stick_to_bottom(stick);
    }

    pub fn latest_timestamp(&self) -> Option<i64> {
        self.state.lock().latest_timestamp
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    /// Drop buffered lines and the timestamp marker; a running fetch is discarded
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.buffer.clear();
        state.latest_timestamp = None;
        state.last_error = None;
    }

    /// Delete the server-side log, then clear locally
    pub async fn clear_remote(&self) -> Result<(), LogsError> {
        let connection = self.connection.current();
        self.source
            .clear_logs(&connection)
            .await
            .map_err(LogsError::Clear)?;
        self.clear();
        debug!("server logs cleared");
        Ok(())
    }
}
