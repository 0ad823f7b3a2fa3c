//! Log processing for cpascope
//!
//! This crate provides log buffering, loading, parsing and filtering for the
//! proxy's server log, plus the persisted viewer state.

mod buffer;
mod facets;
mod filter;
mod loader;
mod parser;
mod view_state;

pub use buffer::{
    BufferLimits, INITIAL_DISPLAY_LINES, LOAD_MORE_LINES, LogBuffer, MAX_BUFFER_LINES,
};
pub use facets::FacetSummary;
pub use filter::{FilterCache, FilteredView, LogFilter};
pub use loader::{LoadOutcome, LogLoader, LogsError};
pub use parser::{LineParser, LogParser};
pub use view_state::ViewState;

// Re-export types used in our public API
pub use cpascope_types::{LogLevel, ParsedLogLine, StatusGroup};
