use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use cpascope_types::{MANAGEMENT_PREFIX, ParsedLogLine, StatusGroup};

use crate::{LineParser, LogBuffer};

/// Search and facet filters for the log view
///
/// Empty facet sets mean "no constraint". A line without the relevant field
/// fails any active facet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFilter {
    /// Case-insensitive substring; when set, the whole buffer is searched
    pub search: String,

    /// Drop lines produced by management API traffic
    pub hide_management: bool,

    /// HTTP methods to include, upper case
    pub methods: BTreeSet<String>,

    pub status_groups: BTreeSet<StatusGroup>,

    /// Request paths to include, without query string
    pub paths: BTreeSet<String>,
}

/// Result of running a [`LogFilter`] over a buffer
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilteredView {
    pub lines: Vec<ParsedLogLine>,

    /// Lines the pipeline started from
    pub base_count: usize,

    /// Lines removed by the filters, relative to `base_count`
    pub removed_count: usize,

    /// Whether the base set was the whole buffer instead of the visible window
    pub searched_all: bool,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, search: &str) -> Self {
        self.search = search.to_string();
        self
    }

    pub fn with_hide_management(mut self, hide: bool) -> Self {
        self.hide_management = hide;
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.methods = methods
            .into_iter()
            .map(|m| m.as_ref().trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    pub fn with_status_groups<I>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = StatusGroup>,
    {
        self.status_groups = groups.into_iter().collect();
        self
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.paths = paths
            .into_iter()
            .map(|p| strip_query(p.as_ref().trim()).to_string())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    /// Add or remove a method from the facet
    pub fn toggle_method(&mut self, method: &str) {
        toggle(&mut self.methods, method.trim().to_uppercase());
    }

    pub fn toggle_status_group(&mut self, group: StatusGroup) {
        toggle(&mut self.status_groups, group);
    }

    pub fn toggle_path(&mut self, path: &str) {
        toggle(&mut self.paths, strip_query(path.trim()).to_string());
    }

    pub fn clear_facets(&mut self) {
        self.methods.clear();
        self.status_groups.clear();
        self.paths.clear();
    }

    pub fn has_search(&self) -> bool {
        !self.search.trim().is_empty()
    }

    pub fn has_facets(&self) -> bool {
        !self.methods.is_empty() || !self.status_groups.is_empty() || !self.paths.is_empty()
    }

    /// Check if filter is empty (keeps everything)
    pub fn is_empty(&self) -> bool {
        !self.has_search() && !self.hide_management && !self.has_facets()
    }

    /// Run the pipeline: base set, management toggle, search, parse, facets
    pub fn apply<P>(&self, buffer: &LogBuffer, parser: &P) -> FilteredView
    where
        P: LineParser + ?Sized,
    {
        let needle = self.search.trim().to_lowercase();
        let searched_all = !needle.is_empty();

        let base: Vec<&str> = if searched_all {
            buffer.all().collect()
        } else {
            buffer.visible().collect()
        };
        let base_count = base.len();

        let lines: Vec<ParsedLogLine> = base
            .into_iter()
            .filter_map(|raw| self.keep(raw, &needle, parser))
            .collect();

        FilteredView {
            removed_count: base_count - lines.len(),
            base_count,
            searched_all,
            lines,
        }
    }

    /// Run a single raw line through the pipeline, returning it parsed if kept
    pub fn matches_line<P>(&self, raw: &str, parser: &P) -> Option<ParsedLogLine>
    where
        P: LineParser + ?Sized,
    {
        self.keep(raw, &self.search.trim().to_lowercase(), parser)
    }

    fn keep<P>(&self, raw: &str, needle: &str, parser: &P) -> Option<ParsedLogLine>
    where
        P: LineParser + ?Sized,
    {
        if self.hide_management && raw.contains(MANAGEMENT_PREFIX) {
            return None;
        }
        if !needle.is_empty() && !raw.to_lowercase().contains(needle) {
            return None;
        }
        let line = parser.parse_line(raw);
        self.matches_facets(&line).then_some(line)
    }

    /// Apply only the facet filters to already parsed lines
    pub fn refine(&self, lines: &[ParsedLogLine]) -> Vec<ParsedLogLine> {
        lines
            .iter()
            .filter(|line| self.matches_facets(line))
            .cloned()
            .collect()
    }

    /// Check a parsed line against the method, status and path facets
    pub fn matches_facets(&self, line: &ParsedLogLine) -> bool {
        if !self.methods.is_empty() {
            match &line.method {
                Some(method) if self.methods.contains(&method.to_uppercase()) => {}
                _ => return false,
            }
        }

        if !self.status_groups.is_empty() {
            match line.status_group() {
                Some(group) if self.status_groups.contains(&group) => {}
                _ => return false,
            }
        }

        if !self.paths.is_empty() {
            match line.path_without_query() {
                Some(path) if self.paths.contains(path) => {}
                _ => return false,
            }
        }

        true
    }
}

fn toggle<T: Ord>(set: &mut BTreeSet<T>, value: T) {
    if !set.remove(&value) {
        set.insert(value);
    }
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

/// Cache for filtered results to avoid re-filtering on every render
///
/// Valid while the buffer generation and the filter are unchanged.
#[derive(Debug, Default)]
pub struct FilterCache {
    key: Option<(u64, LogFilter)>,
    view: FilteredView,
}

impl FilterCache {
    /// Check if cache needs to be rebuilt for this buffer and filter
    pub fn needs_refresh(&self, buffer: &LogBuffer, filter: &LogFilter) -> bool {
        match &self.key {
            Some((generation, cached)) => *generation != buffer.generation() || cached != filter,
            None => true,
        }
    }

    /// Filtered view for the buffer, recomputed only when stale
    pub fn view<P>(&mut self, buffer: &LogBuffer, filter: &LogFilter, parser: &P) -> &FilteredView
    where
        P: LineParser + ?Sized,
    {
        if self.needs_refresh(buffer, filter) {
            self.view = filter.apply(buffer, parser);
            self.key = Some((buffer.generation(), filter.clone()));
        }
        &self.view
    }

    pub fn invalidate(&mut self) {
        self.key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferLimits, LogParser};

    fn access(method: &str, path: &str, status: u16) -> String {
        format!(
            r#"[2025-06-20 15:04:05] [info ] [gin_logger.go:58] {} |  1.0ms | 127.0.0.1 | {} "{}""#,
            status, method, path
        )
    }

    fn buffer(lines: Vec<String>, initial_display: usize) -> LogBuffer {
        let mut buffer = LogBuffer::new(BufferLimits {
            max_lines: 1_000,
            initial_display,
            load_more: 10,
        });
        buffer.replace(lines);
        buffer
    }

    fn sample() -> Vec<String> {
        vec![
            access("GET", "/v1/models", 200),
            access("POST", "/v1/chat/completions", 200),
            access("POST", "/v1/chat/completions?stream=true", 502),
            access("GET", "/v0/management/usage", 200),
            "[2025-06-20 15:04:06] [warn ] [auth.go:12] token refresh slow".to_string(),
            access("DELETE", "/v0/management/logs", 401),
        ]
    }

    #[test]
    fn test_empty_filter_keeps_visible_window() {
        let buffer = buffer(sample(), 4);
        let view = LogFilter::new().apply(&buffer, &LogParser);
        assert_eq!(view.base_count, 4);
        assert_eq!(view.lines.len(), 4);
        assert_eq!(view.removed_count, 0);
        assert!(!view.searched_all);
    }

    #[test]
    fn test_search_covers_whole_buffer() {
        let buffer = buffer(sample(), 2);
        let view = LogFilter::new().with_search("V1/MODELS").apply(&buffer, &LogParser);

        assert!(view.searched_all);
        assert_eq!(view.base_count, 6);
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.lines[0].path.as_deref(), Some("/v1/models"));
        assert_eq!(view.removed_count, 5);
    }

    #[test]
    fn test_hide_management_traffic() {
        let buffer = buffer(sample(), 100);
        let view = LogFilter::new()
            .with_hide_management(true)
            .apply(&buffer, &LogParser);
        assert_eq!(view.lines.len(), 4);
        assert!(view
            .lines
            .iter()
            .all(|l| !l.raw.contains("/v0/management")));
        assert_eq!(view.removed_count, 2);
    }

    #[test]
    fn test_facets_require_field() {
        let buffer = buffer(sample(), 100);

        let by_method = LogFilter::new()
            .with_methods(["post"])
            .apply(&buffer, &LogParser);
        assert_eq!(by_method.lines.len(), 2);

        let by_status = LogFilter::new()
            .with_status_groups([StatusGroup::ServerError, StatusGroup::ClientError])
            .apply(&buffer, &LogParser);
        assert_eq!(by_status.lines.len(), 2);

        // the auth.go line has no path and is dropped by an active path facet
        let by_path = LogFilter::new()
            .with_paths(["/v1/chat/completions"])
            .apply(&buffer, &LogParser);
        assert_eq!(by_path.lines.len(), 2);
        assert_eq!(by_path.removed_count, 4);
    }

    #[test]
    fn test_combined_pipeline() {
        let buffer = buffer(sample(), 100);
        let view = LogFilter::new()
            .with_search("chat")
            .with_methods(["POST"])
            .with_status_groups([StatusGroup::Success])
            .apply(&buffer, &LogParser);
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.lines[0].status_code, Some(200));
    }

    #[test]
    fn test_refine_is_idempotent() {
        let buffer = buffer(sample(), 100);
        let parsed = LogFilter::new().apply(&buffer, &LogParser).lines;
        let filter = LogFilter::new()
            .with_methods(["GET", "POST"])
            .with_status_groups([StatusGroup::Success]);

        let once = filter.refine(&parsed);
        let twice = filter.refine(&once);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn test_matches_line() {
        let filter = LogFilter::new()
            .with_hide_management(true)
            .with_search("Completions");
        let kept = filter.matches_line(&access("POST", "/v1/chat/completions", 200), &LogParser);
        assert_eq!(kept.and_then(|l| l.status_code), Some(200));
        assert!(filter
            .matches_line(&access("POST", "/v0/management/completions", 200), &LogParser)
            .is_none());
        assert!(filter.matches_line(&access("GET", "/v1/models", 200), &LogParser).is_none());
    }

    #[test]
    fn test_toggle() {
        let mut filter = LogFilter::new();
        filter.toggle_method("get");
        filter.toggle_path("/v1/models?x=1");
        filter.toggle_status_group(StatusGroup::ClientError);
        assert!(filter.methods.contains("GET"));
        assert!(filter.paths.contains("/v1/models"));
        assert!(filter.status_groups.contains(&StatusGroup::ClientError));
        filter.toggle_method("GET");
        assert!(filter.methods.is_empty());
        assert!(filter.has_facets());
        filter.clear_facets();
        assert!(filter.is_empty());
    }

    #[test]
    fn test_filter_cache_tracks_generation_and_filter() {
        let mut buffer = buffer(sample(), 100);
        let mut cache = FilterCache::default();
        let filter = LogFilter::new().with_methods(["GET"]);

        assert_eq!(cache.view(&buffer, &filter, &LogParser).lines.len(), 2);
        assert!(!cache.needs_refresh(&buffer, &filter));

        buffer.append(vec![access("GET", "/v1/models", 200)]);
        assert!(cache.needs_refresh(&buffer, &filter));
        // the window kept its size; reveal the line that scrolled out
        buffer.load_more(1);
        assert_eq!(cache.view(&buffer, &filter, &LogParser).lines.len(), 3);

        let other = LogFilter::new().with_methods(["DELETE"]);
        assert!(cache.needs_refresh(&buffer, &other));
        assert_eq!(cache.view(&buffer, &other, &LogParser).lines.len(), 1);
    }
}
