use std::collections::{BTreeMap, HashMap};

use cpascope_types::{ParsedLogLine, StatusGroup};

/// Distinct facet values present in a set of parsed lines
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FacetSummary {
    /// Upper-case methods with line counts
    pub methods: BTreeMap<String, usize>,

    pub status_groups: BTreeMap<StatusGroup, usize>,

    /// Paths without query string, most frequent first
    pub paths: Vec<(String, usize)>,
}

impl FacetSummary {
    pub fn collect<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a ParsedLogLine>,
    {
        let mut summary = Self::default();
        let mut paths: HashMap<&str, usize> = HashMap::new();

        for line in lines {
            if let Some(method) = &line.method {
                *summary.methods.entry(method.to_uppercase()).or_default() += 1;
            }
            if let Some(group) = line.status_group() {
                *summary.status_groups.entry(group).or_default() += 1;
            }
            if let Some(path) = line.path_without_query() {
                *paths.entry(path).or_default() += 1;
            }
        }

        summary.paths = paths
            .into_iter()
            .map(|(path, count)| (path.to_string(), count))
            .collect();
        summary
            .paths
            .sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        summary
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.status_groups.is_empty() && self.paths.is_empty()
    }
}
