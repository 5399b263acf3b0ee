use std::sync::Arc;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::Serialize;

use crate::tree::node::Node;

/// A single fuzzy-find result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub relative_path: String,
    pub score: i64,
    pub size: u64,
}

/// Fuzzy-match `query` against the relative path of every content node
/// below `root`, best matches first.
///
/// Ties keep tree order. An empty query yields nothing.
pub fn find(root: &Arc<Node>, query: &str, limit: usize) -> Vec<SearchResult> {
    let query = query.trim();
    if query.is_empty() || limit == 0 {
        return Vec::new();
    }
    let matcher = SkimMatcherV2::default().ignore_case();

    let mut results: Vec<SearchResult> = root
        .all_descendants()
        .iter()
        .filter(|n| n.has_content())
        .filter_map(|n| {
            let path = n.relative_path();
            matcher.fuzzy_match(&path, query).map(|score| SearchResult {
                relative_path: path,
                score,
                size: n.byte_length(),
            })
        })
        .collect();

    results.sort_by(|a, b| b.score.cmp(&a.score));
    results.truncate(limit);
    results
}
