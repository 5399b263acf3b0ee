use std::sync::Arc;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::tree::node::Node;

/// Substring filter over relative paths.
///
/// Matching ignores case and diacritics, and (by default) any character
/// that is not alphanumeric, so `shipyard` matches `Ship_Yard\Dock.xml`.
#[derive(Debug, Clone)]
pub struct PathFilter {
    needle: String,
    ignore_symbols: bool,
}

impl PathFilter {
    /// Build a filter for `query`. Returns `None` when the query normalises
    /// to nothing, meaning everything is shown.
    pub fn new(query: &str, ignore_symbols: bool) -> Option<Self> {
        let needle = normalize(query, ignore_symbols);
        if needle.is_empty() {
            None
        } else {
            Some(Self {
                needle,
                ignore_symbols,
            })
        }
    }

    pub fn matches_text(&self, text: &str) -> bool {
        normalize(text, self.ignore_symbols).contains(&self.needle)
    }

    /// Content nodes match on their own relative path; branches match when
    /// any content node below them does.
    pub fn matches(&self, node: &Node) -> bool {
        if node.has_content() && self.matches_text(&node.relative_path()) {
            return true;
        }
        node.is_branch()
            && node
                .all_descendants()
                .iter()
                .filter(|n| n.has_content())
                .any(|n| self.matches_text(&n.relative_path()))
    }
}

/// Lowercase, strip combining marks, optionally drop non-alphanumerics.
pub fn normalize(text: &str, ignore_symbols: bool) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| !ignore_symbols || c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Set `is_hidden` on every node below `root` according to `query`.
///
/// Works over a snapshot of the descendants taken up front. Returns the
/// number of content leaves left visible.
pub fn apply_filter(root: &Arc<Node>, query: &str, ignore_symbols: bool) -> usize {
    let nodes: Vec<Arc<Node>> = root.all_descendants().to_vec();
    let filter = PathFilter::new(query, ignore_symbols);

    let mut visible_leaves = 0;
    for node in &nodes {
        let show = filter.as_ref().map_or(true, |f| f.matches(node));
        node.set_hidden(!show);
        if show && node.has_content() && node.children().is_empty() {
            visible_leaves += 1;
        }
    }
    log::debug!(
        "filter {:?} left {} of {} nodes visible",
        query,
        nodes.iter().filter(|n| !n.is_hidden()).count(),
        nodes.len()
    );
    visible_leaves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::content::bytes_accessor;
    use chrono::Utc;

    fn tree(paths: &[&str]) -> Arc<Node> {
        let root = Node::new_root("r", None);
        for path in paths {
            root.add_stream(path, bytes_accessor(Vec::new()), Utc::now(), 0)
                .unwrap();
        }
        root
    }

    #[test]
    fn normalize_folds_case_diacritics_and_symbols() {
        assert_eq!(normalize("Crème_Brûlée.XML", true), "cremebruleexml");
        assert_eq!(normalize("a-b c", false), "a-b c");
    }

    #[test]
    fn blank_query_matches_everything() {
        assert!(PathFilter::new("   ", true).is_none());
        assert!(PathFilter::new("__", true).is_none());
        assert!(PathFilter::new("", false).is_none());
    }

    #[test]
    fn hides_non_matching_leaves_and_keeps_ancestors() {
        let root = tree(&["a/foo.txt", "a/bar.txt", "b/baz.txt"]);
        let visible = apply_filter(&root, "foo", true);

        assert_eq!(visible, 1);
        assert!(root.find_path("a/foo.txt").unwrap().is_visible());
        assert!(!root.find_path("a/bar.txt").unwrap().is_visible());
        assert!(root.find_path("a").unwrap().is_visible());
        assert!(!root.find_path("b").unwrap().is_visible());
        assert!(!root.find_path("b/baz.txt").unwrap().is_visible());
    }

    #[test]
    fn matches_against_full_relative_path() {
        let root = tree(&["Ships/Aegis/hull.xml", "Weapons/laser.xml"]);
        apply_filter(&root, "ships", true);
        assert!(root.find_path("Ships/Aegis/hull.xml").unwrap().is_visible());
        assert!(!root.find_path("Weapons/laser.xml").unwrap().is_visible());
    }

    #[test]
    fn ignores_symbols_and_case() {
        let root = tree(&["Data/Ship_Yard/dock.xml", "Data/other.xml"]);
        apply_filter(&root, "SHIP-YARD", true);
        assert!(root.find_path("Data/Ship_Yard/dock.xml").unwrap().is_visible());
        assert!(!root.find_path("Data/other.xml").unwrap().is_visible());
    }

    #[test]
    fn clearing_the_filter_shows_everything() {
        let root = tree(&["a/foo.txt", "b/bar.txt"]);
        apply_filter(&root, "foo", true);
        let visible = apply_filter(&root, "", true);
        assert_eq!(visible, 2);
        assert!(root.all_descendants().iter().all(|n| n.is_visible()));
    }

    #[test]
    fn empty_directories_are_hidden_by_any_query() {
        let root = tree(&["keep.txt"]);
        root.ensure_directories(&["empty"]).unwrap();
        apply_filter(&root, "keep", true);
        assert!(!root.find_path("empty").unwrap().is_visible());
    }
}
