use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::Result;
use crate::tree::node::Node;

/// Sort criteria for the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Alphabetical (case-insensitive), default.
    #[default]
    Name,
    /// By aggregated size (largest first).
    Size,
    /// By last modification (newest first).
    Modified,
    /// By full sort key, case-insensitive.
    Key,
}

impl SortBy {
    /// Parse sort_by from a config or CLI string.
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "size" => SortBy::Size,
            "modified" => SortBy::Modified,
            "key" => SortBy::Key,
            _ => SortBy::Name,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortBy::Name => "Name",
            SortBy::Size => "Size",
            SortBy::Modified => "Modified",
            SortBy::Key => "Key",
        }
    }
}

/// Ordering between two siblings.
pub fn compare(a: &Node, b: &Node, sort_by: SortBy, dirs_first: bool) -> Ordering {
    let mut cmp = Ordering::Equal;
    if dirs_first {
        cmp = b.is_directory().cmp(&a.is_directory());
    }
    cmp.then_with(|| match sort_by {
        SortBy::Name => a.title().to_lowercase().cmp(&b.title().to_lowercase()),
        SortBy::Size => b.byte_length().cmp(&a.byte_length()),
        SortBy::Modified => b.last_modified().cmp(&a.last_modified()),
        SortBy::Key => a.sort_key().to_lowercase().cmp(&b.sort_key().to_lowercase()),
    })
}

/// Reorder the children of `node`, then of every child, top-down.
///
/// Each collection is sorted under its own mutation token.
pub fn sort_recursive(node: &Arc<Node>, cmp: &dyn Fn(&Node, &Node) -> Ordering) -> Result<()> {
    node.children().sort_by(|a, b| cmp(a, b))?;
    for child in node.children().snapshot() {
        if child.is_branch() {
            sort_recursive(&child, cmp)?;
        }
    }
    Ok(())
}

pub fn sort_tree(node: &Arc<Node>, sort_by: SortBy, dirs_first: bool) -> Result<()> {
    log::debug!(
        "sorting {} by {} (dirs first: {})",
        node.title(),
        sort_by.label(),
        dirs_first
    );
    sort_recursive(node, &|a: &Node, b: &Node| {
        compare(a, b, sort_by, dirs_first)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::content::bytes_accessor;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
    }

    fn titles(node: &Node) -> Vec<String> {
        node.children()
            .snapshot()
            .iter()
            .map(|n| n.title().to_string())
            .collect()
    }

    fn sample() -> Arc<Node> {
        let root = Node::new_root("r", None);
        for (path, size, day) in [
            ("beta.txt", 5u64, 2u32),
            ("Alpha.txt", 50, 1),
            ("zeta/big.bin", 500, 3),
            ("gamma.txt", 1, 9),
            ("zeta/Aardvark.txt", 1, 1),
        ] {
            root.add_stream(path, bytes_accessor(Vec::new()), at(day), size)
                .unwrap();
        }
        root
    }

    #[test]
    fn sort_by_from_str() {
        assert_eq!(SortBy::from_str("size"), SortBy::Size);
        assert_eq!(SortBy::from_str("Modified"), SortBy::Modified);
        assert_eq!(SortBy::from_str("key"), SortBy::Key);
        assert_eq!(SortBy::from_str("bogus"), SortBy::Name);
        assert_eq!(SortBy::Size.label(), "Size");
    }

    #[test]
    fn name_sort_is_case_insensitive_with_dirs_first() {
        let root = sample();
        sort_tree(&root, SortBy::Name, true).unwrap();
        assert_eq!(
            titles(&root),
            vec!["zeta", "Alpha.txt", "beta.txt", "gamma.txt"]
        );
        let zeta = root.find_path("zeta").unwrap();
        assert_eq!(titles(&zeta), vec!["Aardvark.txt", "big.bin"]);
    }

    #[test]
    fn size_sort_uses_aggregates() {
        let root = sample();
        sort_tree(&root, SortBy::Size, false).unwrap();
        assert_eq!(
            titles(&root),
            vec!["zeta", "Alpha.txt", "beta.txt", "gamma.txt"]
        );
    }

    #[test]
    fn modified_sort_is_newest_first() {
        let root = sample();
        sort_tree(&root, SortBy::Modified, false).unwrap();
        assert_eq!(
            titles(&root),
            vec!["gamma.txt", "zeta", "beta.txt", "Alpha.txt"]
        );
    }

    #[test]
    fn key_sort_ignores_case() {
        let root = sample();
        root.add_stream("Zulu.txt", bytes_accessor(Vec::new()), at(1), 1)
            .unwrap();
        sort_tree(&root, SortBy::Key, false).unwrap();
        assert_eq!(
            titles(&root),
            vec!["Alpha.txt", "beta.txt", "gamma.txt", "zeta", "Zulu.txt"]
        );
    }

    #[test]
    fn comparator_may_inspect_siblings() {
        let root = sample();
        sort_recursive(&root, &|a: &Node, b: &Node| {
            let siblings = a.parent().map(|p| p.children().len()).unwrap_or(0);
            assert!(siblings > 0);
            b.title().cmp(a.title())
        })
        .unwrap();
        assert_eq!(
            titles(&root),
            vec!["zeta", "gamma.txt", "beta.txt", "Alpha.txt"]
        );
    }

    #[test]
    fn sorting_keeps_parent_links_and_paths() {
        let root = sample();
        sort_tree(&root, SortBy::Size, true).unwrap();
        let big = root.find_path("zeta/big.bin").unwrap();
        assert_eq!(big.relative_path(), "zeta\\big.bin");
        assert!(Arc::ptr_eq(&big.parent().unwrap(), &root.find_path("zeta").unwrap()));
        assert_eq!(root.all_descendants().len(), 6);
    }
}
