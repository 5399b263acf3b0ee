use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tree::node::{LoadState, Node, NodeKind};

/// Kind of node, as shown in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Root,
    Directory,
    File,
    Container,
}

impl ItemKind {
    pub fn of(node: &Node) -> Self {
        match node.kind() {
            NodeKind::Root { .. } => ItemKind::Root,
            NodeKind::Directory => ItemKind::Directory,
            NodeKind::Leaf(_) => ItemKind::File,
            NodeKind::Container(_) => ItemKind::Container,
        }
    }
}

/// A flattened representation of a tree node for listing.
#[derive(Debug, Clone, Serialize)]
pub struct FlatItem {
    pub name: String,
    pub relative_path: String,
    pub kind: ItemKind,
    pub depth: usize,
    pub is_last_sibling: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl FlatItem {
    fn from_node(node: &Node, depth: usize, is_last: bool) -> Self {
        Self {
            name: node.title().to_string(),
            relative_path: node.relative_path(),
            kind: ItemKind::of(node),
            depth,
            is_last_sibling: is_last,
            size: node.byte_length(),
            modified: node.last_modified(),
        }
    }
}

/// Details of a single node, for `info`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub relative_path: String,
    pub sort_key: String,
    pub kind: ItemKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub children: usize,
    pub descendants: usize,
    pub loading: bool,
}

impl NodeInfo {
    pub fn of(node: &Node) -> Self {
        Self {
            name: node.title().to_string(),
            relative_path: node.relative_path(),
            sort_key: node.sort_key(),
            kind: ItemKind::of(node),
            size: node.byte_length(),
            modified: node.last_modified(),
            children: node.children().len(),
            descendants: node.all_descendants().len(),
            loading: node.load_state() == LoadState::Loading,
        }
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name:        {}", self.name)?;
        writeln!(f, "kind:        {:?}", self.kind)?;
        writeln!(f, "path:        {}", self.relative_path)?;
        writeln!(f, "sort key:    {}", self.sort_key)?;
        writeln!(f, "size:        {}", self.size)?;
        match self.modified {
            Some(stamp) => writeln!(f, "modified:    {}", stamp.format("%Y-%m-%d %H:%M:%S"))?,
            None => writeln!(f, "modified:    -")?,
        }
        writeln!(f, "children:    {}", self.children)?;
        write!(f, "descendants: {}", self.descendants)
    }
}

/// Pre-order listing of the visible part of the tree below `root`.
///
/// The root itself is always included. `max_depth` limits how far below
/// the root to descend (`None` for everything).
pub fn flatten(root: &Arc<Node>, max_depth: Option<usize>) -> Vec<FlatItem> {
    let mut items = Vec::new();
    flatten_node(root, &mut items, 0, max_depth, true, true);
    items
}

fn flatten_node(
    node: &Node,
    items: &mut Vec<FlatItem>,
    depth: usize,
    max_depth: Option<usize>,
    is_last: bool,
    is_root: bool,
) {
    if !is_root && node.is_hidden() {
        return;
    }

    items.push(FlatItem::from_node(node, depth, is_last));

    if max_depth.is_some_and(|max| depth >= max) {
        return;
    }
    let visible_children: Vec<Arc<Node>> = node
        .children()
        .snapshot()
        .into_iter()
        .filter(|c| !c.is_hidden())
        .collect();
    for (i, child) in visible_children.iter().enumerate() {
        let is_last_child = i == visible_children.len() - 1;
        flatten_node(child, items, depth + 1, max_depth, is_last_child, false);
    }
}

/// Tree-drawing prefix for a flattened item, e.g. `│   └── `.
///
/// `open` holds, per ancestor level, whether that ancestor still has
/// siblings below it.
pub fn branch_prefix(open: &[bool], is_last: bool) -> String {
    let mut prefix = String::new();
    for &more in open {
        prefix.push_str(if more { "│   " } else { "    " });
    }
    prefix.push_str(if is_last { "└── " } else { "├── " });
    prefix
}

/// Render `items` (as produced by [`flatten`]) as an indented text tree.
pub fn render_tree(items: &[FlatItem]) -> String {
    let mut out = String::new();
    let mut open: Vec<bool> = Vec::new();
    for item in items {
        if item.depth == 0 {
            out.push_str(&item.name);
            out.push('\n');
            continue;
        }
        open.truncate(item.depth - 1);
        out.push_str(&branch_prefix(&open, item.is_last_sibling));
        out.push_str(&item.name);
        if item.kind == ItemKind::Directory || item.kind == ItemKind::Container {
            out.push('/');
        }
        out.push('\n');
        open.push(!item.is_last_sibling);
    }
    out
}
