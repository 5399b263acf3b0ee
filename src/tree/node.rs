use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::tree::build::ArchiveSource;
use crate::tree::collection::{CollectionChange, NodeCollection};
use crate::tree::content::{ContentAccessor, ReadSeek};

/// Separator used in sort keys and relative paths.
pub const PATH_SEPARATOR: char = '\\';

/// Fixed content metadata of a leaf.
pub struct LeafContent {
    accessor: ContentAccessor,
    last_modified: DateTime<Utc>,
    byte_length: u64,
}

impl LeafContent {
    pub fn new(accessor: ContentAccessor, last_modified: DateTime<Utc>, byte_length: u64) -> Self {
        Self {
            accessor,
            last_modified,
            byte_length,
        }
    }

    pub fn accessor(&self) -> &ContentAccessor {
        &self.accessor
    }
}

/// The node variants making up an archive namespace.
pub enum NodeKind {
    /// An opened archive; keeps the archive handle until closed.
    Root {
        archive: Mutex<Option<Arc<dyn ArchiveSource>>>,
    },
    /// A path segment with no content of its own.
    Directory,
    /// A content-bearing entry.
    Leaf(LeafContent),
    /// A leaf whose content is itself a set of named sub-streams.
    Container(LeafContent),
}

/// Construction progress of a root or container node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
}

/// Attachment lifecycle: a node is attached at most once.
const FRESH: u8 = 0;
const ATTACHED: u8 = 1;
const DETACHED: u8 = 2;

type Versioned<T> = Mutex<Option<(u64, T)>>;

/// Folded size and timestamp over a branch's content leaves.
#[derive(Debug, Clone, Copy)]
struct Aggregate {
    byte_length: u64,
    last_modified: Option<DateTime<Utc>>,
}

/// A node in the archive namespace.
pub struct Node {
    title: String,
    kind: NodeKind,
    parent: RwLock<Weak<Node>>,
    attachment: AtomicU8,
    children: NodeCollection,
    loading: AtomicBool,
    hidden: AtomicBool,
    /// Bumped on every structural change at or below this node.
    version: AtomicU64,
    sort_key: OnceLock<String>,
    relative_path: OnceLock<String>,
    descendants: Versioned<Arc<[Arc<Node>]>>,
    aggregate: Versioned<Aggregate>,
}

impl Node {
    fn with_kind(title: impl Into<String>, kind: NodeKind, loading: bool) -> Arc<Self> {
        let title = title.into();
        Arc::new_cyclic(|me| Node {
            title,
            kind,
            parent: RwLock::new(Weak::new()),
            attachment: AtomicU8::new(FRESH),
            children: NodeCollection::new(me.clone()),
            loading: AtomicBool::new(loading),
            hidden: AtomicBool::new(false),
            version: AtomicU64::new(0),
            sort_key: OnceLock::new(),
            relative_path: OnceLock::new(),
            descendants: Mutex::new(None),
            aggregate: Mutex::new(None),
        })
    }

    /// Create an archive root in the `Loading` state.
    pub fn new_root(title: impl Into<String>, archive: Option<Arc<dyn ArchiveSource>>) -> Arc<Self> {
        Self::with_kind(
            title,
            NodeKind::Root {
                archive: Mutex::new(archive),
            },
            true,
        )
    }

    pub fn new_directory(title: impl Into<String>) -> Arc<Self> {
        Self::with_kind(title, NodeKind::Directory, false)
    }

    pub fn new_leaf(
        title: impl Into<String>,
        accessor: ContentAccessor,
        last_modified: DateTime<Utc>,
        byte_length: u64,
    ) -> Arc<Self> {
        Self::with_kind(
            title,
            NodeKind::Leaf(LeafContent::new(accessor, last_modified, byte_length)),
            false,
        )
    }

    /// Create a nested container in the `Loading` state.
    pub fn new_container(title: impl Into<String>, content: LeafContent) -> Arc<Self> {
        Self::with_kind(title, NodeKind::Container(content), true)
    }

    // ── Identity and structure ──────────────────────────────────────────────

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn children(&self) -> &NodeCollection {
        &self.children
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.read().unwrap_or_else(|e| e.into_inner()).upgrade()
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Root { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    #[allow(dead_code)]
    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container(_))
    }

    /// Whether the node carries its own content (leaves and containers).
    pub fn has_content(&self) -> bool {
        self.content().is_some()
    }

    /// Whether the node groups other nodes (roots, directories, containers).
    pub fn is_branch(&self) -> bool {
        !matches!(self.kind, NodeKind::Leaf(_))
    }

    fn content(&self) -> Option<&LeafContent> {
        match &self.kind {
            NodeKind::Leaf(content) | NodeKind::Container(content) => Some(content),
            _ => None,
        }
    }

    pub fn load_state(&self) -> LoadState {
        if self.loading.load(Ordering::Acquire) {
            LoadState::Loading
        } else {
            LoadState::Ready
        }
    }

    pub(crate) fn mark_ready(&self) {
        self.loading.store(false, Ordering::Release);
    }

    // ── Attachment (driven by NodeCollection) ───────────────────────────────

    /// Reserve this node for insertion. Fails if it was ever attached.
    pub(crate) fn claim(&self) -> bool {
        self.attachment
            .compare_exchange(FRESH, ATTACHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_claim(&self) {
        let _ = self.attachment.compare_exchange(
            ATTACHED,
            FRESH,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn set_parent(&self, owner: &Weak<Node>) {
        *self.parent.write().unwrap_or_else(|e| e.into_inner()) = owner.clone();
    }

    pub(crate) fn detach(&self) {
        *self.parent.write().unwrap_or_else(|e| e.into_inner()) = Weak::new();
        self.attachment.store(DETACHED, Ordering::Release);
    }

    pub(crate) fn is_child_of(&self, owner: &Weak<Node>) -> bool {
        Weak::ptr_eq(&self.parent.read().unwrap_or_else(|e| e.into_inner()), owner)
    }

    /// Whether the chain of parents ends at a root node.
    ///
    /// Nodes never change parent once attached, so keys derived while
    /// rooted stay valid for the node's lifetime.
    fn is_rooted(&self) -> bool {
        if self.is_root() {
            return true;
        }
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            if node.is_root() {
                return true;
            }
            cursor = node.parent();
        }
        false
    }

    /// Called by the owned collection before external listeners see `change`.
    pub(crate) fn on_children_changed(&self, change: &CollectionChange) {
        if log::log_enabled!(log::Level::Trace) {
            let (what, index, count) = match change {
                CollectionChange::Add { index, items } => ("add", index, items.len()),
                CollectionChange::Remove { index, items } => ("remove", index, items.len()),
                CollectionChange::Replace { index, .. } => ("replace", index, 1),
            };
            log::trace!("{}: {} {} at {}", self.title, what, count, index);
        }
        self.invalidate();
    }

    /// Mark derived caches of this node and all its ancestors stale.
    pub(crate) fn invalidate(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            node.version.fetch_add(1, Ordering::AcqRel);
            cursor = node.parent();
        }
    }

    // ── Derived keys ────────────────────────────────────────────────────────

    /// `parent.sort_key + '\' + title`; the topmost node's key is its title.
    ///
    /// Memoized once the node hangs beneath a root.
    pub fn sort_key(&self) -> String {
        if let Some(key) = self.sort_key.get() {
            return key.clone();
        }
        let key = self.compute_sort_key();
        if self.is_rooted() {
            let _ = self.sort_key.set(key.clone());
        }
        key
    }

    fn compute_sort_key(&self) -> String {
        match self.parent() {
            Some(parent) => join_key(&parent.sort_key(), &self.title),
            None => self.title.clone(),
        }
    }

    /// Path from the archive root using `\`; the root itself is `""`.
    ///
    /// Containers take part like directories, so nodes expanded from a
    /// nested archive carry the container's title in their path.
    pub fn relative_path(&self) -> String {
        if self.is_root() {
            return String::new();
        }
        if let Some(path) = self.relative_path.get() {
            return path.clone();
        }
        let path = self.compute_relative_path();
        if self.is_rooted() {
            let _ = self.relative_path.set(path.clone());
        }
        path
    }

    fn compute_relative_path(&self) -> String {
        match self.parent() {
            Some(parent) => join_key(&parent.relative_path(), &self.title),
            None => self.title.clone(),
        }
    }

    // ── Descendants and aggregates ──────────────────────────────────────────

    /// Every node below this one, each child's subtree followed by the child.
    pub fn all_descendants(&self) -> Arc<[Arc<Node>]> {
        let version = self.version.load(Ordering::Acquire);
        let mut cache = self.descendants.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((cached, nodes)) = cache.as_ref() {
            if *cached == version {
                return nodes.clone();
            }
        }
        let mut nodes = Vec::new();
        for child in self.children.snapshot() {
            nodes.extend(child.all_descendants().iter().cloned());
            nodes.push(child);
        }
        let nodes: Arc<[Arc<Node>]> = nodes.into();
        *cache = Some((version, nodes.clone()));
        nodes
    }

    /// Content-bearing nodes below this one, not descending into containers.
    pub fn content_leaves(&self) -> Vec<Arc<Node>> {
        let mut leaves = Vec::new();
        collect_content_leaves(self, &mut leaves);
        leaves
    }

    /// Own size for content nodes; sum over content leaves for branches.
    pub fn byte_length(&self) -> u64 {
        match self.content() {
            Some(content) => content.byte_length,
            None => self.aggregate().byte_length,
        }
    }

    /// Own timestamp for content nodes; newest content leaf for branches,
    /// `None` when a branch has no content leaves yet.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match self.content() {
            Some(content) => Some(content.last_modified),
            None => self.aggregate().last_modified,
        }
    }

    fn aggregate(&self) -> Aggregate {
        let version = self.version.load(Ordering::Acquire);
        let mut cache = self.aggregate.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((cached, aggregate)) = cache.as_ref() {
            if *cached == version {
                return *aggregate;
            }
        }
        let aggregate = self.content_leaves().iter().fold(
            Aggregate {
                byte_length: 0,
                last_modified: None,
            },
            |acc, leaf| Aggregate {
                byte_length: acc.byte_length + leaf.byte_length(),
                last_modified: acc.last_modified.max(leaf.last_modified()),
            },
        );
        *cache = Some((version, aggregate));
        aggregate
    }

    // ── Visibility ──────────────────────────────────────────────────────────

    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::Relaxed)
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::Relaxed);
    }

    /// Not hidden, and no ancestor hidden either.
    #[allow(dead_code)]
    pub fn is_visible(&self) -> bool {
        if self.is_hidden() {
            return false;
        }
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            if node.is_hidden() {
                return false;
            }
            cursor = node.parent();
        }
        true
    }

    // ── Content ─────────────────────────────────────────────────────────────

    /// Open a readable, seekable handle on this node's content.
    ///
    /// Forward-only handles are buffered into memory on every call.
    pub fn open_content(&self) -> Result<Box<dyn ReadSeek>> {
        let unavailable = |reason: String| AppError::ContentUnavailable {
            path: self.relative_path(),
            reason,
        };
        let content = self
            .content()
            .ok_or_else(|| unavailable("not a content node".into()))?;
        let handle = (content.accessor)().map_err(|e| unavailable(e.to_string()))?;
        handle.into_seekable().map_err(|e| unavailable(e.to_string()))
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    /// Walk `path` (either separator) by exact title, first match per level.
    ///
    /// Intermediate segments only match branch nodes, so a leaf never hides
    /// a same-named directory that follows it.
    pub fn find_path(self: &Arc<Self>, path: &str) -> Option<Arc<Node>> {
        let mut current = self.clone();
        let mut segments = split_path(path).peekable();
        while let Some(segment) = segments.next() {
            let last = segments.peek().is_none();
            current = current
                .children
                .find(|n| n.title == segment && (last || n.is_branch()))?;
        }
        Some(current)
    }

    // ── Root ────────────────────────────────────────────────────────────────

    /// Name of the open archive, for roots that still hold one.
    #[allow(dead_code)]
    pub fn archive_name(&self) -> Option<String> {
        match &self.kind {
            NodeKind::Root { archive } => archive
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .map(|a| a.name().to_string()),
            _ => None,
        }
    }

    /// Release the archive handle held by a root. Leaves opened afterwards
    /// fail with `ContentUnavailable`.
    pub fn close(&self) {
        if let NodeKind::Root { archive } = &self.kind {
            if let Some(archive) = archive.lock().unwrap_or_else(|e| e.into_inner()).take() {
                log::debug!("closing archive {}", archive.name());
                archive.close();
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            NodeKind::Root { .. } => "Root",
            NodeKind::Directory => "Directory",
            NodeKind::Leaf(_) => "Leaf",
            NodeKind::Container(_) => "Container",
        };
        f.debug_struct("Node")
            .field("title", &self.title)
            .field("kind", &kind)
            .field("children", &self.children)
            .finish()
    }
}

fn join_key(parent: &str, title: &str) -> String {
    if parent.is_empty() {
        title.to_string()
    } else {
        format!("{parent}{PATH_SEPARATOR}{title}")
    }
}

fn collect_content_leaves(node: &Node, out: &mut Vec<Arc<Node>>) {
    for child in node.children.snapshot() {
        if child.has_content() {
            out.push(child);
        } else {
            collect_content_leaves(&child, out);
        }
    }
}

/// Split on `/` and `\`, dropping empty segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', PATH_SEPARATOR]).filter(|s| !s.is_empty())
}
