use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::error::{AppError, Result};
use crate::tree::node::Node;

/// Structural change raised by a [`NodeCollection`].
#[derive(Debug, Clone)]
pub enum CollectionChange {
    /// `items` were inserted starting at `index`.
    Add { index: usize, items: Vec<Arc<Node>> },
    /// `items` were removed; they previously started at `index`.
    Remove { index: usize, items: Vec<Arc<Node>> },
    /// `old` at `index` was swapped for `new`.
    Replace {
        index: usize,
        old: Arc<Node>,
        new: Arc<Node>,
    },
}

/// External subscriber callback.
pub type ChangeListener = Arc<dyn Fn(&CollectionChange) + Send + Sync>;

/// Handle returned by [`NodeCollection::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

/// Held for the duration of one mutation and its event dispatch.
struct MutationToken<'a>(&'a AtomicBool);

impl Drop for MutationToken<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Ordered, change-notifying children of exactly one owning node.
///
/// Only one structural mutation may be in flight at a time. Any mutation
/// attempted while another one is dispatching its change event, including
/// from inside a listener or a `remove_all` predicate, fails with
/// [`AppError::Reentrancy`] and leaves the collection untouched.
pub struct NodeCollection {
    owner: Weak<Node>,
    items: RwLock<Vec<Arc<Node>>>,
    busy: AtomicBool,
    listeners: RwLock<Vec<(ListenerId, ChangeListener)>>,
    next_listener: AtomicUsize,
}

impl NodeCollection {
    pub(crate) fn new(owner: Weak<Node>) -> Self {
        Self {
            owner,
            items: RwLock::new(Vec::new()),
            busy: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicUsize::new(0),
        }
    }

    // ── Read access ─────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<Node>> {
        self.read().get(index).cloned()
    }

    /// Copy of the current children, in order.
    pub fn snapshot(&self) -> Vec<Arc<Node>> {
        self.read().clone()
    }

    /// First child satisfying `pred`.
    pub fn find(&self, pred: impl Fn(&Node) -> bool) -> Option<Arc<Node>> {
        self.read().iter().find(|n| pred(n)).cloned()
    }

    /// Position of `node`, or `None` when it is absent or its recorded
    /// parent is not this collection's owner.
    pub fn index_of(&self, node: &Arc<Node>) -> Option<usize> {
        if !node.is_child_of(&self.owner) {
            return None;
        }
        self.read().iter().position(|n| Arc::ptr_eq(n, node))
    }

    #[allow(dead_code)]
    pub fn contains(&self, node: &Arc<Node>) -> bool {
        self.index_of(node).is_some()
    }

    // ── Subscribers ─────────────────────────────────────────────────────────

    /// Register an external listener. The owning node is always notified first.
    #[allow(dead_code)]
    pub fn subscribe(&self, listener: impl Fn(&CollectionChange) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    #[allow(dead_code)]
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    // ── Mutation ────────────────────────────────────────────────────────────

    pub fn push(&self, node: Arc<Node>) -> Result<()> {
        let _token = self.acquire()?;
        let index = self.read().len();
        self.insert_locked(index, vec![node])
    }

    #[allow(dead_code)]
    pub fn insert(&self, index: usize, node: Arc<Node>) -> Result<()> {
        let _token = self.acquire()?;
        self.insert_locked(index, vec![node])
    }

    /// Insert all of `nodes` at `index` with a single `Add` event.
    ///
    /// Either every node is valid and all are inserted, or nothing changes.
    #[allow(dead_code)]
    pub fn insert_range(&self, index: usize, nodes: Vec<Arc<Node>>) -> Result<()> {
        let _token = self.acquire()?;
        if nodes.is_empty() {
            return Ok(());
        }
        self.insert_locked(index, nodes)
    }

    #[allow(dead_code)]
    pub fn extend(&self, nodes: Vec<Arc<Node>>) -> Result<()> {
        let _token = self.acquire()?;
        if nodes.is_empty() {
            return Ok(());
        }
        let index = self.read().len();
        self.insert_locked(index, nodes)
    }

    #[allow(dead_code)]
    pub fn remove_at(&self, index: usize) -> Result<Arc<Node>> {
        let _token = self.acquire()?;
        let mut removed = self.remove_range_locked(index, 1)?;
        Ok(removed.remove(0))
    }

    #[allow(dead_code)]
    pub fn remove_range(&self, index: usize, count: usize) -> Result<Vec<Arc<Node>>> {
        let _token = self.acquire()?;
        if count == 0 {
            return Ok(Vec::new());
        }
        self.remove_range_locked(index, count)
    }

    /// Remove `node` if it is a child of this collection.
    #[allow(dead_code)]
    pub fn remove(&self, node: &Arc<Node>) -> Result<bool> {
        let _token = self.acquire()?;
        match self.index_of(node) {
            Some(index) => {
                self.remove_range_locked(index, 1)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Swap the child at `index` for `node`. No-op when `node` already occupies it.
    pub fn set(&self, index: usize, node: Arc<Node>) -> Result<()> {
        let _token = self.acquire()?;
        let old = self.get(index).ok_or_else(|| AppError::IndexOutOfRange {
            index,
            len: self.len(),
        })?;
        if Arc::ptr_eq(&old, &node) {
            return Ok(());
        }
        self.claim_all(std::slice::from_ref(&node))?;
        {
            let mut items = self.write();
            items[index] = node.clone();
        }
        node.set_parent(&self.owner);
        old.detach();
        self.dispatch(CollectionChange::Replace { index, old, new: node });
        Ok(())
    }

    /// Empty the collection with a single `Remove` event.
    #[allow(dead_code)]
    pub fn clear(&self) -> Result<Vec<Arc<Node>>> {
        let _token = self.acquire()?;
        let removed = std::mem::take(&mut *self.write());
        if removed.is_empty() {
            return Ok(removed);
        }
        for node in &removed {
            node.detach();
        }
        self.dispatch(CollectionChange::Remove {
            index: 0,
            items: removed.clone(),
        });
        Ok(removed)
    }

    /// Remove every child matching `pred`, one `Remove` event per contiguous run.
    ///
    /// The predicate runs while the collection is locked against mutation.
    #[allow(dead_code)]
    pub fn remove_all(&self, pred: impl Fn(&Arc<Node>) -> bool) -> Result<usize> {
        let _token = self.acquire()?;
        let flags: Vec<bool> = self.snapshot().iter().map(|n| pred(n)).collect();

        let mut removed_total = 0;
        let mut i = 0;
        while i < flags.len() {
            if !flags[i] {
                i += 1;
                continue;
            }
            let start = i;
            while i < flags.len() && flags[i] {
                i += 1;
            }
            let count = i - start;
            self.remove_range_locked(start - removed_total, count)?;
            removed_total += count;
        }
        Ok(removed_total)
    }

    /// Reorder in place. Raises no change event.
    ///
    /// The comparator runs on a snapshot with no lock held, so it may read
    /// this collection or its owner.
    pub fn sort_by(&self, compare: impl FnMut(&Arc<Node>, &Arc<Node>) -> CmpOrdering) -> Result<()> {
        let _token = self.acquire()?;
        let mut sorted = self.snapshot();
        sorted.sort_by(compare);
        *self.write() = sorted;
        if let Some(owner) = self.owner.upgrade() {
            owner.invalidate();
        }
        Ok(())
    }

    // ── Internals (token already held) ──────────────────────────────────────

    fn acquire(&self) -> Result<MutationToken<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::Reentrancy)?;
        Ok(MutationToken(&self.busy))
    }

    fn insert_locked(&self, index: usize, nodes: Vec<Arc<Node>>) -> Result<()> {
        let len = self.read().len();
        if index > len {
            return Err(AppError::IndexOutOfRange { index, len });
        }
        self.claim_all(&nodes)?;
        {
            let mut items = self.write();
            items.splice(index..index, nodes.iter().cloned());
        }
        for node in &nodes {
            node.set_parent(&self.owner);
        }
        self.dispatch(CollectionChange::Add { index, items: nodes });
        Ok(())
    }

    fn remove_range_locked(&self, index: usize, count: usize) -> Result<Vec<Arc<Node>>> {
        let removed: Vec<Arc<Node>> = {
            let mut items = self.write();
            let len = items.len();
            let end = index
                .checked_add(count)
                .filter(|&end| end <= len)
                .ok_or(AppError::IndexOutOfRange { index, len })?;
            items.drain(index..end).collect()
        };
        for node in &removed {
            node.detach();
        }
        self.dispatch(CollectionChange::Remove {
            index,
            items: removed.clone(),
        });
        Ok(removed)
    }

    /// Validate and claim every node, rolling back on the first failure.
    fn claim_all(&self, nodes: &[Arc<Node>]) -> Result<()> {
        for (i, node) in nodes.iter().enumerate() {
            if let Err(e) = self.claim(node) {
                for claimed in &nodes[..i] {
                    claimed.release_claim();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn claim(&self, node: &Arc<Node>) -> Result<()> {
        if self.is_owner_or_ancestor(node) {
            return Err(AppError::InvalidNode(format!(
                "{} cannot be inserted beneath itself",
                node.title()
            )));
        }
        if !node.claim() {
            return Err(AppError::InvalidNode(if node.parent().is_some() {
                format!("{} already has a parent", node.title())
            } else {
                format!("{} was detached and cannot be re-parented", node.title())
            }));
        }
        Ok(())
    }

    fn is_owner_or_ancestor(&self, node: &Arc<Node>) -> bool {
        let mut cursor = self.owner.upgrade();
        while let Some(current) = cursor {
            if Arc::ptr_eq(&current, node) {
                return true;
            }
            cursor = current.parent();
        }
        false
    }

    /// Deliver to the owning node first, then to external listeners.
    fn dispatch(&self, change: CollectionChange) {
        if let Some(owner) = self.owner.upgrade() {
            owner.on_children_changed(&change);
        }
        let listeners: Vec<ChangeListener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&change);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Node>>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Node>>> {
        self.items.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for NodeCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.read().iter().map(|n| n.title().to_string()))
            .finish()
    }
}
