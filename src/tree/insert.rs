use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::tree::content::ContentAccessor;
use crate::tree::node::{split_path, Node};

impl Node {
    /// Insert a content leaf at `full_path` below this node, creating any
    /// missing directories on the way.
    ///
    /// Inserting the same path twice yields two sibling leaves.
    pub fn add_stream(
        self: &Arc<Self>,
        full_path: &str,
        accessor: ContentAccessor,
        last_modified: DateTime<Utc>,
        byte_length: u64,
    ) -> Result<Arc<Node>> {
        self.insert_path(full_path, |title| {
            Node::new_leaf(title, accessor, last_modified, byte_length)
        })
    }

    /// Resolve the directory chain for `full_path` and insert the node built
    /// by `make` (given the final path segment) under it.
    pub fn insert_path(
        self: &Arc<Self>,
        full_path: &str,
        make: impl FnOnce(&str) -> Arc<Node>,
    ) -> Result<Arc<Node>> {
        let no_name = || AppError::InvalidPath(format!("{full_path:?} has no file name"));
        if full_path.ends_with(['/', '\\']) {
            return Err(no_name());
        }
        let mut segments: Vec<&str> = split_path(full_path).collect();
        let title = segments.pop().ok_or_else(no_name)?;

        let parent = self.ensure_directories(&segments)?;
        let node = make(title);
        parent.children().push(node.clone())?;
        Ok(node)
    }

    /// Walk `segments`, reusing the first directory child with an exactly
    /// matching title at each level and appending a new one otherwise.
    pub fn ensure_directories(self: &Arc<Self>, segments: &[&str]) -> Result<Arc<Node>> {
        let mut current = self.clone();
        for segment in segments {
            let existing = current
                .children()
                .find(|n| n.is_directory() && n.title() == *segment);
            current = match existing {
                Some(dir) => dir,
                None => {
                    let dir = Node::new_directory(*segment);
                    current.children().push(dir.clone())?;
                    dir
                }
            };
        }
        Ok(current)
    }
}
