//! The Abstract File System (AFS): an in-memory mirror of one watched
//! directory tree.
//!
//! This is the single source of truth shared by startup reconciliation
//! ([`crate::reconcile`]), the rename classifier ([`crate::watch`]), and the
//! debounced applier ([`crate::pipeline`]). Nodes live in a per-tree arena
//! (a growable vector indexed by [`NodeId`]) rather than being linked by
//! owning `Rc`/`RefCell` pointers: a child stores its parent's handle, and a
//! parent's `children` map stores child handles by name. That gives O(1)
//! parent walks and lets [`Tree::rename_path`] relink a subtree by mutating
//! two handle maps instead of moving owned subtrees between Rust-level
//! owners. Freed slots are tracked on a free list and reused, so a
//! long-running daemon's arena doesn't grow unboundedly across many renames.

use std::collections::VecDeque;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::checksum;
use crate::path_utils::{self, NATIVE_SEPARATOR};

/// A handle into a [`Tree`]'s node arena. Stable for the node's lifetime;
/// never reused while the node it names is still reachable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeKind {
    Directory,
    File,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum AfsError {
    #[error("path is not under this tree's root")]
    NotUnderRoot,
    #[error("path not found in tree")]
    NotFound,
    #[error("rename destination's parent directory isn't in the tree")]
    DestinationParentMissing,
    #[error("no remote record named {0:?} matches this tree's root")]
    NoMatchingRemoteRoot(String),
}

#[derive(Debug)]
struct Node {
    name: String,
    kind: NodeKind,
    remote_id: String,
    checksum: String,
    parent: Option<NodeId>,
    children: FxHashMap<String, NodeId>,
}

impl Node {
    fn new(name: String, kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            name,
            kind,
            remote_id: String::new(),
            checksum: String::new(),
            parent,
            children: FxHashMap::default(),
        }
    }
}

/// A flat remote listing entry, as consumed by [`Tree::new_tree_from_remote`].
#[derive(Debug, Clone)]
pub struct RemoteRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub kind: NodeKind,
    pub checksum: Option<String>,
}

/// An in-memory mirror of one watched directory tree.
///
/// Not internally synchronized: it's owned by exactly one actor at a time
/// (the reconciler at startup, the watch-classify stage thereafter).
pub struct Tree {
    /// Segments of the path to the root node's *parent*. May be empty if the
    /// root has no parent path component worth keeping (e.g. a bare `/`).
    root_prefix: Vec<String>,
    separator: char,
    root: NodeId,
    arena: Vec<Option<Node>>,
    free: Vec<usize>,
}

impl Tree {
    /// Build a tree with a single root node, using the host's native
    /// separator to parse `root_path`.
    pub fn new_tree(root_path: &str) -> Self {
        Self::with_separator(root_path, NATIVE_SEPARATOR)
    }

    /// Like [`Tree::new_tree`], but with an explicit separator. Exists so
    /// tests can exercise the other platform's path shape on any host.
    pub fn with_separator(root_path: &str, separator: char) -> Self {
        let mut segments = path_utils::split(root_path, separator);
        let name = segments.pop().unwrap_or_default();
        let mut arena = Vec::with_capacity(1);
        arena.push(Some(Node::new(name, NodeKind::Directory, None)));
        Self {
            root_prefix: segments,
            separator,
            root: NodeId(0),
            arena,
            free: Vec::new(),
        }
    }

    /// Reconstruct a subtree from a flat remote listing: find the record
    /// whose name matches the last segment of `root_path` (first match in
    /// listing order wins if several share the name - see the design notes
    /// on tie-breaking), then expand breadth-first from there.
    pub fn new_tree_from_remote(
        listing: &[RemoteRecord],
        root_path: &str,
        separator: char,
    ) -> Result<Self, AfsError> {
        let segments = path_utils::split(root_path, separator);
        let root_name = segments.last().cloned().unwrap_or_default();
        let root_prefix = if segments.is_empty() {
            Vec::new()
        } else {
            segments[..segments.len() - 1].to_vec()
        };

        let root_record = listing
            .iter()
            .find(|r| r.name == root_name)
            .ok_or_else(|| AfsError::NoMatchingRemoteRoot(root_name.clone()))?;

        let mut arena = Vec::new();
        arena.push(Some(Node {
            name: root_record.name.clone(),
            kind: root_record.kind,
            remote_id: root_record.id.clone(),
            checksum: root_record.checksum.clone().unwrap_or_default(),
            parent: None,
            children: FxHashMap::default(),
        }));
        let mut tree = Self {
            root_prefix,
            separator,
            root: NodeId(0),
            arena,
            free: Vec::new(),
        };

        // Breadth-first expansion: a queue of (remote id, tree NodeId) pairs
        // whose children we still need to attach.
        let mut queue = VecDeque::from([(root_record.id.clone(), tree.root)]);
        while let Some((parent_remote_id, parent_node)) = queue.pop_front() {
            for record in listing
                .iter()
                .filter(|r| r.parent_id.as_deref() == Some(parent_remote_id.as_str()))
            {
                let child = tree.alloc(Node {
                    name: record.name.clone(),
                    kind: record.kind,
                    remote_id: record.id.clone(),
                    checksum: record.checksum.clone().unwrap_or_default(),
                    parent: Some(parent_node),
                    children: FxHashMap::default(),
                });
                tree.node_mut(parent_node)
                    .children
                    .insert(record.name.clone(), child);
                queue.push_back((record.id.clone(), child));
            }
        }

        Ok(tree)
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(slot) = self.free.pop() {
            self.arena[slot] = Some(node);
            NodeId(slot)
        } else {
            self.arena.push(Some(node));
            NodeId(self.arena.len() - 1)
        }
    }

    fn free_slot(&mut self, id: NodeId) {
        self.arena[id.0] = None;
        self.free.push(id.0);
    }

    fn node(&self, id: NodeId) -> &Node {
        self.arena[id.0]
            .as_ref()
            .expect("NodeId referenced a freed arena slot")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.arena[id.0]
            .as_mut()
            .expect("NodeId referenced a freed arena slot")
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    pub fn remote_id(&self, id: NodeId) -> &str {
        &self.node(id).remote_id
    }

    pub fn checksum(&self, id: NodeId) -> &str {
        &self.node(id).checksum
    }

    pub fn parent_id(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn child_id(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.node(id).children.get(name).copied()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (&str, NodeId)> {
        self.node(id)
            .children
            .iter()
            .map(|(name, id)| (name.as_str(), *id))
    }

    pub fn set_remote_id_by_id(&mut self, id: NodeId, remote_id: String) {
        self.node_mut(id).remote_id = remote_id;
    }

    pub fn set_checksum_by_id(&mut self, id: NodeId, checksum: String) {
        self.node_mut(id).checksum = checksum;
    }

    /// The absolute path of this tree's root: `root_prefix` joined with the
    /// root node's name.
    pub fn root_path(&self) -> Utf8PathBuf {
        let mut segments = self.root_prefix.clone();
        segments.push(self.node(self.root).name.clone());
        Utf8PathBuf::from(path_utils::join(&segments, self.separator, true))
    }

    /// The absolute on-disk path of any node in this tree.
    pub fn full_path(&self, id: NodeId) -> Utf8PathBuf {
        let mut names = Vec::new();
        let mut cur = id;
        loop {
            names.push(self.node(cur).name.clone());
            match self.node(cur).parent {
                Some(p) => cur = p,
                None => break,
            }
        }
        names.reverse();
        let mut segments = self.root_prefix.clone();
        segments.extend(names);
        Utf8PathBuf::from(path_utils::join(&segments, self.separator, true))
    }

    /// Segments of `path` relative to this tree's root, or `None` if `path`
    /// isn't under the root at all.
    fn relative_segments(&self, path: &Utf8Path) -> Option<Vec<String>> {
        let full = path_utils::split(path.as_str(), self.separator);
        let mut prefix = self.root_prefix.clone();
        prefix.push(self.node(self.root).name.clone());
        if full.len() < prefix.len() || full[..prefix.len()] != prefix[..] {
            return None;
        }
        Some(full[prefix.len()..].to_vec())
    }

    /// Walk from root by segments. `find_path` is the read-only version;
    /// used as the basis for most of the path-keyed accessors below.
    pub fn find_path(&self, path: &Utf8Path) -> Option<NodeId> {
        let segments = self.relative_segments(path)?;
        let mut cur = self.root;
        for seg in segments {
            cur = self.node(cur).children.get(&seg).copied()?;
        }
        Some(cur)
    }

    pub fn contains_path(&self, path: &Utf8Path) -> bool {
        self.find_path(path).is_some()
    }

    pub fn is_dir(&self, path: &Utf8Path) -> Option<bool> {
        self.find_path(path).map(|id| self.kind(id) == NodeKind::Directory)
    }

    /// Insert `path`, creating intermediate directories as needed. Returns
    /// whether the tree was modified: `false` if `path` already existed with
    /// the requested kind (idempotent), `true` otherwise.
    pub fn add_path(&mut self, path: &Utf8Path, is_dir: bool) -> Result<bool, AfsError> {
        let segments = self.relative_segments(path).ok_or(AfsError::NotUnderRoot)?;
        let wanted_kind = if is_dir { NodeKind::Directory } else { NodeKind::File };

        let mut cur = self.root;
        let Some((last, ancestors)) = segments.split_last() else {
            // Re-adding the root itself: nothing to do.
            return Ok(false);
        };

        for seg in ancestors {
            cur = match self.node(cur).children.get(seg).copied() {
                Some(child) => child,
                None => {
                    let child = self.alloc(Node::new(seg.clone(), NodeKind::Directory, Some(cur)));
                    self.node_mut(cur).children.insert(seg.clone(), child);
                    child
                }
            };
        }

        if let Some(existing) = self.node(cur).children.get(last).copied() {
            if self.kind(existing) == wanted_kind {
                return Ok(false);
            }
            // Kind mismatch: leave the existing node alone. Converting a
            // populated directory into a file (or vice versa) isn't
            // something the notifier can tell us enough to do safely.
            return Ok(true);
        }

        let child = self.alloc(Node::new(last.clone(), wanted_kind, Some(cur)));
        self.node_mut(cur).children.insert(last.clone(), child);
        Ok(true)
    }

    /// Remove the node at `path` and its subtree.
    pub fn delete_path(&mut self, path: &Utf8Path) -> Result<(), AfsError> {
        let id = self.find_path(path).ok_or(AfsError::NotFound)?;
        let parent = self.node(id).parent;
        let name = self.node(id).name.clone();
        self.free_subtree(id);
        if let Some(parent) = parent {
            self.node_mut(parent).children.remove(&name);
        }
        Ok(())
    }

    fn free_subtree(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.node(id).children.values().copied().collect();
        for child in children {
            self.free_subtree(child);
        }
        self.free_slot(id);
    }

    /// Move the node at `old` to live under the directory at the parent of
    /// `new`, taking `new`'s last segment as its new name. `new`'s parent
    /// must already exist in the tree; this subsumes the restricted
    /// "rename in place" case where old and new share a parent.
    pub fn rename_path(&mut self, old: &Utf8Path, new: &Utf8Path) -> Result<(), AfsError> {
        let id = self.find_path(old).ok_or(AfsError::NotFound)?;
        let new_segments = self.relative_segments(new).ok_or(AfsError::NotUnderRoot)?;
        let Some((new_name, new_parent_segments)) = new_segments.split_last() else {
            return Err(AfsError::DestinationParentMissing);
        };

        let mut new_parent = self.root;
        for seg in new_parent_segments {
            new_parent = self
                .node(new_parent)
                .children
                .get(seg)
                .copied()
                .ok_or(AfsError::DestinationParentMissing)?;
        }
        if self.kind(new_parent) != NodeKind::Directory {
            return Err(AfsError::DestinationParentMissing);
        }

        let old_parent = self.node(id).parent;
        let old_name = self.node(id).name.clone();
        if let Some(old_parent) = old_parent {
            self.node_mut(old_parent).children.remove(&old_name);
        }
        self.node_mut(new_parent)
            .children
            .insert(new_name.clone(), id);
        let node = self.node_mut(id);
        node.name = new_name.clone();
        node.parent = Some(new_parent);
        Ok(())
    }

    pub fn attach_id(&mut self, path: &Utf8Path, id: String) -> Result<(), AfsError> {
        let node = self.find_path(path).ok_or(AfsError::NotFound)?;
        self.node_mut(node).remote_id = id;
        Ok(())
    }

    pub fn retrieve_id(&self, path: &Utf8Path) -> Option<String> {
        self.find_path(path).map(|id| self.remote_id(id).to_string())
    }

    pub fn set_checksum(&mut self, path: &Utf8Path, checksum: String) -> Result<(), AfsError> {
        let node = self.find_path(path).ok_or(AfsError::NotFound)?;
        self.node_mut(node).checksum = checksum;
        Ok(())
    }

    /// Structural equality: roots are equal ignoring name if `ignore_root_name`
    /// is set, and every child name present on either side has an equal
    /// subtree on the other. `ignore_root_name` applies only at the root -
    /// it never propagates down to descendants.
    pub fn equals(&self, other: &Tree, ignore_root_name: bool) -> bool {
        self.subtree_equals(self.root, other, other.root, ignore_root_name)
    }

    fn subtree_equals(
        &self,
        a: NodeId,
        other: &Tree,
        b: NodeId,
        ignore_name: bool,
    ) -> bool {
        if !ignore_name && self.name(a) != other.name(b) {
            return false;
        }
        if self.kind(a) != other.kind(b) {
            return false;
        }
        let a_children = &self.node(a).children;
        let b_children = &other.node(b).children;
        if a_children.len() != b_children.len() {
            return false;
        }
        a_children.iter().all(|(name, &a_child)| {
            b_children
                .get(name)
                .is_some_and(|&b_child| self.subtree_equals(a_child, other, b_child, false))
        })
    }

    /// Post-order traversal of the tree: hash every file's on-disk bytes and
    /// store the result in `checksum`. `local_root` is the real filesystem
    /// path this tree mirrors (its name need not match the tree's root name).
    pub fn calculate_checksums(&mut self) -> anyhow::Result<()> {
        self.calculate_checksums_at(self.root)
    }

    fn calculate_checksums_at(&mut self, id: NodeId) -> anyhow::Result<()> {
        let children: Vec<NodeId> = self.node(id).children.values().copied().collect();
        for child in children {
            self.calculate_checksums_at(child)?;
        }
        if self.kind(id) == NodeKind::File {
            let path = self.full_path(id);
            let sum = checksum::hash_file(path.as_std_path())?;
            self.node_mut(id).checksum = sum;
        }
        Ok(())
    }

    /// Scan a real directory tree from disk, building a fresh [`Tree`].
    /// Symlinks are skipped (no symlink handling is in scope).
    pub fn scan(local_root: &Utf8Path) -> anyhow::Result<Tree> {
        let mut tree = Tree::new_tree(local_root.as_str());
        scan_into(&mut tree, local_root)?;
        Ok(tree)
    }
}

fn scan_into(tree: &mut Tree, dir: &Utf8Path) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        let path = Utf8PathBuf::try_from(entry.path())?;
        if meta.file_type().is_symlink() {
            continue;
        }
        if meta.is_dir() {
            tree.add_path(&path, true).expect("scanned path is under root");
            scan_into(tree, &path)?;
        } else if meta.is_file() {
            tree.add_path(&path, false).expect("scanned path is under root");
        }
    }
    Ok(())
}
