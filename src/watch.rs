//! The watch-classify stage: turns raw filesystem notifications into typed,
//! timestamped [`Event`]s against the AFS, pairing up the notifier's
//! two-step rename protocol along the way.
//!
//! [`Notifier`] is the abstract source of `(path, op)` records.
//! [`NotifyWatcher`] wraps the `notify` crate's OS-native watcher, a thin
//! adapter the rest of the pipeline never touches directly; tests drive
//! [`MemoryNotifier`] instead.

use std::collections::VecDeque;
use std::fs;
use std::sync::mpsc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use notify::event::{ModifyKind, RenameMode};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::afs::{NodeKind, Tree};

/// A single raw `(path, op)` record, as delivered by a [`Notifier`].
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub path: Utf8PathBuf,
    pub op: RawOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOp {
    /// `is_dir` is `Some` when the OS told us the kind directly (e.g.
    /// inotify's `IN_ISDIR`); `None` means the classifier must stat.
    Create { is_dir: Option<bool> },
    Remove,
    Write,
    Rename,
    Chmod,
    Other,
}

/// The abstract filesystem-change-notification source the classifier
/// consumes. Implementations report a move as `Rename(src)` then
/// `Create(dst)`, never a single fused event.
pub trait Notifier: Send {
    /// Blocking receive; `None` means the upstream source has closed.
    fn recv(&mut self) -> Option<RawEvent>;
    /// Start watching `path` (recursively, where the backend supports it).
    fn add_watch(&mut self, path: &Utf8Path) -> Result<()>;
}

/// The real notifier: wraps `notify`'s recommended (OS-native) watcher.
pub struct NotifyWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::Receiver<RawEvent>,
}

impl NotifyWatcher {
    pub fn new(root: &Utf8Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for raw in translate(event) {
                        // The other end only goes away when the whole
                        // pipeline is shutting down; nothing to do but drop.
                        let _ = tx.send(raw);
                    }
                }
                Err(e) => warn!(error = %e, "notifier backend reported an error"),
            }
        })
        .context("Couldn't start filesystem watcher")?;
        watcher
            .watch(root.as_std_path(), RecursiveMode::Recursive)
            .with_context(|| format!("Couldn't watch {root}"))?;
        Ok(Self { watcher, rx })
    }
}

impl Notifier for NotifyWatcher {
    fn recv(&mut self) -> Option<RawEvent> {
        self.rx.recv().ok()
    }

    fn add_watch(&mut self, path: &Utf8Path) -> Result<()> {
        self.watcher
            .watch(path.as_std_path(), RecursiveMode::Recursive)
            .with_context(|| format!("Couldn't watch {path}"))
    }
}

/// Translate one `notify` event into zero or more [`RawEvent`]s. A rename
/// the backend can correlate internally (`RenameMode::Both`, two paths in
/// one event) is split into the same `Rename` then `Create` pair the
/// two-step protocol expects, so the classifier never needs to know which
/// shape the OS handed us.
fn translate(event: notify::Event) -> Vec<RawEvent> {
    let to_path = |p: &std::path::Path| Utf8PathBuf::try_from(p.to_owned()).ok();

    match event.kind {
        EventKind::Create(kind) => {
            let is_dir = match kind {
                notify::event::CreateKind::Folder => Some(true),
                notify::event::CreateKind::File => Some(false),
                _ => None,
            };
            event
                .paths
                .iter()
                .filter_map(to_path)
                .map(|path| RawEvent { path, op: RawOp::Create { is_dir } })
                .collect()
        }
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter_map(to_path)
            .map(|path| RawEvent { path, op: RawOp::Remove })
            .collect(),
        EventKind::Modify(ModifyKind::Data(_)) => event
            .paths
            .iter()
            .filter_map(to_path)
            .map(|path| RawEvent { path, op: RawOp::Write })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => event
            .paths
            .iter()
            .filter_map(to_path)
            .map(|path| RawEvent { path, op: RawOp::Chmod })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .first()
            .and_then(|p| to_path(p))
            .map(|path| vec![RawEvent { path, op: RawOp::Rename }])
            .unwrap_or_default(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .first()
            .and_then(|p| to_path(p))
            .map(|path| vec![RawEvent { path, op: RawOp::Create { is_dir: None } }])
            .unwrap_or_default(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let mut out = Vec::with_capacity(2);
            if let Some(old) = to_path(&event.paths[0]) {
                out.push(RawEvent { path: old, op: RawOp::Rename });
            }
            if let Some(new) = to_path(&event.paths[1]) {
                out.push(RawEvent { path: new, op: RawOp::Create { is_dir: None } });
            }
            out
        }
        // Access events, ambiguous renames, and anything else we don't have
        // a clean mapping for are dropped here rather than forwarded as
        // `Other`, since the classifier would drop them anyway.
        _ => Vec::new(),
    }
}

/// A test double the classifier's own tests (and integration tests) drive
/// directly, feeding it raw events without touching the real filesystem.
#[derive(Default)]
pub struct MemoryNotifier {
    queue: VecDeque<RawEvent>,
    pub watched: Vec<Utf8PathBuf>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: RawEvent) {
        self.queue.push_back(event);
    }
}

impl Notifier for MemoryNotifier {
    fn recv(&mut self) -> Option<RawEvent> {
        self.queue.pop_front()
    }

    fn add_watch(&mut self, path: &Utf8Path) -> Result<()> {
        self.watched.push(path.to_owned());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    FileCreated,
    DirectoryCreated,
    FileDeleted,
    DirectoryDeleted,
    FileRenamed,
    DirectoryRenamed,
    FileWritten,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub category: EventCategory,
    pub path: Utf8PathBuf,
    pub old_path: Option<Utf8PathBuf>,
    /// For deletes: the remote ID the node carried just before it was
    /// removed from the AFS, so the applier can delete the right object.
    pub doomed_remote_id: Option<String>,
    pub timestamp: Instant,
}

/// Maintains exactly one bit of state: a pending-rename holder. Takes the
/// AFS and notifier as per-call arguments rather than owning borrows of
/// them, since the live daemon only holds its shared tree's lock for the
/// duration of a single event, not across the classifier's whole lifetime.
#[derive(Default)]
pub struct Classifier {
    pending: Option<Utf8PathBuf>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, tree: &mut Tree, notifier: &mut dyn Notifier, raw: RawEvent) -> Option<Event> {
        match raw.op {
            RawOp::Rename => self.on_rename(tree, raw.path),
            RawOp::Create { is_dir } => self.on_create(tree, notifier, raw.path, is_dir),
            RawOp::Remove => on_remove(tree, raw.path),
            RawOp::Write => Some(Event {
                category: EventCategory::FileWritten,
                path: raw.path,
                old_path: None,
                doomed_remote_id: None,
                timestamp: Instant::now(),
            }),
            RawOp::Chmod | RawOp::Other => None,
        }
    }

    fn on_rename(&mut self, tree: &Tree, source: Utf8PathBuf) -> Option<Event> {
        if tree.contains_path(&source) {
            self.pending = Some(source);
        } else {
            debug!(path = %source, "rename source isn't tracked, ignoring");
        }
        None
    }

    fn on_create(
        &mut self,
        tree: &mut Tree,
        notifier: &mut dyn Notifier,
        path: Utf8PathBuf,
        is_dir_hint: Option<bool>,
    ) -> Option<Event> {
        if let Some(old_path) = self.pending.take() {
            // Must read `is_dir` from the still-present source node before
            // `rename_path` mutates the tree out from under it.
            let was_dir = tree.is_dir(&old_path).unwrap_or(false);
            if tree.rename_path(&old_path, &path).is_err() {
                warn!(old = %old_path, new = %path, "rename destination's parent isn't tracked, dropping");
                return None;
            }
            let category = if was_dir {
                EventCategory::DirectoryRenamed
            } else {
                EventCategory::FileRenamed
            };
            return Some(Event {
                category,
                path,
                old_path: Some(old_path),
                doomed_remote_id: None,
                timestamp: Instant::now(),
            });
        }

        let is_dir = is_dir_hint.unwrap_or_else(|| stat_is_dir(&path));
        if tree.add_path(&path, is_dir).is_err() {
            warn!(path = %path, "create event for a path outside our watched root, dropping");
            return None;
        }

        if is_dir {
            if let Err(e) = notifier.add_watch(&path) {
                warn!(path = %path, error = %e, "couldn't extend watch to new directory");
            }
            expand_preexisting_subtree(tree, notifier, &path);
            Some(Event {
                category: EventCategory::DirectoryCreated,
                path,
                old_path: None,
                doomed_remote_id: None,
                timestamp: Instant::now(),
            })
        } else {
            Some(Event {
                category: EventCategory::FileCreated,
                path,
                old_path: None,
                doomed_remote_id: None,
                timestamp: Instant::now(),
            })
        }
    }
}

fn on_remove(tree: &mut Tree, path: Utf8PathBuf) -> Option<Event> {
    // `is_dir` must come from the AFS before we delete: the node (and with
    // it, the answer) is gone right after.
    let id = tree.find_path(&path)?;
    let is_dir = tree.kind(id) == NodeKind::Directory;
    let doomed_remote_id = tree.remote_id(id).to_string();
    if tree.delete_path(&path).is_err() {
        return None;
    }
    let category = if is_dir {
        EventCategory::DirectoryDeleted
    } else {
        EventCategory::FileDeleted
    };
    Some(Event {
        category,
        path,
        old_path: None,
        doomed_remote_id: Some(doomed_remote_id),
        timestamp: Instant::now(),
    })
}

/// A freshly created directory may already contain entries the OS
/// populated between the notification firing and our watch registering.
/// Walk it once, adding both watches and AFS nodes for what's there.
fn expand_preexisting_subtree(tree: &mut Tree, notifier: &mut dyn Notifier, dir: &Utf8Path) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let Ok(path) = Utf8PathBuf::try_from(entry.path()) else { continue };
        let Ok(meta) = entry.metadata() else { continue };
        if meta.file_type().is_symlink() {
            continue;
        }
        if meta.is_dir() {
            let _ = tree.add_path(&path, true);
            if let Err(e) = notifier.add_watch(&path) {
                warn!(path = %path, error = %e, "couldn't extend watch into preexisting subdirectory");
            }
            expand_preexisting_subtree(tree, notifier, &path);
        } else if meta.is_file() {
            let _ = tree.add_path(&path, false);
        }
    }
}

fn stat_is_dir(path: &Utf8Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(path: &str, op: RawOp) -> RawEvent {
        RawEvent { path: Utf8PathBuf::from(path), op }
    }

    #[test]
    fn rename_pairing_emits_exactly_one_renamed_event() {
        let mut tree = Tree::with_separator("/r", '/');
        tree.add_path(&Utf8PathBuf::from("/r/a"), false).unwrap();
        let mut notifier = MemoryNotifier::new();
        let mut classifier = Classifier::new();

        let first = classifier.classify(&mut tree, &mut notifier, raw("/r/a", RawOp::Rename));
        assert!(first.is_none(), "the rename-from half emits nothing by itself");

        let second = classifier
            .classify(&mut tree, &mut notifier, raw("/r/b", RawOp::Create { is_dir: None }))
            .expect("rename-to half produces the paired event");
        assert_eq!(second.category, EventCategory::FileRenamed);
        assert_eq!(second.old_path.as_deref(), Some(Utf8Path::new("/r/a")));
        assert_eq!(second.path, Utf8PathBuf::from("/r/b"));

        assert!(tree.contains_path(&Utf8PathBuf::from("/r/b")));
        assert!(!tree.contains_path(&Utf8PathBuf::from("/r/a")));
    }

    #[test]
    fn create_without_pending_rename_is_a_plain_create() {
        let mut tree = Tree::with_separator("/r", '/');
        let mut notifier = MemoryNotifier::new();
        let mut classifier = Classifier::new();

        let event = classifier
            .classify(&mut tree, &mut notifier, raw("/r/new.txt", RawOp::Create { is_dir: Some(false) }))
            .unwrap();
        assert_eq!(event.category, EventCategory::FileCreated);
        assert!(event.old_path.is_none());
    }

    #[test]
    fn directory_create_extends_the_watch_set() {
        let mut tree = Tree::with_separator("/r", '/');
        let mut notifier = MemoryNotifier::new();
        let mut classifier = Classifier::new();

        classifier
            .classify(&mut tree, &mut notifier, raw("/r/sub", RawOp::Create { is_dir: Some(true) }))
            .unwrap();
        assert_eq!(notifier.watched, vec![Utf8PathBuf::from("/r/sub")]);
    }

    #[test]
    fn delete_captures_remote_id_before_removing_the_node() {
        let mut tree = Tree::with_separator("/r", '/');
        tree.add_path(&Utf8PathBuf::from("/r/a"), false).unwrap();
        tree.attach_id(&Utf8PathBuf::from("/r/a"), "remote-123".into()).unwrap();
        let mut notifier = MemoryNotifier::new();
        let mut classifier = Classifier::new();

        let event = classifier.classify(&mut tree, &mut notifier, raw("/r/a", RawOp::Remove)).unwrap();
        assert_eq!(event.category, EventCategory::FileDeleted);
        assert_eq!(event.doomed_remote_id.as_deref(), Some("remote-123"));
        assert!(!tree.contains_path(&Utf8PathBuf::from("/r/a")));
    }

    #[test]
    fn delete_cascade_reports_only_the_directory_itself() {
        let mut tree = Tree::with_separator("/r", '/');
        tree.add_path(&Utf8PathBuf::from("/r/a"), true).unwrap();
        tree.add_path(&Utf8PathBuf::from("/r/a/b"), false).unwrap();
        tree.attach_id(&Utf8PathBuf::from("/r/a"), "dir-id".into()).unwrap();
        let mut notifier = MemoryNotifier::new();
        let mut classifier = Classifier::new();

        let event = classifier.classify(&mut tree, &mut notifier, raw("/r/a", RawOp::Remove)).unwrap();
        assert_eq!(event.category, EventCategory::DirectoryDeleted);
        assert_eq!(event.doomed_remote_id.as_deref(), Some("dir-id"));
        assert!(!tree.contains_path(&Utf8PathBuf::from("/r/a")));
        assert!(!tree.contains_path(&Utf8PathBuf::from("/r/a/b")));
    }

    #[test]
    fn chmod_is_dropped() {
        let mut tree = Tree::with_separator("/r", '/');
        let mut notifier = MemoryNotifier::new();
        let mut classifier = Classifier::new();
        assert!(classifier.classify(&mut tree, &mut notifier, raw("/r/a", RawOp::Chmod)).is_none());
    }
}
