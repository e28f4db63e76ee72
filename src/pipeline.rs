//! The debouncer and applier: the two tasks downstream of the
//! watch-classify stage that turn a (possibly noisy) event stream into
//! remote-store calls.
//!
//! Three long-lived tasks per configured root (W, D, A per the concurrency
//! model) touch the AFS: the classifier publishes a mutation before
//! publishing its event; the applier reads and updates `remote_id` /
//! `checksum` after its own remote call returns. Both sides share one
//! [`Tree`] behind an async mutex, since they run as separate `tokio` tasks
//! rather than within a single borrow scope the way the startup reconciler
//! does.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use crate::afs::Tree;
use crate::checksum;
use crate::remote::{RemoteError, RemoteStore};
use crate::watch::{Event, EventCategory};

pub const DEFAULT_THRESHOLD: Duration = Duration::from_millis(500);

/// Drops duplicate events within a time window per `(category, path)`.
pub struct Debouncer {
    threshold: Duration,
    last_forwarded: FxHashMap<(EventCategory, Utf8PathBuf), Instant>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(threshold: Duration) -> Self {
        Self { threshold, last_forwarded: FxHashMap::default() }
    }

    /// Whether `event` should be forwarded. Side-effecting: records the
    /// forward so the next event of the same key measures against it.
    pub fn should_forward(&mut self, event: &Event) -> bool {
        let key = (event.category, event.path.clone());
        let forward = match self.last_forwarded.get(&key) {
            Some(&last) => event.timestamp.saturating_duration_since(last) > self.threshold,
            None => true,
        };
        if forward {
            self.last_forwarded.insert(key, event.timestamp);
        }
        forward
    }

    /// Drive the debouncer as a standalone task between the classifier's
    /// channel and the applier's.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Event>, tx: mpsc::Sender<Event>) {
        while let Some(event) = rx.recv().await {
            if self.should_forward(&event) && tx.send(event).await.is_err() {
                break;
            }
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

/// Single consumer of the debounced channel; the only task, besides the
/// classifier, allowed to mutate the shared [`Tree`].
pub struct Applier {
    store: Arc<dyn RemoteStore>,
    tree: Arc<Mutex<Tree>>,
}

impl Applier {
    pub fn new(store: Arc<dyn RemoteStore>, tree: Arc<Mutex<Tree>>) -> Self {
        Self { store, tree }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            let path = event.path.clone();
            let category = event.category;
            self.apply(event)
                .instrument(tracing::info_span!("apply", ?category, %path))
                .await;
        }
    }

    /// Apply a single already-debounced event. Exposed (rather than kept
    /// private to [`Applier::run`]) so integration tests can drive one event
    /// at a time without standing up the full channel plumbing.
    pub async fn apply(&self, event: Event) {
        match event.category {
            EventCategory::FileCreated | EventCategory::DirectoryCreated => {
                self.apply_create(event).await
            }
            EventCategory::FileDeleted | EventCategory::DirectoryDeleted => {
                self.apply_delete(event).await
            }
            EventCategory::FileRenamed | EventCategory::DirectoryRenamed => {
                self.apply_rename(event).await
            }
            EventCategory::FileWritten => self.apply_write(event).await,
        }
    }

    /// Looks up the remote ID of `path`'s parent directory in the AFS.
    /// Failure here is `classify_miss`-flavored: logical, not transient.
    async fn resolve_parent_id(&self, path: &camino::Utf8Path) -> Option<String> {
        let parent = path.parent()?;
        let tree = self.tree.lock().await;
        tree.find_path(parent).map(|id| tree.remote_id(id).to_string())
    }

    async fn apply_create(&self, event: Event) {
        let is_dir = matches!(event.category, EventCategory::DirectoryCreated);
        let Some(parent_id) = self.resolve_parent_id(&event.path).await else {
            warn!(path = %event.path, "parent not tracked in AFS, abandoning create");
            return;
        };
        let Some(name) = event.path.file_name().map(str::to_owned) else {
            warn!(path = %event.path, "create event for a path with no file name, abandoning");
            return;
        };

        let md5sum = if is_dir {
            String::new()
        } else {
            let path = event.path.clone();
            match tokio::task::spawn_blocking(move || checksum::hash_file(path.as_std_path()))
                .await
                .expect("checksum task panicked")
            {
                Ok(sum) => sum,
                Err(e) => {
                    warn!(path = %event.path, error = %e, "local_io: couldn't read file to upload, abandoning event");
                    return;
                }
            }
        };

        let new_id = loop {
            let store = self.store.clone();
            let parent_id = parent_id.clone();
            let outcome = if is_dir {
                let name = name.clone();
                tokio::task::spawn_blocking(move || store.create_folder(&name, Some(&parent_id)))
                    .await
                    .expect("applier blocking task panicked")
            } else {
                let path = event.path.clone();
                let md5sum = md5sum.clone();
                tokio::task::spawn_blocking(move || store.create_file(&path, &parent_id, &md5sum))
                    .await
                    .expect("applier blocking task panicked")
            };
            match outcome {
                Ok(id) => break id,
                Err(RemoteError::Transient(msg)) => {
                    warn!(path = %event.path, error = %msg, "transient remote failure, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    warn!(path = %event.path, error = %e, "remote rejected create, abandoning event");
                    return;
                }
            }
        };

        if let Err(e) = self.tree.lock().await.attach_id(&event.path, new_id) {
            warn!(path = %event.path, error = %e, "couldn't attach new remote id onto AFS node");
        }
    }

    async fn apply_delete(&self, event: Event) {
        let Some(id) = event.doomed_remote_id.clone() else {
            warn!(path = %event.path, "delete event carried no remote id, abandoning");
            return;
        };
        loop {
            let store = self.store.clone();
            let id2 = id.clone();
            match tokio::task::spawn_blocking(move || store.delete(&id2))
                .await
                .expect("applier blocking task panicked")
            {
                Ok(()) => break,
                Err(RemoteError::NotFound(_)) => {
                    debug!(path = %event.path, "remote object already gone, treating delete as done");
                    break;
                }
                Err(RemoteError::Transient(msg)) => {
                    warn!(path = %event.path, error = %msg, "transient remote failure, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    warn!(path = %event.path, error = %e, "remote rejected delete, abandoning event");
                    return;
                }
            }
        }
    }

    async fn apply_rename(&self, event: Event) {
        let Some(old_path) = event.old_path.clone() else {
            warn!(path = %event.path, "rename event carried no old_path, abandoning");
            return;
        };
        let Some(new_name) = event.path.file_name().map(str::to_owned) else {
            warn!(path = %event.path, "rename destination has no file name, abandoning");
            return;
        };

        let (id, old_parent_id, new_parent_id) = {
            let tree = self.tree.lock().await;
            let Some(node) = tree.find_path(&event.path) else {
                warn!(path = %event.path, "renamed node missing from AFS, abandoning");
                return;
            };
            let id = tree.remote_id(node).to_string();
            let Some(old_parent_id) = old_path
                .parent()
                .and_then(|p| tree.find_path(p))
                .map(|id| tree.remote_id(id).to_string())
            else {
                warn!(path = %event.path, "rename source's old parent not tracked, abandoning");
                return;
            };
            let Some(new_parent_id) = event
                .path
                .parent()
                .and_then(|p| tree.find_path(p))
                .map(|id| tree.remote_id(id).to_string())
            else {
                warn!(path = %event.path, "rename destination's parent not tracked, abandoning");
                return;
            };
            (id, old_parent_id, new_parent_id)
        };

        loop {
            let store = self.store.clone();
            let id = id.clone();
            let old_parent_id = old_parent_id.clone();
            let new_parent_id = new_parent_id.clone();
            let new_name = new_name.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                store.rename(&id, &old_parent_id, &new_parent_id, &new_name)
            })
            .await
            .expect("applier blocking task panicked");
            match outcome {
                Ok(()) => break,
                Err(RemoteError::Transient(msg)) => {
                    warn!(path = %event.path, error = %msg, "transient remote failure, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    warn!(path = %event.path, error = %e, "remote rejected rename, abandoning event");
                    return;
                }
            }
        }
    }

    async fn apply_write(&self, event: Event) {
        let id = {
            let tree = self.tree.lock().await;
            match tree.find_path(&event.path) {
                Some(node) => tree.remote_id(node).to_string(),
                None => {
                    warn!(path = %event.path, "write event for a path missing from the AFS, abandoning");
                    return;
                }
            }
        };

        let new_sum = loop {
            let store = self.store.clone();
            let id = id.clone();
            let path = event.path.clone();
            let outcome = tokio::task::spawn_blocking(move || store.update_file(&path, &id))
                .await
                .expect("applier blocking task panicked");
            match outcome {
                Ok(result) => break result.md5sum,
                Err(RemoteError::Transient(msg)) => {
                    warn!(path = %event.path, error = %msg, "transient remote failure, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    warn!(path = %event.path, error = %e, "remote rejected update, abandoning event");
                    return;
                }
            }
        };

        if let Err(e) = self.tree.lock().await.set_checksum(&event.path, new_sum) {
            warn!(path = %event.path, error = %e, "couldn't record refreshed checksum onto AFS node");
        }
    }
}
