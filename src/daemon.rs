//! Daemon lifecycle: wires one (watch, debounce, apply) task trio per
//! configured root onto a freshly reconciled [`Tree`], running one-shot
//! setup for each configured directory before handing it off to its own
//! watch loop.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info_span};

use crate::afs::Tree;
use crate::config::{Configuration, RootConfig};
use crate::pipeline::{Applier, Debouncer};
use crate::reconcile;
use crate::remote::RemoteStore;
use crate::watch::{Classifier, NotifyWatcher, Notifier};

/// Per-root channel capacity. The producer blocks on a full channel; that
/// block is this system's only backpressure.
const CHANNEL_CAPACITY: usize = 512;

/// One configured directory's live state: its shared AFS, kept around so a
/// caller could (in a fuller build) inspect in-flight sync state per root.
pub struct RootHandle {
    pub local_path: Utf8PathBuf,
    pub tree: Arc<Mutex<Tree>>,
}

/// Owns every per-root task trio and the root handles they share.
pub struct Daemon {
    pub roots: Vec<RootHandle>,
    tasks: JoinSet<()>,
}

impl Daemon {
    /// Reconcile every configured root, then spawn its watch-classify,
    /// debounce, and apply tasks.
    pub async fn start(config: &Configuration, store: Arc<dyn RemoteStore>) -> Result<Self> {
        if config.directories.is_empty() {
            bail!("no directories configured; add at least one [[directories]] entry to piledriver.toml");
        }

        let identifier = config.machine_identifier();
        let store_for_root = store.clone();
        let machine_root_id = tokio::task::spawn_blocking(move || {
            reconcile::ensure_machine_root(store_for_root.as_ref(), &identifier)
        })
        .await
        .context("machine-root setup task panicked")??;

        let mut roots = Vec::with_capacity(config.directories.len());
        let mut tasks = JoinSet::new();

        for cfg in &config.directories {
            let tree = reconcile_one(cfg, &machine_root_id, store.clone()).await?;
            let tree = Arc::new(Mutex::new(tree));
            roots.push(RootHandle { local_path: cfg.local.clone(), tree: tree.clone() });
            spawn_root_tasks(&mut tasks, cfg.clone(), tree, store.clone());
        }

        Ok(Self { roots, tasks })
    }

    /// Await every root's task trio. Returns once all of them have exited
    /// (normally only happens on a fatal per-root error or process shutdown).
    pub async fn join(mut self) -> Result<()> {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "a root's task panicked");
            }
        }
        Ok(())
    }
}

async fn reconcile_one(cfg: &RootConfig, machine_root_id: &str, store: Arc<dyn RemoteStore>) -> Result<Tree> {
    let cfg = cfg.clone();
    let machine_root_id = machine_root_id.to_string();
    tokio::task::spawn_blocking(move || reconcile::reconcile_root(&cfg, &machine_root_id, store.as_ref()))
        .await
        .with_context(|| "startup reconciliation task panicked")?
}

fn spawn_root_tasks(tasks: &mut JoinSet<()>, cfg: RootConfig, tree: Arc<Mutex<Tree>>, store: Arc<dyn RemoteStore>) {
    let (raw_tx, raw_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (debounced_tx, debounced_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let watch_root = cfg.local.clone();
    let watch_tree = tree.clone();
    tasks.spawn_blocking(move || {
        let span = info_span!("watch", root = %watch_root);
        let _enter = span.enter();
        let mut notifier = match NotifyWatcher::new(&watch_root) {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "couldn't start watching root, this root's pipeline is dead");
                return;
            }
        };
        let mut classifier = Classifier::new();
        while let Some(raw) = notifier.recv() {
            let event = {
                let mut tree = watch_tree.blocking_lock();
                classifier.classify(&mut tree, &mut notifier, raw)
            };
            if let Some(event) = event {
                if raw_tx.blocking_send(event).is_err() {
                    break;
                }
            }
        }
    });

    tasks.spawn(async move {
        Debouncer::new().run(raw_rx, debounced_tx).await;
    });

    let apply_root = cfg.local;
    tasks.spawn(async move {
        use tracing::Instrument;
        let span = info_span!("apply", root = %apply_root);
        Applier::new(store, tree).run(debounced_rx).instrument(span).await;
    });
}
