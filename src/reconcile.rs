//! Startup reconciliation: make the local and remote trees structurally
//! identical, attach remote IDs onto the local tree, then push any content
//! that drifted while the daemon wasn't watching.
//!
//! Three passes, run in order per configured root (see [`reconcile_root`]):
//! [`reconcile_structure`] (create/delete to match shape), [`attach_ids`]
//! (copy remote IDs onto the now-matching local tree), and
//! [`update_remote_from_checksums`] (re-upload files whose content drifted).

use anyhow::{Context, Result};
use camino::Utf8Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::afs::{NodeId, NodeKind, RemoteRecord, Tree};
use crate::checksum;
use crate::config::RootConfig;
use crate::remote::{RemoteError, RemoteObject, RemoteStore};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("local I/O failure: {0}")]
    Io(String),
    #[error("structural invariant violated: {0}")]
    Invariant(String),
}

/// Brings `remote` into structural equality with `local`. Returns whether
/// the remote side was actually changed (callers use this to decide whether
/// a fresh listing is worth fetching).
pub fn reconcile_structure(
    local: &Tree,
    remote: Option<&Tree>,
    store: &dyn RemoteStore,
    remote_root_name: &str,
    root_parent_id: Option<&str>,
) -> Result<bool, ReconcileError> {
    match remote {
        None => {
            upload_subtree(local, local.root_id(), store, root_parent_id, Some(remote_root_name))?;
            Ok(true)
        }
        Some(remote) => backup_on_mismatch(
            local,
            local.root_id(),
            remote,
            remote.root_id(),
            root_parent_id,
            store,
            true,
        ),
    }
}

fn backup_on_mismatch(
    local: &Tree,
    local_id: NodeId,
    remote: &Tree,
    remote_id: NodeId,
    remote_parent_id: Option<&str>,
    store: &dyn RemoteStore,
    is_root: bool,
) -> Result<bool, ReconcileError> {
    if !is_root && local.name(local_id) != remote.name(remote_id) {
        upload_subtree(local, local_id, store, remote_parent_id, None)?;
        return Ok(true);
    }

    let mut changed = false;
    let mut covered = std::collections::HashSet::new();

    for (child_name, child_local_id) in local.children(local_id) {
        match remote.child_id(remote_id, child_name) {
            Some(child_remote_id) => {
                covered.insert(child_remote_id);
                changed |= backup_on_mismatch(
                    local,
                    child_local_id,
                    remote,
                    child_remote_id,
                    Some(remote.remote_id(remote_id)),
                    store,
                    false,
                )?;
            }
            None => {
                upload_subtree(
                    local,
                    child_local_id,
                    store,
                    Some(remote.remote_id(remote_id)),
                    None,
                )?;
                changed = true;
            }
        }
    }

    for (_, child_remote_id) in remote.children(remote_id) {
        if !covered.contains(&child_remote_id) {
            info!(
                path = %remote.full_path(child_remote_id),
                "pruning remote object absent locally"
            );
            store.delete(remote.remote_id(child_remote_id))?;
            changed = true;
        }
    }

    Ok(changed)
}

fn upload_subtree(
    local: &Tree,
    node: NodeId,
    store: &dyn RemoteStore,
    parent_id: Option<&str>,
    name_override: Option<&str>,
) -> Result<(), ReconcileError> {
    let owned_name;
    let name: &str = match name_override {
        Some(n) => n,
        None => {
            owned_name = local.name(node).to_string();
            &owned_name
        }
    };

    match local.kind(node) {
        NodeKind::Directory => {
            let new_id = store.create_folder(name, parent_id)?;
            for (_, child) in local.children(node) {
                upload_subtree(local, child, store, Some(&new_id), None)?;
            }
        }
        NodeKind::File => {
            let path = local.full_path(node);
            let md5 = checksum::hash_file(path.as_std_path()).map_err(|e| ReconcileError::Io(e.to_string()))?;
            let parent = parent_id.expect("a file always has a parent directory");
            store.create_file(&path, parent, &md5)?;
        }
    }
    Ok(())
}

/// Precondition: `local.equals(remote, ignore_root_name=true)`. Copies every
/// remote ID onto its matching local node.
pub fn attach_ids(local: &mut Tree, remote: &Tree) -> Result<(), ReconcileError> {
    attach_pair(local, local.root_id(), remote, remote.root_id())
}

fn attach_pair(local: &mut Tree, lid: NodeId, remote: &Tree, rid: NodeId) -> Result<(), ReconcileError> {
    local.set_remote_id_by_id(lid, remote.remote_id(rid).to_string());
    let child_names: Vec<String> = local.children(lid).map(|(n, _)| n.to_string()).collect();
    for name in child_names {
        let lchild = local
            .child_id(lid, &name)
            .expect("name came from this node's own children");
        let rchild = remote.child_id(rid, &name).ok_or_else(|| {
            ReconcileError::Invariant(format!(
                "remote tree is missing child {name:?} after reconcile_structure"
            ))
        })?;
        attach_pair(local, lchild, remote, rchild)?;
    }
    Ok(())
}

/// Precondition: `local` and `remote` share structure and IDs, and `local`'s
/// checksums have been freshly computed via [`Tree::calculate_checksums`].
/// Depth-first, re-uploads every file whose checksum disagrees.
pub fn update_remote_from_checksums(
    local: &mut Tree,
    remote: &mut Tree,
    store: &dyn RemoteStore,
) -> Result<(), ReconcileError> {
    update_pair(local, local.root_id(), remote, remote.root_id(), store)
}

fn update_pair(
    local: &mut Tree,
    lid: NodeId,
    remote: &mut Tree,
    rid: NodeId,
    store: &dyn RemoteStore,
) -> Result<(), ReconcileError> {
    if local.kind(lid) == NodeKind::File {
        if local.checksum(lid) != remote.checksum(rid) {
            let path = local.full_path(lid);
            info!(path = %path, "content drift detected, re-uploading");
            let result = store.update_file(&path, local.remote_id(lid))?;
            local.set_checksum_by_id(lid, result.md5sum.clone());
            remote.set_checksum_by_id(rid, result.md5sum);
        }
        return Ok(());
    }

    let child_names: Vec<String> = local.children(lid).map(|(n, _)| n.to_string()).collect();
    for name in child_names {
        let lchild = local.child_id(lid, &name).expect("own child");
        let rchild = remote.child_id(rid, &name).ok_or_else(|| {
            ReconcileError::Invariant(format!("remote tree is missing child {name:?}"))
        })?;
        update_pair(local, lchild, remote, rchild, store)?;
    }
    Ok(())
}

/// Locate (or create) the per-machine root folder that all configured
/// directories live under remotely.
pub fn ensure_machine_root(store: &dyn RemoteStore, machine_identifier: &str) -> Result<String> {
    let name = format!("piledriver-{machine_identifier}");
    match store
        .find_by_name(&name)
        .with_context(|| format!("Couldn't look up remote root folder {name:?}"))?
    {
        Some(id) => Ok(id),
        None => {
            info!(%name, "creating per-machine root folder");
            Ok(store
                .create_folder(&name, None)
                .with_context(|| format!("Couldn't create remote root folder {name:?}"))?)
        }
    }
}

/// Converts a flat remote listing into the records [`Tree::new_tree_from_remote`]
/// expects, carrying `app_properties.md5sum` over as each record's `checksum`
/// so file nodes reconstructed from the remote start with a real digest
/// instead of an empty one.
fn to_records(listing: Vec<RemoteObject>) -> Vec<RemoteRecord> {
    listing
        .into_iter()
        .map(|o| RemoteRecord {
            id: o.id,
            name: o.name,
            parent_id: o.parent_id,
            kind: o.kind,
            checksum: o.app_properties.md5sum,
        })
        .collect()
}

/// Run the full startup reconciliation for one configured directory,
/// returning the fully-reconciled local [`Tree`] ready to hand to the
/// watch-classify stage.
pub fn reconcile_root(cfg: &RootConfig, machine_root_id: &str, store: &dyn RemoteStore) -> Result<Tree> {
    let local_path = &cfg.local;
    let mut local =
        Tree::scan(local_path).with_context(|| format!("Couldn't scan {local_path}"))?;

    let remote_root_path = format!("/{}", cfg.remote);

    let listing = to_records(store.list_all().context("Couldn't list remote objects")?);
    let mut remote_tree = Tree::new_tree_from_remote(&listing, &remote_root_path, '/').ok();

    let changed = reconcile_structure(
        &local,
        remote_tree.as_ref(),
        store,
        &cfg.remote,
        Some(machine_root_id),
    )
    .context("Couldn't reconcile remote structure")?;

    if changed || remote_tree.is_none() {
        let listing = to_records(
            store
                .list_all()
                .context("Couldn't re-list remote objects after reconciliation")?,
        );
        remote_tree = Some(
            Tree::new_tree_from_remote(&listing, &remote_root_path, '/')
                .context("Remote root vanished immediately after we created it")?,
        );
    }
    let mut remote_tree = remote_tree.expect("populated above");

    attach_ids(&mut local, &remote_tree).context("Couldn't attach remote IDs onto local tree")?;

    local
        .calculate_checksums()
        .with_context(|| format!("Couldn't checksum files under {local_path}"))?;

    update_remote_from_checksums(&mut local, &mut remote_tree, store)
        .context("Couldn't push locally-drifted content to the remote")?;

    warn_if_empty(&local, local_path);
    Ok(local)
}

fn warn_if_empty(tree: &Tree, path: &Utf8Path) {
    if tree.children(tree.root_id()).next().is_none() {
        warn!(%path, "configured directory is empty");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::remote::fs_store::FsStore;
    use camino::Utf8PathBuf;

    fn utf8(p: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::try_from(p).unwrap()
    }

    #[test]
    fn fresh_upload_builds_matching_structure() -> Result<()> {
        let local_dir = tempfile::tempdir()?;
        let remote_dir = tempfile::tempdir()?;
        std::fs::create_dir(local_dir.path().join("a"))?;
        std::fs::write(local_dir.path().join("a/b.txt"), b"hi")?;

        let store = FsStore::new(utf8(remote_dir.path().to_owned()))?;
        let machine_root = ensure_machine_root(&store, "test-host")?;

        let cfg = RootConfig {
            local: utf8(local_dir.path().to_owned()),
            remote: "R".to_string(),
            recursive: true,
        };
        let tree = reconcile_root(&cfg, &machine_root, &store)?;

        let b = tree.find_path(&utf8(local_dir.path().join("a/b.txt"))).unwrap();
        assert_eq!(tree.checksum(b), checksum::hash_bytes(b"hi"));
        assert!(!tree.remote_id(b).is_empty());

        let listing = store.list_all()?;
        let remote_file = listing
            .iter()
            .find(|o| o.name == "b.txt")
            .expect("b.txt made it to the remote");
        assert_eq!(
            remote_file.app_properties.md5sum.as_deref(),
            Some("49f68a5c8493ec2c0bf489821c21fc3b")
        );
        Ok(())
    }

    #[test]
    fn structural_prune_removes_remote_only_extras() -> Result<()> {
        let local_dir = tempfile::tempdir()?;
        let remote_dir = tempfile::tempdir()?;
        std::fs::create_dir(local_dir.path().join("a"))?;
        std::fs::create_dir(local_dir.path().join("b"))?;

        let store = FsStore::new(utf8(remote_dir.path().to_owned()))?;
        let machine_root = ensure_machine_root(&store, "test-host")?;
        let root_id = store.create_folder("R", Some(&machine_root))?;
        store.create_folder("a", Some(&root_id))?;
        store.create_folder("b", Some(&root_id))?;
        store.create_folder("c", Some(&root_id))?;

        let cfg = RootConfig {
            local: utf8(local_dir.path().to_owned()),
            remote: "R".to_string(),
            recursive: true,
        };
        reconcile_root(&cfg, &machine_root, &store)?;

        let listing = store.list_all()?;
        assert!(!listing.iter().any(|o| o.name == "c"));
        assert!(listing.iter().any(|o| o.name == "a"));
        assert!(listing.iter().any(|o| o.name == "b"));
        Ok(())
    }

    #[test]
    fn content_drift_reuploads_and_syncs_checksums() -> Result<()> {
        let local_dir = tempfile::tempdir()?;
        let remote_dir = tempfile::tempdir()?;
        std::fs::write(local_dir.path().join("x.txt"), b"v2")?;

        let store = FsStore::new(utf8(remote_dir.path().to_owned()))?;
        let machine_root = ensure_machine_root(&store, "test-host")?;
        let root_id = store.create_folder("R", Some(&machine_root))?;
        let old = local_dir.path().join(".old");
        std::fs::write(&old, b"v1")?;
        store.create_file(&utf8(old), &root_id, &checksum::hash_bytes(b"v1"))?;
        // Rename it into place as x.txt so the remote tree already has a
        // same-named, wrong-content file when we reconcile.
        let listing = store.list_all()?;
        let old_id = listing.iter().find(|o| o.name == ".old").unwrap().id.clone();
        store.rename(&old_id, &root_id, &root_id, "x.txt")?;

        let cfg = RootConfig {
            local: utf8(local_dir.path().to_owned()),
            remote: "R".to_string(),
            recursive: true,
        };
        let tree = reconcile_root(&cfg, &machine_root, &store)?;

        let x = tree.find_path(&utf8(local_dir.path().join("x.txt"))).unwrap();
        assert_eq!(tree.checksum(x), checksum::hash_bytes(b"v2"));

        let listing = store.list_all()?;
        let remote_x = listing.iter().find(|o| o.name == "x.txt").unwrap();
        assert_eq!(
            remote_x.app_properties.md5sum.as_deref(),
            Some(checksum::hash_bytes(b"v2").as_str())
        );
        Ok(())
    }

    #[test]
    fn update_is_a_no_op_when_checksums_already_agree() -> Result<()> {
        let local_dir = tempfile::tempdir()?;
        let remote_dir = tempfile::tempdir()?;
        std::fs::write(local_dir.path().join("x.txt"), b"same")?;
        let store = FsStore::new(utf8(remote_dir.path().to_owned()))?;
        let machine_root = ensure_machine_root(&store, "test-host")?;
        let cfg = RootConfig {
            local: utf8(local_dir.path().to_owned()),
            remote: "R".to_string(),
            recursive: true,
        };
        // First reconcile uploads and syncs checksums.
        reconcile_root(&cfg, &machine_root, &store)?;
        // Second reconcile should find everything already matching.
        let tree = reconcile_root(&cfg, &machine_root, &store)?;
        let x = tree.find_path(&utf8(local_dir.path().join("x.txt"))).unwrap();
        assert_eq!(tree.checksum(x), checksum::hash_bytes(b"same"));
        Ok(())
    }
}
