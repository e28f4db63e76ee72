//! S3 - content drift: a file that changed locally while the daemon wasn't
//! watching gets re-uploaded in full during startup reconciliation.

mod common;

use piledriver::checksum;
use piledriver::config::RootConfig;
use piledriver::reconcile;
use piledriver::remote::RemoteStore;

#[test]
fn locally_drifted_file_is_reuploaded() {
    let fx = common::fixture();
    std::fs::write(fx.local_dir.path().join("x.txt"), b"v2").unwrap();

    let machine_root = reconcile::ensure_machine_root(&fx.store, "test-host").unwrap();
    let root_id = fx.store.create_folder("R", Some(&machine_root)).unwrap();

    // Plant a same-named, wrong-content file on the remote by uploading it
    // under a throwaway name and renaming it into place, the way a prior
    // run's stale upload would have landed there.
    let stale = fx.local_dir.path().join(".stale");
    std::fs::write(&stale, b"v1").unwrap();
    let stale = common::utf8(stale);
    fx.store.create_file(&stale, &root_id, &checksum::hash_bytes(b"v1")).unwrap();
    let listing = fx.store.list_all().unwrap();
    let stale_id = listing.iter().find(|o| o.name == ".stale").unwrap().id.clone();
    fx.store.rename(&stale_id, &root_id, &root_id, "x.txt").unwrap();

    let cfg = RootConfig { local: common::utf8(fx.local_dir.path().to_owned()), remote: "R".to_string(), recursive: true };
    let tree = reconcile::reconcile_root(&cfg, &machine_root, &fx.store).unwrap();

    let x = tree.find_path(&fx.local_path("x.txt")).unwrap();
    assert_eq!(tree.checksum(x), checksum::hash_bytes(b"v2"));

    let listing = fx.store.list_all().unwrap();
    let remote_x = listing.iter().find(|o| o.name == "x.txt").unwrap();
    assert_eq!(remote_x.app_properties.md5sum.as_deref(), Some(checksum::hash_bytes(b"v2").as_str()));
}
