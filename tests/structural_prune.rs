//! S2 - structural prune: a remote-only extra directory is deleted during
//! startup reconciliation so the two trees end up structurally identical.

mod common;

use piledriver::config::RootConfig;
use piledriver::reconcile;
use piledriver::remote::RemoteStore;

#[test]
fn remote_only_directory_is_pruned() {
    let fx = common::fixture();
    std::fs::create_dir(fx.local_dir.path().join("a")).unwrap();
    std::fs::create_dir(fx.local_dir.path().join("b")).unwrap();

    let machine_root = reconcile::ensure_machine_root(&fx.store, "test-host").unwrap();
    let root_id = fx.store.create_folder("R", Some(&machine_root)).unwrap();
    fx.store.create_folder("a", Some(&root_id)).unwrap();
    fx.store.create_folder("b", Some(&root_id)).unwrap();
    fx.store.create_folder("c", Some(&root_id)).unwrap();

    let cfg = RootConfig { local: common::utf8(fx.local_dir.path().to_owned()), remote: "R".to_string(), recursive: true };
    reconcile::reconcile_root(&cfg, &machine_root, &fx.store).unwrap();

    let listing = fx.store.list_all().unwrap();
    assert!(listing.iter().any(|o| o.name == "a"));
    assert!(listing.iter().any(|o| o.name == "b"));
    assert!(!listing.iter().any(|o| o.name == "c"));
}
