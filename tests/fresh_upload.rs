//! S1 - fresh upload: an empty remote gets built to match a populated local
//! root from scratch.

mod common;

use piledriver::checksum;
use piledriver::config::RootConfig;
use piledriver::reconcile;

#[test]
fn fresh_local_tree_uploads_in_full() {
    let fx = common::fixture();
    std::fs::create_dir(fx.local_dir.path().join("a")).unwrap();
    std::fs::write(fx.local_dir.path().join("a/b.txt"), b"hi").unwrap();

    let machine_root = reconcile::ensure_machine_root(&fx.store, "test-host").unwrap();
    let cfg = RootConfig { local: common::utf8(fx.local_dir.path().to_owned()), remote: "R".to_string(), recursive: true };
    let tree = reconcile::reconcile_root(&cfg, &machine_root, &fx.store).unwrap();

    let b = tree.find_path(&fx.local_path("a/b.txt")).unwrap();
    assert_eq!(tree.checksum(b), checksum::hash_bytes(b"hi"));

    let listing = fx.store.list_all().unwrap();
    let remote_b = listing.iter().find(|o| o.name == "b.txt").expect("b.txt reached the remote");
    assert_eq!(
        remote_b.app_properties.md5sum.as_deref(),
        Some("49f68a5c8493ec2c0bf489821c21fc3b")
    );
    let remote_a = listing.iter().find(|o| o.name == "a").expect("a/ reached the remote");
    assert_eq!(remote_b.parent_id.as_deref(), Some(remote_a.id.as_str()));
    let remote_r = listing.iter().find(|o| o.name == "R").expect("R/ reached the remote");
    assert_eq!(remote_a.parent_id.as_deref(), Some(remote_r.id.as_str()));

    // Every local file made it across, by name - no partial uploads.
    let local_files = common::relative_files_in(fx.local_dir.path());
    assert_eq!(local_files, [camino::Utf8PathBuf::from("a/b.txt")]);
    let uploaded_file_names: std::collections::HashSet<_> =
        listing.iter().filter(|o| o.name.ends_with(".txt")).map(|o| o.name.as_str()).collect();
    assert_eq!(uploaded_file_names, std::collections::HashSet::from(["b.txt"]));
}
