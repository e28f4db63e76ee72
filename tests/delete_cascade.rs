//! S6 - delete cascade: deleting a directory removes its whole subtree from
//! the AFS in one classifier step, and the applier only has to delete the
//! single remote object captured for the directory itself (the remote side
//! cascades the rest).

mod common;

use std::sync::Arc;

use camino::Utf8PathBuf;
use piledriver::afs::Tree;
use piledriver::pipeline::Applier;
use piledriver::remote::RemoteStore;
use piledriver::watch::{Classifier, EventCategory, MemoryNotifier, RawEvent, RawOp};
use tokio::sync::Mutex;

#[tokio::test]
async fn deleting_a_directory_removes_its_whole_subtree_and_one_remote_object() {
    let fx = common::fixture();
    let root_id = fx.store.create_folder("R", None).unwrap();
    let a_id = fx.store.create_folder("a", Some(&root_id)).unwrap();
    std::fs::write(fx.local_dir.path().join("placeholder"), b"unused").unwrap();

    let mut tree = Tree::new_tree(fx.local_dir.path().to_str().unwrap());
    tree.attach_id(&common::utf8(fx.local_dir.path().to_owned()), root_id)
        .unwrap();
    tree.add_path(&fx.local_path("a"), true).unwrap();
    tree.attach_id(&fx.local_path("a"), a_id.clone()).unwrap();
    tree.add_path(&fx.local_path("a/b"), false).unwrap();

    let mut notifier = MemoryNotifier::new();
    let mut classifier = Classifier::new();
    let event = classifier
        .classify(&mut tree, &mut notifier, RawEvent { path: fx.local_path("a"), op: RawOp::Remove })
        .expect("delete produces an event");
    assert_eq!(event.category, EventCategory::DirectoryDeleted);
    assert_eq!(event.doomed_remote_id.as_deref(), Some(a_id.as_str()));

    assert!(!tree.contains_path(&fx.local_path("a")));
    assert!(!tree.contains_path(&fx.local_path("a/b")));

    let store: Arc<dyn RemoteStore> = Arc::new(fx.store);
    let tree = Arc::new(Mutex::new(tree));
    Applier::new(store.clone(), tree).apply(event).await;

    let listing = store.list_all().unwrap();
    assert!(!listing.iter().any(|o| o.id == a_id));
    assert!(listing.iter().any(|o| o.name == "R"));
}
