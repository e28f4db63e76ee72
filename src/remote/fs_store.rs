//! A filesystem-backed [`RemoteStore`]: a second local directory tree stands
//! in for the cloud. Used by the end-to-end tests and as a local-only
//! backend for anyone who just wants to mirror onto another disk or a
//! network mount.
//!
//! Objects are identified by `device:inode` (the `file_index` on Windows),
//! not by path, so a [`RemoteStore::rename`] doesn't change an object's ID
//! even though this backend implements it as a real `fs::rename`. There's no
//! persisted ID table: [`resolve`](FsStore::resolve) walks the tree and
//! restats candidates until it finds the one whose identity matches. That's
//! fine for a reference/test backend holding a few dozen objects; a real
//! cloud client doesn't need this at all; it gets stable IDs from the API.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::afs::NodeKind;
use crate::checksum;

use super::{AppProperties, FileUpdateResult, RemoteError, RemoteObject, RemoteStore};

pub struct FsStore {
    base: Utf8PathBuf,
}

impl FsStore {
    pub fn new(base: impl Into<Utf8PathBuf>) -> Result<Self, RemoteError> {
        let base = base.into();
        fs::create_dir_all(&base).map_err(to_remote_error)?;
        Ok(Self { base })
    }

    #[cfg(unix)]
    fn id_of(path: &Utf8Path) -> io::Result<String> {
        use std::os::unix::fs::MetadataExt;
        let meta = fs::symlink_metadata(path)?;
        Ok(format!("{}:{}", meta.dev(), meta.ino()))
    }

    #[cfg(windows)]
    fn id_of(path: &Utf8Path) -> io::Result<String> {
        use std::os::windows::fs::MetadataExt;
        let meta = fs::symlink_metadata(path)?;
        let index = meta
            .file_index()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no file index"))?;
        Ok(format!("{}:{}", meta.volume_serial_number().unwrap_or(0), index))
    }

    /// Find the path of the object with the given ID by walking the tree.
    fn resolve(&self, id: &str) -> Result<Utf8PathBuf, RemoteError> {
        Self::find_recursive(&self.base, id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn find_recursive(dir: &Utf8Path, id: &str) -> Option<Utf8PathBuf> {
        let entries = fs::read_dir(dir).ok()?;
        for entry in entries {
            let entry = entry.ok()?;
            let path = Utf8PathBuf::try_from(entry.path()).ok()?;
            if Self::id_of(&path).ok()?.as_str() == id {
                return Some(path);
            }
            if entry.metadata().ok()?.is_dir() {
                if let Some(found) = Self::find_recursive(&path, id) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn walk(dir: &Utf8Path, parent_id: Option<&str>, out: &mut Vec<RemoteObject>) -> Result<(), RemoteError> {
        for entry in fs::read_dir(dir).map_err(to_remote_error)? {
            let entry = entry.map_err(to_remote_error)?;
            let path = Utf8PathBuf::try_from(entry.path())
                .map_err(|e| RemoteError::Logical(e.to_string()))?;
            let meta = entry.metadata().map_err(to_remote_error)?;
            let name = path
                .file_name()
                .ok_or_else(|| RemoteError::Logical("entry has no file name".into()))?
                .to_string();
            let id = Self::id_of(&path).map_err(to_remote_error)?;

            if meta.is_dir() {
                out.push(RemoteObject {
                    id: id.clone(),
                    name,
                    parent_id: parent_id.map(str::to_string),
                    kind: NodeKind::Directory,
                    app_properties: AppProperties::default(),
                });
                Self::walk(&path, Some(&id), out)?;
            } else if meta.is_file() {
                let md5 = checksum::hash_file(path.as_std_path())
                    .map_err(|e| RemoteError::Logical(e.to_string()))?;
                out.push(RemoteObject {
                    id,
                    name,
                    parent_id: parent_id.map(str::to_string),
                    kind: NodeKind::File,
                    app_properties: AppProperties { md5sum: Some(md5) },
                });
            }
        }
        Ok(())
    }
}

fn to_remote_error(e: io::Error) -> RemoteError {
    if e.kind() == io::ErrorKind::NotFound {
        RemoteError::NotFound(e.to_string())
    } else {
        RemoteError::Transient(e.to_string())
    }
}

impl RemoteStore for FsStore {
    fn list_all(&self) -> Result<Vec<RemoteObject>, RemoteError> {
        let mut out = Vec::new();
        Self::walk(&self.base, None, &mut out)?;
        Ok(out)
    }

    fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String, RemoteError> {
        let parent_path = match parent_id {
            Some(id) => self.resolve(id)?,
            None => self.base.clone(),
        };
        let path = parent_path.join(name);
        fs::create_dir(&path).map_err(to_remote_error)?;
        Self::id_of(&path).map_err(to_remote_error)
    }

    fn create_file(
        &self,
        local_path: &Utf8Path,
        parent_id: &str,
        _md5sum: &str,
    ) -> Result<String, RemoteError> {
        let parent_path = self.resolve(parent_id)?;
        let name = local_path
            .file_name()
            .ok_or_else(|| RemoteError::Logical("local path has no file name".into()))?;
        let dest = parent_path.join(name);
        fs::copy(local_path, &dest).map_err(to_remote_error)?;
        Self::id_of(&dest).map_err(to_remote_error)
    }

    fn update_file(&self, local_path: &Utf8Path, id: &str) -> Result<FileUpdateResult, RemoteError> {
        let dest = self.resolve(id)?;
        fs::copy(local_path, &dest).map_err(to_remote_error)?;
        let md5sum = checksum::hash_file(dest.as_std_path())
            .map_err(|e| RemoteError::Logical(e.to_string()))?;
        Ok(FileUpdateResult { md5sum })
    }

    fn rename(
        &self,
        id: &str,
        _old_parent_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<(), RemoteError> {
        let path = self.resolve(id)?;
        let new_parent_path = self.resolve(new_parent_id)?;
        let new_path = new_parent_path.join(new_name);
        fs::rename(&path, &new_path).map_err(to_remote_error)
    }

    fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let path = self.resolve(id)?;
        let meta = fs::symlink_metadata(&path).map_err(to_remote_error)?;
        if meta.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .map_err(to_remote_error)
    }

    fn find_by_name(&self, name: &str) -> Result<Option<String>, RemoteError> {
        let path = self.base.join(name);
        if path.exists() {
            Ok(Some(Self::id_of(&path).map_err(to_remote_error)?))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_create_list_update_delete() -> Result<(), RemoteError> {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(Utf8PathBuf::try_from(dir.path().to_owned()).unwrap())?;

        let root_id = store.create_folder("R", None)?;
        let sub_id = store.create_folder("a", Some(&root_id))?;

        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"hi").unwrap();
        let src = Utf8PathBuf::try_from(src).unwrap();
        let file_id = store.create_file(&src, &sub_id, "49f68a5c8493ec2c0bf489821c21fc3b")?;

        let listing = store.list_all()?;
        assert_eq!(listing.len(), 3);
        let file_entry = listing.iter().find(|o| o.id == file_id).unwrap();
        assert_eq!(
            file_entry.app_properties.md5sum.as_deref(),
            Some("49f68a5c8493ec2c0bf489821c21fc3b")
        );

        std::fs::write(&src, b"v2").unwrap();
        let updated = store.update_file(&src, &file_id)?;
        assert_eq!(updated.md5sum, checksum::hash_bytes(b"v2"));

        store.delete(&sub_id)?;
        assert_eq!(store.list_all()?.len(), 1);
        Ok(())
    }

    #[test]
    fn rename_preserves_id() -> Result<(), RemoteError> {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(Utf8PathBuf::try_from(dir.path().to_owned()).unwrap())?;
        let root_id = store.create_folder("R", None)?;
        let a_id = store.create_folder("a", Some(&root_id))?;
        let b_id = store.create_folder("b", Some(&root_id))?;

        store.rename(&a_id, &root_id, &b_id, "a-moved")?;
        let listing = store.list_all()?;
        let moved = listing.iter().find(|o| o.id == a_id).unwrap();
        assert_eq!(moved.name, "a-moved");
        assert_eq!(moved.parent_id.as_deref(), Some(b_id.as_str()));
        Ok(())
    }
}
