//! A Google-Drive-flavored [`RemoteStore`], sketched as a documented stub.
//!
//! A real Drive backend speaks the v3 REST API: OAuth2 bearer tokens,
//! `files.list` with a `q` filter on `appProperties`, multipart upload for
//! file creation. That HTTP surface, and the OAuth dance that produces the
//! token in the first place, are both out of scope here - this module only
//! carries enough shape to show where that client would plug into
//! [`RemoteStore`].
//!
//! A real implementation would read `token_path` (see [`crate::config`]),
//! refresh it against Google's token endpoint as needed, and issue requests
//! with an HTTP client such as `reqwest`.

use camino::Utf8Path;

use super::{FileUpdateResult, RemoteError, RemoteObject, RemoteStore};

pub struct DriveStore {
    #[allow(dead_code)]
    token_path: camino::Utf8PathBuf,
}

impl DriveStore {
    pub fn new(token_path: impl Into<camino::Utf8PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
        }
    }

    fn unimplemented(op: &str) -> RemoteError {
        RemoteError::Logical(format!(
            "the Drive backend doesn't implement {op} yet - only the filesystem backend \
             (remote.fs) is wired up in this build"
        ))
    }
}

impl RemoteStore for DriveStore {
    fn list_all(&self) -> Result<Vec<RemoteObject>, RemoteError> {
        Err(Self::unimplemented("files.list"))
    }

    fn create_folder(&self, _name: &str, _parent_id: Option<&str>) -> Result<String, RemoteError> {
        Err(Self::unimplemented("files.create (folder)"))
    }

    fn create_file(
        &self,
        _local_path: &Utf8Path,
        _parent_id: &str,
        _md5sum: &str,
    ) -> Result<String, RemoteError> {
        Err(Self::unimplemented("files.create (multipart upload)"))
    }

    fn update_file(&self, _local_path: &Utf8Path, _id: &str) -> Result<FileUpdateResult, RemoteError> {
        Err(Self::unimplemented("files.update"))
    }

    fn rename(
        &self,
        _id: &str,
        _old_parent_id: &str,
        _new_parent_id: &str,
        _new_name: &str,
    ) -> Result<(), RemoteError> {
        Err(Self::unimplemented("files.update (addParents/removeParents)"))
    }

    fn delete(&self, _id: &str) -> Result<(), RemoteError> {
        Err(Self::unimplemented("files.delete"))
    }

    fn find_by_name(&self, _name: &str) -> Result<Option<String>, RemoteError> {
        Err(Self::unimplemented("files.list (name filter)"))
    }
}
