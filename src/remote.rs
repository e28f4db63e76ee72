//! The remote object-store contract the mirror engine consumes: a flat set
//! of folder/file objects with parent links and `app_properties` metadata,
//! addressed by opaque ID.
//!
//! The core never talks to a specific cloud API directly - it only calls
//! through [`RemoteStore`]. [`fs_store`] is a filesystem-backed reference
//! implementation, real enough to run the daemon against a second local
//! directory and to drive the end-to-end tests. [`drive`] sketches a
//! Google-Drive-flavored backend, left as a documented stub: the deep
//! HTTP/OAuth plumbing behind it is out of scope for this repository.

pub mod drive;
pub mod fs_store;

use camino::Utf8Path;
use thiserror::Error;

use crate::afs::NodeKind;

/// The MIME-style sentinel the reference Drive backend uses to mark folders.
pub const FOLDER_KIND: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Clone, Default)]
pub struct AppProperties {
    pub md5sum: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub kind: NodeKind,
    pub app_properties: AppProperties,
}

/// What `update_file` hands back after replacing an object's bytes.
#[derive(Debug, Clone)]
pub struct FileUpdateResult {
    pub md5sum: String,
}

/// The tri-state error surface the applier classifies on: only `Transient`
/// is retried.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// A network blip, rate limit, or 5xx - worth retrying.
    #[error("transient remote failure: {0}")]
    Transient(String),
    /// The object or parent named in the request doesn't exist remotely.
    #[error("remote object not found: {0}")]
    NotFound(String),
    /// The request was well-formed but the store rejected it outright.
    #[error("remote operation rejected: {0}")]
    Logical(String),
}

/// The remote object-store contract the mirror engine consumes.
///
/// Implementations must be safe to share read-only across tasks (the core
/// wraps a `dyn RemoteStore` in an `Arc`).
pub trait RemoteStore: Send + Sync {
    /// All non-trashed objects this application owns. Pagination, if the
    /// backend has any, is handled transparently by the implementation.
    fn list_all(&self) -> Result<Vec<RemoteObject>, RemoteError>;

    fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String, RemoteError>;

    /// Upload `local_path`'s bytes as a new file under `parent_id`, tagging
    /// the object with `app_properties.md5sum = md5sum`.
    fn create_file(
        &self,
        local_path: &Utf8Path,
        parent_id: &str,
        md5sum: &str,
    ) -> Result<String, RemoteError>;

    /// Replace the bytes of the object named by `id` with `local_path`'s
    /// current contents. The response carries the freshly computed digest.
    fn update_file(&self, local_path: &Utf8Path, id: &str) -> Result<FileUpdateResult, RemoteError>;

    fn rename(
        &self,
        id: &str,
        old_parent_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<(), RemoteError>;

    fn delete(&self, id: &str) -> Result<(), RemoteError>;

    /// Used once at startup to locate the per-machine root folder.
    fn find_by_name(&self, name: &str) -> Result<Option<String>, RemoteError>;
}
