// src/packages/traits.rs

//! Common traits for package payload extractors

use crate::checksum::{Checksum, DigestAlg};
use crate::db::atoms::{DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use crate::error::Result;

/// What an archive entry creates on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File { content: Vec<u8> },
    Symlink { target: String },
}

/// One entry of a package payload
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Root-relative path, no leading `/`
    pub path: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Content digest (target string for symlinks); NONE for directories
    pub checksum: Checksum,
    pub xattr_csum: Checksum,
    pub size: u64,
}

impl ArchiveEntry {
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            mode: DEFAULT_DIR_MODE,
            uid: 0,
            gid: 0,
            checksum: Checksum::none(),
            xattr_csum: Checksum::none(),
            size: 0,
        }
    }

    /// Regular file with its content digested using `alg`
    pub fn file(path: impl Into<String>, content: impl Into<Vec<u8>>, alg: DigestAlg) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            checksum: Checksum::compute(alg, &content),
            size: content.len() as u64,
            kind: EntryKind::File { content },
            mode: DEFAULT_FILE_MODE,
            uid: 0,
            gid: 0,
            xattr_csum: Checksum::none(),
        }
    }

    pub fn symlink(path: impl Into<String>, target: impl Into<String>, alg: DigestAlg) -> Self {
        let target = target.into();
        Self {
            path: path.into(),
            checksum: Checksum::compute(alg, target.as_bytes()),
            size: target.len() as u64,
            kind: EntryKind::Symlink { target },
            mode: 0o777,
            uid: 0,
            gid: 0,
            xattr_csum: Checksum::none(),
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Source of the entries of one package, in archive order
///
/// Directory entries may be omitted; parents of file entries are created
/// implicitly with default permissions.
pub trait Extractor {
    /// Next entry, or `None` at the end of the payload
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry>>;

    /// Total payload size used for progress reporting, when known up front
    fn total_size(&self) -> Option<u64> {
        None
    }
}
