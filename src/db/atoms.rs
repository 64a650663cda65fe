// src/db/atoms.rs

//! Interned permission records
//!
//! Thousands of files share a handful of (mode, uid, gid, xattrs)
//! combinations. The pool stores each distinct record once and hands out
//! an [`AclId`]; two records with identical content always get the same id.

use super::hash::{ArenaId, arena_id};
use crate::checksum::{Checksum, DigestAlg, MAX_CHECKSUM_LEN};
use std::collections::HashMap;

/// Default permission bits for directories created without an explicit record
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Default permission bits for files created without an explicit record
pub const DEFAULT_FILE_MODE: u32 = 0o644;

arena_id!(
    /// Handle to an interned [`Acl`]
    AclId
);

/// Ownership and permission record
#[derive(Debug, Clone, Copy)]
pub struct Acl {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Digest over the extended attributes; NONE when there are none
    pub xattr_csum: Checksum,
}

impl Acl {
    pub fn new(mode: u32, uid: u32, gid: u32) -> Self {
        Self {
            mode,
            uid,
            gid,
            xattr_csum: Checksum::none(),
        }
    }

    pub fn with_xattrs(mut self, xattr_csum: Checksum) -> Self {
        self.xattr_csum = xattr_csum;
        self
    }

    /// Permission bits only, without the file type
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    fn key(&self) -> AclKey {
        AclKey {
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            xattrs: self.xattr_csum.key(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AclKey {
    mode: u32,
    uid: u32,
    gid: u32,
    xattrs: (DigestAlg, [u8; MAX_CHECKSUM_LEN]),
}

/// Deduplicating store of [`Acl`] records
#[derive(Default)]
pub struct AtomPool {
    records: Vec<Acl>,
    index: HashMap<AclKey, AclId>,
}

impl AtomPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `acl`, storing it on first sight
    pub fn intern(&mut self, acl: Acl) -> AclId {
        let key = acl.key();
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = AclId::from_index(self.records.len());
        self.records.push(acl);
        self.index.insert(key, id);
        id
    }

    /// Look up an interned record
    ///
    /// Ids are only produced by [`AtomPool::intern`] and never released, so
    /// every id handed out stays valid for the pool's lifetime.
    pub fn get(&self, id: AclId) -> &Acl {
        &self.records[id.index()]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn default_dir(&mut self) -> AclId {
        self.intern(Acl::new(DEFAULT_DIR_MODE, 0, 0))
    }

    pub fn default_file(&mut self) -> AclId {
        self.intern(Acl::new(DEFAULT_FILE_MODE, 0, 0))
    }
}
