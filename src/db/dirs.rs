// src/db/dirs.rs

//! Shared directory tree, directory instances and installed files
//!
//! Directories are shared between packages. A [`Directory`] stays alive as
//! long as something refers to it: each live child directory holds one
//! reference on its parent and each [`DirInstance`] (one package's claim on
//! the directory) holds one. When the count drops to zero the node leaves
//! the index, releases its parent, and may be removed from disk.

use super::Database;
use super::atoms::AclId;
use super::models::{
    DbFile, DirId, DirInstance, DirInstanceId, Directory, FileId, PackageId, file_key,
};
use super::protect;
use crate::checksum::Checksum;
use crate::error::{Error, Result};
use std::borrow::Cow;
use std::io;
use tracing::{debug, warn};

/// Canonical root-relative form of `path`
///
/// Empty and `.` components are dropped, so `/usr//lib/` and `./usr/lib`
/// both become `usr/lib`. The root is the empty path. `..` is kept as is;
/// paths from outside the database go through [`checked_path`].
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    let trimmed = path.trim_matches('/');
    if trimmed.split('/').all(|c| !c.is_empty() && c != ".") {
        return Cow::Borrowed(trimmed);
    }
    Cow::Owned(
        trimmed
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// Normalize a path read from a package or a record, refusing `..`
pub fn checked_path(path: &str) -> Result<Cow<'_, str>> {
    let normalized = normalize_path(path);
    if normalized.split('/').any(|c| c == "..") {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "parent directory components are not allowed".to_string(),
        });
    }
    Ok(normalized)
}

/// A directory whose reference count disagrees with what refers to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefcountViolation {
    pub path: String,
    pub refs: u32,
    pub expected: u32,
}

impl Database {
    /// Find a directory without creating it
    pub fn dir_query(&self, path: &str) -> Option<DirId> {
        self.dir_index.get(normalize_path(path).as_bytes())
    }

    /// Find or create the directory at `path` and take a reference on it
    ///
    /// The caller owns the returned reference and must hand it to a directory
    /// instance or release it with [`Database::dir_unref`]. Missing ancestors
    /// are created first; each new child takes a reference on its parent.
    pub fn dir_get(&mut self, path: &str) -> DirId {
        let normalized = normalize_path(path);
        let name: &str = &normalized;
        if let Some(id) = self.dir_index.get(name.as_bytes()) {
            return self.dir_ref(id);
        }

        let parent = if name.is_empty() {
            None
        } else {
            let parent_path = name.rsplit_once('/').map_or("", |(parent, _)| parent);
            Some(self.dir_get(parent_path))
        };

        let inherited = match parent {
            Some(parent) => {
                let base = name.rsplit_once('/').map_or(name, |(_, base)| base);
                protect::inherit(&self.dirs[parent], base)
            }
            None => protect::root_protection(&self.protected_paths),
        };

        let dir = Directory {
            name: name.to_string(),
            parent,
            protected_paths: inherited.protected_paths,
            mode: 0,
            uid: 0,
            gid: 0,
            refs: 1,
            protect_mode: inherited.protect_mode,
            has_protected_children: inherited.has_protected_children,
            seen: false,
            created: false,
            modified: false,
            update_permissions: false,
            owners: Vec::new(),
        };
        let id = self.dirs.insert(dir);
        self.dir_index.insert(name.as_bytes(), id);
        self.stats.dirs += 1;
        debug!(
            "New directory /{} (protect {})",
            name,
            self.dirs[id].protect_mode.as_str()
        );
        id
    }

    /// Take an additional reference on a live directory
    pub fn dir_ref(&mut self, id: DirId) -> DirId {
        self.dirs[id].refs += 1;
        id
    }

    /// Release one reference on `id`
    ///
    /// At zero the directory leaves the index and its parent is released in
    /// turn. With `allow_remove` the directory is also removed from disk;
    /// failing to do so (unmanaged files left in it) only logs a warning.
    /// Releasing a directory with no references left is a consistency bug and
    /// returns [`Error::RefcountUnderflow`].
    pub fn dir_unref(&mut self, id: DirId, allow_remove: bool) -> Result<()> {
        let mut current = Some(id);
        while let Some(id) = current {
            let dir = self
                .dirs
                .get_mut(id)
                .ok_or_else(|| Error::RefcountUnderflow(format!("<released {:?}>", id)))?;
            if dir.refs == 0 {
                return Err(Error::RefcountUnderflow(dir.name.clone()));
            }
            dir.refs -= 1;
            if dir.refs > 0 {
                return Ok(());
            }

            let Some(dir) = self.dirs.remove(id) else {
                return Ok(());
            };
            debug_assert!(dir.owners.is_empty(), "released directory still owned");
            self.dir_index.remove(dir.name.as_bytes());
            self.stats.dirs -= 1;
            debug!("Released directory /{}", dir.name);

            if allow_remove && !dir.is_root() {
                match self.fs.remove_dir(&dir.name) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!("Failed to remove directory /{}: {}", dir.name, e),
                }
            }
            current = dir.parent;
        }
        Ok(())
    }

    /// Create a directory instance claiming `path` for `pkg`
    pub fn diri_new(&mut self, pkg: PackageId, path: &str, acl: AclId) -> DirInstanceId {
        let dir = self.dir_get(path);
        let id = self.diris.insert(DirInstance {
            pkg,
            dir,
            acl,
            files: Vec::new(),
        });
        self.dirs[dir].owners.push(id);
        self.mark_installed(pkg).dirs.push(id);
        id
    }

    /// The instance of `pkg` on directory `path`, if any
    pub fn diri_find(&self, pkg: PackageId, path: &str) -> Option<DirInstanceId> {
        let dir = self.dir_query(path)?;
        self.dirs[dir]
            .owners
            .iter()
            .copied()
            .find(|diri| self.diris[*diri].pkg == pkg)
    }

    /// Remove a directory instance, dropping any file records it still holds
    pub fn diri_remove(&mut self, id: DirInstanceId, allow_remove: bool) -> Result<()> {
        let Some(instance) = self.diris.remove(id) else {
            return Ok(());
        };
        for file in &instance.files {
            if let Some(record) = self.files.remove(*file) {
                let key = file_key(&self.dirs[instance.dir].name, &record.name);
                self.file_index.remove(key.as_bytes());
                self.stats.files -= 1;
            }
        }
        self.dirs[instance.dir].owners.retain(|owner| *owner != id);
        if let Some(ipkg) = self
            .packages
            .get_mut(instance.pkg)
            .and_then(|pkg| pkg.ipkg.as_mut())
        {
            ipkg.dirs.retain(|diri| *diri != id);
        }
        self.dir_unref(instance.dir, allow_remove)
    }

    /// Record a new installed file under `diri`
    ///
    /// Fails with [`Error::FileConflict`] when the path is already recorded.
    pub fn file_new(
        &mut self,
        diri: DirInstanceId,
        name: &str,
        csum: Checksum,
        acl: AclId,
    ) -> Result<FileId> {
        let dir = self.diris[diri].dir;
        let key = file_key(&self.dirs[dir].name, name);
        if let Some(existing) = self.file_index.get(key.as_bytes()) {
            return Err(Error::FileConflict {
                path: key,
                owner: self.package_label(self.file_owner(existing)),
            });
        }

        let id = self.files.insert(DbFile {
            diri,
            name: name.to_string(),
            csum,
            acl,
            audited: false,
        });
        self.file_index.insert(key.as_bytes(), id);
        self.diris[diri].files.push(id);
        self.stats.files += 1;
        Ok(id)
    }

    pub fn file_query(&self, dir: &str, name: &str) -> Option<FileId> {
        self.file_index
            .get(file_key(&normalize_path(dir), name).as_bytes())
    }

    /// Look up a file by its full path
    pub fn file_query_path(&self, path: &str) -> Option<FileId> {
        self.file_index.get(normalize_path(path).as_bytes())
    }

    /// Full root-relative path of a file
    pub fn file_path(&self, id: FileId) -> String {
        let file = &self.files[id];
        let dir = self.diris[file.diri].dir;
        self.dirs[dir].file_path(&file.name)
    }

    pub fn file_owner(&self, id: FileId) -> PackageId {
        self.diris[self.files[id].diri].pkg
    }

    /// The package that installed `path`
    pub fn get_file_owner(&self, path: &str) -> Option<PackageId> {
        self.file_query_path(path).map(|id| self.file_owner(id))
    }

    /// Move a file record to another instance of the same directory
    pub(crate) fn file_move(&mut self, id: FileId, diri: DirInstanceId) {
        let old = self.files[id].diri;
        if old == diri {
            return;
        }
        debug_assert_eq!(self.diris[old].dir, self.diris[diri].dir);
        self.diris[old].files.retain(|file| *file != id);
        self.diris[diri].files.push(id);
        self.files[id].diri = diri;
    }

    /// Forget a file record; the disk is not touched
    pub fn file_remove(&mut self, id: FileId) -> Option<DbFile> {
        let key = self.file_path(id);
        let file = self.files.remove(id)?;
        self.file_index.remove(key.as_bytes());
        self.diris[file.diri].files.retain(|f| *f != id);
        self.stats.files -= 1;
        Some(file)
    }

    /// Compare every directory's count against its children and instances
    pub fn check_refcounts(&self) -> Vec<RefcountViolation> {
        let mut expected: Vec<(DirId, u32)> = self
            .dirs
            .iter()
            .map(|(id, dir)| (id, dir.owners.len() as u32))
            .collect();
        for (_, dir) in self.dirs.iter() {
            if let Some(parent) = dir.parent
                && let Some(entry) = expected.iter_mut().find(|(id, _)| *id == parent)
            {
                entry.1 += 1;
            }
        }

        expected
            .into_iter()
            .filter_map(|(id, expected)| {
                let dir = &self.dirs[id];
                (dir.refs != expected).then(|| RefcountViolation {
                    path: dir.name.clone(),
                    refs: dir.refs,
                    expected,
                })
            })
            .collect()
    }

    /// Re-derive protection for every directory, parents before children
    pub(crate) fn reapply_protection(&mut self) {
        let mut order: Vec<(usize, DirId)> = self
            .dirs
            .iter()
            .map(|(id, dir)| (dir.name.split('/').filter(|c| !c.is_empty()).count(), id))
            .collect();
        order.sort();

        for (_, id) in order {
            let inherited = match self.dirs[id].parent {
                Some(parent) => protect::inherit(&self.dirs[parent], self.dirs[id].basename()),
                None => protect::root_protection(&self.protected_paths),
            };
            let dir = &mut self.dirs[id];
            dir.protect_mode = inherited.protect_mode;
            dir.protected_paths = inherited.protected_paths;
            dir.has_protected_children = inherited.has_protected_children;
        }
    }
}
