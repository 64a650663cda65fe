// src/install/mod.rs

//! Package installation, upgrade and removal
//!
//! [`Database::install_package`] moves the installed state from an old
//! package version to a new one in a single pass over the new payload:
//!
//! 1. Directories of each entry are claimed (one instance per package) and
//!    created on disk when missing
//! 2. Files already recorded for the old version are compared by checksum;
//!    unchanged files are not rewritten, changed ones go through the
//!    protected path policy, new files are written directly
//! 3. Whatever the old version recorded and the new one did not ship is
//!    removed, releasing the directories it held
//!
//! Directory permission fixes are batched: touched directories are flagged
//! and [`Database::update_directory_permissions`] applies them once for the
//! whole run.
//!
//! A failed install is not rolled back. References already taken stay in
//! place and the caller has to reconcile before committing.

use crate::checksum::{Checksum, DigestAlg};
use crate::db::Database;
use crate::db::atoms::{Acl, AclId, DEFAULT_DIR_MODE};
use crate::db::dirs::checked_path;
use crate::db::models::{DirId, DirInstanceId, FileId, PackageId};
use crate::db::protect::{self, ProtectMode};
use crate::error::{Error, Result};
use crate::filesystem::FileKind;
use crate::packages::{ArchiveEntry, EntryKind, Extractor};
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use tracing::{debug, info, warn};

/// Suffix of the new content written next to a preserved file
pub const PKGNEW_SUFFIX: &str = ".pkgnew";

/// Cumulative payload bytes processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
}

/// Counters describing what an install did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct InstallSummary {
    /// Files written to disk
    pub written: usize,
    /// Files whose checksum matched the previous version
    pub unchanged: usize,
    /// Files kept on disk with the new content stored as `.pkgnew`
    pub preserved: usize,
    /// Files of the old version removed from disk
    pub removed: usize,
    /// Files of the old version left on disk because they were modified
    pub kept_modified: usize,
    pub dirs_created: usize,
}

/// Result of comparing a recorded file against the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Unmodified,
    Modified,
    Missing,
    /// No checksum recorded
    Unknown,
}

impl AuditStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AuditStatus::Unmodified => "unmodified",
            AuditStatus::Modified => "modified",
            AuditStatus::Missing => "missing",
            AuditStatus::Unknown => "unknown",
        }
    }
}

/// Per-call bookkeeping of an install
#[derive(Default)]
struct Transaction {
    summary: InstallSummary,
    touched_files: HashSet<FileId>,
    touched_diris: HashSet<DirInstanceId>,
    sha256_160: bool,
    progress: Progress,
}

fn split_path(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl Database {
    /// Replace package `old` with package `new` on disk and in the database
    ///
    /// Either side may be absent: no `old` is a fresh install, no `new` is a
    /// removal. `old` and `new` may be the same package for a reinstall.
    ///
    /// # Arguments
    ///
    /// * `old` - The installed package being replaced
    /// * `new` - The package being installed and the source of its payload
    /// * `progress` - Called after each entry with cumulative byte counts
    ///
    /// # Returns
    ///
    /// * `Result<InstallSummary>` - What was written, kept and removed
    pub fn install_package(
        &mut self,
        old: Option<PackageId>,
        new: Option<(PackageId, &mut dyn Extractor)>,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<InstallSummary> {
        let old_dirs: Vec<DirInstanceId> = old
            .and_then(|pkg| self.packages.get(pkg))
            .and_then(|pkg| pkg.ipkg.as_ref())
            .map(|ipkg| ipkg.dirs.clone())
            .unwrap_or_default();
        let mut tx = Transaction::default();
        let new_pkg = new.as_ref().map(|(pkg, _)| *pkg);

        if let Some((pkg, extractor)) = new {
            if self.packages.get(pkg).is_none() {
                return Err(Error::PackageNotFound(format!("{:?}", pkg)));
            }
            info!("Installing {}", self.package_label(pkg));
            self.mark_installed(pkg);
            tx.progress.total = extractor.total_size().unwrap_or(0);

            while let Some(entry) = extractor.next_entry()? {
                self.install_entry(pkg, old, &entry, &mut tx)?;
                tx.progress.done += entry.size;
                tx.progress.total = tx.progress.total.max(tx.progress.done);
                progress(tx.progress);
            }

            if tx.sha256_160 {
                self.mark_installed(pkg).sha256_160 = true;
            }
        }

        self.purge_old_dirs(old_dirs, &mut tx)?;

        if let Some(old) = old
            && Some(old) != new_pkg
        {
            debug!("Removing {} from installed packages", self.package_label(old));
            self.mark_uninstalled(old);
        }

        info!(
            "Install finished: {} written, {} unchanged, {} preserved, {} removed",
            tx.summary.written, tx.summary.unchanged, tx.summary.preserved, tx.summary.removed
        );
        Ok(tx.summary)
    }

    fn install_entry(
        &mut self,
        pkg: PackageId,
        old: Option<PackageId>,
        entry: &ArchiveEntry,
        tx: &mut Transaction,
    ) -> Result<()> {
        let normalized = checked_path(&entry.path)?;
        let path: &str = &normalized;
        if path.is_empty() && !entry.is_dir() {
            return Err(Error::InvalidPath {
                path: entry.path.clone(),
                reason: "only a directory entry may name the root".to_string(),
            });
        }
        let acl = self.atoms.intern(
            Acl::new(entry.mode, entry.uid, entry.gid).with_xattrs(entry.xattr_csum),
        );

        if entry.is_dir() {
            let diri = self.claim_dir(pkg, path, Some(acl), tx);
            let dir = self.diris[diri].dir;
            return self.touch_dir(dir, acl, tx);
        }

        let (dir_path, name) = split_path(path);
        let diri = self.claim_dir(pkg, dir_path, None, tx);
        let dir = self.diris[diri].dir;
        let dir_acl = self.diris[diri].acl;
        self.touch_dir(dir, dir_acl, tx)?;

        if entry.checksum.alg() == DigestAlg::Sha256_160 {
            tx.sha256_160 = true;
        }

        let existing = self.file_query(dir_path, name);
        let previous = match existing {
            Some(id) => {
                let owner = self.file_owner(id);
                if Some(owner) == old || owner == pkg {
                    Some(id)
                } else {
                    self.take_over(pkg, id, path)?;
                    None
                }
            }
            None => None,
        };

        let file = match previous {
            Some(id) => {
                let recorded = self.files[id].csum;
                // Hashed and found pristine right before the overwrite
                let mut verified = false;
                if recorded == entry.checksum {
                    debug!("/{} unchanged", path);
                    if self.files[id].acl != acl {
                        self.apply_file_permissions(path, entry)?;
                    }
                    tx.summary.unchanged += 1;
                } else {
                    let mode = protect::file_protect_mode(&self.dirs[dir], name);
                    let check = protect::check_disk_copy(mode, &*self.fs, path, &recorded)?;
                    verified = check.digested && !check.preserve;
                    if check.preserve {
                        info!("Preserving modified /{}, new version in {}{}", path, path, PKGNEW_SUFFIX);
                        self.write_entry(&format!("{}{}", path, PKGNEW_SUFFIX), entry)?;
                        tx.summary.preserved += 1;
                    } else {
                        self.write_entry(path, entry)?;
                        tx.summary.written += 1;
                    }
                }
                self.file_move(id, diri);
                let record = &mut self.files[id];
                record.csum = entry.checksum;
                record.acl = acl;
                record.audited = verified;
                id
            }
            None => {
                self.write_entry(path, entry)?;
                tx.summary.written += 1;
                self.file_new(diri, name, entry.checksum, acl)?
            }
        };
        tx.touched_files.insert(file);
        Ok(())
    }

    /// The instance of `pkg` on `path`, created on first use
    fn claim_dir(
        &mut self,
        pkg: PackageId,
        path: &str,
        acl: Option<AclId>,
        tx: &mut Transaction,
    ) -> DirInstanceId {
        let diri = match self.diri_find(pkg, path) {
            Some(diri) => {
                if let Some(acl) = acl {
                    self.diris[diri].acl = acl;
                }
                diri
            }
            None => {
                let acl = acl.unwrap_or_else(|| self.atoms.default_dir());
                self.diri_new(pkg, path, acl)
            }
        };
        tx.touched_diris.insert(diri);
        diri
    }

    /// Make sure `dir` and its ancestors exist on disk and flag permission drift
    fn touch_dir(&mut self, dir: DirId, acl: AclId, tx: &mut Transaction) -> Result<()> {
        let mut chain = Vec::new();
        let mut current = Some(dir);
        while let Some(id) = current {
            if self.dirs[id].seen {
                break;
            }
            chain.push(id);
            current = self.dirs[id].parent;
        }

        for id in chain.into_iter().rev() {
            let name = self.dirs[id].name.clone();
            match self.fs.file_info(&name)? {
                Some(info) if info.kind == FileKind::Directory => {
                    let node = &mut self.dirs[id];
                    node.mode = info.mode & 0o7777;
                    node.uid = info.uid;
                    node.gid = info.gid;
                }
                Some(_) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("/{} exists and is not a directory", name),
                    )));
                }
                None => {
                    let mode = if id == dir {
                        self.atoms.get(acl).permissions()
                    } else {
                        DEFAULT_DIR_MODE
                    };
                    self.fs.create_dir(&name, mode)?;
                    let node = &mut self.dirs[id];
                    node.mode = mode;
                    node.uid = 0;
                    node.gid = 0;
                    node.created = true;
                    tx.summary.dirs_created += 1;
                }
            }
            self.dirs[id].seen = true;
        }

        let wanted = *self.atoms.get(acl);
        let node = &mut self.dirs[dir];
        if node.mode != wanted.permissions() || node.uid != wanted.uid || node.gid != wanted.gid {
            node.update_permissions = true;
        }
        Ok(())
    }

    /// Move a file owned by another package to `pkg`, if allowed
    fn take_over(&mut self, pkg: PackageId, id: FileId, path: &str) -> Result<()> {
        let owner = self.file_owner(id);
        let owner_name = self.packages[owner].name;
        let replaces = self.packages[pkg]
            .ipkg
            .as_ref()
            .is_some_and(|ipkg| ipkg.replaces.iter().any(|dep| dep.name == owner_name));

        if !replaces && !self.options.force_overwrite {
            return Err(Error::FileConflict {
                path: path.to_string(),
                owner: self.package_label(owner),
            });
        }
        warn!(
            "/{} taken over from {} by {}",
            path,
            self.package_label(owner),
            self.package_label(pkg)
        );
        self.file_remove(id);
        Ok(())
    }

    fn write_entry(&mut self, path: &str, entry: &ArchiveEntry) -> Result<()> {
        match &entry.kind {
            EntryKind::File { content } => {
                self.fs.write_file(path, content, entry.mode & 0o7777)?;
                if entry.uid != 0 || entry.gid != 0 {
                    self.apply_file_permissions(path, entry)?;
                }
            }
            EntryKind::Symlink { target } => self.fs.symlink(target, path)?,
            EntryKind::Directory => {}
        }
        Ok(())
    }

    fn apply_file_permissions(&mut self, path: &str, entry: &ArchiveEntry) -> Result<()> {
        if matches!(entry.kind, EntryKind::File { .. }) {
            self.fs
                .set_permissions(path, entry.mode, entry.uid, entry.gid)?;
        }
        Ok(())
    }

    /// Remove what the old version recorded and the new one did not claim
    fn purge_old_dirs(&mut self, old_dirs: Vec<DirInstanceId>, tx: &mut Transaction) -> Result<()> {
        let mut old_dirs: Vec<(usize, DirInstanceId)> = old_dirs
            .into_iter()
            .filter(|diri| self.diris.contains(*diri))
            .map(|diri| {
                let depth = self.dirs[self.diris[diri].dir].name.matches('/').count();
                (depth, diri)
            })
            .collect();
        // Children before parents so emptied directories can be removed
        old_dirs.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, diri) in old_dirs {
            let files = self.diris[diri].files.clone();
            for file in files {
                if tx.touched_files.contains(&file) {
                    continue;
                }
                self.purge_file(file, tx)?;
            }
            if !tx.touched_diris.contains(&diri) {
                self.diri_remove(diri, true)?;
            }
        }
        Ok(())
    }

    fn purge_file(&mut self, id: FileId, tx: &mut Transaction) -> Result<()> {
        let path = self.file_path(id);
        let record = &self.files[id];
        let dir = self.diris[record.diri].dir;
        let mode = protect::file_protect_mode(&self.dirs[dir], &record.name);
        let csum = record.csum;

        let keep = !self.options.purge
            && mode != ProtectMode::None
            && protect::should_preserve(ProtectMode::Changed, &*self.fs, &path, &csum)?;
        if keep {
            info!("Keeping modified /{}", path);
            tx.summary.kept_modified += 1;
        } else {
            debug!("Removing /{}", path);
            if let Err(e) = ignore_missing(self.fs.remove_file(&path)) {
                warn!("Failed to remove /{}: {}", path, e);
            }
            tx.summary.removed += 1;
        }
        self.file_remove(id);
        Ok(())
    }

    /// Apply merged owner permissions to every flagged directory
    ///
    /// The mode is the union of the owners' permission bits and ownership is
    /// the smallest (uid, gid) pair among them. Failures are logged and the
    /// pass continues. Returns the number of directories changed.
    pub fn update_directory_permissions(&mut self) -> usize {
        let flagged: Vec<DirId> = self
            .dirs
            .iter()
            .filter(|(_, dir)| dir.update_permissions)
            .map(|(id, _)| id)
            .collect();

        let mut changed = 0;
        for id in flagged {
            let merged = self.dirs[id]
                .owners
                .iter()
                .map(|diri| *self.atoms.get(self.diris[*diri].acl))
                .reduce(|a, b| {
                    let (uid, gid) = (a.uid, a.gid).min((b.uid, b.gid));
                    Acl::new(a.permissions() | b.permissions(), uid, gid)
                });
            let dir = &mut self.dirs[id];
            dir.update_permissions = false;
            let Some(acl) = merged else {
                continue;
            };
            let mode = acl.permissions();
            if dir.mode == mode && dir.uid == acl.uid && dir.gid == acl.gid {
                continue;
            }

            let name = dir.name.clone();
            match self.fs.set_permissions(&name, mode, acl.uid, acl.gid) {
                Ok(()) => {
                    let dir = &mut self.dirs[id];
                    dir.mode = mode;
                    dir.uid = acl.uid;
                    dir.gid = acl.gid;
                    dir.modified = true;
                    changed += 1;
                }
                Err(e) => warn!("Failed to set permissions of /{}: {}", name, e),
            }
        }

        let ids: Vec<DirId> = self.dirs.ids().collect();
        for id in ids {
            self.dirs[id].seen = false;
        }
        debug!("Updated permissions of {} directories", changed);
        changed
    }

    /// Digest algorithm for new file records of `pkg`
    pub fn file_digest_alg(&self, pkg: PackageId) -> DigestAlg {
        let sha256_160 = self
            .packages
            .get(pkg)
            .and_then(|p| p.ipkg.as_ref())
            .is_some_and(|ipkg| ipkg.sha256_160);
        if sha256_160 {
            DigestAlg::Sha256_160
        } else {
            DigestAlg::Sha1
        }
    }

    /// Compare one recorded file with the disk and mark it audited
    pub fn audit_file(&mut self, id: FileId) -> Result<AuditStatus> {
        let path = self.file_path(id);
        let csum: Checksum = self.files[id].csum;

        let status = if self.fs.file_info(&path)?.is_none() {
            AuditStatus::Missing
        } else if csum.is_none() {
            AuditStatus::Unknown
        } else if self.fs.digest(&path, csum.alg())? == csum {
            AuditStatus::Unmodified
        } else {
            AuditStatus::Modified
        };
        self.files[id].audited = true;
        Ok(status)
    }

    /// Audit every file of `pkg`; returns paths that are not unmodified
    pub fn audit_package(&mut self, pkg: PackageId) -> Result<Vec<(String, AuditStatus)>> {
        let files: Vec<FileId> = match self.packages.get(pkg).and_then(|p| p.ipkg.as_ref()) {
            Some(ipkg) => ipkg
                .dirs
                .iter()
                .flat_map(|diri| self.diris[*diri].files.iter().copied())
                .collect(),
            None => return Err(Error::PackageNotFound(self.package_label(pkg))),
        };

        let mut findings = Vec::new();
        for file in files {
            let status = self.audit_file(file)?;
            if status != AuditStatus::Unmodified {
                findings.push((self.file_path(file), status));
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;
    use crate::db::models::Package;
    use crate::filesystem::HostFs;
    use crate::packages::MemoryArchive;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;

    fn test_db(root: &Path) -> Database {
        Database::new(DbOptions::new(root), Box::new(HostFs::new(root))).unwrap()
    }

    fn add_pkg(db: &mut Database, name: &str, version: &str) -> PackageId {
        let name_id = db.get_name(name);
        let csum = Checksum::compute(DigestAlg::Sha1, format!("{name}-{version}").as_bytes());
        db.pkg_add(Package::new(name_id, version, csum))
    }

    fn file(path: &str, content: &str) -> ArchiveEntry {
        ArchiveEntry::file(path, content.as_bytes().to_vec(), DigestAlg::Sha1)
    }

    fn install(
        db: &mut Database,
        old: Option<PackageId>,
        new: PackageId,
        entries: Vec<ArchiveEntry>,
    ) -> InstallSummary {
        let mut archive = MemoryArchive::new(entries);
        db.install_package(old, Some((new, &mut archive)), &mut |_| {})
            .unwrap()
    }

    #[test]
    fn test_fresh_install() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let pkg = add_pkg(&mut db, "hello", "1.0");

        let mut archive = MemoryArchive::new([
            ArchiveEntry::directory("usr/bin"),
            file("usr/bin/hello", "#!/bin/sh\necho hello\n").with_mode(0o755),
            ArchiveEntry::symlink("usr/bin/hi", "hello", DigestAlg::Sha1),
        ]);
        let mut seen = Vec::new();
        let summary = db
            .install_package(None, Some((pkg, &mut archive)), &mut |p| seen.push(p))
            .unwrap();

        assert_eq!(summary.written, 2);
        assert_eq!(summary.dirs_created, 2);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last().unwrap().done, seen.last().unwrap().total);
        assert!(seen.windows(2).all(|w| w[0].done <= w[1].done));

        let hello = temp.path().join("usr/bin/hello");
        assert_eq!(fs::read_to_string(&hello).unwrap(), "#!/bin/sh\necho hello\n");
        assert_eq!(fs::metadata(&hello).unwrap().permissions().mode() & 0o7777, 0o755);
        assert_eq!(
            fs::read_link(temp.path().join("usr/bin/hi")).unwrap(),
            Path::new("hello")
        );
        assert_eq!(db.get_file_owner("usr/bin/hello"), Some(pkg));
        assert_eq!(db.stats().packages, 1);
        assert!(db.check_refcounts().is_empty());
    }

    #[test]
    fn test_upgrade_skips_unchanged_and_removes_dropped() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let v1 = add_pkg(&mut db, "app", "1.0");
        let v2 = add_pkg(&mut db, "app", "2.0");

        install(
            &mut db,
            None,
            v1,
            vec![
                file("usr/lib/app/core.so", "core-1"),
                file("usr/lib/app/old.so", "old"),
                file("usr/share/app/data", "data"),
            ],
        );
        // Unchanged files are not rewritten
        fs::write(temp.path().join("usr/share/app/data"), "locally edited").unwrap();

        let summary = install(
            &mut db,
            Some(v1),
            v2,
            vec![
                file("usr/lib/app/core.so", "core-2"),
                file("usr/share/app/data", "data"),
            ],
        );
        assert_eq!(summary.written, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.removed, 1);

        assert!(!temp.path().join("usr/lib/app/old.so").exists());
        assert_eq!(
            fs::read_to_string(temp.path().join("usr/share/app/data")).unwrap(),
            "locally edited"
        );
        assert_eq!(db.get_file_owner("usr/lib/app/core.so"), Some(v2));
        assert!(db.file_query_path("usr/lib/app/old.so").is_none());
        assert!(!db.package(v1).unwrap().is_installed());
        assert_eq!(db.installed_packages(), &[v2]);
        assert_eq!(db.stats().files, 2);
        assert!(db.check_refcounts().is_empty());
    }

    #[test]
    fn test_changed_protection_preserves_modified_config() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let v1 = add_pkg(&mut db, "daemon", "1.0");
        let v2 = add_pkg(&mut db, "daemon", "2.0");
        let v3 = add_pkg(&mut db, "daemon", "3.0");

        install(&mut db, None, v1, vec![file("etc/daemon.conf", "port=1\n")]);
        let summary = install(&mut db, Some(v1), v2, vec![file("etc/daemon.conf", "port=2\n")]);
        assert_eq!(summary.written, 1);
        assert_eq!(
            fs::read_to_string(temp.path().join("etc/daemon.conf")).unwrap(),
            "port=2\n"
        );
        let id = db.file_query_path("etc/daemon.conf").unwrap();
        assert!(db.file(id).unwrap().audited, "pristine copy was hashed before the overwrite");

        fs::write(temp.path().join("etc/daemon.conf"), "port=22\n").unwrap();
        let summary = install(&mut db, Some(v2), v3, vec![file("etc/daemon.conf", "port=3\n")]);
        assert_eq!(summary.preserved, 1);
        assert_eq!(
            fs::read_to_string(temp.path().join("etc/daemon.conf")).unwrap(),
            "port=22\n"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("etc/daemon.conf.pkgnew")).unwrap(),
            "port=3\n"
        );
        let id = db.file_query_path("etc/daemon.conf").unwrap();
        assert_eq!(
            db.file(id).unwrap().csum,
            Checksum::compute(DigestAlg::Sha1, b"port=3\n")
        );
        assert!(!db.file(id).unwrap().audited);
    }

    #[test]
    fn test_dot_and_double_slash_paths_match_installed_records() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let v1 = add_pkg(&mut db, "app", "1");
        let v2 = add_pkg(&mut db, "app", "2");

        install(&mut db, None, v1, vec![file("etc/app.conf", "v1")]);
        fs::write(temp.path().join("etc/app.conf"), "admin edit").unwrap();

        let summary = install(
            &mut db,
            Some(v1),
            v2,
            vec![file("./etc/app.conf", "v2"), file("usr//share/app/data", "d")],
        );
        assert_eq!(summary.preserved, 1);
        assert_eq!(summary.kept_modified, 0);
        assert_eq!(
            fs::read_to_string(temp.path().join("etc/app.conf")).unwrap(),
            "admin edit"
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("etc/app.conf.pkgnew")).unwrap(),
            "v2"
        );
        assert_eq!(db.get_file_owner("etc/app.conf"), Some(v2));
        assert!(db.file_query_path("usr/share/app/data").is_some());
        // root, etc, usr, usr/share, usr/share/app
        assert_eq!(db.stats().dirs, 5);
        assert!(db.check_refcounts().is_empty());
    }

    #[test]
    fn test_parent_components_are_rejected() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("root");
        fs::create_dir(&root).unwrap();
        let mut db = test_db(&root);
        let pkg = add_pkg(&mut db, "evil", "1");

        for path in ["../escaped", "usr/../../escaped", ".."] {
            let mut archive = MemoryArchive::new([file(path, "x")]);
            let result = db.install_package(None, Some((pkg, &mut archive)), &mut |_| {});
            assert!(
                matches!(result, Err(Error::InvalidPath { .. })),
                "{} was accepted",
                path
            );
        }
        assert!(!temp.path().join("escaped").exists());
        assert_eq!(db.stats().files, 0);
    }

    #[test]
    fn test_conflict_with_other_package() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let a = add_pkg(&mut db, "a", "1");
        let b = add_pkg(&mut db, "b", "1");
        install(&mut db, None, a, vec![file("usr/bin/tool", "a")]);

        let mut archive = MemoryArchive::new([file("usr/bin/tool", "b")]);
        let result = db.install_package(None, Some((b, &mut archive)), &mut |_| {});
        assert!(matches!(result, Err(Error::FileConflict { .. })));
        assert_eq!(db.get_file_owner("usr/bin/tool"), Some(a));
    }

    #[test]
    fn test_force_overwrite_takes_ownership() {
        let temp = tempdir().unwrap();
        let mut options = DbOptions::new(temp.path());
        options.force_overwrite = true;
        let mut db = Database::new(options, Box::new(HostFs::new(temp.path()))).unwrap();
        let a = add_pkg(&mut db, "a", "1");
        let b = add_pkg(&mut db, "b", "1");
        install(&mut db, None, a, vec![file("usr/bin/tool", "a")]);
        install(&mut db, None, b, vec![file("usr/bin/tool", "b")]);

        assert_eq!(db.get_file_owner("usr/bin/tool"), Some(b));
        assert_eq!(fs::read_to_string(temp.path().join("usr/bin/tool")).unwrap(), "b");
        assert_eq!(db.stats().files, 1);
        assert!(db.check_refcounts().is_empty());
    }

    #[test]
    fn test_replaces_allows_take_over() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let a = add_pkg(&mut db, "a", "1");
        let b = add_pkg(&mut db, "b", "1");
        install(&mut db, None, a, vec![file("usr/bin/tool", "a")]);

        let replaces = db.parse_dependencies("a").unwrap();
        db.mark_installed(b).replaces = replaces;
        install(&mut db, None, b, vec![file("usr/bin/tool", "b")]);
        assert_eq!(db.get_file_owner("usr/bin/tool"), Some(b));
    }

    #[test]
    fn test_removal_keeps_shared_directories() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let a = add_pkg(&mut db, "a", "1");
        let b = add_pkg(&mut db, "b", "1");
        install(&mut db, None, a, vec![file("usr/share/doc/a/README", "a")]);
        install(&mut db, None, b, vec![file("usr/share/doc/b/README", "b")]);

        let summary = db.install_package(Some(a), None, &mut |_| {}).unwrap();
        assert_eq!(summary.removed, 1);
        assert!(!temp.path().join("usr/share/doc/a").exists());
        assert!(temp.path().join("usr/share/doc/b/README").exists());
        assert!(db.dir_query("usr/share/doc").is_some());
        assert!(db.dir_query("usr/share/doc/a").is_none());
        assert_eq!(db.installed_packages(), &[b]);
        assert!(db.check_refcounts().is_empty());
    }

    #[test]
    fn test_removal_keeps_modified_protected_files() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let pkg = add_pkg(&mut db, "svc", "1");
        install(
            &mut db,
            None,
            pkg,
            vec![file("etc/svc/main.conf", "a"), file("etc/svc/extra.conf", "b")],
        );
        fs::write(temp.path().join("etc/svc/main.conf"), "edited").unwrap();

        let summary = db.install_package(Some(pkg), None, &mut |_| {}).unwrap();
        assert_eq!(summary.kept_modified, 1);
        assert_eq!(summary.removed, 1);
        assert!(temp.path().join("etc/svc/main.conf").exists());
        assert!(!temp.path().join("etc/svc/extra.conf").exists());
        assert_eq!(db.stats().files, 0);
        assert_eq!(db.stats().packages, 0);
    }

    #[test]
    fn test_reinstall_same_package() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let pkg = add_pkg(&mut db, "x", "1");
        install(&mut db, None, pkg, vec![file("opt/x/a", "a"), file("opt/y/b", "b")]);
        let summary = install(&mut db, Some(pkg), pkg, vec![file("opt/x/a", "a")]);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.removed, 1);
        assert!(db.package(pkg).unwrap().is_installed());
        assert!(db.dir_query("opt/y").is_none());
        assert!(db.check_refcounts().is_empty());
    }

    #[test]
    fn test_sha256_160_flag() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let pkg = add_pkg(&mut db, "modern", "1");
        assert_eq!(db.file_digest_alg(pkg), DigestAlg::Sha1);
        install(
            &mut db,
            None,
            pkg,
            vec![ArchiveEntry::file("usr/lib/m", b"m".to_vec(), DigestAlg::Sha256_160)],
        );
        assert_eq!(db.file_digest_alg(pkg), DigestAlg::Sha256_160);
    }

    #[test]
    fn test_directory_permissions_are_batched() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let a = add_pkg(&mut db, "a", "1");
        let b = add_pkg(&mut db, "b", "1");
        install(&mut db, None, a, vec![ArchiveEntry::directory("srv/data").with_mode(0o750)]);
        install(&mut db, None, b, vec![ArchiveEntry::directory("srv/data").with_mode(0o705)]);

        let data = temp.path().join("srv/data");
        assert_eq!(fs::metadata(&data).unwrap().permissions().mode() & 0o7777, 0o750);
        assert_eq!(db.update_directory_permissions(), 1);
        assert_eq!(fs::metadata(&data).unwrap().permissions().mode() & 0o7777, 0o755);
        assert_eq!(db.update_directory_permissions(), 0);
    }

    #[test]
    fn test_audit() {
        let temp = tempdir().unwrap();
        let mut db = test_db(temp.path());
        let pkg = add_pkg(&mut db, "a", "1");
        install(
            &mut db,
            None,
            pkg,
            vec![file("opt/a/one", "1"), file("opt/a/two", "2"), file("opt/a/three", "3")],
        );
        fs::write(temp.path().join("opt/a/two"), "changed").unwrap();
        fs::remove_file(temp.path().join("opt/a/three")).unwrap();

        let findings = db.audit_package(pkg).unwrap();
        assert_eq!(
            findings,
            vec![
                ("opt/a/two".to_string(), AuditStatus::Modified),
                ("opt/a/three".to_string(), AuditStatus::Missing),
            ]
        );
        let one = db.file_query_path("opt/a/one").unwrap();
        assert!(db.file(one).unwrap().audited);
    }

    #[test]
    fn test_non_directory_in_the_way() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("blocker"), "x").unwrap();
        let mut db = test_db(temp.path());
        let pkg = add_pkg(&mut db, "a", "1");
        let mut archive = MemoryArchive::new([file("blocker/file", "y")]);
        let result = db.install_package(None, Some((pkg, &mut archive)), &mut |_| {});
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
