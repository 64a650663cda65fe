// src/filesystem/mod.rs

//! Filesystem operations used by the installer
//!
//! The database never touches the install root directly; it goes through the
//! [`Filesystem`] trait with paths relative to the root (no leading `/`, the
//! root itself is the empty path). [`HostFs`] is the implementation over a
//! real directory.

use crate::checksum::{Checksum, DigestAlg, Hasher};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Suffix of the scratch file used for atomic writes
const TEMP_SUFFIX: &str = ".pkgdb-new";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// Metadata of an on-disk entry (symlinks are not followed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub kind: FileKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

/// Disk operations needed by directory tracking and package installation
pub trait Filesystem: Send {
    /// Create a single directory; its parent must exist
    fn create_dir(&mut self, path: &str, mode: u32) -> io::Result<()>;

    /// Remove an empty directory
    fn remove_dir(&mut self, path: &str) -> io::Result<()>;

    /// Apply permission bits, and ownership where supported
    fn set_permissions(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> io::Result<()>;

    /// Replace the file at `path` with `content`
    fn write_file(&mut self, path: &str, content: &[u8], mode: u32) -> io::Result<()>;

    /// Replace the entry at `path` with a symlink to `target`
    fn symlink(&mut self, target: &str, path: &str) -> io::Result<()>;

    fn remove_file(&mut self, path: &str) -> io::Result<()>;

    /// `None` when nothing exists at `path`
    fn file_info(&self, path: &str) -> io::Result<Option<FileInfo>>;

    /// Digest of the content at `path`; symlinks digest their target string
    fn digest(&self, path: &str, alg: DigestAlg) -> io::Result<Checksum>;
}

/// [`Filesystem`] over a directory of the host
#[derive(Debug, Clone)]
pub struct HostFs {
    root: PathBuf,
    apply_ownership: bool,
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            apply_ownership: false,
        }
    }

    /// Also chown entries (needs privileges)
    pub fn with_ownership(mut self, apply_ownership: bool) -> Self {
        self.apply_ownership = apply_ownership;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a root-relative path onto the host; `..` would leave the root
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Ok(self.root.clone());
        }
        if Path::new(path)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path '{}' escapes the install root", path),
            ));
        }
        Ok(self.root.join(path))
    }

    fn remove_existing(&self, target: &Path) -> io::Result<()> {
        match fs::symlink_metadata(target) {
            Ok(meta) if meta.is_dir() => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a directory", target.display()),
            )),
            Ok(_) => fs::remove_file(target),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Filesystem for HostFs {
    fn create_dir(&mut self, path: &str, mode: u32) -> io::Result<()> {
        let target = self.resolve(path)?;
        debug!("Creating directory {}", target.display());
        match fs::create_dir(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && target.is_dir() => return Ok(()),
            Err(e) => return Err(e),
        }
        fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))
    }

    fn remove_dir(&mut self, path: &str) -> io::Result<()> {
        let target = self.resolve(path)?;
        debug!("Removing directory {}", target.display());
        fs::remove_dir(target)
    }

    fn set_permissions(&mut self, path: &str, mode: u32, uid: u32, gid: u32) -> io::Result<()> {
        let target = self.resolve(path)?;
        if self.apply_ownership {
            std::os::unix::fs::chown(&target, Some(uid), Some(gid))?;
        }
        fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))
    }

    fn write_file(&mut self, path: &str, content: &[u8], mode: u32) -> io::Result<()> {
        let target = self.resolve(path)?;
        let mut temp = target.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        // Write next to the target and rename over it
        fs::write(&temp, content)?;
        fs::set_permissions(&temp, fs::Permissions::from_mode(mode & 0o7777))?;
        if let Err(e) = self.remove_existing(&target).and_then(|_| fs::rename(&temp, &target)) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
        Ok(())
    }

    fn symlink(&mut self, target: &str, path: &str) -> io::Result<()> {
        let link = self.resolve(path)?;
        self.remove_existing(&link)?;
        std::os::unix::fs::symlink(target, link)
    }

    fn remove_file(&mut self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path)?)
    }

    fn file_info(&self, path: &str) -> io::Result<Option<FileInfo>> {
        let meta = match fs::symlink_metadata(self.resolve(path)?) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::Regular
        } else {
            FileKind::Other
        };
        Ok(Some(FileInfo {
            kind,
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.len(),
        }))
    }

    fn digest(&self, path: &str, alg: DigestAlg) -> io::Result<Checksum> {
        let target = self.resolve(path)?;
        if fs::symlink_metadata(&target)?.file_type().is_symlink() {
            let link = fs::read_link(&target)?;
            return Ok(Checksum::compute(alg, link.as_os_str().as_encoded_bytes()));
        }
        let mut file = File::open(&target)?;
        let mut hasher = Hasher::new(alg);
        io::copy(&mut file, &mut hasher)?;
        Ok(hasher.finish())
    }
}
