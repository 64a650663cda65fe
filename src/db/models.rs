// src/db/models.rs

//! Data models for pkgdb database entities
//!
//! This module defines the records held by the in-memory database: names,
//! packages and their installed state, the directory tree, directory
//! instances and files, plus the repository tables.

use super::atoms::AclId;
use super::hash::arena_id;
use super::protect::{ProtectMode, ProtectedPath};
use crate::checksum::Checksum;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::str::FromStr;

arena_id!(
    /// Handle to an interned [`Name`]
    NameId
);
arena_id!(
    /// Handle to a [`Package`] in the available index
    PackageId
);
arena_id!(
    /// Handle to a node of the shared directory tree
    DirId
);
arena_id!(
    /// Handle to one package's claim on a directory
    DirInstanceId
);
arena_id!(
    /// Handle to an installed file record
    FileId
);

/// Version constraint operator in a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepOp {
    #[default]
    Any,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Same version prefix (`~`)
    Fuzzy,
}

impl DepOp {
    pub fn as_str(&self) -> &str {
        match self {
            DepOp::Any => "",
            DepOp::Eq => "=",
            DepOp::Lt => "<",
            DepOp::Le => "<=",
            DepOp::Gt => ">",
            DepOp::Ge => ">=",
            DepOp::Fuzzy => "~",
        }
    }
}

impl FromStr for DepOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" => Ok(DepOp::Any),
            "=" => Ok(DepOp::Eq),
            "<" => Ok(DepOp::Lt),
            "<=" => Ok(DepOp::Le),
            ">" => Ok(DepOp::Gt),
            ">=" => Ok(DepOp::Ge),
            "~" | "=~" | "~=" => Ok(DepOp::Fuzzy),
            _ => Err(format!("Invalid version operator: {}", s)),
        }
    }
}

/// A dependency, provide, install-if or replaces entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: NameId,
    pub op: DepOp,
    pub version: Option<String>,
    /// `!name`: the named package must not be installed
    pub conflict: bool,
    /// Index into the database's repository tag table
    pub repository_tag: usize,
}

impl Dependency {
    pub fn new(name: NameId) -> Self {
        Self {
            name,
            op: DepOp::Any,
            version: None,
            conflict: false,
            repository_tag: 0,
        }
    }

    pub fn with_version(mut self, op: DepOp, version: impl Into<String>) -> Self {
        self.op = op;
        self.version = Some(version.into());
        self
    }
}

/// A package that satisfies a name, optionally at a specific version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub pkg: PackageId,
    pub version: Option<String>,
}

/// Opaque per-name scratch slot owned by the dependency solver
#[derive(Default)]
pub struct SolverState(Option<Box<dyn Any + Send>>);

impl SolverState {
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref()?.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_mut()?.downcast_mut()
    }

    pub fn set<T: Any + Send>(&mut self, state: T) {
        self.0 = Some(Box::new(state));
    }

    pub fn take<T: Any>(&mut self) -> Option<T> {
        let boxed = self.0.take()?;
        match boxed.downcast::<T>() {
            Ok(state) => Some(*state),
            Err(other) => {
                self.0 = Some(other);
                None
            }
        }
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for SolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("SolverState(set)"),
            None => f.write_str("SolverState(empty)"),
        }
    }
}

/// An interned package or virtual name
#[derive(Debug, Default)]
pub struct Name {
    pub name: String,
    pub providers: Vec<Provider>,
    /// Names of packages that depend on this name
    pub rdepends: Vec<NameId>,
    /// Names of packages whose install-if mentions this name
    pub rinstall_if: Vec<NameId>,
    pub is_dependency: bool,
    pub auto_select_virtual: bool,
    pub priority: u8,
    pub(crate) foreach_genid: u32,
    pub ss: SolverState,
}

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Mark as visited in traversal `genid`; false if it already was
    pub fn visit(&mut self, genid: u32) -> bool {
        if self.foreach_genid == genid {
            return false;
        }
        self.foreach_genid = genid;
        true
    }
}

/// Installed state of a package
#[derive(Debug, Default, Clone)]
pub struct InstalledPackage {
    /// Directory instances in install order
    pub dirs: Vec<DirInstanceId>,
    /// File checksums tagged SHA1 are really SHA256-160
    pub sha256_160: bool,
    pub replaces: Vec<Dependency>,
    pub broken_files: bool,
    pub broken_script: bool,
}

/// A package known to the database, installed or available
#[derive(Debug, Clone)]
pub struct Package {
    pub name: NameId,
    pub version: String,
    pub arch: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub origin: Option<String>,
    /// Identity of the package file
    pub checksum: Checksum,
    pub size: u64,
    pub installed_size: u64,
    pub depends: Vec<Dependency>,
    pub provides: Vec<Dependency>,
    pub install_if: Vec<Dependency>,
    /// Bitmask of repositories offering this package
    pub repos: u32,
    pub ipkg: Option<InstalledPackage>,
}

impl Package {
    /// Create a new Package
    pub fn new(name: NameId, version: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            name,
            version: version.into(),
            arch: None,
            description: None,
            license: None,
            origin: None,
            checksum,
            size: 0,
            installed_size: 0,
            depends: Vec::new(),
            provides: Vec::new(),
            install_if: Vec::new(),
            repos: 0,
            ipkg: None,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.ipkg.is_some()
    }
}

/// A node of the shared directory tree
#[derive(Debug)]
pub struct Directory {
    /// Normalized path: no leading or trailing `/`, root is empty
    pub name: String,
    pub parent: Option<DirId>,
    /// Patterns that apply below this directory, relative to it
    pub protected_paths: Vec<ProtectedPath>,
    /// Applied permissions as last seen or set on disk
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub(crate) refs: u32,
    pub protect_mode: ProtectMode,
    pub has_protected_children: bool,
    pub seen: bool,
    pub created: bool,
    pub modified: bool,
    pub update_permissions: bool,
    pub owners: Vec<DirInstanceId>,
}

impl Directory {
    pub fn refs(&self) -> u32 {
        self.refs
    }

    pub fn is_root(&self) -> bool {
        self.name.is_empty()
    }

    /// Last path component
    pub fn basename(&self) -> &str {
        match self.name.rsplit_once('/') {
            Some((_, base)) => base,
            None => &self.name,
        }
    }

    /// Full path of a file named `file` inside this directory
    pub fn file_path(&self, file: &str) -> String {
        file_key(&self.name, file)
    }
}

/// One package's claim on a directory, and the files it installed there
#[derive(Debug)]
pub struct DirInstance {
    pub pkg: PackageId,
    pub dir: DirId,
    pub acl: AclId,
    pub files: Vec<FileId>,
}

/// An installed file
#[derive(Debug)]
pub struct DbFile {
    pub diri: DirInstanceId,
    pub name: String,
    pub csum: Checksum,
    pub acl: AclId,
    /// Set once the on-disk content has been checked against `csum`
    pub audited: bool,
}

/// A configured package source
#[derive(Debug, Clone)]
pub struct Repository {
    pub url: String,
    pub csum: Checksum,
    pub description: Option<String>,
}

/// A named subset of repositories (`@tag`)
#[derive(Debug, Clone)]
pub struct RepositoryTag {
    /// Tag as written, with its leading `@` (empty for the default tag)
    pub tag: String,
    pub plain_name: String,
    pub allowed_repos: u32,
}

/// Installed-state counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstalledStats {
    pub files: usize,
    pub dirs: usize,
    pub packages: usize,
    pub bytes: u64,
}

/// Summary of a package for display
#[derive(Debug, Clone, Serialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub arch: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub origin: Option<String>,
    pub checksum: String,
    pub size: u64,
    pub installed_size: u64,
    pub depends: Vec<String>,
    pub files: usize,
}

/// Index key of a file: `dir/name`, or just `name` in the root
pub fn file_key(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
