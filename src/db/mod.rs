// src/db/mod.rs

//! Database layer for pkgdb
//!
//! The [`Database`] is the aggregate root of installed state:
//! - Interned names and the available package index
//! - The shared directory tree, directory instances and installed files
//! - The permission record pool and protected path policy
//! - Repositories, tags and the world dependency list
//!
//! State is kept in memory and persisted as plain text under the install
//! root (see [`installed`] for the record format).

pub mod atoms;
pub mod dirs;
pub mod hash;
pub mod installed;
pub mod models;
pub mod names;
pub mod protect;

use crate::error::{Error, Result};
use crate::filesystem::{Filesystem, HostFs};
use atoms::{Acl, AclId, AtomPool};
use hash::{Arena, HashIndex};
use models::{
    DbFile, Dependency, DirId, DirInstance, DirInstanceId, Directory, FileId, InstalledPackage,
    InstalledStats, Name, NameId, Package, PackageId, PackageInfo, Repository, RepositoryTag,
};
use protect::ProtectedPath;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Installed package records, relative to the root
pub const INSTALLED_DB_PATH: &str = "lib/pkgdb/installed";

/// Explicitly requested dependencies
pub const WORLD_PATH: &str = "etc/pkgdb/world";

/// One repository per line, optionally `@tag url`
pub const REPOSITORIES_PATH: &str = "etc/pkgdb/repositories";

/// Directory of `*.list` protected path files
pub const PROTECTED_PATHS_DIR: &str = "etc/pkgdb/protected_paths.d";

/// Options controlling how the database is opened and how installs behave
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Install root; every persisted path is relative to it
    pub root: PathBuf,
    /// Take over files owned by other packages instead of failing
    pub force_overwrite: bool,
    /// Remove protected files even when modified on disk
    pub purge: bool,
    /// Apply uid/gid from package metadata (needs privileges)
    pub apply_ownership: bool,
    /// Protected path list text used instead of the configured list files
    pub protected_paths: Option<String>,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            force_overwrite: false,
            purge: false,
            apply_ownership: false,
            protected_paths: None,
        }
    }
}

impl DbOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Absolute host path of a root-relative path
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Initialize a new database layout under the options' root
///
/// Creates the state and configuration directories and empty installed and
/// world files. This is idempotent - calling it on an existing root is safe.
///
/// # Arguments
///
/// * `options` - Options naming the install root
///
/// # Returns
///
/// * `Result<()>` - Ok if successful, Error otherwise
pub fn init(options: &DbOptions) -> Result<()> {
    debug!("Initializing database under: {}", options.root.display());

    for dir in [INSTALLED_DB_PATH, WORLD_PATH] {
        if let Some(parent) = options.path(dir).parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::InitError(format!("Failed to create database directory: {}", e))
            })?;
        }
    }
    fs::create_dir_all(options.path(PROTECTED_PATHS_DIR))
        .map_err(|e| Error::InitError(format!("Failed to create configuration directory: {}", e)))?;

    for file in [INSTALLED_DB_PATH, WORLD_PATH] {
        let path = options.path(file);
        if !path.exists() {
            fs::write(&path, b"")
                .map_err(|e| Error::InitError(format!("Failed to create {}: {}", file, e)))?;
        }
    }

    info!("Database initialized successfully");
    Ok(())
}

/// In-memory installed-state database
pub struct Database {
    pub(crate) options: DbOptions,
    pub(crate) fs: Box<dyn Filesystem>,
    pub(crate) atoms: AtomPool,
    pub(crate) names: Arena<NameId, Name>,
    pub(crate) name_index: HashIndex<NameId>,
    pub(crate) packages: Arena<PackageId, Package>,
    pub(crate) package_index: HashIndex<PackageId>,
    pub(crate) dirs: Arena<DirId, Directory>,
    pub(crate) dir_index: HashIndex<DirId>,
    pub(crate) diris: Arena<DirInstanceId, DirInstance>,
    pub(crate) files: Arena<FileId, DbFile>,
    pub(crate) file_index: HashIndex<FileId>,
    pub(crate) repos: Vec<Repository>,
    pub(crate) tags: Vec<RepositoryTag>,
    pub(crate) available_repos: u32,
    pub(crate) world: Vec<Dependency>,
    pub(crate) protected_paths: Vec<ProtectedPath>,
    pub(crate) installed: Vec<PackageId>,
    pub(crate) stats: InstalledStats,
    pub(crate) genid: u32,
}

impl Database {
    /// Create an empty database working through `fs`
    pub fn new(options: DbOptions, fs: Box<dyn Filesystem>) -> Result<Self> {
        let protected_paths = match &options.protected_paths {
            Some(text) => protect::parse_protected_list(text)?,
            None => protect::default_protected_paths(),
        };

        Ok(Self {
            options,
            fs,
            atoms: AtomPool::new(),
            names: Arena::new(),
            name_index: HashIndex::new(),
            packages: Arena::new(),
            package_index: HashIndex::new(),
            dirs: Arena::new(),
            dir_index: HashIndex::new(),
            diris: Arena::new(),
            files: Arena::new(),
            file_index: HashIndex::with_buckets(4096),
            repos: vec![crate::repository::cache_repository()],
            tags: vec![crate::repository::default_tag()],
            available_repos: 0,
            world: Vec::new(),
            protected_paths,
            installed: Vec::new(),
            stats: InstalledStats::default(),
            genid: 0,
        })
    }

    /// Open the database persisted under the options' root
    ///
    /// # Arguments
    ///
    /// * `options` - Root and behavior options
    ///
    /// # Returns
    ///
    /// * `Result<Database>` - The loaded database, or `DatabaseNotFound` when
    ///   the root was never initialized
    pub fn open(options: DbOptions) -> Result<Self> {
        let installed_path = options.path(INSTALLED_DB_PATH);
        if !installed_path.exists() {
            return Err(Error::DatabaseNotFound(
                installed_path.display().to_string(),
            ));
        }

        let fs = HostFs::new(&options.root).with_ownership(options.apply_ownership);
        let configured = if options.protected_paths.is_none() {
            load_protected_lists(&options.path(PROTECTED_PATHS_DIR))?
        } else {
            None
        };
        let mut db = Database::new(options, Box::new(fs))?;
        if let Some(paths) = configured {
            db.protected_paths = paths;
        }

        if let Some(text) = read_optional(&db.options.path(REPOSITORIES_PATH))? {
            for line in String::from_utf8_lossy(&text).lines() {
                db.add_repository(line)?;
            }
        }

        let text = fs::read(&installed_path)?;
        let count = installed::read_installed(&mut db, &text)?;

        if let Some(text) = read_optional(&db.options.path(WORLD_PATH))? {
            db.world = installed::read_world(&mut db, &String::from_utf8_lossy(&text))?;
        }

        info!(
            "Opened database: {} packages, {} files, {} directories",
            count, db.stats.files, db.stats.dirs
        );
        Ok(db)
    }

    /// Persist the installed records and the world list
    pub fn commit(&mut self) -> Result<()> {
        let mut installed = Vec::new();
        installed::write_installed(self, &mut installed)?;
        let world = installed::write_world(self);

        self.fs.write_file(INSTALLED_DB_PATH, &installed, 0o644)?;
        self.fs.write_file(WORLD_PATH, world.as_bytes(), 0o644)?;
        info!(
            "Committed {} installed packages ({} bytes)",
            self.installed.len(),
            installed.len()
        );
        Ok(())
    }

    pub fn options(&self) -> &DbOptions {
        &self.options
    }

    pub fn stats(&self) -> InstalledStats {
        self.stats
    }

    pub fn world(&self) -> &[Dependency] {
        &self.world
    }

    pub fn set_world(&mut self, world: Vec<Dependency>) {
        self.world = world;
    }

    /// Installed packages in installation order
    pub fn installed_packages(&self) -> &[PackageId] {
        &self.installed
    }

    pub fn package(&self, id: PackageId) -> Option<&Package> {
        self.packages.get(id)
    }

    pub fn package_mut(&mut self, id: PackageId) -> Option<&mut Package> {
        self.packages.get_mut(id)
    }

    pub fn packages(&self) -> impl Iterator<Item = (PackageId, &Package)> + '_ {
        self.packages.iter()
    }

    pub fn directory(&self, id: DirId) -> Option<&Directory> {
        self.dirs.get(id)
    }

    pub fn dir_instance(&self, id: DirInstanceId) -> Option<&DirInstance> {
        self.diris.get(id)
    }

    pub fn file(&self, id: FileId) -> Option<&DbFile> {
        self.files.get(id)
    }

    pub fn acl(&self, id: AclId) -> &Acl {
        self.atoms.get(id)
    }

    pub fn intern_acl(&mut self, acl: Acl) -> AclId {
        self.atoms.intern(acl)
    }

    pub fn filesystem(&self) -> &dyn Filesystem {
        &*self.fs
    }

    /// Replace the protected path patterns and re-derive the tree's protection
    pub fn set_protected_paths(&mut self, paths: Vec<ProtectedPath>) {
        self.protected_paths = paths;
        self.reapply_protection();
    }

    pub fn protected_paths(&self) -> &[ProtectedPath] {
        &self.protected_paths
    }

    /// `name-version` of a package, for messages
    pub fn package_label(&self, id: PackageId) -> String {
        match self.packages.get(id) {
            Some(pkg) => format!("{}-{}", self.names[pkg.name].name, pkg.version),
            None => format!("{:?}", id),
        }
    }

    /// Installed package providing the exact name `name`
    pub fn find_installed(&self, name: &str) -> Option<PackageId> {
        self.installed
            .iter()
            .copied()
            .find(|id| self.names[self.packages[*id].name].name == name)
    }

    /// Paths of the files installed by `pkg`
    pub fn package_files(&self, pkg: PackageId) -> Vec<String> {
        let Some(ipkg) = self.packages.get(pkg).and_then(|p| p.ipkg.as_ref()) else {
            return Vec::new();
        };
        ipkg.dirs
            .iter()
            .flat_map(|diri| self.diris[*diri].files.iter())
            .map(|file| self.file_path(*file))
            .collect()
    }

    pub fn package_info(&self, id: PackageId) -> Result<PackageInfo> {
        let pkg = self
            .packages
            .get(id)
            .ok_or_else(|| Error::PackageNotFound(format!("{:?}", id)))?;
        Ok(PackageInfo {
            name: self.names[pkg.name].name.clone(),
            version: pkg.version.clone(),
            arch: pkg.arch.clone(),
            description: pkg.description.clone(),
            license: pkg.license.clone(),
            origin: pkg.origin.clone(),
            checksum: pkg.checksum.to_string(),
            size: pkg.size,
            installed_size: pkg.installed_size,
            depends: pkg.depends.iter().map(|d| self.format_dependency(d)).collect(),
            files: self.package_files(id).len(),
        })
    }

    /// Attach an installed record to `pkg`, creating it on first use
    pub fn mark_installed(&mut self, pkg: PackageId) -> &mut InstalledPackage {
        let package = &mut self.packages[pkg];
        if package.ipkg.is_none() {
            self.installed.push(pkg);
            self.stats.packages += 1;
            self.stats.bytes += package.installed_size;
            debug!("Marked package {:?} installed", pkg);
        }
        package.ipkg.get_or_insert_with(InstalledPackage::default)
    }

    /// Drop the installed record of `pkg`; its directory instances must be gone
    pub(crate) fn mark_uninstalled(&mut self, pkg: PackageId) {
        let package = &mut self.packages[pkg];
        if package.ipkg.take().is_some() {
            self.installed.retain(|id| *id != pkg);
            self.stats.packages -= 1;
            self.stats.bytes = self.stats.bytes.saturating_sub(package.installed_size);
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read `*.list` files in name order; `None` when there are none
fn load_protected_lists(dir: &Path) -> Result<Option<Vec<ProtectedPath>>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut lists: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "list"))
        .collect();
    if lists.is_empty() {
        return Ok(None);
    }
    lists.sort();

    let mut paths = Vec::new();
    for list in lists {
        debug!("Loading protected paths from {}", list.display());
        let text = fs::read_to_string(&list)?;
        paths.extend(protect::parse_protected_list(&text)?);
    }
    Ok(Some(paths))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_creates_layout() {
        let temp = tempdir().unwrap();
        let options = DbOptions::new(temp.path());

        let result = init(&options);
        assert!(result.is_ok());
        assert!(options.path(INSTALLED_DB_PATH).exists());
        assert!(options.path(WORLD_PATH).exists());
        assert!(options.path(PROTECTED_PATHS_DIR).is_dir());

        // Idempotent
        assert!(init(&options).is_ok());
    }

    #[test]
    fn test_open_existing_database() {
        let temp = tempdir().unwrap();
        let options = DbOptions::new(temp.path());
        init(&options).unwrap();

        let db = Database::open(options).unwrap();
        assert_eq!(db.stats(), InstalledStats::default());
        assert_eq!(db.protected_paths().len(), 3);
    }

    #[test]
    fn test_open_nonexistent_database() {
        let temp = tempdir().unwrap();
        let result = Database::open(DbOptions::new(temp.path().join("missing")));
        assert!(matches!(result, Err(Error::DatabaseNotFound(_))));
    }

    #[test]
    fn test_open_reads_protected_lists() {
        let temp = tempdir().unwrap();
        let options = DbOptions::new(temp.path());
        init(&options).unwrap();
        fs::write(options.path(PROTECTED_PATHS_DIR).join("base.list"), "+etc\n").unwrap();
        fs::write(options.path(PROTECTED_PATHS_DIR).join("z.list"), "!srv\n").unwrap();
        fs::write(options.path(PROTECTED_PATHS_DIR).join("ignored.txt"), "!opt\n").unwrap();

        let db = Database::open(options).unwrap();
        let patterns: Vec<_> = db
            .protected_paths()
            .iter()
            .map(|p| p.relative_pattern.as_str())
            .collect();
        assert_eq!(patterns, vec!["etc", "srv"]);
    }

    #[test]
    fn test_protected_override_option() {
        let temp = tempdir().unwrap();
        let mut options = DbOptions::new(temp.path());
        options.protected_paths = Some("!var/lib".to_string());
        let db = Database::new(options, Box::new(HostFs::new(temp.path()))).unwrap();
        assert_eq!(db.protected_paths().len(), 1);

        let mut options = DbOptions::new(temp.path());
        options.protected_paths = Some("?bad".to_string());
        assert!(Database::new(options, Box::new(HostFs::new(temp.path()))).is_err());
    }
}
