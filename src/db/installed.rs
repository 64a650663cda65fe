// src/db/installed.rs

//! Installed database and index text format
//!
//! Packages are stored as records separated by blank lines, one `K:value`
//! field per line:
//!
//! ```text
//! C:Q1...           package checksum
//! P:busybox         name
//! V:1.36.1-r15      version
//! S:507402          size
//! I:946176          installed size
//! D:so:libc.musl-x86_64.so.1
//! h:1               file checksums are SHA256-160
//! F:bin             directory owned by the package
//! M:0:0:755         directory permissions uid:gid:mode (mode in octal)
//! R:busybox         file in the last directory
//! a:0:0:755         file permissions
//! Z:Q1...           file checksum
//! ```
//!
//! Repository indexes use the same package fields without the F/M/R/a/Z
//! lines. Lines are encoded with [`WriteCursor`] into a fixed line buffer
//! and decoded with [`ReadCursor`].

use super::Database;
use super::atoms::{Acl, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
use super::dirs::checked_path;
use super::models::{Dependency, Package};
use crate::blob::{Blob, ReadCursor, WriteCursor};
use crate::checksum::{Checksum, DigestAlg};
use crate::error::{Error, Result};
use crate::repository::MAX_REPOS;
use tracing::{debug, warn};

/// Longest encodable line
const LINE_BUFFER: usize = 4096;

struct RecordWriter<'o> {
    out: &'o mut Vec<u8>,
    line: Vec<u8>,
    lines: usize,
}

impl<'o> RecordWriter<'o> {
    fn new(out: &'o mut Vec<u8>) -> Self {
        Self {
            out,
            line: vec![0; LINE_BUFFER],
            lines: 0,
        }
    }

    fn field(
        &mut self,
        key: u8,
        what: &'static str,
        fill: impl FnOnce(&mut WriteCursor<'_>),
    ) -> Result<()> {
        let mut w = WriteCursor::new(&mut self.line);
        w.push_char(key).push_char(b':');
        fill(&mut w);
        w.push_char(b'\n');
        let len = w.finish(what)?;
        self.out.extend_from_slice(&self.line[..len]);
        self.lines += 1;
        Ok(())
    }

    fn text(&mut self, key: u8, what: &'static str, value: &str) -> Result<()> {
        // A newline would start a new field on read
        if value.contains('\n') {
            return Err(format_error(
                self.lines + 1,
                format!("{} {:?} contains a newline", what, value),
            ));
        }
        self.field(key, what, |w| {
            w.push_blob(value);
        })
    }

    fn optional(&mut self, key: u8, what: &'static str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) if !value.is_empty() => self.text(key, what, value),
            _ => Ok(()),
        }
    }

    fn acl(&mut self, key: u8, what: &'static str, acl: &Acl) -> Result<()> {
        self.field(key, what, |w| {
            w.push_uint(u64::from(acl.uid), 10)
                .push_char(b':')
                .push_uint(u64::from(acl.gid), 10)
                .push_char(b':')
                .push_uint(u64::from(acl.mode), 8);
            if !acl.xattr_csum.is_none() {
                w.push_char(b':').push_csum(&acl.xattr_csum);
            }
        })
    }

    fn end_record(&mut self) {
        self.out.push(b'\n');
        self.lines += 1;
    }
}

fn is_default_acl(acl: &Acl, mode: u32) -> bool {
    acl.mode == mode && acl.uid == 0 && acl.gid == 0 && acl.xattr_csum.is_none()
}

/// Serialize every installed package of `db` into `out`
pub fn write_installed(db: &Database, out: &mut Vec<u8>) -> Result<()> {
    let mut w = RecordWriter::new(out);

    for &id in &db.installed {
        let pkg = &db.packages[id];
        let Some(ipkg) = &pkg.ipkg else {
            continue;
        };

        if !pkg.checksum.is_none() {
            w.field(b'C', "package checksum", |c| {
                c.push_csum(&pkg.checksum);
            })?;
        }
        w.text(b'P', "package name", &db.names[pkg.name].name)?;
        w.text(b'V', "package version", &pkg.version)?;
        w.optional(b'A', "package arch", pkg.arch.as_deref())?;
        w.field(b'S', "package size", |c| {
            c.push_uint(pkg.size, 10);
        })?;
        w.field(b'I', "installed size", |c| {
            c.push_uint(pkg.installed_size, 10);
        })?;
        w.optional(b'T', "package description", pkg.description.as_deref())?;
        w.optional(b'L', "package license", pkg.license.as_deref())?;
        w.optional(b'o', "package origin", pkg.origin.as_deref())?;
        for (key, what, deps) in [
            (b'D', "dependencies", &pkg.depends),
            (b'p', "provides", &pkg.provides),
            (b'i', "install-if", &pkg.install_if),
            (b'r', "replaces", &ipkg.replaces),
        ] {
            if !deps.is_empty() {
                w.text(key, what, &db.format_dependencies(deps))?;
            }
        }
        if ipkg.sha256_160 {
            w.text(b'h', "checksum flag", "1")?;
        }

        for &diri in &ipkg.dirs {
            let instance = &db.diris[diri];
            w.text(b'F', "directory", &db.dirs[instance.dir].name)?;
            let acl = db.atoms.get(instance.acl);
            if !is_default_acl(acl, DEFAULT_DIR_MODE) {
                w.acl(b'M', "directory permissions", acl)?;
            }

            for &file in &instance.files {
                let file = &db.files[file];
                w.text(b'R', "file name", &file.name)?;
                let acl = db.atoms.get(file.acl);
                if !is_default_acl(acl, DEFAULT_FILE_MODE) {
                    w.acl(b'a', "file permissions", acl)?;
                }
                if !file.csum.is_none() {
                    w.field(b'Z', "file checksum", |c| {
                        c.push_csum(&file.csum);
                    })?;
                }
            }
        }
        w.end_record();
    }
    Ok(())
}

/// Load installed package records; returns the number of packages read
pub fn read_installed(db: &mut Database, input: &[u8]) -> Result<usize> {
    read_records(db, input, Target::Installed)
}

/// Load repository index records into the available index for `repo`
pub fn read_index(db: &mut Database, input: &[u8], repo: usize) -> Result<usize> {
    if repo >= MAX_REPOS {
        return Err(Error::TooManyRepositories(MAX_REPOS));
    }
    read_records(db, input, Target::Repository(repo))
}

/// One dependency per line
pub fn write_world(db: &Database) -> String {
    db.world
        .iter()
        .map(|dep| format!("{}\n", db.format_dependency(dep)))
        .collect()
}

/// Parse world text (whitespace separated dependencies)
pub fn read_world(db: &mut Database, text: &str) -> Result<Vec<Dependency>> {
    db.parse_dependencies(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Installed,
    Repository(usize),
}

#[derive(Debug)]
struct FileRecord {
    name: String,
    acl: Acl,
    csum: Checksum,
}

#[derive(Debug)]
struct DirRecord {
    path: String,
    acl: Acl,
    files: Vec<FileRecord>,
}

#[derive(Debug, Default)]
struct PackageRecord {
    first_line: usize,
    checksum: Checksum,
    name: Option<String>,
    version: Option<String>,
    arch: Option<String>,
    description: Option<String>,
    license: Option<String>,
    origin: Option<String>,
    size: u64,
    installed_size: u64,
    depends: Vec<(usize, String)>,
    provides: Vec<(usize, String)>,
    install_if: Vec<(usize, String)>,
    replaces: Vec<(usize, String)>,
    sha256_160: bool,
    dirs: Vec<DirRecord>,
}

fn format_error(line: usize, reason: impl Into<String>) -> Error {
    Error::Format {
        line,
        reason: reason.into(),
    }
}

/// Attach a line number to errors raised while parsing a field
fn at_line(error: Error, line: usize) -> Error {
    match error {
        Error::Format { reason, .. } => Error::Format { line, reason },
        other => other,
    }
}

fn parse_uint(value: Blob<'_>, radix: u32, line: usize) -> Result<u64> {
    let mut r = ReadCursor::new(value);
    let number = r.pull_uint(radix);
    if value.is_empty() || r.is_poisoned() || !r.is_empty() {
        return Err(format_error(
            line,
            format!("invalid number '{}'", value.to_string_lossy()),
        ));
    }
    Ok(number)
}

fn parse_csum(value: Blob<'_>, line: usize) -> Result<Checksum> {
    let mut r = ReadCursor::new(value);
    let csum = r.pull_csum();
    if r.is_poisoned() || !r.is_empty() {
        return Err(format_error(
            line,
            format!("invalid checksum '{}'", value.to_string_lossy()),
        ));
    }
    Ok(csum)
}

fn parse_acl(value: Blob<'_>, line: usize) -> Result<Acl> {
    let mut r = ReadCursor::new(value);
    let uid = r.pull_uint(10);
    r.pull_char(b':');
    let gid = r.pull_uint(10);
    r.pull_char(b':');
    let mode = r.pull_uint(8);
    let mut xattr_csum = Checksum::none();
    if !r.is_empty() {
        r.pull_char(b':');
        xattr_csum = r.pull_csum();
    }
    if r.is_poisoned() || !r.is_empty() {
        return Err(format_error(
            line,
            format!("invalid permissions '{}'", value.to_string_lossy()),
        ));
    }
    let narrow = |v: u64| u32::try_from(v).map_err(|_| format_error(line, "permission value out of range"));
    Ok(Acl::new(narrow(mode)?, narrow(uid)?, narrow(gid)?).with_xattrs(xattr_csum))
}

impl PackageRecord {
    fn is_empty(&self) -> bool {
        self.first_line == 0
    }

    fn apply(&mut self, key: u8, value: Blob<'_>, line: usize, target: Target) -> Result<()> {
        if self.first_line == 0 {
            self.first_line = line;
        }
        let text = || value.to_string_lossy().into_owned();

        match key {
            b'C' => self.checksum = parse_csum(value, line)?,
            b'P' => self.name = Some(text()),
            b'V' => self.version = Some(text()),
            b'A' => self.arch = Some(text()),
            b'T' => self.description = Some(text()),
            b'L' => self.license = Some(text()),
            b'o' => self.origin = Some(text()),
            b'S' => self.size = parse_uint(value, 10, line)?,
            b'I' => self.installed_size = parse_uint(value, 10, line)?,
            b'D' => self.depends.push((line, text())),
            b'p' => self.provides.push((line, text())),
            b'i' => self.install_if.push((line, text())),
            b'r' => self.replaces.push((line, text())),
            b'h' => self.sha256_160 = value.as_bytes() != b"0",
            b'F' if target == Target::Installed => {
                let path = text();
                let path = checked_path(&path)
                    .map_err(|_| format_error(line, format!("invalid directory '{}'", path)))?
                    .into_owned();
                self.dirs.push(DirRecord {
                    path,
                    acl: Acl::new(DEFAULT_DIR_MODE, 0, 0),
                    files: Vec::new(),
                });
            }
            b'M' if target == Target::Installed => {
                let dir = self
                    .dirs
                    .last_mut()
                    .ok_or_else(|| format_error(line, "directory permissions before F:"))?;
                dir.acl = parse_acl(value, line)?;
            }
            b'R' if target == Target::Installed => {
                let dir = self
                    .dirs
                    .last_mut()
                    .ok_or_else(|| format_error(line, "file before F:"))?;
                dir.files.push(FileRecord {
                    name: text(),
                    acl: Acl::new(DEFAULT_FILE_MODE, 0, 0),
                    csum: Checksum::none(),
                });
            }
            b'a' | b'Z' if target == Target::Installed => {
                let file = self
                    .dirs
                    .last_mut()
                    .and_then(|dir| dir.files.last_mut())
                    .ok_or_else(|| format_error(line, "file field before R:"))?;
                if key == b'a' {
                    file.acl = parse_acl(value, line)?;
                } else {
                    file.csum = parse_csum(value, line)?;
                }
            }
            _ => debug!("Ignoring field '{}' on line {}", key as char, line),
        }
        Ok(())
    }
}

fn parse_dep_lines(db: &mut Database, lines: &[(usize, String)]) -> Result<Vec<Dependency>> {
    let mut deps = Vec::new();
    for (line, text) in lines {
        deps.extend(db.parse_dependencies(text).map_err(|e| at_line(e, *line))?);
    }
    Ok(deps)
}

fn commit_record(db: &mut Database, record: PackageRecord, target: Target) -> Result<()> {
    let line = record.first_line;
    let name = record
        .name
        .ok_or_else(|| format_error(line, "package record without P: field"))?;
    let version = record
        .version
        .ok_or_else(|| format_error(line, "package record without V: field"))?;

    let name_id = db.get_name(&name);
    let mut pkg = Package::new(name_id, version, record.checksum);
    pkg.arch = record.arch;
    pkg.description = record.description;
    pkg.license = record.license;
    pkg.origin = record.origin;
    pkg.size = record.size;
    pkg.installed_size = record.installed_size;
    pkg.depends = parse_dep_lines(db, &record.depends)?;
    pkg.provides = parse_dep_lines(db, &record.provides)?;
    pkg.install_if = parse_dep_lines(db, &record.install_if)?;

    let Target::Repository(repo) = target else {
        let replaces = parse_dep_lines(db, &record.replaces)?;
        let id = db.pkg_add(pkg);
        if db.packages[id].is_installed() {
            return Err(format_error(
                line,
                format!("package {} recorded twice", db.package_label(id)),
            ));
        }
        let ipkg = db.mark_installed(id);
        ipkg.sha256_160 = record.sha256_160;
        ipkg.replaces = replaces;

        let retag = |csum: Checksum| {
            if record.sha256_160 && csum.alg() == DigestAlg::Sha1 {
                csum.with_alg(DigestAlg::Sha256_160)
            } else {
                csum
            }
        };
        for dir in record.dirs {
            let acl = db.atoms.intern(dir.acl);
            let diri = db.diri_new(id, &dir.path, acl);
            for file in dir.files {
                let acl = db.atoms.intern(file.acl);
                match db.file_new(diri, &file.name, retag(file.csum), acl) {
                    Ok(_) => {}
                    Err(Error::FileConflict { path, owner }) => {
                        warn!("/{} of {} is also owned by {}", path, name, owner);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        return Ok(());
    };

    pkg.repos = 1 << repo;
    db.pkg_add(pkg);
    Ok(())
}

fn read_records(db: &mut Database, input: &[u8], target: Target) -> Result<usize> {
    let mut record = PackageRecord::default();
    let mut count = 0;

    for (index, line) in Blob::new(input).segments(b"\n").enumerate() {
        let lineno = index + 1;
        let bytes = line.as_bytes();
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);

        if bytes.is_empty() {
            if !record.is_empty() {
                commit_record(db, std::mem::take(&mut record), target)?;
                count += 1;
            }
            continue;
        }
        if bytes.len() < 2 || bytes[1] != b':' {
            return Err(format_error(lineno, "expected 'K:value' field"));
        }
        record.apply(bytes[0], Blob::new(&bytes[2..]), lineno, target)?;
    }

    if !record.is_empty() {
        commit_record(db, record, target)?;
        count += 1;
    }
    Ok(count)
}
