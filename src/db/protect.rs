// src/db/protect.rs

//! Protected-path policy
//!
//! Some files (configuration under `etc`, mostly) must not be clobbered when
//! the administrator has edited them. Patterns are registered against the
//! root and pushed down the directory tree as directories are created, so
//! deciding the mode of a file only needs its own directory.
//!
//! List files use one pattern per line with a mode prefix:
//!
//! ```text
//! +etc            preserve when changed on disk
//! -etc/ssl/certs  never preserve
//! @etc/init.d     preserve symlinks
//! !etc/pkgdb      always preserve
//! # comment
//! ```

use super::models::Directory;
use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::filesystem::{FileKind, Filesystem};
use globset::{GlobBuilder, GlobMatcher};
use std::str::FromStr;
use tracing::debug;

/// Patterns used when no list files are configured
pub const DEFAULT_PROTECTED_PATHS: &str = "+etc\n@etc/init.d\n!etc/pkgdb\n";

/// How an installed file is treated when a new version would overwrite it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectMode {
    /// Overwrite unconditionally
    #[default]
    None,
    /// Keep the disk copy if it differs from the recorded checksum
    Changed,
    /// Keep the disk copy if it is a symlink
    SymlinksOnly,
    /// Keep the disk copy whenever it exists
    All,
}

impl ProtectMode {
    pub fn as_str(&self) -> &str {
        match self {
            ProtectMode::None => "none",
            ProtectMode::Changed => "changed",
            ProtectMode::SymlinksOnly => "symlinks-only",
            ProtectMode::All => "all",
        }
    }

    /// List file prefix character
    pub fn prefix(&self) -> char {
        match self {
            ProtectMode::None => '-',
            ProtectMode::Changed => '+',
            ProtectMode::SymlinksOnly => '@',
            ProtectMode::All => '!',
        }
    }

    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '-' => Some(ProtectMode::None),
            '+' => Some(ProtectMode::Changed),
            '@' => Some(ProtectMode::SymlinksOnly),
            '!' => Some(ProtectMode::All),
            _ => None,
        }
    }
}

impl FromStr for ProtectMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(ProtectMode::None),
            "changed" => Ok(ProtectMode::Changed),
            "symlinks-only" => Ok(ProtectMode::SymlinksOnly),
            "all" => Ok(ProtectMode::All),
            _ => Err(format!("Invalid protect mode: {}", s)),
        }
    }
}

/// A glob pattern relative to the directory carrying it
#[derive(Debug, Clone)]
pub struct ProtectedPath {
    pub relative_pattern: String,
    pub protect_mode: ProtectMode,
    matcher: GlobMatcher,
    /// For multi-component patterns: the first component and the remainder
    descend: Option<(GlobMatcher, Box<ProtectedPath>)>,
}

fn compile(pattern: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::Pattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
    Ok(glob.compile_matcher())
}

impl ProtectedPath {
    pub fn new(pattern: &str, protect_mode: ProtectMode) -> Result<Self> {
        let pattern = pattern.trim_matches('/');
        if pattern.is_empty() {
            return Err(Error::Pattern {
                pattern: pattern.to_string(),
                reason: "empty pattern".to_string(),
            });
        }

        let descend = match pattern.split_once('/') {
            Some((head, rest)) => Some((
                compile(head)?,
                Box::new(ProtectedPath::new(rest, protect_mode)?),
            )),
            None => None,
        };

        Ok(Self {
            relative_pattern: pattern.to_string(),
            protect_mode,
            matcher: compile(pattern)?,
            descend,
        })
    }

    /// Single-component patterns apply to entries of the carrying directory
    pub fn is_local(&self) -> bool {
        self.descend.is_none()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }
}

/// Parse one list file line; blank lines and comments yield `None`
pub fn parse_protected_line(line: &str) -> Result<Option<ProtectedPath>> {
    let line = line.trim();
    let mut chars = line.chars();
    let Some(prefix) = chars.next() else {
        return Ok(None);
    };
    if prefix == '#' {
        return Ok(None);
    }
    let mode = ProtectMode::from_prefix(prefix).ok_or_else(|| Error::Pattern {
        pattern: line.to_string(),
        reason: format!("unknown protect mode prefix '{}'", prefix),
    })?;
    ProtectedPath::new(chars.as_str().trim(), mode).map(Some)
}

/// Parse a whole list file
pub fn parse_protected_list(text: &str) -> Result<Vec<ProtectedPath>> {
    let mut paths = Vec::new();
    for line in text.lines() {
        if let Some(path) = parse_protected_line(line)? {
            paths.push(path);
        }
    }
    Ok(paths)
}

pub fn default_protected_paths() -> Vec<ProtectedPath> {
    parse_protected_list(DEFAULT_PROTECTED_PATHS).unwrap_or_default()
}

/// Protection state computed for a newly created directory
#[derive(Debug, Clone)]
pub(crate) struct Inherited {
    pub protect_mode: ProtectMode,
    pub protected_paths: Vec<ProtectedPath>,
    pub has_protected_children: bool,
}

/// Root protection: no mode of its own, carries every registered pattern
pub(crate) fn root_protection(paths: &[ProtectedPath]) -> Inherited {
    Inherited {
        protect_mode: ProtectMode::None,
        protected_paths: paths.to_vec(),
        has_protected_children: paths.iter().any(|p| p.protect_mode != ProtectMode::None),
    }
}

/// Derive the protection of child directory `child` from its parent
pub(crate) fn inherit(parent: &Directory, child: &str) -> Inherited {
    let mut protect_mode = parent.protect_mode;
    let mut protected_paths = Vec::new();

    for path in &parent.protected_paths {
        match &path.descend {
            Some((head, rest)) => {
                if head.is_match(child) {
                    protected_paths.push((**rest).clone());
                }
            }
            None => {
                if path.matcher.is_match(child) {
                    protect_mode = path.protect_mode;
                }
            }
        }
    }

    let has_protected_children = protect_mode != ProtectMode::None
        || protected_paths
            .iter()
            .any(|p| p.protect_mode != ProtectMode::None);

    Inherited {
        protect_mode,
        protected_paths,
        has_protected_children,
    }
}

/// Protect mode for file `name` inside `dir`
///
/// Starts from the directory's own mode; each matching single-component
/// pattern overrides it, so the last registered match wins.
pub fn file_protect_mode(dir: &Directory, name: &str) -> ProtectMode {
    if !dir.has_protected_children {
        return dir.protect_mode;
    }
    dir.protected_paths
        .iter()
        .filter(|p| p.is_local() && p.matches(name))
        .fold(dir.protect_mode, |_, p| p.protect_mode)
}

/// Outcome of checking an installed file's disk copy before an overwrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskCheck {
    /// Keep the disk copy instead of overwriting it
    pub preserve: bool,
    /// The disk copy was hashed and compared with the recorded checksum
    pub digested: bool,
}

/// Decide whether the disk copy at `path` must be kept instead of overwritten
///
/// `previous` is the checksum recorded for the installed version; the disk
/// digest is computed with the same algorithm. A file that is not on disk is
/// never preserved.
pub fn should_preserve(
    mode: ProtectMode,
    fs: &dyn Filesystem,
    path: &str,
    previous: &Checksum,
) -> Result<bool> {
    check_disk_copy(mode, fs, path, previous).map(|check| check.preserve)
}

/// Like [`should_preserve`], also reporting whether the disk was hashed
pub fn check_disk_copy(
    mode: ProtectMode,
    fs: &dyn Filesystem,
    path: &str,
    previous: &Checksum,
) -> Result<DiskCheck> {
    let mut check = DiskCheck {
        preserve: false,
        digested: false,
    };
    if mode == ProtectMode::None {
        return Ok(check);
    }
    let Some(info) = fs.file_info(path)? else {
        return Ok(check);
    };

    check.preserve = match mode {
        ProtectMode::None => false,
        ProtectMode::All => true,
        ProtectMode::SymlinksOnly => info.kind == FileKind::Symlink,
        // Without a recorded checksum there is nothing to prove the copy is pristine
        ProtectMode::Changed if previous.is_none() => true,
        ProtectMode::Changed => {
            check.digested = true;
            fs.digest(path, previous.alg())? != *previous
        }
    };
    debug!(
        "Protect decision for /{}: mode {}, preserve {}",
        path,
        mode.as_str(),
        check.preserve
    );
    Ok(check)
}
