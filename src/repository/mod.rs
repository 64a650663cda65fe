// src/repository/mod.rs

//! Repository and tag tables
//!
//! This module provides functionality for:
//! - Registering package repositories (at most 32; repository 0 is the local cache)
//! - Named repository tags (`@edge`) used to pin dependencies
//! - Choosing the repository a package is fetched from
//! - Loading repository index text into the available package index

use crate::checksum::{Checksum, DigestAlg};
use crate::db::Database;
use crate::db::installed;
use crate::db::models::{PackageId, Repository, RepositoryTag};
use crate::error::{Error, Result};
use tracing::{debug, info};

/// Maximum number of repositories, including the cache
pub const MAX_REPOS: usize = 32;

/// Maximum number of repository tags, including the default tag
pub const MAX_TAGS: usize = 16;

/// Index of the local package cache
pub const CACHE_REPO: usize = 0;

/// Index of the first repository read from configuration
pub const FIRST_CONFIGURED_REPO: usize = 1;

/// Tag of dependencies without an `@tag` suffix
pub const DEFAULT_TAG: usize = 0;

pub(crate) fn cache_repository() -> Repository {
    Repository {
        url: "cache".to_string(),
        csum: Checksum::none(),
        description: Some("local package cache".to_string()),
    }
}

pub(crate) fn default_tag() -> RepositoryTag {
    RepositoryTag {
        tag: String::new(),
        plain_name: String::new(),
        allowed_repos: 0,
    }
}

impl Database {
    /// Register a repository from a configuration line `[@tag] url`
    ///
    /// Blank lines and `#` comments are skipped and yield `None`. A URL that
    /// is already registered returns its existing index.
    pub fn add_repository(&mut self, line: &str) -> Result<Option<usize>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (tag, url) = match line.strip_prefix('@') {
            Some(rest) => {
                let (tag, url) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| Error::Format {
                        line: 0,
                        reason: format!("repository tag without URL: '{}'", line),
                    })?;
                (Some(tag), url.trim())
            }
            None => (None, line),
        };

        if let Some(existing) = self.repos.iter().position(|repo| repo.url == url) {
            debug!("Repository {} already registered", url);
            return Ok(Some(existing));
        }
        if self.repos.len() >= MAX_REPOS {
            return Err(Error::TooManyRepositories(MAX_REPOS));
        }

        let tag_id = match tag {
            Some(tag) => self.get_tag_id(tag)?,
            None => DEFAULT_TAG,
        };

        let index = self.repos.len();
        self.repos.push(Repository {
            url: url.to_string(),
            csum: Checksum::compute(DigestAlg::Md5, url.as_bytes()),
            description: None,
        });
        self.tags[tag_id].allowed_repos |= 1 << index;
        self.available_repos |= 1 << index;

        info!("Added repository {} (#{}) {}", url, index, self.tags[tag_id].tag);
        Ok(Some(index))
    }

    /// Index of repository tag `tag` (with or without `@`), creating it
    pub fn get_tag_id(&mut self, tag: &str) -> Result<usize> {
        let plain = tag.trim_start_matches('@');
        if plain.is_empty() {
            return Ok(DEFAULT_TAG);
        }
        if let Some(index) = self.tags.iter().position(|t| t.plain_name == plain) {
            return Ok(index);
        }
        if self.tags.len() >= MAX_TAGS {
            return Err(Error::TooManyTags(MAX_TAGS));
        }
        self.tags.push(RepositoryTag {
            tag: format!("@{}", plain),
            plain_name: plain.to_string(),
            allowed_repos: 0,
        });
        Ok(self.tags.len() - 1)
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repos
    }

    pub fn repository_tags(&self) -> &[RepositoryTag] {
        &self.tags
    }

    /// Repositories allowed by a mask of tag indices
    pub fn pinning_mask_repos(&self, pinning_mask: u16) -> u32 {
        self.tags
            .iter()
            .enumerate()
            .filter(|(index, _)| pinning_mask & (1 << index) != 0)
            .fold(0, |repos, (_, tag)| repos | tag.allowed_repos)
    }

    /// Repository to fetch `pkg` from: the first configured one offering it,
    /// otherwise the cache
    pub fn select_repo(&self, pkg: PackageId) -> Option<usize> {
        let repos = self.packages.get(pkg)?.repos;
        let configured = repos & self.available_repos & !(1 << CACHE_REPO);
        if configured != 0 {
            return Some(configured.trailing_zeros() as usize);
        }
        (repos & (1 << CACHE_REPO) != 0).then_some(CACHE_REPO)
    }

    /// Add the packages of repository index text to the available index
    pub fn load_index(&mut self, repo: usize, text: &[u8]) -> Result<usize> {
        if repo >= self.repos.len() {
            return Err(Error::Format {
                line: 0,
                reason: format!("unknown repository #{}", repo),
            });
        }
        let count = installed::read_index(self, text, repo)?;
        info!("Loaded {} packages from {}", count, self.repos[repo].url);
        Ok(count)
    }
}
