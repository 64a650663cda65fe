// src/db/names.rs

//! Name and provider graph
//!
//! Every package name, virtual name and dependency target is interned once
//! as a [`Name`]. Adding a package wires it into the graph: it becomes a
//! provider of its own name and of everything it provides, and each of its
//! dependencies learns about it through `rdepends`.

use super::Database;
use super::models::{DepOp, Dependency, Name, NameId, Package, PackageId, Provider};
use crate::blob::{Blob, DEPENDENCY_NAME_END, DEPENDENCY_OPERATOR};
use crate::checksum::Checksum;
use crate::error::{Error, Result};
use globset::{Glob, GlobMatcher};
use tracing::{debug, warn};

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn name_matcher(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| Error::Pattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

impl Database {
    /// Intern `name`, creating it on first use
    pub fn get_name(&mut self, name: &str) -> NameId {
        if let Some(id) = self.name_index.get(name.as_bytes()) {
            return id;
        }
        let id = self.names.insert(Name::new(name));
        self.name_index.insert(name.as_bytes(), id);
        id
    }

    pub fn query_name(&self, name: &str) -> Option<NameId> {
        self.name_index.get(name.as_bytes())
    }

    pub fn name(&self, id: NameId) -> &Name {
        &self.names[id]
    }

    pub fn name_mut(&mut self, id: NameId) -> &mut Name {
        &mut self.names[id]
    }

    pub fn names(&self) -> impl Iterator<Item = (NameId, &Name)> + '_ {
        self.names.iter()
    }

    /// Start a new traversal generation for [`Name::visit`]
    pub fn next_generation(&mut self) -> u32 {
        self.genid = self.genid.wrapping_add(1);
        if self.genid == 0 {
            // Zero is the "never visited" marker
            for id in self.names.ids().collect::<Vec<_>>() {
                self.names[id].foreach_genid = 0;
            }
            self.genid = 1;
        }
        self.genid
    }

    /// Call `cb` once for every name matching `filter`
    ///
    /// Patterns containing glob characters are matched against all names;
    /// plain patterns are looked up directly. An empty filter visits every
    /// name. The callback receives the pattern that matched (`None` for the
    /// empty filter) and the name; a name matched by several patterns is
    /// reported only for the first.
    pub fn name_foreach_matching(
        &mut self,
        filter: &[&str],
        mut cb: impl FnMut(&Database, Option<&str>, NameId),
    ) -> Result<()> {
        let genid = self.next_generation();

        if filter.is_empty() {
            let ids: Vec<NameId> = self.names.ids().collect();
            for id in ids {
                if self.names[id].visit(genid) {
                    cb(self, None, id);
                }
            }
            return Ok(());
        }

        for pattern in filter {
            let matches: Vec<NameId> = if is_glob(pattern) {
                let matcher = name_matcher(pattern)?;
                self.names
                    .iter()
                    .filter(|(_, name)| matcher.is_match(&name.name))
                    .map(|(id, _)| id)
                    .collect()
            } else {
                self.query_name(pattern).into_iter().collect()
            };
            for id in matches {
                if self.names[id].visit(genid) {
                    cb(self, Some(*pattern), id);
                }
            }
        }
        Ok(())
    }

    /// Parse `[!]name[op version][@tag]`
    pub fn parse_dependency(&mut self, text: &str) -> Result<Dependency> {
        let malformed = |reason: &str| Error::Format {
            line: 0,
            reason: format!("{}: '{}'", reason, text),
        };

        let mut rest = Blob::from(text.trim());
        let conflict = rest.starts_with(b"!");
        if conflict {
            rest = Blob::new(&rest.as_bytes()[1..]);
        }

        let (name, mut rest) = rest
            .cspn(&DEPENDENCY_NAME_END)
            .unwrap_or((rest, Blob::new(b"")));
        if name.is_empty() {
            return Err(malformed("missing dependency name"));
        }

        let mut tag = None;
        if let Some((head, tag_name)) = rest.rsplit(b'@') {
            tag = Some(tag_name);
            rest = head;
        }

        let (op, version) = if rest.is_empty() {
            (DepOp::Any, None)
        } else {
            let (op, version) = rest
                .spn(&DEPENDENCY_OPERATOR)
                .ok_or_else(|| malformed("missing version"))?;
            let op = op
                .to_string_lossy()
                .parse::<DepOp>()
                .map_err(|e| malformed(&e))?;
            if op == DepOp::Any {
                return Err(malformed("unexpected text after name"));
            }
            (op, Some(version.to_string_lossy().into_owned()))
        };

        let repository_tag = match tag {
            Some(tag) => self.get_tag_id(&tag.to_string_lossy())?,
            None => 0,
        };

        let name = self.get_name(&name.to_string_lossy());
        Ok(Dependency {
            name,
            op,
            version,
            conflict,
            repository_tag,
        })
    }

    /// Parse a whitespace separated dependency list
    pub fn parse_dependencies(&mut self, text: &str) -> Result<Vec<Dependency>> {
        text.split_ascii_whitespace()
            .map(|dep| self.parse_dependency(dep))
            .collect()
    }

    pub fn format_dependency(&self, dep: &Dependency) -> String {
        let mut out = String::new();
        if dep.conflict {
            out.push('!');
        }
        out.push_str(&self.names[dep.name].name);
        if let Some(version) = &dep.version {
            out.push_str(dep.op.as_str());
            out.push_str(version);
        }
        if dep.repository_tag != 0
            && let Some(tag) = self.tags.get(dep.repository_tag)
        {
            out.push_str(&tag.tag);
        }
        out
    }

    pub fn format_dependencies(&self, deps: &[Dependency]) -> String {
        deps.iter()
            .map(|dep| self.format_dependency(dep))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Count world dependencies pinned to a tag that no repository serves
    pub fn check_world(&self, world: &[Dependency]) -> usize {
        let mut bad = 0;
        for dep in world {
            let tag = dep.repository_tag;
            if tag == 0 {
                continue;
            }
            let allowed = self.tags.get(tag).map_or(0, |t| t.allowed_repos);
            if allowed == 0 {
                warn!(
                    "The repository tag for world dependency '{}' does not exist",
                    self.format_dependency(dep)
                );
                bad += 1;
            }
        }
        bad
    }

    /// Package with identity checksum `csum`
    pub fn get_pkg(&self, csum: &Checksum) -> Option<PackageId> {
        if csum.is_none() {
            return None;
        }
        self.package_index.get(csum.as_bytes())
    }

    /// Add a package to the available index and wire it into the name graph
    ///
    /// A package already known by checksum is not added again; its
    /// repository mask is merged into the existing entry.
    pub fn pkg_add(&mut self, pkg: Package) -> PackageId {
        if let Some(existing) = self.get_pkg(&pkg.checksum) {
            self.packages[existing].repos |= pkg.repos;
            return existing;
        }

        let name = pkg.name;
        let version = pkg.version.clone();
        let provides: Vec<(NameId, Option<String>)> = pkg
            .provides
            .iter()
            .map(|dep| (dep.name, dep.version.clone()))
            .collect();
        let depends: Vec<(NameId, bool)> =
            pkg.depends.iter().map(|dep| (dep.name, dep.conflict)).collect();
        let install_if: Vec<NameId> = pkg.install_if.iter().map(|dep| dep.name).collect();
        let csum = pkg.checksum;

        let id = self.packages.insert(pkg);
        if !csum.is_none() {
            self.package_index.insert(csum.as_bytes(), id);
        }

        self.names[name].providers.push(Provider {
            pkg: id,
            version: Some(version),
        });
        for (provide, version) in provides {
            self.names[provide]
                .providers
                .push(Provider { pkg: id, version });
        }
        for (dep, conflict) in depends {
            let target = &mut self.names[dep];
            if !conflict {
                target.is_dependency = true;
            }
            if !target.rdepends.contains(&name) {
                target.rdepends.push(name);
            }
        }
        for dep in install_if {
            let target = &mut self.names[dep];
            if !target.rinstall_if.contains(&name) {
                target.rinstall_if.push(name);
            }
        }

        debug!("Added package {}", self.package_label(id));
        id
    }
}
