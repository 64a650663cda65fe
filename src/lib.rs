// src/lib.rs

//! pkgdb - installed-state database for a package manager
//!
//! Tracks which package owns which directory and file under an install root
//! and applies package upgrades to disk.
//!
//! # Architecture
//!
//! - Blobs: borrowed byte views and a poisoning cursor codec for text records
//! - Directory tree: directories shared between packages, reference counted
//! - Protected paths: per-directory policy deciding when local edits survive
//! - Installed database: plain text records persisted under the root
//! - Install: one-pass upgrade from an old package version to a new one

pub mod blob;
pub mod checksum;
pub mod db;
mod error;
pub mod filesystem;
pub mod install;
pub mod packages;
pub mod repository;

pub use checksum::{Checksum, DigestAlg};
pub use db::{Database, DbOptions};
pub use error::{Error, Result};
pub use install::{AuditStatus, InstallSummary, Progress};
