// src/error.rs

use thiserror::Error;

/// Core error types for pkgdb
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Malformed record in the installed database, world or index text
    #[error("Malformed record at line {line}: {reason}")]
    Format { line: usize, reason: String },

    /// A write cursor ran out of space while encoding
    #[error("Output buffer too small while encoding {0}")]
    Overflow(&'static str),

    /// Directory reference count dropped below zero
    #[error("Directory reference count underflow on '/{0}'")]
    RefcountUnderflow(String),

    /// A file is already owned by another installed package
    #[error("File '/{path}' is already owned by package {owner}")]
    FileConflict { path: String, owner: String },

    /// A package path that cannot be placed under the install root
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Package lookup failed
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// Repository table is full
    #[error("Too many repositories configured (maximum is {0})")]
    TooManyRepositories(usize),

    /// Repository tag table is full
    #[error("Too many repository tags configured (maximum is {0})")]
    TooManyTags(usize),

    /// A protected path or name filter pattern did not compile
    #[error("Invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
}

/// Result type alias using pkgdb's Error type
pub type Result<T> = std::result::Result<T, Error>;
