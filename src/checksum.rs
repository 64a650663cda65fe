// src/checksum.rs

//! File and package checksums
//!
//! A [`Checksum`] is an algorithm tag plus up to 20 digest bytes. The NONE
//! algorithm means "integrity unknown": a NONE checksum never compares equal
//! to anything, itself included, so an unknown checksum can never make a file
//! look unchanged.

use crate::blob::{ReadCursor, WriteCursor};
use md5::Context as Md5Context;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;

/// Largest digest we store (SHA1 and truncated SHA256)
pub const MAX_CHECKSUM_LEN: usize = 20;

/// Digest algorithm tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestAlg {
    #[default]
    None,
    Md5,
    Sha1,
    /// SHA256 truncated to its first 20 bytes
    Sha256_160,
}

impl DigestAlg {
    /// Digest length in bytes
    pub const fn len(self) -> usize {
        match self {
            DigestAlg::None => 0,
            DigestAlg::Md5 => 16,
            DigestAlg::Sha1 | DigestAlg::Sha256_160 => 20,
        }
    }

    pub const fn is_none(self) -> bool {
        matches!(self, DigestAlg::None)
    }

    pub fn as_str(&self) -> &str {
        match self {
            DigestAlg::None => "none",
            DigestAlg::Md5 => "md5",
            DigestAlg::Sha1 => "sha1",
            DigestAlg::Sha256_160 => "sha256-160",
        }
    }
}

/// Tagged digest
#[derive(Clone, Copy, Default)]
pub struct Checksum {
    alg: DigestAlg,
    data: [u8; MAX_CHECKSUM_LEN],
}

impl Checksum {
    pub const fn none() -> Self {
        Self {
            alg: DigestAlg::None,
            data: [0; MAX_CHECKSUM_LEN],
        }
    }

    /// Wrap raw digest bytes; `None` if the length does not fit the algorithm
    pub fn from_bytes(alg: DigestAlg, bytes: &[u8]) -> Option<Self> {
        if alg.is_none() || bytes.len() != alg.len() {
            return None;
        }
        let mut data = [0u8; MAX_CHECKSUM_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self { alg, data })
    }

    /// Digest `content` with `alg`
    pub fn compute(alg: DigestAlg, content: &[u8]) -> Self {
        let mut hasher = Hasher::new(alg);
        hasher.update(content);
        hasher.finish()
    }

    pub fn alg(&self) -> DigestAlg {
        self.alg
    }

    pub fn is_none(&self) -> bool {
        self.alg.is_none()
    }

    /// Digest bytes (empty for NONE)
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.alg.len()]
    }

    /// Reinterpret the same bytes under another algorithm of equal length
    ///
    /// Used to re-tag SHA1-encoded records as SHA256-160 for packages that
    /// declare it. Lengths that differ produce NONE.
    pub fn with_alg(self, alg: DigestAlg) -> Self {
        if alg.len() != self.alg.len() || alg.is_none() {
            return Self::none();
        }
        Self { alg, ..self }
    }

    /// Identity of the stored bytes, for keyed lookups
    ///
    /// Unlike `==` this treats two NONE checksums as the same key.
    pub(crate) fn key(&self) -> (DigestAlg, [u8; MAX_CHECKSUM_LEN]) {
        (self.alg, self.data)
    }

    /// Encode in the persisted text form; empty for NONE
    pub fn encode(&self) -> String {
        let mut buf = [0u8; 2 + MAX_CHECKSUM_LEN * 2];
        let mut w = WriteCursor::new(&mut buf);
        w.push_csum(self);
        w.pushed().to_string_lossy().into_owned()
    }

    /// Parse the persisted text form, which must be consumed entirely
    pub fn parse(text: &str) -> Option<Self> {
        let mut r = ReadCursor::new(text);
        let csum = r.pull_csum();
        if r.is_poisoned() || !r.is_empty() {
            return None;
        }
        Some(csum)
    }
}

impl PartialEq for Checksum {
    fn eq(&self, other: &Self) -> bool {
        !self.alg.is_none() && self.alg == other.alg && self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("Checksum(none)");
        }
        write!(f, "Checksum({}:{})", self.alg.as_str(), self.encode())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("-")
        } else {
            f.write_str(&self.encode())
        }
    }
}

/// Incremental digest over any supported algorithm
///
/// Implements [`io::Write`] so file content can be streamed in with
/// `io::copy`.
pub enum Hasher {
    None,
    Md5(Md5Context),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(alg: DigestAlg) -> Self {
        match alg {
            DigestAlg::None => Hasher::None,
            DigestAlg::Md5 => Hasher::Md5(Md5Context::new()),
            DigestAlg::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestAlg::Sha256_160 => Hasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::None => {}
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finish(self) -> Checksum {
        match self {
            Hasher::None => Checksum::none(),
            Hasher::Md5(ctx) => {
                Checksum::from_bytes(DigestAlg::Md5, &ctx.compute().0).unwrap_or_default()
            }
            Hasher::Sha1(h) => {
                Checksum::from_bytes(DigestAlg::Sha1, &h.finalize()).unwrap_or_default()
            }
            Hasher::Sha256(h) => {
                let full = h.finalize();
                Checksum::from_bytes(DigestAlg::Sha256_160, &full[..MAX_CHECKSUM_LEN])
                    .unwrap_or_default()
            }
        }
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_empty_vector() {
        let csum = Checksum::compute(DigestAlg::Md5, b"");
        assert_eq!(csum.encode(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_sha1_empty_vector() {
        let csum = Checksum::compute(DigestAlg::Sha1, b"");
        assert_eq!(csum.encode(), "Q12jmj7l5rSw0yVb/vlWAYkK/YBwk=");
    }

    #[test]
    fn test_sha256_160_is_truncated_sha256() {
        let csum = Checksum::compute(DigestAlg::Sha256_160, b"");
        // SHA256("") = e3b0c442 98fc1c14 9afbf4c8 996fb924 27ae41e4 ...
        assert_eq!(csum.as_bytes().len(), 20);
        assert_eq!(&csum.as_bytes()[..4], &[0xe3, 0xb0, 0xc4, 0x42]);
        assert_eq!(&csum.as_bytes()[16..], &[0x27, 0xae, 0x41, 0xe4]);
    }

    #[test]
    fn test_none_never_equal() {
        let none = Checksum::none();
        assert_ne!(none, none);
        assert_ne!(none, Checksum::compute(DigestAlg::Md5, b""));
        assert_eq!(none.key(), Checksum::none().key());
    }

    #[test]
    fn test_algorithm_is_part_of_identity() {
        let sha1 = Checksum::compute(DigestAlg::Sha1, b"data");
        let retagged = sha1.with_alg(DigestAlg::Sha256_160);
        assert_eq!(retagged.as_bytes(), sha1.as_bytes());
        assert_ne!(retagged, sha1);
        assert!(sha1.with_alg(DigestAlg::Md5).is_none());
    }

    #[test]
    fn test_from_bytes_checks_length() {
        assert!(Checksum::from_bytes(DigestAlg::Md5, &[0; 16]).is_some());
        assert!(Checksum::from_bytes(DigestAlg::Md5, &[0; 20]).is_none());
        assert!(Checksum::from_bytes(DigestAlg::None, &[]).is_none());
    }

    #[test]
    fn test_parse_requires_full_consumption() {
        let csum = Checksum::compute(DigestAlg::Sha1, b"abc");
        assert_eq!(Checksum::parse(&csum.encode()), Some(csum));
        assert!(Checksum::parse(&format!("{}x", csum.encode())).is_none());
        assert!(Checksum::parse("garbage").is_none());
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let content = b"The quick brown fox jumps over the lazy dog";
        for alg in [DigestAlg::Md5, DigestAlg::Sha1, DigestAlg::Sha256_160] {
            let mut hasher = Hasher::new(alg);
            let mut reader = &content[..];
            io::copy(&mut reader, &mut hasher).unwrap();
            assert_eq!(hasher.finish(), Checksum::compute(alg, content));
        }
    }
}
