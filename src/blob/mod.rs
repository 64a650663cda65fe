// src/blob/mod.rs

//! Bounded byte views
//!
//! A [`Blob`] is a borrowed, length-bounded view over bytes owned by someone
//! else (a line of the installed database, a path, a package name). It can
//! also be *null*, which is distinct from empty: codec operations produce a
//! null blob when they fail and every later operation passes it through.
//!
//! This module also carries the byte classification tables used for
//! `spn`/`cspn` style scanning and the MurmurHash3 function used by every
//! hash index in the database.

pub mod cursor;

pub use cursor::{ReadCursor, WriteCursor};

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

/// Seed used by [`Blob::hash`]
pub const DEFAULT_HASH_SEED: u32 = 5381;

/// A 256-bit membership table, one bit per byte value
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ByteClass([u8; 32]);

impl ByteClass {
    /// Class with no members
    pub const EMPTY: ByteClass = ByteClass([0; 32]);

    /// Build a class from an explicit list of member bytes
    pub const fn from_bytes(set: &[u8]) -> Self {
        let mut bits = [0u8; 32];
        let mut i = 0;
        while i < set.len() {
            let b = set[i];
            bits[(b >> 3) as usize] |= 1 << (b & 7);
            i += 1;
        }
        Self(bits)
    }

    /// Build a class from an inclusive byte range
    pub const fn from_range(lo: u8, hi: u8) -> Self {
        let mut bits = [0u8; 32];
        let mut b = lo as usize;
        while b <= hi as usize {
            bits[b >> 3] |= 1 << (b & 7);
            b += 1;
        }
        Self(bits)
    }

    pub const fn union(self, other: ByteClass) -> Self {
        let mut bits = self.0;
        let mut i = 0;
        while i < 32 {
            bits[i] |= other.0[i];
            i += 1;
        }
        Self(bits)
    }

    pub const fn invert(self) -> Self {
        let mut bits = self.0;
        let mut i = 0;
        while i < 32 {
            bits[i] = !bits[i];
            i += 1;
        }
        Self(bits)
    }

    #[inline]
    pub const fn contains(&self, b: u8) -> bool {
        self.0[(b >> 3) as usize] & (1 << (b & 7)) != 0
    }
}

impl fmt::Debug for ByteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<u8> = (0..=255u8).filter(|b| self.contains(*b)).collect();
        write!(f, "ByteClass({:?})", String::from_utf8_lossy(&members))
    }
}

/// ASCII decimal digits
pub const DIGITS: ByteClass = ByteClass::from_range(b'0', b'9');

/// ASCII hexadecimal digits, both cases
pub const HEX_DIGITS: ByteClass = DIGITS
    .union(ByteClass::from_range(b'a', b'f'))
    .union(ByteClass::from_range(b'A', b'F'));

/// Field separators in package records
pub const WHITESPACE: ByteClass = ByteClass::from_bytes(b" \t\r\n");

/// Bytes that end the name part of a dependency string
pub const DEPENDENCY_NAME_END: ByteClass = ByteClass::from_bytes(b"<>=~@ \t\r\n");

/// Version comparison operator bytes
pub const DEPENDENCY_OPERATOR: ByteClass = ByteClass::from_bytes(b"<>=~");

/// Borrowed byte view with a null sentinel
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blob<'a> {
    data: Option<&'a [u8]>,
}

impl<'a> Blob<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data: Some(data) }
    }

    /// The null blob: "no value", as opposed to an empty value
    pub const fn null() -> Self {
        Self { data: None }
    }

    pub const fn is_null(&self) -> bool {
        self.data.is_none()
    }

    /// Length in bytes (zero for null)
    pub fn len(&self) -> usize {
        self.data.map_or(0, <[u8]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The viewed bytes; null views as an empty slice
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data.unwrap_or(&[])
    }

    /// The viewed bytes, or `None` for the null blob
    pub fn get(&self) -> Option<&'a [u8]> {
        self.data
    }

    /// Split around the leftmost occurrence of `separator`
    ///
    /// Returns `None` for a null blob, an empty separator or no match.
    pub fn split(&self, separator: &[u8]) -> Option<(Blob<'a>, Blob<'a>)> {
        let data = self.data?;
        if separator.is_empty() || separator.len() > data.len() {
            return None;
        }
        let pos = data
            .windows(separator.len())
            .position(|window| window == separator)?;
        Some((
            Blob::new(&data[..pos]),
            Blob::new(&data[pos + separator.len()..]),
        ))
    }

    /// Split around the rightmost occurrence of `separator`
    pub fn rsplit(&self, separator: u8) -> Option<(Blob<'a>, Blob<'a>)> {
        let data = self.data?;
        let pos = data.iter().rposition(|&b| b == separator)?;
        Some((Blob::new(&data[..pos]), Blob::new(&data[pos + 1..])))
    }

    /// Split off the leading run of bytes that are members of `accept`
    ///
    /// Returns `None` when no boundary exists: the blob is null, empty, or
    /// made up entirely of accepted bytes.
    pub fn spn(&self, accept: &ByteClass) -> Option<(Blob<'a>, Blob<'a>)> {
        let data = self.data?;
        let pos = data.iter().position(|&b| !accept.contains(b))?;
        Some(self.split_at(pos))
    }

    /// Split off the leading run of bytes that are *not* members of `reject`
    ///
    /// Returns `None` when no rejected byte occurs.
    pub fn cspn(&self, reject: &ByteClass) -> Option<(Blob<'a>, Blob<'a>)> {
        let data = self.data?;
        let pos = data.iter().position(|&b| reject.contains(b))?;
        Some(self.split_at(pos))
    }

    fn split_at(&self, pos: usize) -> (Blob<'a>, Blob<'a>) {
        let data = self.as_bytes();
        (Blob::new(&data[..pos]), Blob::new(&data[pos..]))
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.as_bytes().starts_with(prefix)
    }

    pub fn ends_with(&self, suffix: &[u8]) -> bool {
        self.as_bytes().ends_with(suffix)
    }

    /// Order by length first, then bytes
    pub fn compare(&self, other: &Blob<'_>) -> Ordering {
        self.len()
            .cmp(&other.len())
            .then_with(|| self.as_bytes().cmp(other.as_bytes()))
    }

    /// Order by bytes over the common length, then by length
    pub fn sort_compare(&self, other: &Blob<'_>) -> Ordering {
        let common = self.len().min(other.len());
        self.as_bytes()[..common]
            .cmp(&other.as_bytes()[..common])
            .then_with(|| self.len().cmp(&other.len()))
    }

    pub fn hash_seed(&self, seed: u32) -> u32 {
        murmur3_32(self.as_bytes(), seed)
    }

    pub fn hash(&self) -> u32 {
        self.hash_seed(DEFAULT_HASH_SEED)
    }

    /// Iterate the pieces between occurrences of `separator`
    ///
    /// Interior empty pieces are yielded; a trailing empty piece is not.
    pub fn segments<'s>(&self, separator: &'s [u8]) -> Segments<'a, 's> {
        Segments {
            rest: self.data.map(Blob::new),
            separator,
        }
    }

    /// Strip ASCII whitespace from both ends
    pub fn trim(&self) -> Blob<'a> {
        match self.data {
            Some(data) => Blob::new(data.trim_ascii()),
            None => Blob::null(),
        }
    }

    pub fn to_string_lossy(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl<'a> From<&'a [u8]> for Blob<'a> {
    fn from(data: &'a [u8]) -> Self {
        Blob::new(data)
    }
}

impl<'a> From<&'a str> for Blob<'a> {
    fn from(data: &'a str) -> Self {
        Blob::new(data.as_bytes())
    }
}

impl AsRef<[u8]> for Blob<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for Blob<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data {
            Some(data) => write!(f, "Blob({:?})", String::from_utf8_lossy(data)),
            None => f.write_str("Blob(null)"),
        }
    }
}

/// Iterator returned by [`Blob::segments`]
pub struct Segments<'a, 's> {
    rest: Option<Blob<'a>>,
    separator: &'s [u8],
}

impl<'a> Iterator for Segments<'a, '_> {
    type Item = Blob<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        match rest.split(self.separator) {
            Some((piece, tail)) => {
                self.rest = Some(tail);
                Some(piece)
            }
            None => {
                self.rest = None;
                (!rest.is_empty()).then_some(rest)
            }
        }
    }
}

/// MurmurHash3, x86 32-bit variant
fn murmur3_32(key: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut blocks = key.chunks_exact(4);
    for block in &mut blocks {
        let mut k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    let mut k: u32 = 0;
    if tail.len() >= 3 {
        k ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        k ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        k ^= u32::from(tail[0]);
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        h ^= k;
    }

    h ^= key.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
