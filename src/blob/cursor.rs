// src/blob/cursor.rs

//! Push/pull cursors over blobs
//!
//! [`WriteCursor`] appends into a fixed buffer and [`ReadCursor`] consumes an
//! input blob. Both poison on failure: an overflowing push or a malformed pull
//! puts the cursor into a terminal state where every later operation is a
//! no-op. Callers chain operations and check the state once at the end.

use super::Blob;
use crate::checksum::{Checksum, DigestAlg, MAX_CHECKSUM_LEN};
use crate::error::{Error, Result};
use std::fmt;

const INVALID: u8 = 0xff;

const DIGIT_CHARS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

const B64_ENCODE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const fn build_digit_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < 10 {
        table[b'0' as usize + i] = i as u8;
        i += 1;
    }
    let mut i = 0;
    while i < 26 {
        table[b'a' as usize + i] = 10 + i as u8;
        table[b'A' as usize + i] = 10 + i as u8;
        i += 1;
    }
    table
}

const fn build_hex_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < 10 {
        table[b'0' as usize + i] = i as u8;
        i += 1;
    }
    let mut i = 0;
    while i < 6 {
        table[b'a' as usize + i] = 10 + i as u8;
        table[b'A' as usize + i] = 10 + i as u8;
        i += 1;
    }
    table
}

const fn build_b64_table() -> [u8; 256] {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < 64 {
        table[B64_ENCODE[i] as usize] = i as u8;
        i += 1;
    }
    // Padding decodes as zero; its placement is checked separately
    table[b'=' as usize] = 0;
    table
}

static DIGIT_DECODE: [u8; 256] = build_digit_table();
static HEX_DECODE: [u8; 256] = build_hex_table();
static B64_DECODE: [u8; 256] = build_b64_table();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Live(usize),
    Poisoned,
}

/// Append-only cursor over a fixed output buffer
pub struct WriteCursor<'a> {
    buf: &'a mut [u8],
    state: WriteState,
}

impl<'a> WriteCursor<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            state: WriteState::Live(0),
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.state == WriteState::Poisoned
    }

    /// Bytes still available; zero once poisoned
    pub fn remaining(&self) -> usize {
        match self.state {
            WriteState::Live(pos) => self.buf.len() - pos,
            WriteState::Poisoned => 0,
        }
    }

    /// The written prefix, or the null blob if the cursor is poisoned
    pub fn pushed(&self) -> Blob<'_> {
        match self.state {
            WriteState::Live(pos) => Blob::new(&self.buf[..pos]),
            WriteState::Poisoned => Blob::null(),
        }
    }

    /// Number of bytes written, or an overflow error naming `what`
    pub fn finish(self, what: &'static str) -> Result<usize> {
        match self.state {
            WriteState::Live(pos) => Ok(pos),
            WriteState::Poisoned => Err(Error::Overflow(what)),
        }
    }

    fn poison(&mut self) {
        self.state = WriteState::Poisoned;
    }

    /// Claim `n` bytes of output, poisoning if they do not fit
    fn reserve(&mut self, n: usize) -> Option<&mut [u8]> {
        let pos = match self.state {
            WriteState::Live(pos) => pos,
            WriteState::Poisoned => return None,
        };
        if self.buf.len() - pos < n {
            self.poison();
            return None;
        }
        self.state = WriteState::Live(pos + n);
        Some(&mut self.buf[pos..pos + n])
    }

    pub fn push_blob(&mut self, literal: impl AsRef<[u8]>) -> &mut Self {
        let literal = literal.as_ref();
        if let Some(dst) = self.reserve(literal.len()) {
            dst.copy_from_slice(literal);
        }
        self
    }

    pub fn push_char(&mut self, ch: u8) -> &mut Self {
        if let Some(dst) = self.reserve(1) {
            dst[0] = ch;
        }
        self
    }

    /// Push `value` in `radix` (2..=36) using lowercase digits
    pub fn push_uint(&mut self, value: u64, radix: u32) -> &mut Self {
        if !(2..=36).contains(&radix) {
            self.poison();
            return self;
        }
        let mut digits = [0u8; 64];
        let mut start = digits.len();
        let mut value = value;
        loop {
            start -= 1;
            digits[start] = DIGIT_CHARS[(value % u64::from(radix)) as usize];
            value /= u64::from(radix);
            if value == 0 {
                break;
            }
        }
        self.push_blob(&digits[start..])
    }

    /// Push a checksum in its persisted form
    ///
    /// MD5 is written as bare hex. SHA1-sized digests (SHA1 and SHA256-160)
    /// are written as `Q1` followed by base64. A NONE checksum has no
    /// encoding and poisons the cursor.
    pub fn push_csum(&mut self, csum: &Checksum) -> &mut Self {
        match csum.alg() {
            DigestAlg::Md5 => self.push_hexdump(csum.as_bytes()),
            DigestAlg::Sha1 | DigestAlg::Sha256_160 => {
                self.push_blob(b"Q1").push_base64(csum.as_bytes())
            }
            DigestAlg::None => {
                self.poison();
                self
            }
        }
    }

    /// Standard base64 with `=` padding
    pub fn push_base64(&mut self, binary: &[u8]) -> &mut Self {
        let needed = binary.len().div_ceil(3) * 4;
        if let Some(dst) = self.reserve(needed) {
            for (src, out) in binary.chunks(3).zip(dst.chunks_exact_mut(4)) {
                let b0 = src[0];
                let b1 = src.get(1).copied().unwrap_or(0);
                let b2 = src.get(2).copied().unwrap_or(0);
                out[0] = B64_ENCODE[(b0 >> 2) as usize];
                out[1] = B64_ENCODE[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize];
                out[2] = if src.len() < 2 {
                    b'='
                } else {
                    B64_ENCODE[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize]
                };
                out[3] = if src.len() < 3 {
                    b'='
                } else {
                    B64_ENCODE[(b2 & 0x3f) as usize]
                };
            }
        }
        self
    }

    /// Two lowercase hex digits per byte
    pub fn push_hexdump(&mut self, binary: &[u8]) -> &mut Self {
        if let Some(dst) = self.reserve(binary.len() * 2) {
            for (byte, out) in binary.iter().zip(dst.chunks_exact_mut(2)) {
                out[0] = DIGIT_CHARS[(byte >> 4) as usize];
                out[1] = DIGIT_CHARS[(byte & 0x0f) as usize];
            }
        }
        self
    }

    /// Push formatted text, e.g. `w.push_fmt(format_args!("{}-{}", name, version))`
    pub fn push_fmt(&mut self, args: fmt::Arguments<'_>) -> &mut Self {
        // An error here only means the cursor poisoned part way through
        let _ = fmt::Write::write_fmt(self, args);
        self
    }
}

impl fmt::Write for WriteCursor<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_blob(s);
        if self.is_poisoned() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

/// Consume-only cursor over an input blob
#[derive(Debug, Clone, Copy)]
pub struct ReadCursor<'a> {
    data: Blob<'a>,
}

impl<'a> ReadCursor<'a> {
    pub fn new(input: impl Into<Blob<'a>>) -> Self {
        Self { data: input.into() }
    }

    pub fn is_poisoned(&self) -> bool {
        self.data.is_null()
    }

    /// True when nothing is left to read (also true when poisoned)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Unconsumed input, or the null blob once poisoned
    pub fn remaining(&self) -> Blob<'a> {
        self.data
    }

    fn poison(&mut self) {
        self.data = Blob::null();
    }

    fn advance(&mut self, n: usize) {
        if let Some(bytes) = self.data.get() {
            self.data = Blob::new(&bytes[n..]);
        }
    }

    /// Consume one byte that must equal `expected`
    pub fn pull_char(&mut self, expected: u8) -> &mut Self {
        match self.data.get() {
            Some([first, ..]) if *first == expected => self.advance(1),
            Some(_) => self.poison(),
            None => {}
        }
        self
    }

    /// Consume digits in `radix`, stopping at the first non-digit
    ///
    /// Overflow saturates at `u64::MAX` without poisoning.
    pub fn pull_uint(&mut self, radix: u32) -> u64 {
        let bytes = self.data.as_bytes();
        let mut value: u64 = 0;
        let mut used = 0;
        for &b in bytes {
            if b == 0 {
                break;
            }
            let digit = u32::from(DIGIT_DECODE[b as usize]);
            if digit >= radix {
                break;
            }
            value = value
                .saturating_mul(u64::from(radix))
                .saturating_add(u64::from(digit));
            used += 1;
        }
        self.advance(used);
        value
    }

    /// Consume a checksum in either the legacy or the tagged encoding
    ///
    /// A leading hex digit means legacy bare-hex MD5. Otherwise the first two
    /// bytes are `<encoding><algorithm>`: encoding `X` (hex) or `Q` (base64),
    /// algorithm `1` (SHA1). Anything else poisons the cursor and yields a
    /// NONE checksum.
    pub fn pull_csum(&mut self) -> Checksum {
        let bytes = match self.data.get() {
            Some(bytes) if bytes.len() >= 2 => bytes,
            _ => {
                self.poison();
                return Checksum::none();
            }
        };

        let mut buf = [0u8; MAX_CHECKSUM_LEN];
        if HEX_DECODE[bytes[0] as usize] != INVALID {
            let len = DigestAlg::Md5.len();
            self.pull_hexdump(&mut buf[..len]);
            return self.checksum_or_none(DigestAlg::Md5, &buf[..len]);
        }

        let encoding = bytes[0];
        let alg = match bytes[1] {
            b'1' => DigestAlg::Sha1,
            _ => {
                self.poison();
                return Checksum::none();
            }
        };
        self.advance(2);

        let len = alg.len();
        match encoding {
            b'X' => {
                self.pull_hexdump(&mut buf[..len]);
            }
            b'Q' => {
                self.pull_base64(&mut buf[..len]);
            }
            _ => self.poison(),
        }
        self.checksum_or_none(alg, &buf[..len])
    }

    fn checksum_or_none(&self, alg: DigestAlg, bytes: &[u8]) -> Checksum {
        if self.is_poisoned() {
            return Checksum::none();
        }
        Checksum::from_bytes(alg, bytes).unwrap_or_default()
    }

    /// Decode `dst.len()` bytes of hex into `dst`
    pub fn pull_hexdump(&mut self, dst: &mut [u8]) -> &mut Self {
        let src = match self.data.get() {
            Some(src) if src.len() >= dst.len() * 2 => src,
            Some(_) => {
                self.poison();
                return self;
            }
            None => return self,
        };

        let mut acc = 0u8;
        for (out, pair) in dst.iter_mut().zip(src.chunks_exact(2)) {
            let hi = HEX_DECODE[pair[0] as usize];
            let lo = HEX_DECODE[pair[1] as usize];
            acc |= hi | lo;
            *out = (hi << 4) | (lo & 0x0f);
        }
        if acc == INVALID {
            self.poison();
        } else {
            self.advance(dst.len() * 2);
        }
        self
    }

    /// Decode base64 into `dst`, which fixes the number of input groups
    pub fn pull_base64(&mut self, dst: &mut [u8]) -> &mut Self {
        let needed = dst.len().div_ceil(3) * 4;
        let src = match self.data.get() {
            Some(src) if src.len() >= needed => src,
            Some(_) => {
                self.poison();
                return self;
            }
            None => return self,
        };

        let full = dst.len() / 3;
        let mut acc = 0u8;
        for (out, group) in dst[..full * 3]
            .chunks_exact_mut(3)
            .zip(src.chunks_exact(4))
        {
            let t = [
                B64_DECODE[group[0] as usize],
                B64_DECODE[group[1] as usize],
                B64_DECODE[group[2] as usize],
                B64_DECODE[group[3] as usize],
            ];
            acc |= t[0] | t[1] | t[2] | t[3];
            out[0] = (t[0] << 2) | (t[1] >> 4);
            out[1] = (t[1] << 4) | (t[2] >> 2);
            out[2] = ((t[2] << 6) & 0xc0) | t[3];
        }
        if acc == INVALID {
            self.poison();
            return self;
        }

        let rest = dst.len() - full * 3;
        if rest != 0 && !pull_b64_tail(&mut dst[full * 3..], &src[full * 4..full * 4 + 4]) {
            self.poison();
            return self;
        }

        self.advance(needed);
        self
    }

    /// Consume `literal` if the input starts with it
    pub fn pull_blob_match(&mut self, literal: &[u8]) -> bool {
        if !self.data.starts_with(literal) || self.is_poisoned() {
            return false;
        }
        self.advance(literal.len());
        true
    }

    /// Consume up to and including `separator`, returning the bytes before it
    ///
    /// Without a separator the rest of the input is returned.
    pub fn pull_until(&mut self, separator: u8) -> Blob<'a> {
        let data = self.data;
        match data.split(&[separator]) {
            Some((head, tail)) => {
                self.data = tail;
                head
            }
            None => {
                self.advance(data.len());
                data
            }
        }
    }
}

/// Decode a final, padded base64 group into one or two bytes
fn pull_b64_tail(dst: &mut [u8], group: &[u8]) -> bool {
    let t = [
        B64_DECODE[group[0] as usize],
        B64_DECODE[group[1] as usize],
        B64_DECODE[group[2] as usize],
        B64_DECODE[group[3] as usize],
    ];
    if (t[0] | t[1] | t[2] | t[3]) == INVALID {
        return false;
    }
    dst[0] = (t[0] << 2) | (t[1] >> 4);
    if dst.len() > 1 {
        dst[1] = (t[1] << 4) | (t[2] >> 2);
    } else if group[2] != b'=' {
        return false;
    }
    group[3] == b'='
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_on_overflow_is_sticky() {
        let mut buf = [0u8; 4];
        let mut w = WriteCursor::new(&mut buf);
        w.push_blob(b"12345678");
        assert!(w.is_poisoned());
        w.push_blob(b"a").push_uint(7, 10).push_char(b'x');
        assert!(w.is_poisoned());
        assert!(w.pushed().is_null());
        assert!(matches!(w.finish("test"), Err(Error::Overflow("test"))));
    }

    #[test]
    fn test_exact_fit_does_not_poison() {
        let mut buf = [0u8; 4];
        let mut w = WriteCursor::new(&mut buf);
        w.push_blob(b"ab").push_blob(b"cd");
        assert!(!w.is_poisoned());
        assert_eq!(w.pushed().as_bytes(), b"abcd");
        assert_eq!(w.remaining(), 0);
    }

    #[test]
    fn test_push_uint_radix() {
        let mut buf = [0u8; 64];
        let mut w = WriteCursor::new(&mut buf);
        w.push_uint(0, 10)
            .push_char(b' ')
            .push_uint(1234, 10)
            .push_char(b' ')
            .push_uint(0o755, 8)
            .push_char(b' ')
            .push_uint(0xbeef, 16)
            .push_char(b' ')
            .push_uint(35, 36);
        assert_eq!(w.pushed().as_bytes(), b"0 1234 755 beef z");
    }

    #[test]
    fn test_pull_uint_stops_at_non_digit() {
        let mut r = ReadCursor::new("755:rest");
        assert_eq!(r.pull_uint(8), 0o755);
        assert_eq!(r.remaining().as_bytes(), b":rest");
        assert!(!r.is_poisoned());

        let mut r = ReadCursor::new("19");
        assert_eq!(r.pull_uint(8), 1);
        assert_eq!(r.remaining().as_bytes(), b"9");
    }

    #[test]
    fn test_pull_uint_saturates() {
        let mut r = ReadCursor::new("99999999999999999999999999");
        assert_eq!(r.pull_uint(10), u64::MAX);
        assert!(r.is_empty());
        assert!(!r.is_poisoned());
    }

    #[test]
    fn test_pull_char() {
        let mut r = ReadCursor::new("a:b");
        r.pull_char(b'a').pull_char(b':');
        assert_eq!(r.remaining().as_bytes(), b"b");
        r.pull_char(b'x');
        assert!(r.is_poisoned());
        r.pull_char(b'b');
        assert!(r.is_poisoned());
    }

    #[test]
    fn test_base64_padding_lengths() {
        let cases: [(&[u8], &str); 4] = [
            (b"f", "Zg=="),
            (b"fo", "Zm8="),
            (b"foo", "Zm9v"),
            (b"foobar", "Zm9vYmFy"),
        ];
        for (binary, encoded) in cases {
            let mut buf = [0u8; 16];
            let mut w = WriteCursor::new(&mut buf);
            w.push_base64(binary);
            assert_eq!(w.pushed().as_bytes(), encoded.as_bytes());

            let mut out = vec![0u8; binary.len()];
            let mut r = ReadCursor::new(encoded);
            r.pull_base64(&mut out);
            assert!(!r.is_poisoned(), "decoding {encoded}");
            assert_eq!(out, binary);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn test_base64_rejects_bad_input() {
        let mut out = [0u8; 3];
        let mut r = ReadCursor::new("Zm9*");
        r.pull_base64(&mut out);
        assert!(r.is_poisoned());

        // one byte of payload needs two padding characters
        let mut out = [0u8; 1];
        let mut r = ReadCursor::new("Zg=x");
        r.pull_base64(&mut out);
        assert!(r.is_poisoned());

        let mut out = [0u8; 6];
        let mut r = ReadCursor::new("Zm9v");
        r.pull_base64(&mut out);
        assert!(r.is_poisoned());
    }

    #[test]
    fn test_hexdump_round_trip_and_errors() {
        let mut buf = [0u8; 8];
        let mut w = WriteCursor::new(&mut buf);
        w.push_hexdump(&[0xde, 0xad, 0x01, 0xff]);
        assert_eq!(w.pushed().as_bytes(), b"dead01ff");

        let mut out = [0u8; 4];
        let mut r = ReadCursor::new("DEAD01ffzz");
        r.pull_hexdump(&mut out);
        assert_eq!(out, [0xde, 0xad, 0x01, 0xff]);
        assert_eq!(r.remaining().as_bytes(), b"zz");

        let mut out = [0u8; 2];
        let mut r = ReadCursor::new("0g00");
        r.pull_hexdump(&mut out);
        assert!(r.is_poisoned());

        let mut r = ReadCursor::new("00");
        r.pull_hexdump(&mut out);
        assert!(r.is_poisoned());
    }

    #[test]
    fn test_pull_legacy_md5() {
        let mut r = ReadCursor::new("d41d8cd98f00b204e9800998ecf8427e");
        let csum = r.pull_csum();
        assert_eq!(csum.alg(), DigestAlg::Md5);
        assert_eq!(csum, Checksum::compute(DigestAlg::Md5, b""));
        assert!(r.is_empty());
        assert!(!r.is_poisoned());
    }

    #[test]
    fn test_pull_tagged_sha1() {
        let mut r = ReadCursor::new("Q1XUFAKQgQw21jkGwXAZZ6ipO6rUs= trailing");
        let csum = r.pull_csum();
        assert_eq!(csum.alg(), DigestAlg::Sha1);
        assert_eq!(r.remaining().as_bytes(), b" trailing");

        let mut r = ReadCursor::new("Q12jmj7l5rSw0yVb/vlWAYkK/YBwk=");
        assert_eq!(r.pull_csum(), Checksum::compute(DigestAlg::Sha1, b""));
    }

    #[test]
    fn test_pull_hex_tagged_sha1() {
        let mut r = ReadCursor::new("X1da39a3ee5e6b4b0d3255bfef95601890afd80709");
        let csum = r.pull_csum();
        assert_eq!(csum, Checksum::compute(DigestAlg::Sha1, b""));
        assert!(r.is_empty());
    }

    #[test]
    fn test_unknown_checksum_encoding_poisons() {
        for input in ["Q2AAAA", "Z1AAAA", "x", ""] {
            let mut r = ReadCursor::new(input);
            let csum = r.pull_csum();
            assert_eq!(csum.alg(), DigestAlg::None, "input {input:?}");
            assert!(r.is_poisoned(), "input {input:?}");
        }
    }

    #[test]
    fn test_push_csum_forms() {
        let md5 = Checksum::compute(DigestAlg::Md5, b"");
        let sha1 = Checksum::compute(DigestAlg::Sha1, b"");
        let mut buf = [0u8; 128];
        let mut w = WriteCursor::new(&mut buf);
        w.push_csum(&md5).push_char(b' ').push_csum(&sha1);
        assert_eq!(
            w.pushed().as_bytes(),
            b"d41d8cd98f00b204e9800998ecf8427e Q12jmj7l5rSw0yVb/vlWAYkK/YBwk="
        );

        let mut w = WriteCursor::new(&mut buf);
        w.push_csum(&Checksum::none());
        assert!(w.is_poisoned());
    }

    #[test]
    fn test_checksum_round_trip_through_cursors() {
        let sha = Checksum::compute(DigestAlg::Sha1, b"hello world");
        let mut buf = [0u8; 64];
        let mut w = WriteCursor::new(&mut buf);
        w.push_csum(&sha);
        let encoded = w.pushed().as_bytes().to_vec();
        let mut r = ReadCursor::new(encoded.as_slice());
        assert_eq!(r.pull_csum(), sha);
    }

    #[test]
    fn test_pull_blob_match() {
        let mut r = ReadCursor::new("P:busybox");
        assert!(!r.pull_blob_match(b"V:"));
        assert!(r.pull_blob_match(b"P:"));
        assert_eq!(r.remaining().as_bytes(), b"busybox");
    }

    #[test]
    fn test_pull_until() {
        let mut r = ReadCursor::new("0:0:755");
        assert_eq!(r.pull_until(b':').as_bytes(), b"0");
        assert_eq!(r.pull_until(b':').as_bytes(), b"0");
        assert_eq!(r.pull_until(b':').as_bytes(), b"755");
        assert!(r.is_empty());
    }

    #[test]
    fn test_push_fmt() {
        let mut buf = [0u8; 16];
        let mut w = WriteCursor::new(&mut buf);
        w.push_fmt(format_args!("{}-{}", "musl", "1.2.4"));
        assert_eq!(w.pushed().as_bytes(), b"musl-1.2.4");

        let mut small = [0u8; 4];
        let mut w = WriteCursor::new(&mut small);
        w.push_fmt(format_args!("{}", "too long"));
        assert!(w.is_poisoned());
    }
}
