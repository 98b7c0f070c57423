//! SHA-256 digests and the checksum sidecar format.
//!
//! The sidecar is a single `sha256sum`-compatible line:
//! `<64 hex digits>  <archive file name>`. A bare digest is accepted when
//! reading so that hand-written sidecars still verify.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::store::write_atomic;

const READ_BUFFER: usize = 64 * 1024;

/// A writer that hashes everything it forwards to `inner`.
#[derive(Debug)]
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Wrap `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Return the inner writer, the lowercase hex digest, and the byte count.
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.bytes)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hex SHA-256 of everything `reader` yields.
pub fn sha256_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of the file at `path`.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    sha256_reader(File::open(path)?)
}

/// Write the checksum sidecar for `archive_file_name`.
pub fn write_sidecar(path: &Path, digest: &str, archive_file_name: &str) -> io::Result<()> {
    write_atomic(path, format!("{digest}  {archive_file_name}\n").as_bytes())
}

/// Read the digest recorded in a checksum sidecar.
///
/// Returns `Ok(None)` when the sidecar does not exist. The digest is
/// returned as written (trimmed, lowercased); validation happens on compare.
pub fn read_sidecar(path: &Path) -> io::Result<Option<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(Some(
        content
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    ))
}

/// Compare two hex digests as raw bytes. Malformed input never matches.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    match (hex::decode(expected), hex::decode(actual)) {
        (Ok(a), Ok(b)) => a.len() == 32 && a == b,
        _ => false,
    }
}
