//! Post-completion checksum verification (C12).
//!
//! Hashing runs on demand against the finished file, never inline with the
//! segment transfer loop — competing with an active download for disk I/O
//! just to verify bytes that already landed would only slow the download
//! down for no benefit.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const READ_CHUNK: usize = 64 * 1024;

/// Outcome of comparing a file's digest against an expected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Match { digest: String },
    Mismatch { expected: String, actual: String },
}

impl VerifyOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, VerifyOutcome::Match { .. })
    }
}

/// Hashes `path` in bounded-memory chunks, returning lowercase hex SHA-256.
pub fn sha256_path(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes `path` and compares it against `expected`, case-insensitively —
/// published digests are conventionally lowercase but callers (e.g. a CLI
/// flag pasted from a release page) shouldn't have to normalize first.
pub fn verify(path: &Path, expected: &str) -> Result<VerifyOutcome> {
    let actual = sha256_path(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(VerifyOutcome::Match { digest: actual })
    } else {
        Ok(VerifyOutcome::Mismatch { expected: expected.to_string(), actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EMPTY_DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const HELLO_DIGEST: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    #[test]
    fn sha256_path_empty_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(sha256_path(f.path()).unwrap(), EMPTY_DIGEST);
    }

    #[test]
    fn sha256_path_known_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        assert_eq!(sha256_path(f.path()).unwrap(), HELLO_DIGEST);
    }

    #[test]
    fn verify_matches_regardless_of_case() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let outcome = verify(f.path(), &EMPTY_DIGEST.to_uppercase()).unwrap();
        assert_eq!(outcome, VerifyOutcome::Match { digest: EMPTY_DIGEST.to_string() });
        assert!(outcome.is_match());
    }

    #[test]
    fn verify_reports_mismatch() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let outcome = verify(f.path(), EMPTY_DIGEST).unwrap();
        assert_eq!(outcome, VerifyOutcome::Mismatch { expected: EMPTY_DIGEST.to_string(), actual: HELLO_DIGEST.to_string() });
        assert!(!outcome.is_match());
    }
}
