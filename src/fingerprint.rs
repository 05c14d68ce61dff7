//! Order-independent content fingerprints
//!
//! The remote dump of a node lists one record per line, but the order of
//! those lines is not stable between requests. To make two dumps of
//! unchanged content produce the same fingerprint, the lines are sorted
//! before hashing. Empty lines carry no content and are ignored.
//!
//! Fingerprints are SHA-256 digests rendered as 64 lowercase hex characters.

use crate::error::SourceError;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a fingerprint in hex characters
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Digest summarizing a node's full content
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a line-oriented dump
    ///
    /// # Example
    ///
    /// ```
    /// use node_backup::fingerprint::Fingerprint;
    ///
    /// let a = Fingerprint::of_records(b"/a\n/b\n/c\n");
    /// let b = Fingerprint::of_records(b"/c\n/a\n/b");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 64);
    /// ```
    pub fn of_records(dump: &[u8]) -> Self {
        let mut lines: Vec<&[u8]> = dump
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .collect();
        lines.sort_unstable();

        let mut hasher = Sha256::new();
        for line in lines {
            hasher.update(line);
            hasher.update(b"\n");
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Parse a stored hex digest
    pub fn from_hex(hex: &str) -> Result<Self, SourceError> {
        let hex = hex.trim();
        if hex.len() != FINGERPRINT_HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SourceError::InvalidDigest(hex.to_string()));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fingerprint::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_independent() {
        let a = Fingerprint::of_records(b"jcr:uuid=1\ntitle=Home\nmgnl:template=page\n");
        let b = Fingerprint::of_records(b"mgnl:template=page\r\njcr:uuid=1\r\ntitle=Home");
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_change_detected() {
        let a = Fingerprint::of_records(b"title=Home\n");
        let b = Fingerprint::of_records(b"title=Homepage\n");
        assert_ne!(a, b);

        // Joining two lines must not collide with a single line
        let joined = Fingerprint::of_records(b"ab\n");
        let split = Fingerprint::of_records(b"a\nb\n");
        assert_ne!(joined, split);
    }

    #[test]
    fn test_empty_dump() {
        let empty = Fingerprint::of_records(b"");
        assert_eq!(empty, Fingerprint::of_records(b"\n\n"));
        // SHA-256 of no input
        assert_eq!(
            empty.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_from_hex() {
        let fp = Fingerprint::of_records(b"x\n");
        let parsed = Fingerprint::from_hex(&fp.as_str().to_ascii_uppercase()).unwrap();
        assert_eq!(parsed, fp);

        assert!(Fingerprint::from_hex("").is_err());
        assert!(Fingerprint::from_hex("abc").is_err());
        assert!(Fingerprint::from_hex(&"z".repeat(FINGERPRINT_HEX_LEN)).is_err());
    }
}
