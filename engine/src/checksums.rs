//! Checksum computation for copy verification.
//!
//! This module provides:
//! - Cryptographic checksum algorithms (SHA-256, BLAKE3)
//! - Streaming digests over any reader, in fixed-size chunks
//!
//! A safe-mode move deletes its source only when the digest of the copy equals
//! the digest of the source, so only collision-resistant algorithms are offered.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Read buffer used when streaming a file through a hasher.
pub const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    #[default]
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "Invalid hash algorithm '{}'. Must be 'sha256' or 'blake3'",
                other
            )),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    /// Create a new checksum value
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    /// Get the algorithm
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Get the hex string representation
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Trait for computing checksums incrementally
pub trait ChecksumHasher: Send {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the checksum value
    fn finalize(self: Box<Self>) -> ChecksumValue;
}

/// SHA-256 hasher (backed by sha2 crate)
struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl Sha256Hasher {
    fn new() -> Self {
        Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }
    }
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

/// BLAKE3 hasher (backed by blake3 crate)
struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl Blake3Hasher {
    fn new() -> Self {
        Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }
    }
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Blake3, digest.to_hex().to_string())
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher::new()),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher::new()),
    }
}

/// Stream a reader through a hasher in `DIGEST_CHUNK_SIZE` chunks.
pub fn compute_reader_checksum<R: Read + ?Sized>(
    reader: &mut R,
    algorithm: ChecksumAlgorithm,
) -> io::Result<ChecksumValue> {
    let mut hasher = create_hasher(algorithm);
    let mut buffer = vec![0u8; DIGEST_CHUNK_SIZE];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(hasher.finalize())
}

/// Compute checksum for a file on the local disk
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<ChecksumValue, EngineError> {
    let mut file = std::fs::File::open(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    compute_reader_checksum(&mut file, algorithm).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_algorithm_display() {
        assert_eq!(ChecksumAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(ChecksumAlgorithm::Blake3.to_string(), "blake3");
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("sha256".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha256));
        assert_eq!("BLAKE3".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Blake3));
        assert!("md5".parse::<ChecksumAlgorithm>().is_err());
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_sha256_hasher() {
        let mut hasher = create_hasher(ChecksumAlgorithm::Sha256);
        hasher.update(b"hello");
        let checksum = hasher.finalize();
        assert_eq!(checksum.algorithm(), ChecksumAlgorithm::Sha256);
        assert_eq!(
            checksum.hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_blake3_hasher_matches_one_shot() {
        let mut hasher = create_hasher(ChecksumAlgorithm::Blake3);
        hasher.update(b"hel");
        hasher.update(b"lo");
        let checksum = hasher.finalize();
        assert_eq!(checksum.algorithm(), ChecksumAlgorithm::Blake3);
        assert_eq!(checksum.hex(), blake3::hash(b"hello").to_hex().as_str());
    }

    #[test]
    fn test_checksum_value_display() {
        let cs = ChecksumValue::new(ChecksumAlgorithm::Sha256, "abc123".to_string());
        assert_eq!(cs.to_string(), "abc123");
    }

    #[test]
    fn test_checksum_values_key_a_set() {
        let mut seen = std::collections::HashSet::new();
        seen.insert(ChecksumValue::new(ChecksumAlgorithm::Sha256, "ab".to_string()));
        seen.insert(ChecksumValue::new(ChecksumAlgorithm::Blake3, "ab".to_string()));
        seen.insert(ChecksumValue::new(ChecksumAlgorithm::Sha256, "ab".to_string()));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_file_checksum_spans_multiple_chunks() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("video.mp4");
        let content: Vec<u8> = (0..(DIGEST_CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).expect("Failed to write file");

        let checksum = compute_file_checksum(&path, ChecksumAlgorithm::Blake3)
            .expect("Checksum should succeed");
        assert_eq!(checksum.hex(), blake3::hash(&content).to_hex().as_str());
    }

    #[test]
    fn test_identical_files_share_digest() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a.jpg");
        let b = temp_dir.path().join("b.jpg");
        let c = temp_dir.path().join("c.jpg");
        fs::write(&a, b"identical content").expect("Failed to write a");
        fs::write(&b, b"identical content").expect("Failed to write b");
        fs::write(&c, b"different content").expect("Failed to write c");

        let digest_a = compute_file_checksum(&a, ChecksumAlgorithm::Sha256).expect("digest a");
        let digest_b = compute_file_checksum(&b, ChecksumAlgorithm::Sha256).expect("digest b");
        let digest_c = compute_file_checksum(&c, ChecksumAlgorithm::Sha256).expect("digest c");

        assert_eq!(digest_a, digest_b);
        assert_ne!(digest_a, digest_c);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = compute_file_checksum(&temp_dir.path().join("missing"), ChecksumAlgorithm::Blake3);
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
    }
}
