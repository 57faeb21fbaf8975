//! Content digests using SHA-256.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Digest size in bytes (SHA-256 produces 256-bit digests).
pub const DIGEST_SIZE: usize = 32;

/// Length of the hex form of a digest.
pub const DIGEST_HEX_LEN: usize = DIGEST_SIZE * 2;

/// Files are streamed through the hasher in chunks of this size.
const READ_CHUNK: usize = 1024 * 1024;

/// A 32-byte SHA-256 content digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    /// Create a Digest from raw bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Digest(bytes)
    }

    /// Create a Digest from a lowercase hex string (64 hex characters).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != DIGEST_HEX_LEN {
            return Err(Error::invalid_digest(format!(
                "Expected {} hex characters, got {}",
                DIGEST_HEX_LEN,
                hex_str.len()
            )));
        }
        if hex_str.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::invalid_digest("Digest must be lowercase hex"));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::invalid_digest(format!("Invalid hex: {}", e)))?;

        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&bytes);
        Ok(Digest(digest))
    }

    /// Parse user input that may be a digest in any case, with surrounding
    /// whitespace. Returns `None` for anything else.
    pub fn parse_loose(value: &str) -> Option<Self> {
        let lowered = value.trim().to_ascii_lowercase();
        Self::from_hex(&lowered).ok()
    }

    /// Convert to hex string (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the first 2 hex characters (for directory sharding).
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Digest raw bytes.
    pub fn hash_bytes(data: &[u8]) -> Self {
        Self::from_output(&Sha256::digest(data))
    }

    fn from_output(output: &[u8]) -> Self {
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(output);
        Digest(digest)
    }

    /// Digest data from a reader, one fixed-size chunk at a time.
    pub fn hash_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self::from_output(&hasher.finalize()))
    }

    /// Digest a file. Follows symlinks; callers that must not hash through a
    /// link use [`file_digest`].
    pub fn hash_file(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        Self::hash_reader(file)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl std::str::FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// A regular file and its content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub path: PathBuf,
    pub digest: Digest,
    pub size: u64,
}

/// Digest a regular file without following symlinks.
///
/// Returns `Ok(None)` for symlinks, directories and special files.
pub fn file_digest(path: &Path) -> Result<Option<FileDigest>> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.file_type().is_file() {
        return Ok(None);
    }

    let file = fs::File::open(path)?;
    let size = file.metadata()?.len();
    let digest = Digest::hash_reader(file)?;
    Ok(Some(FileDigest {
        path: path.to_path_buf(),
        digest,
        size,
    }))
}

/// True if the string is exactly a lowercase 64-character hex digest.
pub fn is_digest_str(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_hash_empty() {
        let digest = Digest::hash_bytes(b"");
        assert_eq!(digest.to_hex(), EMPTY);
    }

    #[test]
    fn test_hash_hello_world() {
        let digest = Digest::hash_bytes(b"hello world");
        assert_eq!(digest.to_hex(), HELLO_WORLD);
    }

    #[test]
    fn test_hash_reader_matches_bytes_across_chunks() {
        let data: Vec<u8> = (0..(READ_CHUNK * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let streamed = Digest::hash_reader(&data[..]).unwrap();
        assert_eq!(streamed, Digest::hash_bytes(&data));
    }

    #[test]
    fn test_from_hex_invalid() {
        assert!(Digest::from_hex("abcd").is_err());
        assert!(Digest::from_hex("").is_err());
        assert!(Digest::from_hex(&"z".repeat(64)).is_err());
        assert!(Digest::from_hex(&HELLO_WORLD.to_uppercase()).is_err());
    }

    #[test]
    fn test_parse_loose() {
        let upper = format!("  {}\n", HELLO_WORLD.to_uppercase());
        assert_eq!(
            Digest::parse_loose(&upper).unwrap(),
            Digest::hash_bytes(b"hello world")
        );
        assert!(Digest::parse_loose("not-a-digest").is_none());
    }

    #[test]
    fn test_shard() {
        let digest = Digest::hash_bytes(b"hello world");
        assert_eq!(digest.shard(), "b9");
    }

    #[test]
    fn test_is_digest_str() {
        assert!(is_digest_str(HELLO_WORLD));
        assert!(!is_digest_str(&HELLO_WORLD.to_uppercase()));
        assert!(!is_digest_str(&HELLO_WORLD[1..]));
        assert!(!is_digest_str("file.txt"));
    }

    #[test]
    fn test_serialize_as_hex() {
        let digest = Digest::hash_bytes(b"hello world");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", HELLO_WORLD));
    }

    #[test]
    fn test_file_digest_regular_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, b"hello world").unwrap();

        let fd = file_digest(&path).unwrap().unwrap();
        assert_eq!(fd.digest.to_hex(), HELLO_WORLD);
        assert_eq!(fd.size, 11);
        assert_eq!(fd.path, path);
    }

    #[test]
    fn test_file_digest_skips_symlinks_and_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("a.txt");
        fs::write(&target, b"data").unwrap();
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(file_digest(&link).unwrap().is_none());
        assert!(file_digest(temp_dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_file_digest_missing_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(file_digest(&temp_dir.path().join("missing")).is_err());
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Hex encoding is bijective
        #[test]
        fn prop_hex_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
            let digest = Digest::from_bytes(bytes);
            let parsed = Digest::from_hex(&digest.to_hex()).unwrap();
            prop_assert_eq!(digest, parsed);
            prop_assert!(is_digest_str(&digest.to_hex()));
        }

        /// Invalid hex length always fails
        #[test]
        fn prop_invalid_hex_length_fails(
            s in "[0-9a-f]{0,63}|[0-9a-f]{65,128}"
        ) {
            prop_assert!(Digest::from_hex(&s).is_err());
        }
    }
}
