//! File checksums.
//!
//! Element files are identified by a typed digest. SHA-256 is used for new
//! elements; MD5 is still accepted so older manifests keep loading.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{BundleError, BundleResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Md5,
    #[default]
    Sha256,
}

impl ChecksumType {
    /// Name used in manifests and configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha256 => "sha256",
        }
    }

    /// Length of a hex encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumType::Md5 => 32,
            ChecksumType::Sha256 => 64,
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumType {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Ok(ChecksumType::Md5),
            "sha256" | "sha-256" => Ok(ChecksumType::Sha256),
            other => Err(BundleError::MalformedChecksum(format!(
                "unknown algorithm '{}'",
                other
            ))),
        }
    }
}

/// A digest together with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    kind: ChecksumType,
    value: String,
}

impl Checksum {
    /// Create a checksum from a known hex value.
    ///
    /// The value is lower-cased. Fails with [`BundleError::MalformedChecksum`]
    /// if its length or charset does not fit the algorithm.
    pub fn new(kind: ChecksumType, value: &str) -> BundleResult<Self> {
        let value = value.trim().to_lowercase();
        if value.len() != kind.hex_len() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BundleError::MalformedChecksum(format!(
                "'{}' is not a valid {} digest",
                value, kind
            )));
        }
        Ok(Self { kind, value })
    }

    /// Compute the checksum of a file's contents.
    pub fn of_file(kind: ChecksumType, path: &Path) -> BundleResult<Self> {
        let mut file = File::open(path).map_err(|e| BundleError::read(path, e))?;
        let mut buffer = vec![0u8; BUFFER_SIZE];

        match kind {
            ChecksumType::Md5 => {
                let mut hasher = Md5::new();
                stream_into(&mut file, &mut buffer, path, |chunk| hasher.update(chunk))?;
                Ok(Self::from_digest(kind, hasher.finalize()))
            }
            ChecksumType::Sha256 => {
                let mut hasher = Sha256::new();
                stream_into(&mut file, &mut buffer, path, |chunk| hasher.update(chunk))?;
                Ok(Self::from_digest(kind, hasher.finalize()))
            }
        }
    }

    /// Compute the checksum of an in-memory byte slice.
    pub fn of_bytes(kind: ChecksumType, bytes: &[u8]) -> Self {
        match kind {
            ChecksumType::Md5 => Self::from_digest(kind, Md5::digest(bytes)),
            ChecksumType::Sha256 => Self::from_digest(kind, Sha256::digest(bytes)),
        }
    }

    fn from_digest(kind: ChecksumType, digest: impl fmt::LowerHex) -> Self {
        Self {
            kind,
            value: format!("{:x}", digest),
        }
    }

    pub fn kind(&self) -> ChecksumType {
        self.kind
    }

    /// Lowercase hex digest.
    pub fn value(&self) -> &str {
        &self.value
    }
}

fn stream_into(
    file: &mut File,
    buffer: &mut [u8],
    path: &Path,
    mut update: impl FnMut(&[u8]),
) -> BundleResult<()> {
    loop {
        let bytes_read = file.read(buffer).map_err(|e| BundleError::read(path, e))?;
        if bytes_read == 0 {
            return Ok(());
        }
        update(&buffer[..bytes_read]);
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}
