//! Integrity records: streaming SHA-256 over whole files and fixed-size blocks.
//!
//! Records are advisory metadata carried in the header; nothing is verified
//! when an archive is read.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Default block size (4 MiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 4 * 1024 * 1024;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// SHA-256, hex encoded.
    #[serde(rename = "SHA256", alias = "SHA-256")]
    Sha256,
}

impl Algorithm {
    /// Returns the string representation written to the header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "SHA256",
        }
    }
}

/// Configuration for integrity computation.
#[derive(Debug, Clone)]
pub struct IntegrityConfig {
    /// Size of each independently hashed block in bytes.
    pub block_size: u32,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Whole-file and per-block content hashes of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIntegrity {
    pub algorithm: Algorithm,
    /// Hex digest of the whole file.
    pub hash: String,
    #[serde(rename = "blockSize")]
    pub block_size: u32,
    /// Hex digest of each block, in file order. Empty for an empty file.
    pub blocks: Vec<String>,
}

impl FileIntegrity {
    /// Hash data from a reader in a single pass.
    ///
    /// Each block feeds the running whole-file digest and gets a digest of
    /// its own. Only the last block may be shorter than `block_size`.
    pub fn from_reader<R: Read>(mut reader: R, config: &IntegrityConfig) -> Result<Self> {
        let block_size = config.block_size.max(1) as usize;
        let mut file_hasher = Sha256::new();
        let mut blocks = Vec::new();
        let mut buffer = vec![0u8; block_size];

        loop {
            let filled = fill_block(&mut reader, &mut buffer)?;
            if filled == 0 {
                break;
            }

            let block = &buffer[..filled];
            file_hasher.update(block);
            blocks.push(hex::encode(Sha256::digest(block)));

            if filled < block_size {
                break;
            }
        }

        Ok(Self {
            algorithm: Algorithm::Sha256,
            hash: hex::encode(file_hasher.finalize()),
            block_size: block_size as u32,
            blocks,
        })
    }

    /// Hash a file on disk.
    pub fn from_file(path: &Path, config: &IntegrityConfig) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, config)
    }

    /// Hash an in-memory buffer.
    pub fn from_bytes(data: &[u8], config: &IntegrityConfig) -> Self {
        let block_size = config.block_size.max(1) as usize;
        Self {
            algorithm: Algorithm::Sha256,
            hash: hex::encode(Sha256::digest(data)),
            block_size: block_size as u32,
            blocks: data
                .chunks(block_size)
                .map(|block| hex::encode(Sha256::digest(block)))
                .collect(),
        }
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn fill_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
