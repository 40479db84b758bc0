// src/integrity.rs

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// SHA-256 fed in write order, alongside the byte count.
#[derive(Default)]
pub struct StreamDigest {
    hasher: Sha256,
    bytes: u64,
}

impl StreamDigest {
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Lowercase hex digest.
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

/// Hex SHA-256 of the concatenation of `chunks`.
pub fn sha256_chunks(chunks: &[Bytes]) -> String {
    let mut digest = StreamDigest::default();
    for chunk in chunks {
        digest.update(chunk);
    }
    digest.finish()
}
