pub mod perceptual;

use std::hash::Hasher as _;
use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use twox_hash::XxHash64;

use crate::domain::ByteSource;

const CHUNK_SIZE: usize = 64 * 1024;

/// Content digests computed in a single pass.
/// `short` (XxHash64) is for fast identification and bucketing,
/// `sha256` decides exact duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigests {
    pub short: String,
    pub sha256: String,
}

/// Hash a stream in 64KB chunks, feeding both hashers from the same buffer.
pub fn digest_reader<R: Read>(mut reader: R) -> std::io::Result<ContentDigests> {
    let mut sha = Sha256::new();
    let mut xx = XxHash64::with_seed(0);
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha.update(&buf[..n]);
        xx.write(&buf[..n]);
    }

    Ok(ContentDigests {
        short: format!("{:016x}", xx.finish()),
        sha256: format!("{:x}", sha.finalize()),
    })
}

pub fn digest_bytes(bytes: &[u8]) -> ContentDigests {
    let mut sha = Sha256::new();
    sha.update(bytes);
    let mut xx = XxHash64::with_seed(0);
    xx.write(bytes);
    ContentDigests {
        short: format!("{:016x}", xx.finish()),
        sha256: format!("{:x}", sha.finalize()),
    }
}

/// Stream a file's bytes through both hashers without loading it whole.
pub fn compute_digests(source: &ByteSource) -> std::io::Result<ContentDigests> {
    digest_reader(source.open()?)
}
