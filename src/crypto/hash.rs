//! Fingerprints and Merkle paths
//!
//! Fingerprints are plain SHA-256 over canonical bytes so they match the
//! `targetHash` that public timestamping authorities put in their receipts.
//! Merkle nodes follow the Chainpoint convention: `SHA256(left || right)`,
//! with the last node of an odd level paired with itself.

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::domain::{Fingerprint, Hash256, ProofStep};

/// Read buffer size used when hashing streams.
const STREAM_CHUNK: usize = 8192;

/// SHA-256 of a byte slice
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of a reader, consumed in fixed-size chunks.
pub fn sha256_reader<R: Read>(mut reader: R) -> std::io::Result<Hash256> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; STREAM_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Fingerprint of canonical document bytes.
pub fn fingerprint(canonical: &[u8]) -> Fingerprint {
    Fingerprint(sha256(canonical))
}

/// Merkle internal node.
pub fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Fold a Merkle path from a leaf up to the root it implies.
pub fn fold_path(leaf: &Hash256, path: &[ProofStep]) -> Hash256 {
    path.iter().fold(*leaf, |current, step| match step {
        ProofStep::Left(sibling) => hash_pair(sibling, &current),
        ProofStep::Right(sibling) => hash_pair(&current, sibling),
    })
}

/// Build every level of the tree, leaves first. Empty input has no levels.
fn build_levels(leaves: &[Hash256]) -> Vec<Vec<Hash256>> {
    if leaves.is_empty() {
        return Vec::new();
    }

    let mut levels = vec![leaves.to_vec()];
    while levels.last().map(|l| l.len() > 1).unwrap_or(false) {
        let current = &levels[levels.len() - 1];
        let next: Vec<Hash256> = current
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [single] => hash_pair(single, single),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
        levels.push(next);
    }
    levels
}

/// Merkle root over leaves; `None` for an empty set.
pub fn merkle_root(leaves: &[Hash256]) -> Option<Hash256> {
    build_levels(leaves)
        .last()
        .and_then(|level| level.first().copied())
}

/// Merkle path for the leaf at `index`; `None` if out of range.
pub fn merkle_path(leaves: &[Hash256], index: usize) -> Option<Vec<ProofStep>> {
    if index >= leaves.len() {
        return None;
    }

    let levels = build_levels(leaves);
    let mut path = Vec::with_capacity(levels.len().saturating_sub(1));
    let mut idx = index;

    for level in &levels[..levels.len() - 1] {
        let step = if idx % 2 == 0 {
            // Odd tail pairs with itself
            let sibling = level.get(idx + 1).copied().unwrap_or(level[idx]);
            ProofStep::Right(sibling)
        } else {
            ProofStep::Left(level[idx - 1])
        };
        path.push(step);
        idx /= 2;
    }

    Some(path)
}
