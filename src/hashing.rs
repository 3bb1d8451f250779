//! Content fingerprints.
//!
//! SHA-256 over file bytes decides whether a file needs re-indexing;
//! SHA-256 over chunk text identifies chunk content. With EOL
//! normalization enabled, CRLF sequences hash identically to LF so a
//! line-ending-only rewrite does not trigger re-embedding.

use sha2::{Digest, Sha256};

/// Hash raw file bytes, optionally canonicalizing CRLF to LF first.
pub fn file_fingerprint(bytes: &[u8], normalize_eol: bool) -> String {
    if normalize_eol && bytes.contains(&b'\r') {
        let mut normalized = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
                i += 1; // drop the CR, keep the LF
                continue;
            }
            normalized.push(bytes[i]);
            i += 1;
        }
        hex_digest(&normalized)
    } else {
        hex_digest(bytes)
    }
}

/// Hash chunk text (post-chunking, as stored).
pub fn chunk_fingerprint(text: &str) -> String {
    hex_digest(text.as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
