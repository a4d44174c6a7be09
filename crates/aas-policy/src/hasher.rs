// hasher.rs - Line-ending normalisation and SHA-256 policy hashes.
//
// A policy hash identifies a policy revision: it keys the history directory
// and tells the watch loop whether a save actually changed anything. The
// same policy saved with CRLF or LF endings must hash identically, so the
// text is normalised to LF before hashing.
//
// Hashes are 64-character lowercase hex strings.

use sha2::{Digest, Sha256};

/// Convert `\r\n` and lone `\r` to `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a policy text after normalising its line endings.
pub fn hash_policy_text(text: &str) -> String {
    hash_bytes(normalize_line_endings(text).as_bytes())
}
