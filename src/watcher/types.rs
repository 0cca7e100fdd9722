use sha2::{Digest, Sha256};

/// SHA-256 fingerprint of file content, used for self-write detection.
/// Line endings are normalized first so a CRLF rewrite by another tool does
/// not defeat the comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn from_content(content: &str) -> Self {
        let normalized = content.replace("\r\n", "\n");
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }
}
