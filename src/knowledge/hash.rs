use sha2::{Digest, Sha256};

/// Calculate SHA256 hash of content as lowercase hex.
pub fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
