//! SHA-256 content hashing for uploaded documents
use super::error::ContentError;

/// Hex encoded SHA-256 of `content`. Empty content is refused rather than
/// silently bound to the digest of zero bytes.
pub fn hash_content(content: &[u8]) -> Result<String, ContentError> {
    if content.is_empty() {
        return Err(ContentError::Empty);
    }
    Ok(sha256::digest(content))
}

/// Checks `content` against a previously recorded digest. The expected digest
/// is compared as raw bytes, so upper and lower case hex are both accepted.
pub fn verify_content(content: &[u8], expected_digest: &str) -> bool {
    let Ok(actual) = hash_content(content) else {
        return false;
    };
    match (hex::decode(actual), hex::decode(expected_digest.trim())) {
        (Ok(actual), Ok(expected)) => actual == expected,
        _ => false,
    }
}
