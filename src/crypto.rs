use base64::{engine::general_purpose, Engine};

use crate::error::ModuleError;

/// Decodes the `secret` parameter into the ciphertext blob sent to KMS.
///
/// Line breaks and other ASCII whitespace are dropped first, so output wrapped by
/// `base64` or `aws kms encrypt --output text` decodes as-is.
pub fn decode_ciphertext(secret: &str) -> Result<Vec<u8>, ModuleError> {
    let compact: String = secret
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let blob = general_purpose::STANDARD.decode(compact)?;
    if blob.is_empty() {
        return Err(ModuleError::EmptyCiphertext);
    }

    Ok(blob)
}
