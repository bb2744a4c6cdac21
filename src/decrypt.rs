use serde::{Serialize, Serializer};
use tracing::info;
use validator::Validate;

use crate::crypto::decode_ciphertext;
use crate::error::ModuleError;
use crate::kms::KeyManagementService;
use crate::params::ModuleParams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecryptResult {
    pub changed: bool,
    #[serde(serialize_with = "utf8_plaintext")]
    pub plaintext: Vec<u8>,
    pub key_id: String,
}

// JSON has no byte strings; plaintext that is not UTF-8 cannot be emitted verbatim.
fn utf8_plaintext<S: Serializer>(plaintext: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    let text = std::str::from_utf8(plaintext).map_err(|e| {
        serde::ser::Error::custom(format!("plaintext is not valid UTF-8: {e}"))
    })?;
    serializer.serialize_str(text)
}

/// Steps that must pass before any client exists: parameter validation and decoding.
pub fn prepare_ciphertext(params: &ModuleParams) -> Result<Vec<u8>, ModuleError> {
    params.validate()?;
    let secret = params
        .secret
        .as_deref()
        .ok_or_else(|| ModuleError::MissingArgument("secret".to_string()))?;
    decode_ciphertext(secret)
}

pub async fn invoke<K>(blob: Vec<u8>, kms: &K) -> Result<DecryptResult, ModuleError>
where
    K: KeyManagementService + ?Sized,
{
    info!(blob_len = blob.len(), "decrypting secret");
    let response = kms.decrypt(blob).await?;

    if response.status_code != 200 {
        return Err(ModuleError::Status(response.status_code));
    }

    let plaintext = response
        .plaintext
        .ok_or(ModuleError::IncompleteResponse("Plaintext"))?;
    let key_id = response
        .key_id
        .ok_or(ModuleError::IncompleteResponse("KeyId"))?;

    info!(%key_id, "decrypted secret");
    Ok(DecryptResult {
        changed: true,
        plaintext,
        key_id,
    })
}
