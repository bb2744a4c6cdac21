use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_kms::config::interceptors::BeforeDeserializationInterceptorContextRef;
use aws_sdk_kms::config::{ConfigBag, Intercept, RuntimeComponents};
use aws_sdk_kms::error::{BoxError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client as KmsClient;
use tracing::{info, warn};

use crate::error::ModuleError;
use crate::params::AwsSettings;

const CREDENTIALS_SOURCE: &str = "kms_decrypt-module-params";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptResponse {
    pub plaintext: Option<Vec<u8>>,
    pub key_id: Option<String>,
    pub status_code: u16,
}

#[async_trait]
pub trait KeyManagementService: Send + Sync {
    async fn decrypt(&self, ciphertext_blob: Vec<u8>) -> Result<DecryptResponse, ModuleError>;
}

pub struct AwsKms {
    client: KmsClient,
    region: String,
}

impl std::fmt::Debug for AwsKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsKms")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl AwsKms {
    /// Builds the SDK client and checks it has what a Decrypt call needs.
    pub async fn connect(settings: &AwsSettings) -> Result<Self, ModuleError> {
        let sdk_config = load_sdk_config(settings).await?;

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .ok_or_else(|| {
                ModuleError::DependencyUnavailable(
                    "no AWS region configured: set `region` or AWS_REGION".to_string(),
                )
            })?;

        resolve_credentials(sdk_config.credentials_provider()).await?;

        info!(%region, "KMS client ready");
        Ok(Self {
            client: KmsClient::new(&sdk_config),
            region,
        })
    }
}

fn static_credentials(settings: &AwsSettings) -> Result<Option<Credentials>, ModuleError> {
    match (&settings.access_key, &settings.secret_key) {
        (Some(access_key), Some(secret_key)) => Ok(Some(Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            settings.security_token.clone(),
            None,
            CREDENTIALS_SOURCE,
        ))),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ModuleError::InvalidArguments(
            "aws_access_key is set but aws_secret_key is not".to_string(),
        )),
        (None, Some(_)) => Err(ModuleError::InvalidArguments(
            "aws_secret_key is set but aws_access_key is not".to_string(),
        )),
    }
}

async fn load_sdk_config(settings: &AwsSettings) -> Result<SdkConfig, ModuleError> {
    let mut builder = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = &settings.region {
        builder = builder.region(Region::new(region.clone()));
    }
    if let Some(profile) = &settings.profile {
        builder = builder.profile_name(profile);
    }
    if let Some(credentials) = static_credentials(settings)? {
        builder = builder.credentials_provider(credentials);
    }
    if let Some(endpoint) = &settings.endpoint_url {
        info!("routing KMS requests to {}", endpoint);
        builder = builder.endpoint_url(endpoint);
    }

    Ok(builder.load().await)
}

async fn resolve_credentials(provider: Option<SharedCredentialsProvider>) -> Result<(), ModuleError> {
    let provider = provider.ok_or_else(|| {
        ModuleError::DependencyUnavailable("no AWS credentials provider available".to_string())
    })?;

    provider.provide_credentials().await.map_err(|e| {
        ModuleError::DependencyUnavailable(format!(
            "no AWS credentials available: {}",
            DisplayErrorContext(&e)
        ))
    })?;
    Ok(())
}

// Records the HTTP status of the last transmitted attempt.
#[derive(Debug, Clone, Default)]
struct StatusRecorder {
    status: Arc<AtomicU16>,
}

impl Intercept for StatusRecorder {
    fn name(&self) -> &'static str {
        "StatusRecorder"
    }

    fn read_after_transmit(
        &self,
        context: &BeforeDeserializationInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        self.status
            .store(context.response().status().as_u16(), Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl KeyManagementService for AwsKms {
    async fn decrypt(&self, ciphertext_blob: Vec<u8>) -> Result<DecryptResponse, ModuleError> {
        let recorder = StatusRecorder::default();
        let result = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext_blob))
            .customize()
            .interceptor(recorder.clone())
            .send()
            .await;

        match result {
            Ok(output) => {
                let status_code = recorder.status.load(Ordering::SeqCst);
                if status_code == 0 {
                    return Err(ModuleError::Transport(
                        "decrypt response carried no HTTP status".to_string(),
                    ));
                }
                Ok(DecryptResponse {
                    plaintext: output.plaintext().map(|blob| blob.as_ref().to_vec()),
                    key_id: output.key_id().map(str::to_owned),
                    status_code,
                })
            }
            Err(SdkError::ServiceError(context)) => {
                let status = context.raw().status().as_u16();
                let err = context.err();
                let message = format!(
                    "{}: {}",
                    err.code().unwrap_or("Unknown"),
                    err.message().unwrap_or("no message")
                );
                warn!(status, code = err.code(), "KMS rejected decrypt request");
                Err(ModuleError::Service { status, message })
            }
            Err(err) => Err(ModuleError::Transport(DisplayErrorContext(&err).to_string())),
        }
    }
}
