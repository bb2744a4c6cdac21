use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use crate::error::ModuleError;

const ACCESS_KEY_ENV: &[&str] = &["AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY", "EC2_ACCESS_KEY"];
const SECRET_KEY_ENV: &[&str] = &["AWS_SECRET_ACCESS_KEY", "AWS_SECRET_KEY", "EC2_SECRET_KEY"];
const SECURITY_TOKEN_ENV: &[&str] = &["AWS_SECURITY_TOKEN", "EC2_SECURITY_TOKEN", "AWS_SESSION_TOKEN"];
const REGION_ENV: &[&str] = &["AWS_REGION", "AWS_DEFAULT_REGION", "EC2_REGION"];
const ENDPOINT_ENV: &[&str] = &["AWS_URL", "EC2_URL"];
const PROFILE_ENV: &[&str] = &["AWS_PROFILE"];

const FRAMEWORK_PREFIX: &str = "_ansible_";

#[derive(Deserialize, Validate, Default)]
pub struct ModuleParams {
    #[validate(required, length(min = 1, message = "must not be empty"))]
    pub secret: Option<String>,

    #[serde(alias = "ec2_access_key", alias = "access_key")]
    pub aws_access_key: Option<String>,

    #[serde(alias = "ec2_secret_key", alias = "secret_key")]
    pub aws_secret_key: Option<String>,

    #[serde(alias = "aws_security_token", alias = "access_token")]
    pub security_token: Option<String>,

    #[validate(length(min = 1, message = "must not be empty"))]
    #[serde(alias = "aws_region", alias = "ec2_region")]
    pub region: Option<String>,

    #[serde(alias = "aws_profile")]
    pub profile: Option<String>,

    #[serde(alias = "aws_endpoint_url", alias = "endpoint_url")]
    pub ec2_url: Option<String>,

    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl ModuleParams {
    pub fn from_value(value: Value) -> Result<Self, ModuleError> {
        let params: ModuleParams = serde_json::from_value(value)
            .map_err(|e| ModuleError::InvalidArguments(e.to_string()))?;

        let unsupported: Vec<&str> = params
            .extra
            .keys()
            .map(String::as_str)
            .filter(|key| !key.starts_with(FRAMEWORK_PREFIX))
            .collect();
        if !unsupported.is_empty() {
            return Err(ModuleError::UnsupportedParameters(unsupported.join(", ")));
        }

        Ok(params)
    }

    pub fn check_mode(&self) -> bool {
        matches!(self.extra.get("_ansible_check_mode"), Some(Value::Bool(true)))
    }

    /// Explicit parameters first, then the first non-empty variable from each fallback list.
    pub fn aws_settings<F>(&self, env: F) -> AwsSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |explicit: &Option<String>, names: &[&str]| {
            explicit
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| names.iter().find_map(|name| env(name).filter(|v| !v.is_empty())))
        };

        AwsSettings {
            access_key: pick(&self.aws_access_key, ACCESS_KEY_ENV),
            secret_key: pick(&self.aws_secret_key, SECRET_KEY_ENV),
            security_token: pick(&self.security_token, SECURITY_TOKEN_ENV),
            region: pick(&self.region, REGION_ENV),
            profile: pick(&self.profile, PROFILE_ENV),
            endpoint_url: pick(&self.ec2_url, ENDPOINT_ENV),
        }
    }
}

impl fmt::Debug for ModuleParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleParams")
            .field("region", &self.region)
            .field("profile", &self.profile)
            .field("ec2_url", &self.ec2_url)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct AwsSettings {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub security_token: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub endpoint_url: Option<String>,
}

impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("access_key", &self.access_key.is_some())
            .field("secret_key", &self.secret_key.is_some())
            .field("region", &self.region)
            .field("profile", &self.profile)
            .field("endpoint_url", &self.endpoint_url)
            .finish_non_exhaustive()
    }
}
