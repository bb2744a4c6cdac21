use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("missing required arguments: {0}")]
    MissingArgument(String),
    #[error("Unsupported parameters for (kms_decrypt) module: {0}")]
    UnsupportedParameters(String),
    #[error("invalid module arguments: {0}")]
    InvalidArguments(String),
    #[error("secret is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("secret decoded to an empty ciphertext blob")]
    EmptyCiphertext,
    #[error("{0}")]
    DependencyUnavailable(String),
    #[error("Failed with http status code {0}")]
    Status(u16),
    #[error("Failed with http status code {status}: {message}")]
    Service { status: u16, message: String },
    #[error("decrypt response did not include {0}")]
    IncompleteResponse(&'static str),
    #[error("{0}")]
    Transport(String),
    #[error("failed to emit module result: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Input,
    Dependency,
    Service,
    Transport,
}

impl ModuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModuleError::MissingArgument(_)
            | ModuleError::UnsupportedParameters(_)
            | ModuleError::InvalidArguments(_) => ErrorKind::Configuration,
            ModuleError::Decode(_) | ModuleError::EmptyCiphertext => ErrorKind::Input,
            ModuleError::DependencyUnavailable(_) => ErrorKind::Dependency,
            ModuleError::Status(_)
            | ModuleError::Service { .. }
            | ModuleError::IncompleteResponse(_)
            | ModuleError::Output(_) => ErrorKind::Service,
            ModuleError::Transport(_) => ErrorKind::Transport,
        }
    }

    pub fn into_failure(self) -> FailureResponse {
        FailureResponse {
            failed: true,
            error_kind: self.kind(),
            msg: self.to_string(),
        }
    }
}

impl From<ValidationErrors> for ModuleError {
    fn from(errors: ValidationErrors) -> Self {
        let mut missing = Vec::new();
        let mut invalid = Vec::new();
        for (field, errs) in errors.field_errors() {
            for err in errs {
                if err.code == "required" {
                    missing.push(field.to_string());
                } else {
                    invalid.push(format!("{field}: {}", err.message.as_deref().unwrap_or(err.code.as_ref())));
                }
            }
        }
        missing.sort();
        invalid.sort();

        if !missing.is_empty() {
            ModuleError::MissingArgument(missing.join(", "))
        } else {
            ModuleError::InvalidArguments(invalid.join(", "))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FailureResponse {
    failed: bool,
    msg: String,
    error_kind: ErrorKind,
}
