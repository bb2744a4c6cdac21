use std::future::Future;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::decrypt::{invoke, prepare_ciphertext, DecryptResult};
use crate::error::ModuleError;
use crate::kms::KeyManagementService;
use crate::params::{AwsSettings, ModuleParams};

const ARGS_WRAPPER: &str = "ANSIBLE_MODULE_ARGS";
const CHECK_MODE_MSG: &str = "remote module (kms_decrypt) does not support check mode";

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Decrypted(DecryptResult),
    Skipped { changed: bool, skipped: bool, msg: &'static str },
}

pub fn load_args(path: Option<&Path>) -> Result<Value> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read module arguments from {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read module arguments from stdin")?;
            buf
        }
    };
    parse_args(&raw)
}

pub fn parse_args(raw: &str) -> Result<Value> {
    let mut doc: Value = serde_json::from_str(raw).context("module arguments are not valid JSON")?;

    if let Some(inner) = doc.as_object_mut().and_then(|obj| obj.remove(ARGS_WRAPPER)) {
        doc = inner;
    }
    anyhow::ensure!(doc.is_object(), "module arguments must be a JSON object");
    Ok(doc)
}

/// Runs one invocation. `connect` is only called once the secret has been validated
/// and decoded.
pub async fn run<E, C, Fut, K>(args: Value, env: E, connect: C) -> Result<Outcome, ModuleError>
where
    E: Fn(&str) -> Option<String>,
    C: FnOnce(AwsSettings) -> Fut,
    Fut: Future<Output = Result<K, ModuleError>>,
    K: KeyManagementService,
{
    let params = ModuleParams::from_value(args)?;
    debug!(?params, "module parameters parsed");

    if params.check_mode() {
        return Ok(Outcome::Skipped {
            changed: false,
            skipped: true,
            msg: CHECK_MODE_MSG,
        });
    }

    let blob = prepare_ciphertext(&params)?;

    let settings = params.aws_settings(env);
    debug!(?settings, "resolved AWS connection settings");
    let kms = connect(settings).await?;

    invoke(blob, &kms).await.map(Outcome::Decrypted)
}

pub fn emit<W: Write>(outcome: Result<Outcome, ModuleError>, out: &mut W) -> u8 {
    let (body, code) = match outcome.and_then(|o| Ok(serde_json::to_string(&o)?)) {
        Ok(body) => (body, 0),
        Err(err) => {
            error!(kind = ?err.kind(), "{}", err);
            let failure = err.into_failure();
            match serde_json::to_string(&failure) {
                Ok(body) => (body, 1),
                Err(_) => (r#"{"failed":true,"msg":"failed to serialize module failure"}"#.to_string(), 1),
            }
        }
    };

    if writeln!(out, "{body}").and_then(|_| out.flush()).is_err() {
        return 1;
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::mock::MockKms;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY_ARN: &str = "arn:aws:kms:::key/abc";

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn emitted(outcome: Result<Outcome, ModuleError>) -> (Value, u8) {
        let mut out = Vec::new();
        let code = emit(outcome, &mut out);
        (serde_json::from_slice(&out).unwrap(), code)
    }

    #[tokio::test]
    async fn end_to_end_decrypt() {
        let args = parse_args(r#"{"ANSIBLE_MODULE_ARGS": {"secret": "aGVsbG8td29ybGQtY2lwaGVydGV4dA==", "_ansible_verbosity": 0}}"#).unwrap();

        let outcome = run(args, no_env, |_| async { Ok(MockKms::ok(b"hello-world", KEY_ARN)) }).await;
        let (json, code) = emitted(outcome);

        assert_eq!(code, 0);
        assert_eq!(
            json,
            json!({ "changed": true, "plaintext": "hello-world", "key_id": KEY_ARN })
        );
    }

    #[tokio::test]
    async fn connect_receives_resolved_settings() {
        let args = json!({ "secret": "aGVsbG8=", "access_key": "AKID", "secret_key": "sk" });
        let env = |name: &str| (name == "AWS_DEFAULT_REGION").then(|| "us-west-2".to_string());

        let outcome = run(args, env, |settings| async move {
            assert_eq!(settings.access_key.as_deref(), Some("AKID"));
            assert_eq!(settings.region.as_deref(), Some("us-west-2"));
            Ok(MockKms::ok(b"hello", KEY_ARN))
        })
        .await;

        assert!(matches!(outcome, Ok(Outcome::Decrypted(_))));
    }

    #[tokio::test]
    async fn input_errors_never_build_a_client() {
        let connects = AtomicUsize::new(0);
        let counter = &connects;

        for args in [json!({}), json!({ "secret": "***" })] {
            let outcome = run(args, no_env, move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(MockKms::ok(b"x", KEY_ARN))
            })
            .await;
            let (json, code) = emitted(outcome);

            assert_eq!(code, 1);
            assert_eq!(json["failed"], true);
        }
        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dependency_failure_is_reported() {
        let outcome = run(json!({ "secret": "aGVsbG8=" }), no_env, |_| async {
            Err::<MockKms, _>(ModuleError::DependencyUnavailable(
                "no AWS region configured".to_string(),
            ))
        })
        .await;
        let (json, code) = emitted(outcome);

        assert_eq!(code, 1);
        assert_eq!(json["error_kind"], "dependency");
        assert_eq!(json["msg"], "no AWS region configured");
    }

    #[tokio::test]
    async fn service_status_failure_json() {
        let outcome = run(json!({ "secret": "aGVsbG8=" }), no_env, |_| async {
            Ok(MockKms::status(400))
        })
        .await;
        let (json, code) = emitted(outcome);

        assert_eq!(code, 1);
        assert_eq!(
            json,
            json!({ "failed": true, "msg": "Failed with http status code 400", "error_kind": "service" })
        );
    }

    #[tokio::test]
    async fn check_mode_skips_without_calling_kms() {
        let args = json!({ "secret": "aGVsbG8=", "_ansible_check_mode": true });

        let outcome = run(args, no_env, |_| async {
            Err::<MockKms, _>(ModuleError::Transport("must not connect".to_string()))
        })
        .await;
        let (json, code) = emitted(outcome);

        assert_eq!(code, 0);
        assert_eq!(json["skipped"], true);
        assert_eq!(json["changed"], false);
    }

    #[tokio::test]
    async fn non_utf8_plaintext_becomes_failure() {
        let outcome = run(json!({ "secret": "aGVsbG8=" }), no_env, |_| async {
            Ok(MockKms::ok(&[0xc3, 0x28], KEY_ARN))
        })
        .await;
        let (json, code) = emitted(outcome);

        assert_eq!(code, 1);
        assert_eq!(json["error_kind"], "service");
        assert!(json["msg"].as_str().unwrap().contains("not valid UTF-8"));
    }

    #[test]
    fn loads_bare_args_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"secret": "aGVsbG8=", "region": "eu-west-1"}}"#).unwrap();

        let args = load_args(Some(file.path())).unwrap();

        assert_eq!(args["secret"], "aGVsbG8=");
        assert_eq!(args["region"], "eu-west-1");
    }

    #[test]
    fn rejects_non_object_args() {
        assert!(parse_args("[1, 2]").is_err());
        assert!(parse_args("secret=abc").is_err());
    }

    #[test]
    fn missing_args_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_args(Some(&dir.path().join("absent.json"))).unwrap_err();

        assert!(err.to_string().contains("failed to read module arguments"));
    }
}
