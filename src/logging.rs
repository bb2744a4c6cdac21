use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "KMS_DECRYPT_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

// JSON logs go to stderr; stdout carries only the module result.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    if let Err(e) = tracing_subscriber::fmt()
        .json()
        .with_timer(ChronoUtc::rfc_3339())
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("logger initialization failed: {e}");
    }
}
