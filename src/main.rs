mod crypto;
mod decrypt;
mod error;
mod kms;
mod logging;
mod module;
mod params;

use std::path::PathBuf;
use std::process::ExitCode;

use dotenv::dotenv;
use crate::error::ModuleError;
use crate::kms::AwsKms;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv().ok();
    logging::init();

    let args_path = std::env::args_os().nth(1).map(PathBuf::from);

    let outcome = match module::load_args(args_path.as_deref()) {
        Ok(args) => {
            module::run(
                args,
                |name| std::env::var(name).ok(),
                |settings| async move { AwsKms::connect(&settings).await },
            )
            .await
        }
        Err(err) => Err(ModuleError::InvalidArguments(format!("{err:#}"))),
    };

    let code = module::emit(outcome, &mut std::io::stdout().lock());
    ExitCode::from(code)
}
