// src/main.rs

use monitord::errors::MonitordError;
use monitord::types::EXIT_FAILURE;
use monitord::{cli, logging, run};

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("monitord error: {err:?}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    let log_control = logging::init_logging(args.log_level, args.verbose)?;
    run(args, Some(log_control)).await
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<MonitordError>()
        .map(MonitordError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}
