use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::error;

use vidgrid::sim::{parse_args, run_session, USAGE};

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vidgrid=info".parse()?),
        )
        .try_init()
        .map_err(|err| anyhow::anyhow!("Failed to install the tracing subscriber: {}", err))
}

fn run() -> Result<ExitCode> {
    let Some(args) = parse_args(std::env::args().skip(1))? else {
        println!("{}", USAGE);
        return Ok(ExitCode::SUCCESS);
    };

    // The grid is single-threaded; surfaces only spawn short timer tasks
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build the tokio runtime")?;
    let report = runtime.block_on(run_session(&args))?;
    report.print();

    if report.cap_exceeded() {
        error!(
            peak = report.live.peak_active,
            cap = args.max_active,
            "Active decoder cap exceeded"
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    if let Err(err) = init_logging() {
        eprintln!("{:#}", err);
    }

    match run() {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
