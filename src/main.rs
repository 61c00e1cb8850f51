use clap::Parser;
use latency_load_test::cli::{apply_overrides, run_default_config, run_validate, Cli};
use latency_load_test::config;
use latency_load_test::error::LoadTestError;
use latency_load_test::logging;
use latency_load_test::reporter;
use latency_load_test::runner::LoadTest;
use std::path::{Path, PathBuf};
use tracing::warn;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init();

    let result = match cli {
        Cli::Run {
            config: config_path,
            target_url,
            token,
            report,
            output,
        } => run_load_test(&config_path, target_url, token, report, output).await,
        Cli::Validate { config } => run_validate(&config).map(|text| println!("{}", text)),
        Cli::DefaultConfig => run_default_config().map(|json| println!("{}", json)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_load_test(
    config_path: &Path,
    target_url: Option<String>,
    token: Option<String>,
    report: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), LoadTestError> {
    let cfg = config::load_from_file(config_path)?;
    let cfg = apply_overrides(cfg, target_url, token, report, output);

    let test = LoadTest::new(cfg)?;
    test.setup_signal_handler()?;

    // Phase 1: run the schedule to completion.
    let run_report = test.run().await?;

    // Phase 2: report. Failures are logged inside; the metrics above stand.
    let failures = reporter::emit(&run_report, test.config());
    if !failures.is_empty() {
        warn!(count = failures.len(), "Run finished with report output errors");
    }

    Ok(())
}
