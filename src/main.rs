use std::path::PathBuf;

use clap::Parser;

/// Polls container probes, records their resource usage and reports
/// container lifecycle events.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short = 'f', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = probe_monitor::config::Config::load(&cli.config)?;
    log::debug!("loaded configuration from `{}`", cli.config.display());

    probe_monitor::run(config).await
}
