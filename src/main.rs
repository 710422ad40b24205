use clap::Parser;
use poly_signals::cli::{print_config, print_status, Cli, Commands};
use poly_signals::config::{Config, ConfigError};
use poly_signals::orchestrator::{stop_channel, RunStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing file means defaults; anything else is fatal
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("Warning: {} not found, using default configuration", cli.config);
            Config::default()
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(RunStatus::Failed.exit_code());
        }
    };

    poly_signals::telemetry::init_telemetry(&config.telemetry)?;

    let (handle, signal) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
            // Second Ctrl-C skips the graceful drain
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(RunStatus::Interrupted.exit_code());
            }
        }
    });

    let status = match cli.command {
        Commands::Run(args) => args.execute(&config, signal).await?,
        Commands::Collect(args) => args.execute(&config, signal).await?,
        Commands::Status => {
            print_status(&config)?;
            return Ok(());
        }
        Commands::Config => {
            print_config(&config);
            return Ok(());
        }
    };

    tracing::info!(status = %status, "Run finished");
    std::process::exit(status.exit_code());
}
