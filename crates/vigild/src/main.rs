//! vigild: runs scheduled Kubernetes health probes.
//!
//! # Usage
//!
//! ```text
//! vigild run --config /etc/vigil/vigil.toml
//! vigild validate --config /etc/vigil/vigil.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vigil_core::format_duration;
use vigild::daemon;

#[derive(Parser)]
#[command(name = "vigild", about = "Vigil cluster health prober")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every configured probe until interrupted.
    Run {
        /// Path to vigil.toml.
        #[arg(long, default_value = "/etc/vigil/vigil.toml")]
        config: PathBuf,
    },
    /// Check a config file and exit.
    Validate {
        /// Path to vigil.toml.
        #[arg(long, default_value = "/etc/vigil/vigil.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vigild=debug,vigil=debug"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config } => daemon::run(&config).await,
        Command::Validate { config } => {
            let schedules = daemon::validate(&config)?;
            for s in &schedules {
                println!(
                    "{:<40} {:<12} every {:<6} timeout {}",
                    s.name,
                    s.probe.probe_type(),
                    format_duration(s.interval),
                    format_duration(s.timeout)
                );
            }
            println!("{}: {} probe(s) OK", config.display(), schedules.len());
            Ok(())
        }
    }
}
