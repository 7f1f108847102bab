use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use release_drift::batch::BatchRunner;
use release_drift::config::{self, Config};
use release_drift::report::{Summary, write_commands, write_report};

#[derive(Parser)]
#[command(name = "release-drift")]
#[command(version, about = "Finds catalog packages that lag behind their upstream releases")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate every package of a catalog file
    Run {
        /// JSON configuration file; defaults plus environment tokens when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// JSON array of catalog entries
        #[arg(long)]
        catalog: PathBuf,
        /// JSON-lines report destination; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also write one `komac update` command per package that should be updated
        #[arg(long)]
        commands: Option<PathBuf>,
    },
}

/// Logs to stderr, and as JSON lines to the log file in the data directory.
/// `RUST_LOG` overrides the default `info` level.
fn init_tracing() -> anyhow::Result<WorkerGuard> {
    let log_path = config::log_path();
    let log_dir = log_path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;

    let file_name = log_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "release-drift.log".to_string());
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(fmt::layer().json().with_writer(file_writer))
        .init();

    Ok(guard)
}

fn create_file(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

async fn run(
    config: Config,
    catalog: &Path,
    output: Option<&Path>,
    commands: Option<&Path>,
) -> anyhow::Result<()> {
    let entries = config::load_catalog(catalog)
        .with_context(|| format!("Failed to load catalog {}", catalog.display()))?;
    info!("Loaded {} catalog entries", entries.len());

    let runner = BatchRunner::from_config(&config, &entries)?;
    let verdicts = runner.run(&entries).await;

    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(create_file(path)?),
        None => Box::new(std::io::stdout().lock()),
    };
    write_report(writer, &verdicts)?;

    if let Some(path) = commands {
        let written = write_commands(create_file(path)?, &verdicts)?;
        info!("Wrote {} update commands to {}", written, path.display());
    }

    Summary::from_verdicts(&verdicts).log();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing()?;

    match cli.command {
        Command::Run {
            config,
            catalog,
            output,
            commands,
        } => {
            let config = Config::load(config.as_deref()).context("Invalid configuration")?;

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(run(
                    config,
                    &catalog,
                    output.as_deref(),
                    commands.as_deref(),
                ))
        }
    }
}
