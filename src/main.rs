//! Clipfetch - supervised media download worker with live progress.

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipfetch::config::{ClipfetchConfig, ConfigError, ConfigLoader};
use clipfetch::display::ConsoleNotifier;
use clipfetch::notify::{JsonLinesNotifier, Notifier, UiCommand};
use clipfetch::supervisor::{JobOutcome, Quality, StartRequest, Supervisor};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum QualityArg {
    Low,
    Medium,
    High,
    Highest,
}

impl From<QualityArg> for Quality {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Low => Quality::Low,
            QualityArg::Medium => Quality::Medium,
            QualityArg::High => Quality::High,
            QualityArg::Highest => Quality::Highest,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "clipfetch",
    about = "Supervised media downloads with live progress",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use this configuration file instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL, reading pause/resume/cancel from stdin.
    Download {
        /// The URL to download.
        url: String,
        /// Quality selector.
        #[arg(short, long, value_enum, default_value_t = QualityArg::Highest)]
        quality: QualityArg,
        /// Destination folder.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Print events as JSON lines instead of colored text.
        #[arg(long)]
        json: bool,
        /// Also print raw worker output.
        #[arg(long)]
        show_output: bool,
    },
    /// Print the effective configuration.
    Config,
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<ClipfetchConfig, ConfigError> {
    path.map_or_else(ConfigLoader::new, ConfigLoader::with_path)
        .load()
}

/// Forward control words typed on stdin as UI commands.
///
/// Runs on a plain thread: a blocking stdin read cannot be cancelled and
/// would otherwise hold up runtime shutdown.
fn spawn_stdin_reader(tx: UnboundedSender<UiCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<UiCommand>() {
                Ok(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring input"),
            }
        }
    });
}

async fn download(
    config: ClipfetchConfig,
    request: StartRequest,
    json: bool,
    show_output: bool,
) -> ExitCode {
    let notifier: Box<dyn Notifier> = if json {
        Box::new(JsonLinesNotifier::new(std::io::stdout()))
    } else {
        Box::new(ConsoleNotifier::new(show_output))
    };

    let (tx, mut commands) = mpsc::unbounded_channel();
    spawn_stdin_reader(tx);

    let mut supervisor = Supervisor::new(config, notifier);
    let result = supervisor.run_job(request, &mut commands).await;
    let forced = supervisor.wait_released().await;
    if forced > 0 {
        tracing::warn!(forced, "Worker had to be terminated");
    }

    match result {
        Ok(JobOutcome::Completed | JobOutcome::Cancelled) => ExitCode::SUCCESS,
        Ok(JobOutcome::Failed { message }) => {
            tracing::debug!(%message, "Job failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Download {
            url,
            quality,
            output,
            json,
            show_output,
        } => {
            let request = StartRequest::new(url, quality.into(), output);
            tracing::info!(
                url = %request.url,
                quality = %request.quality,
                destination = %request.destination.display(),
                "Starting download"
            );
            download(config, request, json, show_output).await
        }
        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
    }
}
