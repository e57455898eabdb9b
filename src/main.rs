use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fundgate::HealthStatus;
use fundgate::cli::commands::send::SendOptions;

#[derive(Parser)]
#[command(name = "fundgate")]
#[command(
    version,
    about = "Rate-limited, budget-capped, circuit-protected gateway for inference provider calls"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the global/project files
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show budget, rate limit and circuit breaker state
    Status {
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Check gateway health (exit code 2 when unhealthy)
    Health {
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Send one request through the gateway
    Send {
        #[arg(long, short, help = "User prompt")]
        prompt: String,
        #[arg(long, short, help = "System prompt")]
        system: Option<String>,
        #[arg(long, help = "Maximum output tokens")]
        max_tokens: Option<u32>,
        #[arg(long, help = "Sampling temperature (0.0-1.0)")]
        temperature: Option<f32>,
        #[arg(long, help = "Conversation id for per-conversation rate limiting")]
        conversation: Option<String>,
        #[arg(long, help = "Print usage, cost and metrics after the response")]
        stats: bool,
    },

    /// Circuit breaker intervention
    Circuit {
        #[command(subcommand)]
        action: CircuitAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CircuitAction {
    /// Force the circuit breaker to CLOSED
    Reset,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Write a starter configuration file
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mfundgate encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = cli.config.as_deref();
    let rt = Runtime::new()?;

    match cli.command {
        Commands::Status { format } => {
            rt.block_on(fundgate::cli::commands::status::run(config, &format))?;
        }
        Commands::Health { format } => {
            let status = rt.block_on(fundgate::cli::commands::health::run(config, &format))?;
            if status == HealthStatus::Unhealthy {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Send {
            prompt,
            system,
            max_tokens,
            temperature,
            conversation,
            stats,
        } => {
            rt.block_on(fundgate::cli::commands::send::run(SendOptions {
                config: cli.config.clone(),
                prompt,
                system,
                max_tokens,
                temperature,
                conversation,
                stats,
            }))?;
        }
        Commands::Circuit { action } => match action {
            CircuitAction::Reset => {
                rt.block_on(fundgate::cli::commands::circuit::reset(config))?;
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                fundgate::cli::commands::config::show(config, &format)?;
            }
            ConfigAction::Path => {
                fundgate::cli::commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                fundgate::cli::commands::config::init(global, force)?;
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}
