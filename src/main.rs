use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hostbook::{Book, Config, Error, Result, Server, SystemNetifs};

#[derive(Parser)]
#[command(name = "hostbook")]
#[command(author, version, about = "DHCPv4 and DNS from a static inventory", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve DHCP and DNS (the default).
    Run,
    /// Compile and validate the inventory, then exit.
    Check,
}

fn load_book(config_path: &PathBuf) -> Result<Book> {
    let config = Config::load(config_path)?;
    Book::from_config(&config, &SystemNetifs)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => {
            let book = load_book(&cli.config)?;
            info!(
                networks = book.v4_networks.len(),
                machines = book.machines.len(),
                "inventory is valid"
            );
            Ok(())
        }
        Commands::Run => run(&cli.config).await,
    }
}

async fn run(config_path: &PathBuf) -> Result<()> {
    info!(config = %config_path.display(), "starting");
    let book = load_book(config_path)?;

    let (mut server, mut errors) = Server::from_book(book);
    server.start();

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("terminated, shutting down");
                break;
            }
            _ = sighup.recv() => {
                info!("reloading inventory");
                match load_book(config_path) {
                    Ok(book) => {
                        if let Err(reload_error) = server.reload(book) {
                            error!("reload rejected: {reload_error}");
                        }
                    }
                    Err(compile_error) => {
                        error!("reload failed, keeping current inventory: {compile_error}");
                    }
                }
            }
            // Listeners recover on their own; runtime errors are only
            // surfaced to the operator.
            Some(runtime_error) = errors.recv() => {
                match runtime_error {
                    Error::WrongAddressRequested { .. } => warn!("{runtime_error}"),
                    listener_error => error!("{listener_error}"),
                }
            }
        }
    }

    server.stop().await;
    Ok(())
}
