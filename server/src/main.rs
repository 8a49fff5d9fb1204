mod attendance;
mod config;
mod http;
mod pages;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use platform_obs::init_tracing;
use tracing::{info, warn};

use crate::{
    config::{AppConfig, DirectorySettings},
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(name = "meeting-registration", version, about = "Meeting registration desk")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server.
    Serve(ServeCommand),
    /// Inspect or maintain the employee directory cache.
    #[command(subcommand)]
    Directory(DirectoryCommand),
    /// Print an argon2 hash for the admin users file.
    #[command(name = "hash-password")]
    HashPassword {
        #[arg(value_name = "SECRET")]
        secret: String,
    },
}

#[derive(Subcommand, Debug)]
enum DirectoryCommand {
    /// Reparse the CSV source and rewrite the snapshot.
    Warm,
    /// Resolve an employee id the way the registration form does.
    Lookup {
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Delete the persisted snapshot.
    Clear,
}

#[derive(Args, Debug)]
struct ServeCommand {
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

impl From<ServeCommand> for ServeConfig {
    fn from(value: ServeCommand) -> Self {
        ServeConfig::new(value.host, value.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let mut tracing_guard = init_tracing(config::observability())?;
    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Serve(cmd) => run_server(cmd).await,
        Command::Directory(action) => run_directory(action),
        Command::HashPassword { secret } => platform_authn::hash_secret(&secret)
            .map(|hash| println!("{hash}"))
            .map_err(Into::into),
    };
    // flush batched spans once the server has drained
    if let Err(err) = tracing_guard.shutdown() {
        warn!(error = %err, "span export did not shut down cleanly");
    }
    outcome
}

async fn run_server(cmd: ServeCommand) -> Result<()> {
    let config = Arc::new(AppConfig::load()?);
    let state = AppState::from_config(config)?;
    http::serve(cmd.into(), state).await
}

fn run_directory(action: DirectoryCommand) -> Result<()> {
    let settings = DirectorySettings::load()?;
    let resolver = settings.resolver();
    match action {
        DirectoryCommand::Warm => {
            resolver.cache().clear().with_context(|| {
                format!("failed to remove {}", settings.snapshot.display())
            })?;
            let directory = resolver.cache().get()?;
            info!(
                records = directory.len(),
                snapshot = %settings.snapshot.display(),
                "directory snapshot rebuilt"
            );
            println!("{} records", directory.len());
        }
        DirectoryCommand::Lookup { id } => {
            let lookup = resolver.lookup(&id)?;
            match lookup.found {
                Some(found) => println!(
                    "{}\t{}\t{}\t{}\t{}\t({:?})",
                    found.record.id,
                    found.record.name,
                    found.record.job_title,
                    found.record.unit_short,
                    found.record.unit_full,
                    found.rule,
                ),
                None => println!("{id}: not found"),
            }
            info!(
                tier = lookup.tier.as_str(),
                records = lookup.directory_size,
                load_ms = lookup.load_time.as_secs_f64() * 1000.0,
                search_ms = lookup.search_time.as_secs_f64() * 1000.0,
                "lookup finished"
            );
        }
        DirectoryCommand::Clear => {
            resolver.cache().clear().with_context(|| {
                format!("failed to remove {}", settings.snapshot.display())
            })?;
            info!(snapshot = %settings.snapshot.display(), "directory snapshot cleared");
        }
    }
    Ok(())
}
