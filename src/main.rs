//! Ticket Authority command line.
//!
//! Loads the configuration, wires the central authentication service and runs
//! one administrative command against it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use sso_ticket_authority::authentication::{AuthenticationTransaction, Credential};
use sso_ticket_authority::ticket::{spawn_cleanup_task, Service};
use sso_ticket_authority::{
    CentralAuthenticationService, SystemClock, TicketAuthorityConfig, TicketAuthorityConfigJson,
    TracingAuditTrail,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "ticket-authority")]
#[command(about = "Single sign-on ticket authority")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, env = "TICKET_AUTHORITY_CONFIG")]
    config: Option<PathBuf>,

    /// Partial configuration applied on top of the main file
    #[arg(long, env = "TICKET_AUTHORITY_OVERLAY")]
    overlay: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, env = "TICKET_AUTHORITY_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the registered ticket definitions
    Catalog,

    /// Log in and print the ticket-granting ticket with a validated assertion
    Login {
        #[arg(long)]
        username: String,

        #[arg(long, env = "TICKET_AUTHORITY_PASSWORD")]
        password: String,

        #[arg(long, default_value = "https://localhost/")]
        service: String,
    },

    /// Remove dead tickets from the registry once
    Sweep,

    /// Sweep periodically until interrupted
    Watch,
}

fn load_config(args: &Args) -> Result<TicketAuthorityConfig> {
    let mut config = match args.config {
        Some(ref path) => TicketAuthorityConfig::load(path)?,
        None => {
            info!("No configuration file given, using defaults");
            TicketAuthorityConfig::default()
        }
    };

    if let Some(ref path) = args.overlay {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read overlay: {:?}", path))?;
        let overlay: TicketAuthorityConfigJson = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse overlay: {:?}", path))?;
        overlay.apply_to(&mut config);
        config.validate()?;
        info!(path = %path.display(), "Configuration overlay applied");
    }

    Ok(config)
}

/// Directives for the binary and the library it drives.
fn log_filter(level: &str) -> String {
    format!(
        "{}={level},sso_ticket_authority={level},audit=info",
        env!("CARGO_CRATE_NAME")
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(log_level))
        .json()
        .init();

    info!("Starting Ticket Authority");

    let config = load_config(&args)?;
    let cas = CentralAuthenticationService::from_config(
        &config,
        Arc::new(SystemClock),
        Arc::new(TracingAuditTrail),
    )?;

    match args.command {
        Command::Catalog => {
            let definitions = cas.tickets().catalog().all_definitions();
            println!("{}", serde_json::to_string_pretty(&definitions)?);
        }
        Command::Login {
            username,
            password,
            service,
        } => {
            let service = Service::new(service);
            let transaction = AuthenticationTransaction::single(Credential::username_password(
                username, password,
            ))
            .with_service(service.clone());

            let tgt = cas.create_ticket_granting_ticket(&transaction).await?;
            let st = cas.grant_service_ticket(&tgt.id, &service)?;
            let assertion = cas.validate_service_ticket(&st.id, &service)?;
            info!(tgt = %tgt.id, st = %st.id, "Login succeeded");
            let output = serde_json::json!({
                "ticketGrantingTicket": tgt,
                "assertion": assertion,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Sweep => {
            let removed = cas.tickets().sweep()?;
            info!(removed, remaining = cas.tickets().count()?, "Sweep completed");
        }
        Command::Watch => {
            let interval = config.registry.cleanup_interval_secs;
            info!(interval_secs = interval, "Starting ticket cleanup task");
            let handle = spawn_cleanup_task(Arc::clone(cas.tickets()), interval);

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            handle.abort();
            info!("Shutting down");
        }
    }

    Ok(())
}
