//! portal-notify - headless client for the exam portal's notification engine.
//!
//! See the `portal_notify` library for the core functionality.

// Rust guideline compliant 2026-02

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use portal_notify::config::ConfigEdit;
use portal_notify::{Config, NotificationService, ReadOutcome, SessionCredentials, StartOutcome};

#[derive(Parser)]
#[command(name = "portal-notify")]
#[command(version)]
#[command(about = "Live notification client for the exam portal")]
struct Cli {
    /// Bearer token (overrides PORTAL_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the hub and log every change until Ctrl-C
    Watch,
    /// Print the role-selected notification history
    History,
    /// Mark one notification read
    MarkRead { id: String },
    /// Mark every unread notification read
    MarkAllRead,
    /// Update the saved configuration file
    Config {
        /// REST base URL, e.g. https://host/api
        #[arg(long)]
        api_url: Option<String>,
        /// Hub endpoint, e.g. https://host/notificationHub
        #[arg(long)]
        hub_url: Option<String>,
        /// Maximum number of notifications kept
        #[arg(long)]
        capacity: Option<usize>,
        /// Comma-separated reconnect delays in milliseconds
        #[arg(long, value_delimiter = ',')]
        reconnect_delays_ms: Option<Vec<u64>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    // Editing the saved config needs no session
    let command = match cli.command {
        Commands::Config {
            api_url,
            hub_url,
            capacity,
            reconnect_delays_ms,
        } => {
            let edit = ConfigEdit {
                api_url,
                hub_url,
                capacity,
                reconnect_delays_ms,
            };
            let path = Config::edit_in_dir(&Config::config_dir()?, edit)?;
            println!("Saved {}", path.display());
            return Ok(());
        }
        command => command,
    };

    let mut config = Config::load()?;
    if let Some(token) = cli.token {
        config.token = Some(token);
    }
    let Some(token) = config.token.clone() else {
        bail!("No token configured. Pass --token or set PORTAL_TOKEN.");
    };

    let service = NotificationService::new(&config, SessionCredentials::with_token(token))?;

    match command {
        Commands::Watch => watch(&service).await?,
        Commands::History => {
            service.load_history().await;
            print_notifications(&service);
        }
        Commands::MarkRead { id } => {
            service.load_history().await;
            report(service.mark_as_read(&id).await)?;
        }
        Commands::MarkAllRead => {
            service.load_history().await;
            report(service.mark_all_as_read().await)?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

async fn watch(service: &NotificationService) -> Result<()> {
    let mut list = service.subscribe();
    let mut unread = service.watch_unread();
    let mut state = service.watch_state();

    if service.connect().await == StartOutcome::Failed {
        log::warn!("Initial connection failed; history only");
    }
    print_notifications(service);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(()) = list.changed() => {
                if let Some(latest) = list.borrow_and_update().first() {
                    println!("[{}] {} {}", latest.kind, latest.timestamp.to_rfc3339(), latest.message);
                }
            }
            Ok(()) = unread.changed() => {
                log::info!("Unread: {}", *unread.borrow_and_update());
            }
            Ok(()) = state.changed() => {
                log::info!("Connection: {}", *state.borrow_and_update());
            }
        }
    }

    println!("Shutting down...");
    service.logout().await;
    Ok(())
}

fn print_notifications(service: &NotificationService) {
    let notifications = service.notifications();
    if notifications.is_empty() {
        println!("No notifications.");
        return;
    }
    for n in &notifications {
        let marker = if n.is_read { ' ' } else { '*' };
        println!(
            "{marker} {:<8} {:<24} {} {}",
            n.kind.as_str(),
            n.id.as_deref().unwrap_or("-"),
            n.timestamp.format("%Y-%m-%d %H:%M"),
            n.message
        );
    }
    println!("{} unread", service.unread_count());
}

fn report(outcome: ReadOutcome) -> Result<()> {
    match outcome {
        ReadOutcome::Confirmed => {
            println!("Marked read.");
            Ok(())
        }
        ReadOutcome::Skipped => bail!("Nothing to mark"),
        ReadOutcome::RolledBack => bail!("Backend rejected the change; state restored"),
    }
}
