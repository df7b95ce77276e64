//! cloud-link CLI
//!
//! Operator tool speaking to the controller as a managed server would: list
//! resources, move users, publish and follow channels, toggle readiness, and
//! watch cloud notifications while keeping a heartbeat running.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use cloud_link::{ClientConfig, Cloud, PowerEvent, ReadyEvent, TransferTarget, observer_fn};

/// Talk to the cloud controller
#[derive(Parser, Debug)]
#[command(name = "cloud-link")]
#[command(about = "Client for the cloud controller")]
struct Cli {
    /// Controller address, e.g. http://127.0.0.1:8080
    #[arg(long, env = "CONTROLLER_ADDRESS")]
    address: Option<String>,

    /// Token identifying this server
    #[arg(long, env = "SERVER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// File holding the PEM certificate of the controller
    #[arg(long, env = "CONTROLLER_CERTIFICATE_FILE")]
    certificate_file: Option<PathBuf>,

    /// Read listings and versions from the controller, bypassing the cache
    #[arg(long, global = true)]
    fresh: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show controller versions
    Versions,
    /// List servers
    Servers,
    /// List groups
    Groups,
    /// List users
    Users,
    /// Show the server a user is on
    Whereis {
        /// User id
        user: Uuid,
    },
    /// Move users to another server
    Transfer(TransferArgs),
    /// Publish a text message on a channel
    Publish {
        /// Channel name
        channel: String,
        /// Message text
        text: String,
    },
    /// Print messages published on a channel until interrupted
    Subscribe {
        /// Channel name
        channel: String,
    },
    /// Mark this server as ready or not ready
    Ready {
        /// New readiness
        #[arg(action = clap::ArgAction::Set)]
        ready: bool,
    },
    /// Keep a heartbeat running and log notifications until interrupted
    Watch,
}

#[derive(Args, Debug)]
struct TransferArgs {
    /// Users to move
    #[arg(required = true)]
    users: Vec<Uuid>,

    /// Target server id
    #[arg(long, conflicts_with = "group")]
    server: Option<Uuid>,

    /// Target group; the controller picks the server
    #[arg(long)]
    group: Option<String>,
}

impl TransferArgs {
    fn target(&self) -> TransferTarget {
        match (&self.server, &self.group) {
            (Some(server), _) => TransferTarget::Server(*server),
            (None, Some(group)) => TransferTarget::Group(group.clone()),
            (None, None) => TransferTarget::Fallback,
        }
    }
}

fn load_certificate(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read certificate {}", path.display()))
}

impl Cli {
    fn config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::from_env();
        if let Some(address) = &self.address {
            config = config.address(address.clone());
        }
        if let Some(token) = &self.token {
            config = config.token(token.clone());
        }
        if let Some(path) = &self.certificate_file {
            config = config.certificate(load_certificate(path)?);
        }
        Ok(config)
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, stdout is reserved for command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let cloud = Cloud::setup(cli.config()?)
        .await
        .inspect_err(|e| tracing::error!("Failed to connect to controller: {}", e))?;
    let resources = if cli.fresh {
        cloud.resources().uncached()
    } else {
        cloud.resources()
    };

    match cli.command {
        Command::Versions => {
            let versions = resources.versions().await?;
            if !versions.is_compatible() {
                tracing::warn!(
                    controller = versions.protocol,
                    client = cloud_link::PROTOCOL_VERSION,
                    "controller speaks a different protocol revision"
                );
            }
            print_json(&versions)?;
        }
        Command::Servers => print_json(&resources.servers().await?)?,
        Command::Groups => print_json(&resources.groups().await?)?,
        Command::Users => print_json(&resources.users().await?)?,
        Command::Whereis { user } => print_json(&resources.server_of_user(user).await?)?,
        Command::Transfer(args) => {
            let target = args.target();
            let accepted = cloud
                .transfers()
                .transfer_users(args.users.iter().copied(), target)
                .await?;
            println!("{accepted}/{} users accepted", args.users.len());
        }
        Command::Publish { channel, text } => {
            let reached = cloud.channels().publish_text(channel, &text).await?;
            println!("{reached} subscribers reached");
        }
        Command::Subscribe { channel } => {
            let (handle, mut messages) = cloud.channels().stream_bytes(channel);
            let shutdown = shutdown_signal();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    message = messages.next() => match message {
                        Some(Ok(message)) => {
                            println!("[{}] {}", message.timestamp_ms, message.text());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => break,
                    },
                }
            }
            handle.cancel();
        }
        Command::Ready { ready } => {
            cloud.local().set_ready(ready).await?;
            println!("ready = {ready}");
        }
        Command::Watch => {
            let heart = cloud.start_heart();
            let notifications = cloud.notifications();
            let power = notifications.power_events(observer_fn(|event: PowerEvent| {
                tracing::info!(
                    state = ?event.state,
                    server = %event.name,
                    node = %event.node,
                    "power event"
                );
            }));
            let ready = notifications.ready_events(observer_fn(|event: ReadyEvent| {
                tracing::info!(ready = event.ready, server = %event.name, "ready event");
            }));

            shutdown_signal().await;

            power.cancel();
            ready.cancel();
            heart.stop().await;
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
