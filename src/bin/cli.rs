use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use relay::{server, Session, SessionConfig};
use serde_json::Value;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(
    about = "Serverless cross-context state sync and event bus over named broadcast channels",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a relay server bridging channels across processes
    Serve {
        #[arg(short, long, default_value_t = 3900)]
        port: u16,

        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Per-room broadcast capacity
        #[arg(long, default_value_t = 256)]
        capacity: usize,
    },

    /// Join a channel and print every event and value update as it arrives
    Tap {
        /// Relay server URL, e.g. ws://localhost:3900/ws
        #[arg(short, long, default_value = "ws://127.0.0.1:3900/ws")]
        url: String,

        channel: String,
    },

    /// Set a key on a channel
    Set {
        #[arg(short, long, default_value = "ws://127.0.0.1:3900/ws")]
        url: String,

        channel: String,
        key: String,
        /// JSON value; bare words are treated as strings
        value: String,
    },

    /// Send an event on a channel
    Send {
        #[arg(short, long, default_value = "ws://127.0.0.1:3900/ws")]
        url: String,

        channel: String,
        event_type: String,
        /// JSON payload; bare words are treated as strings
        #[arg(default_value = "null")]
        data: String,
    },
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            capacity,
        } => {
            server::start(server::ServerConfig {
                bind,
                port,
                room_capacity: capacity,
            })
            .await?;
        }

        Commands::Tap { url, channel } => {
            let session = Session::join_relay_with(
                &url,
                &channel,
                SessionConfig {
                    notify_on_set: true,
                },
            )
            .await?;
            println!(
                "{} Joined {} via {}",
                "✓".green(),
                channel.bright_yellow(),
                url.bright_blue()
            );
            session.add_listener(|event| {
                println!(
                    "{} {} {}",
                    "→".bright_blue(),
                    event.event_type.bright_yellow(),
                    event.data
                );
            });
            tokio::signal::ctrl_c().await?;
            session.close();
            println!("{} Left {}", "✓".green(), channel.bright_yellow());
        }

        Commands::Set {
            url,
            channel,
            key,
            value,
        } => {
            let session = Session::join_relay(&url, &channel).await?;
            let status = session.set_value(key.as_str(), parse_value(&value));
            // Give the forwarder a moment to flush before closing.
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.close();
            println!("{} {} = {} ({:?})", "✓".green(), key.bright_yellow(), value, status);
        }

        Commands::Send {
            url,
            channel,
            event_type,
            data,
        } => {
            let session = Session::join_relay(&url, &channel).await?;
            let status = session.broadcast_event(&event_type, parse_value(&data));
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.close();
            println!(
                "{} sent event: {} data: {} ({:?})",
                "✓".green(),
                event_type.bright_yellow(),
                data,
                status
            );
        }
    }

    Ok(())
}
