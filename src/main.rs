//! hookwire CLI - serves the local RPC bridge.
//!
//! This is the main binary entry point. See the `hookwire` library for the
//! core functionality.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hookwire::logging::sanitize_name;
use hookwire::{BadgeColor, Config, Engine, Hook, HookName, OriginPolicy, Transport, WsServer};

const WS_ENGINE_NAME: &str = "WebSocket";
#[cfg(unix)]
const IPC_ENGINE_NAME: &str = "IPC socket";

// CLI
#[derive(Parser)]
#[command(name = "hookwire")]
#[command(version)]
#[command(about = "Local RPC bridge for desktop-client RPC packets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the enabled transports and serve until Ctrl-C
    Serve {
        /// Do not start the WebSocket transport
        #[arg(long)]
        no_websocket: bool,
        /// Do not start the IPC socket transport
        #[arg(long)]
        no_socket: bool,
        /// Additional allowed origin (exact or glob); repeatable
        #[arg(long = "origin", value_name = "PATTERN")]
        origins: Vec<String>,
        /// Log every accepted packet
        #[arg(long)]
        log_messages: bool,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Register a hook on every kind that logs the packet and lets it through.
fn register_message_logger(engine: &Engine) -> Result<()> {
    for kind in HookName::ALL {
        let hook = Hook::new(move |message, origin| async move {
            log::info!(
                "{kind} nonce={} origin={} args={}",
                message.nonce,
                origin.as_deref().unwrap_or("-"),
                serde_json::Value::Object(message.args.clone())
            );
            Ok(None)
        });
        engine.add_hook(kind, hook)?;
    }
    Ok(())
}

async fn serve(config: Config, log_messages: bool) -> Result<()> {
    let mut transports: Vec<Box<dyn Transport>> = Vec::new();

    if config.websocket.enabled {
        let policy = OriginPolicy::new(&config.websocket.allowed_origins)?;
        let engine = Engine::builder(WS_ENGINE_NAME)
            .logging(config.logger_config(BadgeColor::Blue))
            .build();
        let server = WsServer::start(engine, config.ws_ports(), policy).await?;
        println!("WebSocket listening on ws://127.0.0.1:{}", server.port()?);
        transports.push(Box::new(server));
    }

    #[cfg(unix)]
    {
        if config.socket.enabled {
            let dir = config
                .socket
                .dir
                .clone()
                .unwrap_or_else(hookwire::transport::socket::default_socket_dir);
            let engine = Engine::builder(IPC_ENGINE_NAME)
                .logging(config.logger_config(BadgeColor::Magenta))
                .build();
            let server = hookwire::SocketServer::start(engine, config.socket_indices(), &dir).await?;
            println!("IPC socket listening on {}", server.path()?.display());
            transports.push(Box::new(server));
        }
    }

    if transports.is_empty() {
        anyhow::bail!("No transport enabled");
    }

    if log_messages {
        for transport in &transports {
            register_message_logger(transport.engine())?;
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("Shutting down...");

    for transport in &transports {
        if let Err(e) = transport.destroy().await {
            log::error!("Failed to destroy {} transport: {e}", transport.label());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Engine debug output is gated by the configured debug filter; let those
    // targets through at debug level.
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.filter(Some(&sanitize_name(WS_ENGINE_NAME)), log::LevelFilter::Debug);
    #[cfg(unix)]
    builder.filter(Some(&sanitize_name(IPC_ENGINE_NAME)), log::LevelFilter::Debug);
    builder.init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            no_websocket,
            no_socket,
            origins,
            log_messages,
        } => {
            let mut config = Config::load()?;
            if no_websocket {
                config.websocket.enabled = false;
            }
            if no_socket {
                config.socket.enabled = false;
            }
            config.websocket.allowed_origins.extend(origins);
            serve(config, log_messages).await?;
        }
        Commands::Config { save } => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
                println!("Saved to {}", Config::config_dir()?.join("config.json").display());
            }
        }
    }

    Ok(())
}
