use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the relay server (HTTP + WebSocket on one port).
    Serve {
        /// Config file path (default: TETHER_CONFIG_PATH or ~/.tether/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// WebSocket and HTTP port (default from config or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Connect as a primary: prints the assigned session code, then every
    /// relayed frame (diagnostic client).
    Host {
        /// Config file path (default: TETHER_CONFIG_PATH or ~/.tether/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Relay WebSocket URL (default derived from config, e.g. ws://127.0.0.1:3000/ws)
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },

    /// Connect as a secondary with a session code and send stdin lines
    /// through the relay (diagnostic client). `/start` sends a control
    /// command; raw JSON objects pass through; anything else becomes a
    /// state update carrying the line.
    Join {
        /// Config file path (default: TETHER_CONFIG_PATH or ~/.tether/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Relay WebSocket URL (default derived from config, e.g. ws://127.0.0.1:3000/ws)
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Session code shown by the primary
        #[arg(long, value_name = "CODE")]
        code: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("tether {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Host { config, url }) => {
            if let Err(e) = run_host(config, url).await {
                log::error!("host failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Join { config, url, code }) => {
            if let Err(e) = run_join(config, url, code).await {
                log::error!("join failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.relay.port = p;
    }
    log::info!(
        "starting relay on {}:{}",
        config.relay.bind,
        config.relay.port
    );
    lib::relay::run_relay(config).await
}

/// Resolve the relay WebSocket endpoint: explicit --url wins, otherwise the
/// config's bind/port (an any-interface bind is dialed via loopback).
fn relay_ws_url(
    config_path: Option<std::path::PathBuf>,
    url: Option<String>,
) -> anyhow::Result<String> {
    if let Some(url) = url {
        return Ok(url);
    }
    let (config, _) = lib::config::load_config(config_path)?;
    let host = match config.relay.bind.trim() {
        "0.0.0.0" | "::" | "" => "127.0.0.1",
        other => other,
    };
    Ok(format!("ws://{}:{}/ws", host, config.relay.port))
}

async fn run_host(
    config_path: Option<std::path::PathBuf>,
    url: Option<String>,
) -> anyhow::Result<()> {
    let base = relay_ws_url(config_path, url)?;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("{}?type=primary", base)).await?;

    while let Some(msg) = ws.next().await {
        let msg = msg?;
        let Message::Text(text) = msg else { continue };
        let Ok(frame): Result<serde_json::Value, _> = serde_json::from_str(&text) else {
            continue;
        };
        match frame.get("type").and_then(|t| t.as_str()) {
            Some("sessionCode") => {
                let code = frame
                    .get("sessionCode")
                    .and_then(|c| c.as_str())
                    .unwrap_or("?");
                println!("session code: {}", code);
                println!("waiting for a secondary to join...");
            }
            Some("status") => {
                let count = frame
                    .get("secondariesConnected")
                    .and_then(|c| c.as_u64())
                    .unwrap_or(0);
                println!("secondaries connected: {}", count);
            }
            Some("error") => {
                let message = frame.get("message").and_then(|m| m.as_str()).unwrap_or("");
                eprintln!("relay error: {}", message);
                break;
            }
            _ => {
                println!("< {}", text);
            }
        }
    }
    println!("connection closed");
    Ok(())
}

async fn run_join(
    config_path: Option<std::path::PathBuf>,
    url: Option<String>,
    code: String,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let base = relay_ws_url(config_path, url)?;
    let (ws, _) =
        tokio_tungstenite::connect_async(format!("{}?type=secondary&session={}", base, code))
            .await?;
    let (mut write, mut read) = ws.split();

    // Anything the server pushes back (errors, future primary->secondary
    // traffic) is printed as it arrives.
    let reader = tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            let Ok(Message::Text(text)) = msg else { break };
            println!("< {}", text);
        }
        println!("connection closed");
    });

    println!("joined session {}; /start begins, /exit quits", code);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        let frame = if input.eq_ignore_ascii_case("/start") {
            serde_json::json!({ "type": "controlCommand" }).to_string()
        } else if let Ok(value) = serde_json::from_str::<serde_json::Value>(input) {
            if value.is_object() {
                value.to_string()
            } else {
                serde_json::json!({ "type": "stateUpdate", "text": input }).to_string()
            }
        } else {
            serde_json::json!({ "type": "stateUpdate", "text": input }).to_string()
        };
        if write.send(Message::Text(frame)).await.is_err() {
            break;
        }
    }

    reader.abort();
    Ok(())
}
