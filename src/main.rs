use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use exlink::config::{NetworkConfig, PROXY_ENV};
use exlink::http::{Method, RequestDescriptor};
use exlink::NetworkManager;
use tokio::signal;
use tracing::{error, info};

/// Exlink - rate-limited HTTP calls and self-healing WebSocket streams.
#[derive(Parser, Debug)]
#[command(name = "exlink")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file; defaults apply when it does not exist
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue one HTTP request and print the decoded response as JSON
    Fetch(FetchArgs),
    /// Open a stream, optionally send a message, and print what arrives
    Stream(StreamArgs),
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Request URL
    url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header as `name:value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body; sent as JSON when it parses as JSON
    #[arg(short, long)]
    data: Option<String>,

    /// Rate-limit key this call consumes
    #[arg(long)]
    rate_limit_key: Option<String>,

    /// Disable retries
    #[arg(long)]
    no_retry: bool,
}

#[derive(Args, Debug)]
struct StreamArgs {
    /// Stream address (`ws://` or `wss://`)
    address: String,

    /// Topic name for the local subscription
    #[arg(short, long, default_value = "default")]
    topic: String,

    /// Message to send once connected (repeatable)
    #[arg(short, long)]
    send: Vec<String>,

    /// Exit after this many messages
    #[arg(short = 'n', long)]
    count: Option<usize>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e:#}");
            std::process::exit(1);
        }
    };

    config.logging.init();

    let manager = match NetworkManager::new(&config) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "Failed to initialise network manager");
            std::process::exit(1);
        }
    };

    let result = tokio::select! {
        result = run(&manager, cli.command) => result,
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    manager.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> anyhow::Result<NetworkConfig> {
    if path.exists() {
        return NetworkConfig::load(path)
            .with_context(|| format!("loading {}", path.display()));
    }

    let mut config = NetworkConfig::default();
    config.apply_proxy_override(std::env::var(PROXY_ENV).ok());
    config.validate()?;
    Ok(config)
}

async fn run(manager: &NetworkManager, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Fetch(args) => fetch(manager, args).await,
        Commands::Stream(args) => stream(manager, args).await,
    }
}

async fn fetch(manager: &NetworkManager, args: FetchArgs) -> anyhow::Result<()> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method {:?}", args.method))?;
    let mut request = RequestDescriptor::new(method, args.url).retry(!args.no_retry);

    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("header {header:?} is not in name:value form");
        };
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = args.data {
        request = match serde_json::from_str::<serde_json::Value>(&data) {
            Ok(json) => request.json(json),
            Err(_) => request.text(data),
        };
    }
    if let Some(key) = args.rate_limit_key {
        request = request.rate_limit_key(key);
    }

    let value = manager.request(&request).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn stream(manager: &NetworkManager, args: StreamArgs) -> anyhow::Result<()> {
    let connection = manager.connect(&args.address).await?;
    let mut messages = connection.subscribe(args.topic.as_str())?;
    info!(address = %args.address, topic = %args.topic, "Streaming");

    for message in args.send {
        connection.send(message).await?;
    }

    let mut seen = 0usize;
    while let Some(message) = messages.recv().await {
        println!("{}", serde_json::to_string(&message)?);
        seen += 1;
        if args.count.is_some_and(|limit| seen >= limit) {
            break;
        }
    }

    info!(received = seen, stats = ?connection.stats(), "Stream finished");
    Ok(())
}
