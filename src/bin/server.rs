//! Relay Server Binary
//!
//! Usage: mtrelay-server [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>  Path to configuration file
//!   -g, --generate       Print a sample configuration
//!   -h, --help           Print help information

use std::env;

use mtrelay::proxy::config::{ProxyConfigFile, UserEntry};
use mtrelay::{ProxyConfig, Relay};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing — respects RUST_LOG env var (e.g. RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "-h" | "--help" => {
            print_usage();
        }
        "-g" | "--generate" => {
            generate_config()?;
        }
        "-c" | "--config" => {
            if args.len() < 3 {
                eprintln!("Error: --config requires a file path");
                return Ok(());
            }
            run_relay(&args[2]).await?;
        }
        _ => {
            eprintln!("Unknown option: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"mtrelay - disguised-handshake relay

USAGE:
    mtrelay-server [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    -g, --generate          Print a sample configuration
    -h, --help              Print help information

EXAMPLES:
    Generate a starter configuration:
        mtrelay-server --generate > relay.toml

    Run the relay:
        mtrelay-server --config relay.toml
"#
    );
}

fn generate_config() -> anyhow::Result<()> {
    let mut file = ProxyConfigFile::from_config(&ProxyConfig::default());
    file.users.push(UserEntry {
        name: "example".into(),
        secret: hex::encode(rand::random::<[u8; 16]>()),
    });

    println!("# mtrelay configuration");
    println!("# Secrets are hex-encoded; users are tried in listed order.");
    println!();
    println!("{}", toml::to_string_pretty(&file)?);

    Ok(())
}

async fn run_relay(config_path: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(config_path)?;
    let file: ProxyConfigFile = toml::from_str(&content)?;
    let config = file.to_config()?;

    config
        .validate()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    tracing::info!("users configured: {}", config.users.len());
    if config.fast_mode {
        tracing::info!("fast mode on: backend leg reuses the client session key");
    }
    if let Some(ipv4) = &config.advertised_ipv4 {
        tracing::info!("advertised IPv4 address: {}", ipv4);
    }
    if let Some(ipv6) = &config.advertised_ipv6 {
        tracing::info!("advertised IPv6 address: {}", ipv6);
    }

    let relay = Relay::new(config);
    tokio::select! {
        result = relay.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }

    Ok(())
}
