mod authority;
mod clients;
mod config;
mod relay;

use anyhow::Result;
use clap::Parser;

use config::ServerConfig;
use relay::RelayServer;

#[derive(Parser)]
#[command(name = "tandem-server")]
#[command(about = "Authoritative relay for tandem sync sessions")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = tandem::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(
        long,
        default_value_t = 5.0,
        value_parser = parse_seconds,
        help = "Seconds of silence before a client is dropped"
    )]
    client_timeout: f32,
}

fn parse_seconds(value: &str) -> Result<f32, String> {
    let secs: f32 = value.parse().map_err(|e| format!("{}", e))?;
    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(format!("timeout must be a non-negative number, got {}", value))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        max_clients: args.max_clients,
        client_timeout_secs: args.client_timeout,
        ..Default::default()
    };

    let mut server = RelayServer::bind(&bind_addr, config).await?;
    log::info!("Server started on {}", server.local_addr()?);

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await;

    log::info!("Server shutting down");
    Ok(())
}
