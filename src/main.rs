use clap::Parser;
use tracing_subscriber::EnvFilter;

use school_api::{app, config};

#[derive(Parser)]
#[command(name = "school-api")]
#[command(about = "Role-gated school management API")]
#[command(version)]
struct Args {
    #[arg(long, help = "Port to listen on (overrides API_PORT)")]
    port: Option<u16>,

    #[arg(long, help = "Environment preset: development, staging or production")]
    env: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up secrets and the bootstrap admin
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match args.env.as_deref() {
        Some(name) => config::AppConfig::for_environment(name),
        None => config::config().clone(),
    };
    if let Some(port) = args.port {
        config.api.port = port;
    }
    tracing::info!("Starting School API in {:?} mode", config.environment);

    let port = config.api.port;
    let state = app::build_state(config).await?;
    let router = app::router(state);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("School API listening on http://{}", bind_addr);

    axum::serve(listener, router).await?;
    Ok(())
}
