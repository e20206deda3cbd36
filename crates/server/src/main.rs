// crates/server/src/main.rs
//! Quantline server binary.
//!
//! Binds the Axum HTTP server and serves analysis runs until shutdown.
//! The outbound mail transport is picked from the environment at startup:
//! SendGrid when `SENDGRID_API_KEY` and `EMAIL_FROM` are set, console echo
//! otherwise.

use std::net::{IpAddr, SocketAddr};

use anyhow::Result;
use clap::Parser;
use quantline_server::{create_app, mailer, AppState};
use tracing_subscriber::EnvFilter;

/// Default port for the server.
const DEFAULT_PORT: u16 = 8000;

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("QUANTLINE_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

#[derive(Debug, Parser)]
#[command(name = "quantline")]
#[command(about = "HTTP server for the quantline analysis pipeline")]
#[command(version)]
struct Args {
    /// Address to bind on.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on. Takes precedence over QUANTLINE_PORT and PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,quantline_server=info".into()),
        )
        .init();

    eprintln!("\n\u{1f4c8} quantline v{}\n", env!("CARGO_PKG_VERSION"));

    let state = AppState::new(mailer::from_env());
    let app = create_app(state);

    let port = args.port.unwrap_or_else(get_port);
    let addr = SocketAddr::from((args.host, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    eprintln!("  \u{2192} http://{}:{}\n", args.host, port);

    axum::serve(listener, app).await?;

    Ok(())
}
