//! Entry point: parse arguments, bind the listener, run the accept loop
//! until interrupted, then drop all directory state on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use aliasd::{acceptor, cli::Args, directory::Directory, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.host, args.port))?;

    let listener = acceptor::bind(addr)
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, push_timeout = ?args.push_timeout, "aliasd listening");

    let directory = Arc::new(Directory::new());

    tokio::select! {
        () = acceptor::run(listener, Arc::clone(&directory), args.push_timeout) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    directory.clear().await;
    info!("aliasd shut down");
    Ok(())
}
