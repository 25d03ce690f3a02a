//! The listening socket and its accept loop: bind once, then spawn one
//! [`protocol::handle_connection`] task per accepted connection for the
//! lifetime of the server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tracing::{debug, error, warn};

use crate::directory::Directory;
use crate::protocol;

/// Bind a `TcpListener` at `addr` with `SO_REUSEADDR` set, so a restarted
/// server does not have to wait out `TIME_WAIT` on its old socket.
pub fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

/// Accept connections on `listener` until it errors out, dispatching each
/// one to the protocol handler against the shared `directory`.
pub async fn run(listener: TcpListener, directory: Arc<Directory>, push_timeout: Duration) {
    let local_addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!(address = %local_addr, "accept loop started");

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let _ = stream.set_nodelay(true);
                let directory = Arc::clone(&directory);
                tokio::spawn(async move {
                    debug!(peer = %peer_addr, "connection accepted");
                    if let Err(e) =
                        protocol::handle_connection(stream, peer_addr, &directory, push_timeout)
                            .await
                    {
                        warn!(peer = %peer_addr, error = %e, "connection ended with an error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "accept failed; shutting down the accept loop");
                break;
            }
        }
    }
}
