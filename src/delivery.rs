//! Outbound delivery: opening a fresh connection to a recipient's advertised
//! endpoint and pushing a `SEND_MESSAGE`, including the flush of a recipient's
//! pending queue right after a successful `CONNECT`.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::directory::{Directory, QueuedMessage};
use crate::framing;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connect to recipient timed out")]
    ConnectTimeout,
    #[error("push timed out")]
    PushTimeout,
    #[error(transparent)]
    Framing(#[from] framing::FramingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Open a fresh connection to `(ip, port)` and write one `SEND_MESSAGE` push.
/// No reply is read; the connection is dropped once the tokens are written.
pub async fn push_message(
    ip: Ipv4Addr,
    port: u16,
    source_alias: &str,
    msg_id: u32,
    body: &str,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let addr = SocketAddr::from((ip, port));

    let mut stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(DeliveryError::Io(e)),
        Err(_) => return Err(DeliveryError::ConnectTimeout),
    };

    // Low-latency push: this connection carries a single small message and
    // closes immediately, so Nagle's algorithm only adds delay.
    let _ = stream.set_nodelay(true);

    let push = async {
        framing::write_token(&mut stream, "SEND_MESSAGE").await?;
        framing::write_token(&mut stream, source_alias).await?;
        framing::write_token(&mut stream, &msg_id.to_string()).await?;
        framing::write_token(&mut stream, body).await?;
        Ok::<(), framing::FramingError>(())
    };

    match tokio::time::timeout(timeout, push).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(DeliveryError::Framing(e)),
        Err(_) => Err(DeliveryError::PushTimeout),
    }
}

/// Push every message in `pending` (captured at the moment of a successful
/// `CONNECT`, in arrival order) to `(ip, port)`, removing each one from the
/// live directory queue as soon as its push succeeds.
///
/// A push that fails is logged and left in the queue; indices of messages
/// still ahead of it in the live queue are adjusted for the deletions that
/// already happened in this flush, since positions compact as we go.
pub async fn flush_pending(
    directory: &Directory,
    alias: &str,
    ip: Ipv4Addr,
    port: u16,
    pending: Vec<QueuedMessage>,
    timeout: Duration,
) {
    let mut deleted = 0usize;
    for (original_index, message) in pending.into_iter().enumerate() {
        match push_message(
            ip,
            port,
            &message.source_alias,
            message.msg_id,
            &message.body,
            timeout,
        )
        .await
        {
            Ok(()) => {
                let live_index = original_index - deleted;
                directory.delete_message(alias, live_index).await;
                deleted += 1;
                debug!(alias, msg_id = message.msg_id, "flushed queued message");
            }
            Err(e) => {
                warn!(
                    alias,
                    msg_id = message.msg_id,
                    error = %e,
                    "push to recipient failed; message remains queued"
                );
            }
        }
    }
}
