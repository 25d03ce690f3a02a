//! Per-connection command dispatcher.
//!
//! Each accepted connection carries exactly one command: an opcode token,
//! its operands, a reply, then the connection closes. This module owns the
//! opcode grammar and the translation between directory outcomes and the
//! wire's single-byte reply codes (see the design notes for the taxonomy).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::delivery;
use crate::directory::{
    ConnectOutcome, ConnectedUsersOutcome, Directory, DisconnectOutcome, RegisterOutcome,
    SendOutcome, UnregisterOutcome,
};
use crate::framing::{self, MAX_TOKEN_LEN};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown opcode {0:?}")]
    UnknownOpcode(String),
    #[error("peer address was not IPv4")]
    NonIpv4Peer,
    #[error(transparent)]
    Framing(#[from] framing::FramingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    Register,
    Unregister,
    Connect,
    Disconnect,
    Send,
    ConnectedUsers,
}

impl Opcode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "REGISTER" => Some(Self::Register),
            "UNREGISTER" => Some(Self::Unregister),
            "CONNECT" => Some(Self::Connect),
            "DISCONNECT" => Some(Self::Disconnect),
            "SEND" => Some(Self::Send),
            "CONNECTEDUSERS" => Some(Self::ConnectedUsers),
            _ => None,
        }
    }
}

fn peer_ipv4(addr: SocketAddr) -> Result<Ipv4Addr, ProtocolError> {
    match addr.ip() {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(v6) => v6.to_ipv4().ok_or(ProtocolError::NonIpv4Peer),
    }
}

/// Drive one accepted connection to completion: read the opcode, dispatch to
/// the matching handler, and let the connection close when this returns.
pub async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    directory: &Directory,
    push_timeout: Duration,
) -> Result<(), ProtocolError> {
    let peer_ip = peer_ipv4(peer_addr)?;
    let peer_port = peer_addr.port();

    let opcode_token = framing::read_token(&mut stream, MAX_TOKEN_LEN).await?;
    let opcode =
        Opcode::parse(&opcode_token).ok_or_else(|| ProtocolError::UnknownOpcode(opcode_token))?;

    match opcode {
        Opcode::Register => handle_register(&mut stream, peer_ip, peer_port, directory).await,
        Opcode::Unregister => handle_unregister(&mut stream, directory).await,
        Opcode::Connect => handle_connect(&mut stream, peer_ip, directory, push_timeout).await,
        Opcode::Disconnect => handle_disconnect(&mut stream, peer_ip, directory).await,
        Opcode::Send => handle_send(&mut stream, directory, push_timeout).await,
        Opcode::ConnectedUsers => handle_connected_users(&mut stream, directory).await,
    }
}

async fn handle_register(
    stream: &mut TcpStream,
    peer_ip: Ipv4Addr,
    peer_port: u16,
    directory: &Directory,
) -> Result<(), ProtocolError> {
    let name = framing::read_token(stream, MAX_TOKEN_LEN).await?;
    let alias = framing::read_token(stream, MAX_TOKEN_LEN).await?;
    let birth = framing::read_token(stream, MAX_TOKEN_LEN).await?;

    let outcome = directory
        .register(peer_ip, peer_port, &name, &alias, &birth)
        .await;
    let code = match outcome {
        RegisterOutcome::Ok => 0,
        RegisterOutcome::AliasExists => 1,
        RegisterOutcome::Invalid => 2,
    };
    info!(alias, code, "REGISTER");
    framing::write_code(stream, code).await?;
    Ok(())
}

async fn handle_unregister(
    stream: &mut TcpStream,
    directory: &Directory,
) -> Result<(), ProtocolError> {
    let alias = framing::read_token(stream, MAX_TOKEN_LEN).await?;

    let outcome = directory.unregister(&alias).await;
    let code = match outcome {
        UnregisterOutcome::Ok => 0,
        UnregisterOutcome::NotFound => 1,
    };
    info!(alias, code, "UNREGISTER");
    framing::write_code(stream, code).await?;
    Ok(())
}

async fn handle_connect(
    stream: &mut TcpStream,
    peer_ip: Ipv4Addr,
    directory: &Directory,
    push_timeout: Duration,
) -> Result<(), ProtocolError> {
    let alias = framing::read_token(stream, MAX_TOKEN_LEN).await?;
    let port_token = framing::read_token(stream, MAX_TOKEN_LEN).await?;

    // The original source never validates this operand; we give it a
    // well-defined outcome (bad input) instead of inheriting undefined
    // behavior from a malformed listen_port. See DESIGN.md.
    let Ok(listen_port) = port_token.parse::<u16>() else {
        warn!(alias, port_token, "CONNECT operand was not a valid port");
        framing::write_code(stream, 2).await?;
        return Ok(());
    };

    let outcome = directory.connect(peer_ip, listen_port, &alias).await;
    let (code, pending) = match outcome {
        ConnectOutcome::Ok(pending) => (0, Some(pending)),
        ConnectOutcome::NotFound => (1, None),
        ConnectOutcome::AlreadyOnline => (2, None),
    };
    info!(alias, code, "CONNECT");
    framing::write_code(stream, code).await?;

    if let Some(pending) = pending {
        if !pending.is_empty() {
            debug!(alias, count = pending.len(), "flushing queued messages");
            delivery::flush_pending(directory, &alias, peer_ip, listen_port, pending, push_timeout)
                .await;
        }
    }
    Ok(())
}

async fn handle_disconnect(
    stream: &mut TcpStream,
    peer_ip: Ipv4Addr,
    directory: &Directory,
) -> Result<(), ProtocolError> {
    let alias = framing::read_token(stream, MAX_TOKEN_LEN).await?;

    let outcome = directory.disconnect(peer_ip, &alias).await;
    let code = match outcome {
        DisconnectOutcome::Ok => 0,
        DisconnectOutcome::NotFound => 1,
        DisconnectOutcome::AlreadyOffline => 2,
        DisconnectOutcome::IdentityMismatch => 3,
    };
    info!(alias, code, "DISCONNECT");
    framing::write_code(stream, code).await?;
    Ok(())
}

async fn handle_connected_users(
    stream: &mut TcpStream,
    directory: &Directory,
) -> Result<(), ProtocolError> {
    let alias = framing::read_token(stream, MAX_TOKEN_LEN).await?;

    let outcome = directory.connected_users(&alias).await;
    match outcome {
        ConnectedUsersOutcome::Ok(aliases) => {
            info!(alias, count = aliases.len(), "CONNECTEDUSERS");
            framing::write_code(stream, 0).await?;
            framing::write_token(stream, &aliases.len().to_string()).await?;
            for online_alias in aliases {
                framing::write_token(stream, &online_alias).await?;
            }
        }
        ConnectedUsersOutcome::NotConnected => {
            info!(alias, "CONNECTEDUSERS: not connected");
            framing::write_code(stream, 1).await?;
        }
        ConnectedUsersOutcome::NotFound => {
            info!(alias, "CONNECTEDUSERS: not found");
            framing::write_code(stream, 2).await?;
        }
    }
    Ok(())
}

async fn handle_send(
    stream: &mut TcpStream,
    directory: &Directory,
    push_timeout: Duration,
) -> Result<(), ProtocolError> {
    let source_alias = framing::read_token(stream, MAX_TOKEN_LEN).await?;
    let dest_alias = framing::read_token(stream, MAX_TOKEN_LEN).await?;
    let body = framing::read_token(stream, MAX_TOKEN_LEN).await?;

    let outcome = directory.send(&source_alias, &dest_alias, &body).await;
    match outcome {
        SendOutcome::Delivered {
            recipient_ip,
            recipient_port,
            msg_id,
        } => {
            if let Err(e) = delivery::push_message(
                recipient_ip,
                recipient_port,
                &source_alias,
                msg_id,
                &body,
                push_timeout,
            )
            .await
            {
                // The reply code below is already committed to success; a
                // push failure to an already-online recipient has no way
                // back to the sender. See the design notes.
                warn!(
                    source = source_alias,
                    dest = dest_alias,
                    error = %e,
                    "push to online recipient failed; message is lost"
                );
            }
            info!(source = source_alias, dest = dest_alias, msg_id, "SEND (delivered)");
            framing::write_code(stream, 0).await?;
            framing::write_token(stream, &msg_id.to_string()).await?;
        }
        SendOutcome::Queued { msg_id } => {
            info!(source = source_alias, dest = dest_alias, msg_id, "SEND (queued)");
            framing::write_code(stream, 0).await?;
            framing::write_token(stream, &msg_id.to_string()).await?;
        }
        SendOutcome::Error => {
            info!(source = source_alias, dest = dest_alias, "SEND: rejected");
            framing::write_code(stream, 2).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Run one command against `directory` over a fresh loopback connection,
    /// driving the client and the server handler concurrently so neither
    /// side needs a `'static` bound on the borrowed directory.
    async fn run_command(
        directory: &Directory,
        listener: &TcpListener,
        push_timeout: Duration,
        opcode: &str,
        operands: &[&str],
    ) -> (u8, Vec<String>) {
        let addr = listener.local_addr().unwrap();
        let (connect_result, accept_result) =
            tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut client = connect_result.unwrap();
        let (server, peer) = accept_result.unwrap();

        let client_fut = async {
            framing::write_token(&mut client, opcode).await.unwrap();
            for operand in operands {
                framing::write_token(&mut client, operand).await.unwrap();
            }

            let mut code_buf = [0u8; 1];
            client.read_exact(&mut code_buf).await.unwrap();
            let code = code_buf[0];

            let mut extra = Vec::new();
            if opcode == "CONNECTEDUSERS" && code == 0 {
                let size: usize = framing::read_token(&mut client, MAX_TOKEN_LEN)
                    .await
                    .unwrap()
                    .parse()
                    .unwrap();
                for _ in 0..size {
                    extra.push(framing::read_token(&mut client, MAX_TOKEN_LEN).await.unwrap());
                }
            } else if opcode == "SEND" && code == 0 {
                extra.push(framing::read_token(&mut client, MAX_TOKEN_LEN).await.unwrap());
            }
            (code, extra)
        };
        let server_fut = handle_connection(server, peer, directory, push_timeout);

        let (result, outcome) = tokio::join!(client_fut, server_fut);
        outcome.unwrap();
        result
    }

    #[tokio::test]
    async fn full_command_sequence() {
        let directory = Directory::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let timeout = Duration::from_secs(1);

        let (code, _) = run_command(
            &directory,
            &listener,
            timeout,
            "REGISTER",
            &["Alice", "alice", "01/01/2000"],
        )
        .await;
        assert_eq!(code, 0);

        let (code, _) = run_command(
            &directory,
            &listener,
            timeout,
            "REGISTER",
            &["Alice2", "alice", "02/02/2000"],
        )
        .await;
        assert_eq!(code, 1);

        let (code, _) = run_command(&directory, &listener, timeout, "CONNECT", &["alice", "7001"])
            .await;
        assert_eq!(code, 0);

        let (code, aliases) =
            run_command(&directory, &listener, timeout, "CONNECTEDUSERS", &["alice"]).await;
        assert_eq!(code, 0);
        assert_eq!(aliases, vec!["alice".to_string()]);

        let (code, _) = run_command(
            &directory,
            &listener,
            timeout,
            "DISCONNECT",
            &["alice"],
        )
        .await;
        assert_eq!(code, 0);

        let (code, _) =
            run_command(&directory, &listener, timeout, "CONNECTEDUSERS", &["alice"]).await;
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn send_to_unknown_opcode_is_rejected() {
        let directory = Directory::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();

        let server_task =
            tokio::spawn(
                async move { handle_connection(server, peer, &directory, Duration::from_secs(1)).await },
            );

        framing::write_token(&mut client, "BOGUS").await.unwrap();
        let result = server_task.await.unwrap();
        assert!(matches!(result, Err(ProtocolError::UnknownOpcode(_))));
    }
}
