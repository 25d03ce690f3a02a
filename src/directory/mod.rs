//! The in-memory user directory: the thread-safe map of aliases to user
//! records, plus each record's pending-message queue.
//!
//! A single [`tokio::sync::RwLock`] guards the whole map. Every operation
//! below is a writer except [`Directory::connected_users`], which only reads.
//! None of these methods perform network I/O; callers (the protocol and
//! delivery modules) take any address snapshot they need while the lock is
//! held and do the actual push after releasing it, per the concurrency
//! discipline in the design notes.

pub mod validate;

use std::collections::HashMap;
use std::net::Ipv4Addr;

use tokio::sync::RwLock;

/// A user's presence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Offline,
    Online,
}

/// A message stamped for a recipient that was offline at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub msg_id: u32,
    pub source_alias: String,
    pub body: String,
}

/// One registered user's full record.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub alias: String,
    pub name: String,
    pub birth: String,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub status: Status,
    pub next_msg_id: u32,
    pub pending: Vec<QueuedMessage>,
}

/// Outcome of [`Directory::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Ok,
    AliasExists,
    Invalid,
}

/// Outcome of [`Directory::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Ok,
    NotFound,
}

/// Outcome of [`Directory::connect`]. `Ok` carries a snapshot of the pending
/// queue at the moment of connection, for the caller to flush.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Ok(Vec<QueuedMessage>),
    NotFound,
    AlreadyOnline,
}

/// Outcome of [`Directory::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Ok,
    NotFound,
    AlreadyOffline,
    IdentityMismatch,
}

/// Outcome of [`Directory::connected_users`].
#[derive(Debug, Clone)]
pub enum ConnectedUsersOutcome {
    Ok(Vec<String>),
    NotConnected,
    NotFound,
}

/// Outcome of [`Directory::send`].
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Recipient is online: push immediately to this address.
    Delivered {
        recipient_ip: Ipv4Addr,
        recipient_port: u16,
        msg_id: u32,
    },
    /// Recipient is offline: the message was appended to its pending queue.
    Queued { msg_id: u32 },
    /// Body too long, or source/dest missing or source offline. The source
    /// implementation collapses all of these onto one generic failure code;
    /// see the design notes for why a missing destination is not its own code.
    Error,
}

/// Outcome of [`Directory::delete_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Ok,
    NotFound,
}

#[derive(Default)]
pub struct Directory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Empty the directory, releasing all records and queues.
    pub async fn clear(&self) {
        self.users.write().await.clear();
    }

    pub async fn register(
        &self,
        ip: Ipv4Addr,
        port: u16,
        name: &str,
        alias: &str,
        birth: &str,
    ) -> RegisterOutcome {
        if !validate::is_valid_port(port) {
            return RegisterOutcome::Invalid;
        }

        let mut users = self.users.write().await;
        if users.contains_key(alias) {
            return RegisterOutcome::AliasExists;
        }

        users.insert(
            alias.to_string(),
            UserRecord {
                alias: alias.to_string(),
                name: name.to_string(),
                birth: birth.to_string(),
                ip,
                port,
                status: Status::Offline,
                next_msg_id: 0,
                pending: Vec::new(),
            },
        );
        RegisterOutcome::Ok
    }

    pub async fn unregister(&self, alias: &str) -> UnregisterOutcome {
        let mut users = self.users.write().await;
        if users.remove(alias).is_some() {
            UnregisterOutcome::Ok
        } else {
            UnregisterOutcome::NotFound
        }
    }

    pub async fn connect(&self, ip: Ipv4Addr, port: u16, alias: &str) -> ConnectOutcome {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(alias) else {
            return ConnectOutcome::NotFound;
        };
        if user.status == Status::Online {
            return ConnectOutcome::AlreadyOnline;
        }
        user.ip = ip;
        user.port = port;
        user.status = Status::Online;
        ConnectOutcome::Ok(user.pending.clone())
    }

    pub async fn disconnect(&self, ip: Ipv4Addr, alias: &str) -> DisconnectOutcome {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(alias) else {
            return DisconnectOutcome::NotFound;
        };
        if user.status == Status::Offline {
            return DisconnectOutcome::AlreadyOffline;
        }
        if user.ip != ip {
            return DisconnectOutcome::IdentityMismatch;
        }
        user.status = Status::Offline;
        DisconnectOutcome::Ok
    }

    pub async fn connected_users(&self, alias: &str) -> ConnectedUsersOutcome {
        let users = self.users.read().await;
        let Some(user) = users.get(alias) else {
            return ConnectedUsersOutcome::NotFound;
        };
        if user.status == Status::Offline {
            return ConnectedUsersOutcome::NotConnected;
        }
        let online = users
            .values()
            .filter(|u| u.status == Status::Online)
            .map(|u| u.alias.clone())
            .collect();
        ConnectedUsersOutcome::Ok(online)
    }

    pub async fn send(&self, source: &str, dest: &str, body: &str) -> SendOutcome {
        if !validate::is_valid_token_len(body) {
            return SendOutcome::Error;
        }

        let mut users = self.users.write().await;

        let source_online = matches!(
            users.get(source),
            Some(u) if u.status == Status::Online
        );
        if !source_online {
            return SendOutcome::Error;
        }

        if !users.contains_key(dest) {
            // Preserves the shipped server's observable behavior: a missing
            // destination collapses onto the same generic code as any other
            // `send` failure, rather than a dedicated "not found" code.
            return SendOutcome::Error;
        }

        let msg_id = {
            let source_user = users.get_mut(source).expect("checked above");
            source_user.next_msg_id = source_user.next_msg_id.wrapping_add(1);
            source_user.next_msg_id
        };

        let dest_user = users.get_mut(dest).expect("checked above");
        if dest_user.status == Status::Online {
            SendOutcome::Delivered {
                recipient_ip: dest_user.ip,
                recipient_port: dest_user.port,
                msg_id,
            }
        } else {
            dest_user.pending.push(QueuedMessage {
                msg_id,
                source_alias: source.to_string(),
                body: body.to_string(),
            });
            SendOutcome::Queued { msg_id }
        }
    }

    /// Remove the pending message currently at position `index` (0-based, in
    /// the *current* live queue, not the original snapshot position).
    pub async fn delete_message(&self, alias: &str, index: usize) -> DeleteOutcome {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(alias) else {
            return DeleteOutcome::NotFound;
        };
        if index >= user.pending.len() {
            return DeleteOutcome::NotFound;
        }
        user.pending.remove(index);
        DeleteOutcome::Ok
    }
}
