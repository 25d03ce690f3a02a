//! # Aliasd
//!
//! A concurrent presence-and-messaging directory relay. Clients register an
//! alias, connect and disconnect to toggle presence, and send messages that
//! are delivered immediately to online recipients or queued for delivery the
//! next time an offline recipient connects.

pub mod acceptor;
pub mod cli;
pub mod delivery;
pub mod directory;
pub mod framing;
pub mod logging;
pub mod protocol;

pub use cli::Args;
pub use directory::Directory;

/// The current version of the server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default TCP port to listen on
    pub const PORT: u16 = 9000;

    /// Default interface address to bind
    pub const HOST: &str = "0.0.0.0";
}
