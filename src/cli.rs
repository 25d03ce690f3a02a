//! Command-line argument parsing for the directory server.

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser,
};
use std::time::Duration;

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// A concurrent presence-and-messaging directory relay.
///
/// Tracks registered users, their connection state, and queues messages for
/// recipients that are offline at send time, delivering them as soon as the
/// recipient reconnects.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// TCP port to listen on, in 1025..=65535
    #[arg(short = 'p', long, default_value_t = crate::defaults::PORT, value_parser = parse_port)]
    pub port: u16,

    /// Interface address to bind
    #[arg(short = 'H', long, default_value = crate::defaults::HOST)]
    pub host: String,

    /// Increase diagnostic log verbosity on stderr.
    ///
    /// Can be used multiple times to increase detail:
    ///  -v: info
    ///  -vv: debug
    ///  -vvv: trace
    /// By default, only WARNING and ERROR messages are shown.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Deadline for a single outbound push connection (connect + write)
    ///
    /// Supports human-readable formats like "500ms", "2s", "1m". Applies to
    /// every push attempt, whether it's an immediate online delivery or a
    /// queue flush issued right after a client connects.
    #[arg(long, value_parser = parse_duration, default_value = "2s")]
    pub push_timeout: Duration,
}

/// Parse and range-check a listening port: strictly greater than 1024.
fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("invalid port: {s}"))?;
    if crate::directory::validate::is_valid_port(port) {
        Ok(port)
    } else {
        Err(format!("port must be in 1025..=65535, got {port}"))
    }
}

/// Parse duration from string (e.g., "500ms", "10s", "5m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {num_str}"))?;
    if num < 0.0 {
        return Err("duration cannot be negative".to_string());
    }

    Ok(match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        "h" => Duration::from_secs_f64(num * 3600.0),
        _ => return Err(format!("invalid duration unit: {unit}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_duration_formats() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn port_must_be_above_1024() {
        assert!(parse_port("1024").is_err());
        assert!(parse_port("1025").is_ok());
        assert!(parse_port("65535").is_ok());
    }

    #[test]
    fn default_args_parse_with_no_flags() {
        let args = Args::parse_from(["aliasd"]);
        assert_eq!(args.port, crate::defaults::PORT);
        assert_eq!(args.host, crate::defaults::HOST);
        assert_eq!(args.verbose, 0);
        assert_eq!(args.push_timeout, Duration::from_secs(2));
    }

    #[test]
    fn verbosity_counts_repeated_flags() {
        let args = Args::parse_from(["aliasd", "-vvv"]);
        assert_eq!(args.verbose, 3);
    }
}
