//! Length-bounded, NUL-terminated token framing over an async byte stream.
//!
//! The wire protocol (see the protocol module) is a sequence of NUL-terminated
//! text tokens, with the single exception of the server's reply code, which is
//! one raw byte. This module provides the three primitives every opcode
//! handler is built from: [`read_token`], [`write_token`], and [`write_code`].

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// No token may exceed this many bytes, including its trailing NUL.
pub const MAX_TOKEN_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("connection closed before a complete token was read")]
    ConnectionClosed,
    #[error("token exceeded the {MAX_TOKEN_LEN}-byte bound")]
    TokenTooLarge,
    #[error("token was not valid UTF-8")]
    InvalidUtf8,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read bytes until a NUL terminator is seen or `max` bytes (including the
/// terminator) have been consumed, returning the token with the NUL stripped.
pub async fn read_token<S>(stream: &mut S, max: usize) -> Result<String, FramingError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if let Err(e) = stream.read_exact(&mut byte).await {
            return match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Err(FramingError::ConnectionClosed),
                _ => Err(FramingError::Io(e)),
            };
        }
        if byte[0] == 0 {
            return String::from_utf8(buf).map_err(|_| FramingError::InvalidUtf8);
        }
        buf.push(byte[0]);
        if buf.len() + 1 > max {
            return Err(FramingError::TokenTooLarge);
        }
    }
}

/// Write `s` as a NUL-terminated token: `len(s) + 1` bytes on the wire.
pub async fn write_token<S>(stream: &mut S, s: &str) -> Result<(), FramingError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(s.as_bytes()).await?;
    stream.write_all(&[0u8]).await?;
    Ok(())
}

/// Write a single raw reply-code byte.
pub async fn write_code<S>(stream: &mut S, code: u8) -> Result<(), FramingError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&[code]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_token_up_to_nul() {
        let mut cursor = Cursor::new(b"alice\0trailing-garbage".to_vec());
        let tok = read_token(&mut cursor, MAX_TOKEN_LEN).await.unwrap();
        assert_eq!(tok, "alice");
    }

    #[tokio::test]
    async fn empty_token_is_ok() {
        let mut cursor = Cursor::new(b"\0".to_vec());
        let tok = read_token(&mut cursor, MAX_TOKEN_LEN).await.unwrap();
        assert_eq!(tok, "");
    }

    #[tokio::test]
    async fn missing_nul_is_connection_closed() {
        let mut cursor = Cursor::new(b"alice".to_vec());
        let err = read_token(&mut cursor, MAX_TOKEN_LEN).await.unwrap_err();
        assert!(matches!(err, FramingError::ConnectionClosed));
    }

    #[tokio::test]
    async fn oversized_token_is_rejected() {
        let mut data = vec![b'a'; 300];
        data.push(0);
        let mut cursor = Cursor::new(data);
        let err = read_token(&mut cursor, MAX_TOKEN_LEN).await.unwrap_err();
        assert!(matches!(err, FramingError::TokenTooLarge));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let mut buf = Vec::new();
        write_token(&mut buf, "hello").await.unwrap();
        assert_eq!(buf, b"hello\0");

        let mut cursor = Cursor::new(buf);
        let tok = read_token(&mut cursor, MAX_TOKEN_LEN).await.unwrap();
        assert_eq!(tok, "hello");
    }

    #[tokio::test]
    async fn write_code_emits_one_byte() {
        let mut buf = Vec::new();
        write_code(&mut buf, 2).await.unwrap();
        assert_eq!(buf, vec![2u8]);
    }
}
