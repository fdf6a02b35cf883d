//! Key validation, flag-token writers and the small wire readers shared by
//! every decoder.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::codec::constants::*;
use crate::error::{Error, Result};

/// A key is legal iff `1 <= len <= 250` and every byte is strictly between
/// 0x20 and 0x7F.
pub fn is_legal_key(key: &str) -> bool {
    if key.is_empty() || key.len() > 250 {
        return false;
    }
    key.bytes().all(|b| b > 0x20 && b < 0x7f)
}

pub(crate) fn write_key(buf: &mut BytesMut, key: &str) -> Result<()> {
    if !is_legal_key(key) {
        return Err(Error::InvalidKey {
            key: key.to_string(),
        });
    }
    buf.put_slice(key.as_bytes());
    buf.put_u8(SPACE);
    Ok(())
}

fn write_u64_token(buf: &mut BytesMut, letter: u8, value: u64) {
    let mut digits = itoa::Buffer::new();
    buf.put_u8(letter);
    buf.put_slice(digits.format(value).as_bytes());
    buf.put_u8(SPACE);
}

fn write_i32_token(buf: &mut BytesMut, letter: u8, value: i32) {
    let mut digits = itoa::Buffer::new();
    buf.put_u8(letter);
    buf.put_slice(digits.format(value).as_bytes());
    buf.put_u8(SPACE);
}

pub(crate) fn write_opaque(buf: &mut BytesMut, opaque: u64) {
    if opaque != 0 {
        write_u64_token(buf, OPAQUE, opaque);
    }
}

pub(crate) fn write_compare_cas(buf: &mut BytesMut, cas_id: u64) {
    if cas_id != 0 {
        write_u64_token(buf, COMPARE_CAS, cas_id);
    }
}

pub(crate) fn write_cas_override(buf: &mut BytesMut, cas_override: u64) {
    if cas_override != 0 {
        write_u64_token(buf, CAS_OVERRIDE, cas_override);
    }
}

pub(crate) fn write_client_flags(buf: &mut BytesMut, client_flags: u64) {
    if client_flags > 0 {
        write_u64_token(buf, CLIENT_FLAGS, client_flags);
    }
}

pub(crate) fn write_ttl(buf: &mut BytesMut, ttl: i32) {
    if ttl >= 0 {
        write_i32_token(buf, TTL, ttl);
    }
}

pub(crate) fn write_block_ttl(buf: &mut BytesMut, block_ttl: i32) {
    if block_ttl >= 0 {
        write_i32_token(buf, BLOCK_TTL, block_ttl);
    }
}

pub(crate) fn write_recache_ttl(buf: &mut BytesMut, recache_ttl: i32) {
    if recache_ttl >= 0 {
        write_i32_token(buf, RECACHE_TTL, recache_ttl);
    }
}

pub(crate) fn write_initial_value(buf: &mut BytesMut, initial_value: u64) {
    if initial_value != 0 {
        write_u64_token(buf, INITIAL_VALUE, initial_value);
    }
}

pub(crate) fn write_delta(buf: &mut BytesMut, delta: u64) {
    write_u64_token(buf, DELTA, delta);
}

/// Read one response header line through the trailing `\n`, inclusive. A
/// connection that closes mid-line is an I/O error, not a short success.
pub(crate) async fn read_header_line(
    reader: &mut (dyn AsyncBufRead + Send + Unpin),
) -> Result<Vec<u8>> {
    let mut line = Vec::with_capacity(64);
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 || line[n - 1] != b'\n' {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before the header line terminator",
        )));
    }
    Ok(line)
}

/// Read and discard the two bytes terminating a value block; anything other
/// than `\r\n` is a framing error.
pub(crate) async fn read_crlf(reader: &mut (dyn AsyncBufRead + Send + Unpin)) -> Result<()> {
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
    if crlf[0] != b'\r' {
        return Err(Error::UnexpectedByte {
            expected: b'\r',
            actual: crlf[0],
        });
    }
    if crlf[1] != b'\n' {
        return Err(Error::UnexpectedByte {
            expected: b'\n',
            actual: crlf[1],
        });
    }
    Ok(())
}

/// Consume the meta no-op response terminating a bulk. The protocol pins it
/// to the exact four bytes `MN\r\n`; opaque tokens never appear here.
pub(crate) async fn read_noop_response(
    reader: &mut (dyn AsyncBufRead + Send + Unpin),
) -> Result<()> {
    let mut mn = [0u8; 2];
    reader.read_exact(&mut mn).await?;
    if mn[0] != b'M' {
        return Err(Error::UnexpectedByte {
            expected: b'M',
            actual: mn[0],
        });
    }
    if mn[1] != b'N' {
        return Err(Error::UnexpectedByte {
            expected: b'N',
            actual: mn[1],
        });
    }
    read_crlf(reader).await
}

/// Split a header line into whitespace-delimited tokens, dropping the CRLF.
pub(crate) fn tokens(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
}

pub(crate) fn parse_u64(op: &'static str, token: &[u8]) -> Result<u64> {
    btoi::btoi(&token[1..]).map_err(|_| invalid_token(op, token))
}

pub(crate) fn parse_u32(op: &'static str, token: &[u8]) -> Result<u32> {
    btoi::btoi(&token[1..]).map_err(|_| invalid_token(op, token))
}

pub(crate) fn parse_i32(op: &'static str, token: &[u8]) -> Result<i32> {
    btoi::btoi(&token[1..]).map_err(|_| invalid_token(op, token))
}

pub(crate) fn parse_value_size(op: &'static str, token: &[u8]) -> Result<usize> {
    btoi::btoi(token).map_err(|_| Error::InvalidValueSize {
        op,
        token: String::from_utf8_lossy(token).into_owned(),
    })
}

fn invalid_token(op: &'static str, token: &[u8]) -> Error {
    Error::InvalidToken {
        op,
        flag: token[0] as char,
        token: String::from_utf8_lossy(token).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn key_length_and_byte_boundaries() {
        assert!(is_legal_key("validKey"));
        assert!(is_legal_key(&"k".repeat(250)));
        assert!(!is_legal_key(&"k".repeat(251)));
        assert!(!is_legal_key(""));
        assert!(!is_legal_key("contain space"));
        assert!(!is_legal_key("contains\tspecialchar"));
        assert!(!is_legal_key("del\x7fchar"));
    }

    #[test]
    fn token_writers_emit_letter_value_space() {
        let mut buf = BytesMut::new();
        write_key(&mut buf, "testKey").unwrap();
        assert_eq!(buf.as_ref(), b"testKey ");

        let mut buf = BytesMut::new();
        write_opaque(&mut buf, 12345);
        assert_eq!(buf.as_ref(), b"O12345 ");

        let mut buf = BytesMut::new();
        write_compare_cas(&mut buf, 67890);
        assert_eq!(buf.as_ref(), b"C67890 ");

        let mut buf = BytesMut::new();
        write_ttl(&mut buf, 3600);
        assert_eq!(buf.as_ref(), b"T3600 ");

        let mut buf = BytesMut::new();
        write_block_ttl(&mut buf, 7200);
        assert_eq!(buf.as_ref(), b"N7200 ");

        let mut buf = BytesMut::new();
        write_recache_ttl(&mut buf, 1800);
        assert_eq!(buf.as_ref(), b"R1800 ");
    }

    #[test]
    fn absent_values_are_not_emitted() {
        let mut buf = BytesMut::new();
        write_opaque(&mut buf, 0);
        write_compare_cas(&mut buf, 0);
        write_cas_override(&mut buf, 0);
        write_client_flags(&mut buf, 0);
        write_ttl(&mut buf, -1);
        write_block_ttl(&mut buf, -1);
        write_recache_ttl(&mut buf, -1);
        write_initial_value(&mut buf, 0);
        assert!(buf.is_empty());

        // TTL of zero is a real value, not an absent marker.
        write_ttl(&mut buf, 0);
        assert_eq!(buf.as_ref(), b"T0 ");
    }

    #[tokio::test]
    async fn crlf_reader_accepts_only_crlf() {
        let mut reader = BufReader::new(&b"\r\n"[..]);
        assert!(read_crlf(&mut reader).await.is_ok());

        let mut reader = BufReader::new(&b"xx"[..]);
        assert!(read_crlf(&mut reader).await.is_err());

        let mut reader = BufReader::new(&b"\r"[..]);
        assert!(read_crlf(&mut reader).await.is_err());

        let mut reader = BufReader::new(&b""[..]);
        assert!(read_crlf(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn noop_reader_requires_exact_sentinel() {
        let mut reader = BufReader::new(&b"MN\r\n"[..]);
        assert!(read_noop_response(&mut reader).await.is_ok());

        let mut reader = BufReader::new(&b"XM\r\n"[..]);
        assert!(read_noop_response(&mut reader).await.is_err());

        let mut reader = BufReader::new(&b"MNxx"[..]);
        assert!(read_noop_response(&mut reader).await.is_err());

        let mut reader = BufReader::new(&b""[..]);
        assert!(read_noop_response(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn header_line_requires_terminator() {
        let mut reader = BufReader::new(&b"HD O12\r\n"[..]);
        assert_eq!(read_header_line(&mut reader).await.unwrap(), b"HD O12\r\n");

        let mut reader = BufReader::new(&b"HD O12"[..]);
        assert!(read_header_line(&mut reader).await.is_err());
    }
}
