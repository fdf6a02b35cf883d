//! The `ms` (meta set) command.
//!
//! Command format:
//!
//! ```text
//! ms <key> <datalen> <flags>*\r\n
//! <data block>\r\n
//! ```
//!
//! Request flags:
//!
//! - `b`: interpret key as base64 encoded binary value
//! - `c`: return CAS value if successfully stored
//! - `C(token)`: compare CAS value when storing item
//! - `E(token)`: use token as new CAS value
//! - `F(token)`: set client flags to token
//! - `I`: invalidate. set-to-invalid if supplied CAS is older than item's CAS
//! - `k`: return key as a token
//! - `O(token)`: opaque value, consumed and copied back in the response
//! - `s`: return the size of the stored item on success
//! - `T(token)`: time-to-live for the item
//! - `M(token)`: mode switch between add, replace, append and prepend
//! - `N(token)`: in append mode, auto vivify on miss with the supplied TTL

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncBufRead;

use crate::codec::constants::*;
use crate::codec::util::*;
use crate::codec::{LinkDecoder, LinkEncoder};
use crate::error::Result;

const OP: &str = "ms";

#[derive(Debug, Clone)]
pub struct MetaSetRequest {
    pub key: String,
    pub value: Bytes,
    pub base64_key: bool,
    pub fetch_cas: bool,
    /// Only a non-zero value is emitted.
    pub cas_id: u64,
    /// Only a non-zero value is emitted.
    pub cas_override: u64,
    /// Only a non-zero value is emitted.
    pub client_flags: u64,
    pub invalidate: bool,
    pub fetch_key: bool,
    pub fetch_size: bool,
    /// Negative values are ignored.
    pub ttl: i32,
    /// Only a non-zero value is emitted.
    pub opaque: u64,
    pub mode: SetMode,
    /// Negative values are ignored.
    pub block_ttl: i32,
}

impl Default for MetaSetRequest {
    fn default() -> Self {
        MetaSetRequest {
            key: String::new(),
            value: Bytes::new(),
            base64_key: false,
            fetch_cas: false,
            cas_id: 0,
            cas_override: 0,
            client_flags: 0,
            invalidate: false,
            fetch_key: false,
            fetch_size: false,
            ttl: -1,
            opaque: 0,
            mode: SetMode::Set,
            block_ttl: -1,
        }
    }
}

impl MetaSetRequest {
    /// A plain set of `key` to `value` with no expiry.
    pub fn value(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        MetaSetRequest {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

impl LinkEncoder for MetaSetRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut digits = itoa::Buffer::new();

        buf.extend_from_slice(META_SET);
        write_key(buf, &self.key)?;

        buf.extend_from_slice(digits.format(self.value.len()).as_bytes());
        buf.extend_from_slice(&[SPACE]);

        if self.base64_key {
            buf.extend_from_slice(BASE64_KEY);
        }
        if self.fetch_cas {
            buf.extend_from_slice(FETCH_CAS);
        }
        if self.invalidate {
            buf.extend_from_slice(INVALIDATE);
        }
        if self.fetch_key {
            buf.extend_from_slice(FETCH_KEY);
        }
        if self.fetch_size {
            buf.extend_from_slice(FETCH_SIZE);
        }

        // The mode token MUST come before the TTL.
        match self.mode {
            SetMode::Set => {}
            SetMode::Add => buf.extend_from_slice(ADD_MODE),
            SetMode::Replace => buf.extend_from_slice(REPLACE_MODE),
            SetMode::Append => buf.extend_from_slice(APPEND_MODE),
            SetMode::Prepend => buf.extend_from_slice(PREPEND_MODE),
        }

        write_ttl(buf, self.ttl);
        write_compare_cas(buf, self.cas_id);
        write_cas_override(buf, self.cas_override);
        write_client_flags(buf, self.client_flags);
        write_block_ttl(buf, self.block_ttl);
        write_opaque(buf, self.opaque);

        buf.extend_from_slice(CRLF);
        buf.extend_from_slice(&self.value);
        buf.extend_from_slice(CRLF);
        Ok(())
    }

    fn reset(&mut self) {
        *self = MetaSetRequest::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetaSetResponse {
    pub status: Status,
    pub opaque: u64,
    pub cas_id: u64,
    pub item_key: String,

    /// Populated verbatim when the server returned an unrecognized status
    /// word.
    pub header_line: String,
}

#[async_trait]
impl LinkDecoder for MetaSetResponse {
    async fn decode(&mut self, reader: &mut (dyn AsyncBufRead + Send + Unpin)) -> Result<()> {
        let line = read_header_line(reader).await?;

        for (idx, token) in tokens(&line).enumerate() {
            if idx == 0 {
                self.status = meta_set_status(token);
                if self.status == Status::Invalid {
                    self.header_line = String::from_utf8_lossy(&line).into_owned();
                    return Ok(());
                }
                continue;
            }

            match token[0] {
                b'O' => self.opaque = parse_u64(OP, token)?,
                b'c' => self.cas_id = parse_u64(OP, token)?,
                b'k' => self.item_key = String::from_utf8_lossy(&token[1..]).into_owned(),
                _ => {}
            }
        }

        Ok(())
    }

    fn reset(&mut self) {
        *self = MetaSetResponse::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn decode(response: &[u8]) -> Result<MetaSetResponse> {
        let mut decoder = MetaSetResponse::default();
        let mut reader = BufReader::new(response);
        decoder.decode(&mut reader).await?;
        Ok(decoder)
    }

    #[test]
    fn encodes_mode_before_ttl() {
        let request = MetaSetRequest {
            key: "k".into(),
            value: Bytes::from_static(b"hi"),
            ttl: 60,
            mode: SetMode::Add,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"ms k 2 ME T60 \r\nhi\r\n");
    }

    #[test]
    fn encodes_plain_set_without_mode_token() {
        let mut buf = BytesMut::new();
        MetaSetRequest::value("k", &b"payload"[..])
            .encode(&mut buf)
            .unwrap();
        assert_eq!(buf.as_ref(), b"ms k 7 \r\npayload\r\n");
    }

    #[test]
    fn encodes_cas_flags_and_opaque() {
        let request = MetaSetRequest {
            key: "k".into(),
            value: Bytes::from_static(b"v"),
            fetch_cas: true,
            cas_id: 11,
            cas_override: 22,
            client_flags: 33,
            block_ttl: 44,
            opaque: 55,
            mode: SetMode::Append,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &b"ms k 1 c MA C11 E22 F33 N44 O55 \r\nv\r\n"[..]);
    }

    #[test]
    fn zero_ttl_is_emitted() {
        let request = MetaSetRequest {
            key: "k".into(),
            value: Bytes::from_static(b"v"),
            ttl: 0,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"ms k 1 T0 \r\nv\r\n");
    }

    #[tokio::test]
    async fn decodes_stored_variants() {
        let decoded = decode(b"HD\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::Stored);
        assert_eq!(decoded.opaque, 0);

        let decoded = decode(b"HD O1231 c1111\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::Stored);
        assert_eq!(decoded.opaque, 1231);
        assert_eq!(decoded.cas_id, 1111);

        let decoded = decode(b"NS O1231 c1111\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::NotStored);

        let decoded = decode(b"EX O1231 c1111\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::Exists);

        let decoded = decode(b"NF O1231 \r\n").await.unwrap();
        assert_eq!(decoded.status, Status::NotFound);
        assert_eq!(decoded.opaque, 1231);
    }

    #[tokio::test]
    async fn decodes_returned_key() {
        let decoded = decode(b"HD kmykey O7\r\n").await.unwrap();
        assert_eq!(decoded.item_key, "mykey");
        assert_eq!(decoded.opaque, 7);
    }

    #[tokio::test]
    async fn unknown_status_word_preserves_header_line() {
        let decoded = decode(b"SERVER_ERROR out of memory\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::Invalid);
        assert_eq!(decoded.header_line, "SERVER_ERROR out of memory\r\n");
    }

    #[tokio::test]
    async fn malformed_tokens_are_hard_errors() {
        assert!(decode(b"HD O123kk\r\n").await.is_err());
        assert!(decode(b"HD c9877F\r\n").await.is_err());
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let mut request = MetaSetRequest {
            key: "k".into(),
            value: Bytes::from_static(b"v"),
            ttl: 30,
            opaque: 9,
            mode: SetMode::Replace,
            ..Default::default()
        };
        request.reset();
        assert!(request.key.is_empty());
        assert!(request.value.is_empty());
        assert_eq!(request.ttl, -1);
        assert_eq!(request.block_ttl, -1);
        assert_eq!(request.mode, SetMode::Set);

        let mut decoded = decode(b"HD O1 c2 kx\r\n").await.unwrap();
        decoded.reset();
        assert_eq!(decoded.status, Status::Invalid);
        assert_eq!(decoded.opaque, 0);
        assert_eq!(decoded.cas_id, 0);
        assert!(decoded.item_key.is_empty());
    }
}
