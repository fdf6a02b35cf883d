//! The `md` (meta delete) command.
//!
//! Command format: `md <key> <flags>*\r\n`
//!
//! Request flags:
//!
//! - `b`: interpret key as base64 encoded binary value
//! - `C(token)`: compare CAS value
//! - `E(token)`: use token as new CAS value
//! - `I`: invalidate. mark as stale, bumps CAS
//! - `k`: return key
//! - `O(token)`: opaque to copy back
//! - `T(token)`: update TTL, only when paired with the `I` flag
//! - `x`: removes the item value, but leaves the item

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::AsyncBufRead;

use crate::codec::constants::*;
use crate::codec::util::*;
use crate::codec::{LinkDecoder, LinkEncoder};
use crate::error::Result;

const OP: &str = "md";

#[derive(Debug, Clone)]
pub struct MetaDeleteRequest {
    pub key: String,
    pub base64_key: bool,
    /// Only a non-zero value is emitted.
    pub cas_id: u64,
    /// Only a non-zero value is emitted.
    pub cas_override: u64,
    pub invalidate: bool,
    pub fetch_key: bool,
    /// Only a non-zero value is emitted.
    pub opaque: u64,
    /// Negative values are ignored.
    pub ttl: i32,
    /// Only a non-zero value is emitted.
    pub client_flags: u64,
    pub remove_value: bool,
}

impl Default for MetaDeleteRequest {
    fn default() -> Self {
        MetaDeleteRequest {
            key: String::new(),
            base64_key: false,
            cas_id: 0,
            cas_override: 0,
            invalidate: false,
            fetch_key: false,
            opaque: 0,
            ttl: -1,
            client_flags: 0,
            remove_value: false,
        }
    }
}

impl MetaDeleteRequest {
    pub fn key(key: impl Into<String>) -> Self {
        MetaDeleteRequest {
            key: key.into(),
            ..Default::default()
        }
    }
}

impl LinkEncoder for MetaDeleteRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.extend_from_slice(META_DELETE);
        write_key(buf, &self.key)?;

        if self.base64_key {
            buf.extend_from_slice(BASE64_KEY);
        }
        if self.invalidate {
            buf.extend_from_slice(INVALIDATE);
        }
        if self.fetch_key {
            buf.extend_from_slice(FETCH_KEY);
        }
        if self.remove_value {
            buf.extend_from_slice(REMOVE_VALUE);
        }

        write_compare_cas(buf, self.cas_id);
        write_cas_override(buf, self.cas_override);
        write_ttl(buf, self.ttl);
        write_client_flags(buf, self.client_flags);
        write_opaque(buf, self.opaque);

        buf.extend_from_slice(CRLF);
        Ok(())
    }

    fn reset(&mut self) {
        *self = MetaDeleteRequest::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetaDeleteResponse {
    pub status: Status,
    pub opaque: u64,
    pub item_key: String,

    /// Populated verbatim when the server returned an unrecognized status
    /// word.
    pub header_line: String,
}

#[async_trait]
impl LinkDecoder for MetaDeleteResponse {
    async fn decode(&mut self, reader: &mut (dyn AsyncBufRead + Send + Unpin)) -> Result<()> {
        let line = read_header_line(reader).await?;

        for (idx, token) in tokens(&line).enumerate() {
            if idx == 0 {
                self.status = meta_delete_status(token);
                if self.status == Status::Invalid {
                    self.header_line = String::from_utf8_lossy(&line).into_owned();
                    return Ok(());
                }
                continue;
            }

            match token[0] {
                b'O' => self.opaque = parse_u64(OP, token)?,
                b'k' => self.item_key = String::from_utf8_lossy(&token[1..]).into_owned(),
                _ => {}
            }
        }

        Ok(())
    }

    fn reset(&mut self) {
        *self = MetaDeleteResponse::default();
    }
}
