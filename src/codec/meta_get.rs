//! The `mg` (meta get) command.
//!
//! Command format: `mg <key> <flags>*\r\n`
//!
//! Request flags:
//!
//! - `b`: interpret key as base64 encoded binary value
//! - `c`: return item cas token
//! - `f`: return client flags token
//! - `h`: return whether item has been hit before as a 0 or 1
//! - `k`: return key as a token
//! - `l`: return time since item was last accessed in seconds
//! - `O(token)`: opaque value, consumed and copied back in the response
//! - `s`: return item size token
//! - `t`: return item TTL remaining in seconds (-1 for unlimited)
//! - `u`: don't bump the item in the LRU
//! - `v`: return item value in the data block
//!
//! Flags that modify the item:
//!
//! - `E(token)`: use token as new CAS value if the item is modified
//! - `N(token)`: vivify on miss, takes TTL as an argument
//! - `R(token)`: if remaining TTL is less than token, win for recache
//! - `T(token)`: update remaining TTL
//!
//! Extra response flags: `W` (client won the recache), `X` (item is stale),
//! `Z` (a winning flag was already sent).

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncReadExt};

use crate::codec::constants::*;
use crate::codec::util::*;
use crate::codec::{LinkDecoder, LinkEncoder};
use crate::error::Result;

const OP: &str = "mg";

#[derive(Debug, Clone)]
pub struct MetaGetRequest {
    pub key: String,
    pub base64_key: bool,
    pub fetch_cas: bool,
    pub fetch_client_flags: bool,
    pub fetch_hit_before: bool,
    pub fetch_key: bool,
    pub fetch_last_access: bool,
    /// Only a non-zero value is emitted.
    pub opaque: u64,
    pub fetch_size: bool,
    pub fetch_ttl: bool,
    pub prevent_lru_bump: bool,
    pub fetch_value: bool,
    /// Only a non-zero value is emitted.
    pub cas_override: u64,
    /// Negative values are ignored.
    pub block_ttl: i32,
    /// Negative values are ignored.
    pub recache_ttl: i32,
    /// Negative values are ignored.
    pub update_ttl: i32,
}

impl Default for MetaGetRequest {
    fn default() -> Self {
        MetaGetRequest {
            key: String::new(),
            base64_key: false,
            fetch_cas: false,
            fetch_client_flags: false,
            fetch_hit_before: false,
            fetch_key: false,
            fetch_last_access: false,
            opaque: 0,
            fetch_size: false,
            fetch_ttl: false,
            prevent_lru_bump: false,
            fetch_value: false,
            cas_override: 0,
            block_ttl: -1,
            recache_ttl: -1,
            update_ttl: -1,
        }
    }
}

impl MetaGetRequest {
    /// A plain value fetch for `key`.
    pub fn value(key: impl Into<String>) -> Self {
        MetaGetRequest {
            key: key.into(),
            fetch_value: true,
            ..Default::default()
        }
    }
}

impl LinkEncoder for MetaGetRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.extend_from_slice(META_GET);
        write_key(buf, &self.key)?;

        if self.base64_key {
            buf.extend_from_slice(BASE64_KEY);
        }
        if self.fetch_cas {
            buf.extend_from_slice(FETCH_CAS);
        }
        if self.fetch_client_flags {
            buf.extend_from_slice(FETCH_CLIENT_FLAGS);
        }
        if self.fetch_hit_before {
            buf.extend_from_slice(FETCH_HIT_BEFORE);
        }
        if self.fetch_key {
            buf.extend_from_slice(FETCH_KEY);
        }
        if self.fetch_last_access {
            buf.extend_from_slice(FETCH_LAST_ACCESS);
        }
        if self.fetch_size {
            buf.extend_from_slice(FETCH_SIZE);
        }

        // N and T MUST come before t, or the server reports the TTL as it
        // was before this request applied its updates:
        //   mg k t N100   -> HD t-1 W
        //   mg k N100 t   -> HD t100 W
        write_cas_override(buf, self.cas_override);
        write_recache_ttl(buf, self.recache_ttl);
        write_block_ttl(buf, self.block_ttl);
        write_ttl(buf, self.update_ttl);

        if self.fetch_ttl {
            buf.extend_from_slice(FETCH_REMAINING_TTL);
        }
        if self.prevent_lru_bump {
            buf.extend_from_slice(PREVENT_LRU_BUMP);
        }
        if self.fetch_value {
            buf.extend_from_slice(FETCH_VALUE);
        }

        write_opaque(buf, self.opaque);
        buf.extend_from_slice(CRLF);
        Ok(())
    }

    fn reset(&mut self) {
        *self = MetaGetRequest::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetaGetResponse {
    pub status: Status,
    pub recache: RecacheStatus,
    /// Present only when the server sent a value block.
    pub value: Option<Bytes>,
    /// Only a non-zero value is valid.
    pub cas_id: u64,
    /// Only a non-zero value is valid.
    pub remaining_ttl: i32,
    /// Only a non-zero value is valid.
    pub client_flags: u64,
    /// Only a non-zero value is valid.
    pub opaque: u64,
    pub hit_before: bool,
    pub item_key: String,
    pub item_size: u64,
    pub last_access_secs: u32,
    pub stale: bool,
    /// Populated verbatim when the server returned an unrecognized status
    /// word; every other field keeps its default in that case.
    pub header_line: String,
}

#[async_trait]
impl LinkDecoder for MetaGetResponse {
    async fn decode(&mut self, reader: &mut (dyn AsyncBufRead + Send + Unpin)) -> Result<()> {
        let line = read_header_line(reader).await?;

        let mut value_size: Option<usize> = None;
        for (idx, token) in tokens(&line).enumerate() {
            if idx == 0 {
                self.status = meta_get_status(token);
                if self.status == Status::Invalid {
                    // An unknown response code makes the rest of the line
                    // unparseable; keep it for diagnostics and move on.
                    self.header_line = String::from_utf8_lossy(&line).into_owned();
                    return Ok(());
                }
                continue;
            }

            // All fields start with a letter except for the value size.
            if value_size.is_none() && token[0].is_ascii_digit() {
                value_size = Some(parse_value_size(OP, token)?);
                continue;
            }

            if token.len() == 1 {
                match token[0] {
                    b'W' => self.recache = RecacheStatus::Won,
                    b'X' => self.stale = true,
                    b'Z' => self.recache = RecacheStatus::AlreadySent,
                    _ => {}
                }
                continue;
            }

            match token[0] {
                b'O' => self.opaque = parse_u64(OP, token)?,
                b't' => self.remaining_ttl = parse_i32(OP, token)?,
                b'c' => self.cas_id = parse_u64(OP, token)?,
                b'f' => self.client_flags = parse_u64(OP, token)?,
                b'h' => self.hit_before = token[1..] == *b"1",
                b'k' => self.item_key = String::from_utf8_lossy(&token[1..]).into_owned(),
                b's' => self.item_size = parse_u64(OP, token)?,
                b'l' => self.last_access_secs = parse_u32(OP, token)?,
                _ => {}
            }
        }

        if let Some(size) = value_size {
            // The value block is opaque: it may itself contain CRLF, so the
            // declared length governs, followed by a mandatory CRLF.
            let mut value = vec![0u8; size];
            reader.read_exact(&mut value).await?;
            self.value = Some(Bytes::from(value));
            return read_crlf(reader).await;
        }

        Ok(())
    }

    fn reset(&mut self) {
        *self = MetaGetResponse::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn decode(response: &[u8]) -> Result<MetaGetResponse> {
        let mut decoder = MetaGetResponse::default();
        let mut reader = BufReader::new(response);
        decoder.decode(&mut reader).await?;
        Ok(decoder)
    }

    #[test]
    fn encodes_plain_value_fetch() {
        let mut buf = BytesMut::new();
        MetaGetRequest::value("mykey").encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"mg mykey v \r\n");
    }

    #[test]
    fn encodes_ttl_updates_before_ttl_fetch() {
        let request = MetaGetRequest {
            key: "k".into(),
            fetch_ttl: true,
            block_ttl: 100,
            update_ttl: 150,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"mg k N100 T150 t \r\n");
    }

    #[test]
    fn encodes_full_flag_set_in_protocol_order() {
        let request = MetaGetRequest {
            key: "mykey".into(),
            base64_key: true,
            fetch_cas: true,
            fetch_client_flags: true,
            fetch_hit_before: true,
            fetch_key: true,
            fetch_last_access: true,
            opaque: 42,
            fetch_size: true,
            fetch_ttl: true,
            prevent_lru_bump: true,
            fetch_value: true,
            cas_override: 9,
            block_ttl: 100,
            recache_ttl: 30,
            update_ttl: 150,
        };
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(
            buf.as_ref(),
            &b"mg mykey b c f h k l s E9 R30 N100 T150 t u v O42 \r\n"[..]
        );
    }

    #[test]
    fn rejects_illegal_key_without_writing() {
        let mut buf = BytesMut::new();
        let err = MetaGetRequest::value("bad key").encode(&mut buf).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn decodes_cache_miss() {
        let decoded = decode(b"EN\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::CacheMiss);
        assert_eq!(decoded.recache, RecacheStatus::NotSet);
        assert_eq!(decoded.value, None);
        assert_eq!(decoded.opaque, 0);
    }

    #[tokio::test]
    async fn decodes_cache_miss_with_opaque() {
        let decoded = decode(b"EN O123123\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::CacheMiss);
        assert_eq!(decoded.opaque, 123123);
        assert_eq!(decoded.value, None);
    }

    #[tokio::test]
    async fn decodes_header_only_hit() {
        let decoded = decode(b"HD O1231213 t989\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::CacheHit);
        assert_eq!(decoded.opaque, 1231213);
        assert_eq!(decoded.remaining_ttl, 989);
        assert_eq!(decoded.value, None);
    }

    #[tokio::test]
    async fn decodes_recache_and_stale_markers() {
        let decoded = decode(b"HD O1231213 W\r\n").await.unwrap();
        assert_eq!(decoded.recache, RecacheStatus::Won);
        assert!(!decoded.stale);

        let decoded = decode(b"HD O1231213 Z X\r\n").await.unwrap();
        assert_eq!(decoded.recache, RecacheStatus::AlreadySent);
        assert!(decoded.stale);
    }

    #[tokio::test]
    async fn decodes_value_block() {
        let decoded = decode(b"VA 10 O1231213 Z X\r\n1234567890\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::CacheHit);
        assert_eq!(decoded.opaque, 1231213);
        assert_eq!(decoded.recache, RecacheStatus::AlreadySent);
        assert!(decoded.stale);
        assert_eq!(decoded.value.as_deref(), Some(&b"1234567890"[..]));
    }

    #[tokio::test]
    async fn value_length_governs_crlf_inside_value() {
        let decoded = decode(b"VA 10 O999999 W\r\n12345\r\n890\r\n").await.unwrap();
        assert_eq!(decoded.value.as_deref(), Some(&b"12345\r\n890"[..]));
        assert_eq!(decoded.recache, RecacheStatus::Won);
        assert_eq!(decoded.opaque, 999999);
    }

    #[tokio::test]
    async fn decodes_zero_length_value() {
        let decoded = decode(b"VA 0 O999999 W\r\n\r\n").await.unwrap();
        assert_eq!(decoded.value.as_deref(), Some(&b""[..]));
    }

    #[tokio::test]
    async fn decodes_cas_and_flags() {
        let decoded = decode(b"VA 8 O999999 c1231 f77\r\nmemcache\r\n").await.unwrap();
        assert_eq!(decoded.cas_id, 1231);
        assert_eq!(decoded.client_flags, 77);
        assert_eq!(decoded.value.as_deref(), Some(&b"memcache"[..]));
    }

    #[tokio::test]
    async fn decodes_key_hit_size_and_last_access() {
        let decoded = decode(b"HD kmykey h1 s512 l33\r\n").await.unwrap();
        assert_eq!(decoded.item_key, "mykey");
        assert!(decoded.hit_before);
        assert_eq!(decoded.item_size, 512);
        assert_eq!(decoded.last_access_secs, 33);
    }

    #[tokio::test]
    async fn unknown_status_word_preserves_header_line() {
        let decoded = decode(b"CLIENT_ERROR bad data chunk\r\n").await.unwrap();
        assert_eq!(decoded.status, Status::Invalid);
        assert_eq!(decoded.header_line, "CLIENT_ERROR bad data chunk\r\n");
        assert_eq!(decoded.value, None);
    }

    #[tokio::test]
    async fn malformed_tokens_are_hard_errors() {
        for response in [
            &b"HD 132kk \r\n"[..],
            b"HD 5 Ohello \r\n",
            b"HD 1 t10f \r\n",
            b"HD c10d3 \r\n",
        ] {
            assert!(decode(response).await.is_err(), "{:?}", response);
        }
    }

    #[tokio::test]
    async fn short_value_block_is_an_error() {
        assert!(decode(b"VA 10 O1\r\n1234\r\n").await.is_err());
    }

    #[tokio::test]
    async fn missing_value_crlf_is_an_error() {
        assert!(decode(b"VA 4 O1\r\n1234xx").await.is_err());
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let mut decoded = decode(b"VA 8 O999999 c1231 f77\r\nmemcache\r\n").await.unwrap();
        decoded.stale = true;
        decoded.item_key = "k".into();
        decoded.reset();
        assert_eq!(decoded.status, Status::Invalid);
        assert_eq!(decoded.recache, RecacheStatus::NotSet);
        assert_eq!(decoded.value, None);
        assert_eq!(decoded.cas_id, 0);
        assert_eq!(decoded.opaque, 0);
        assert!(decoded.item_key.is_empty());
        assert!(decoded.header_line.is_empty());

        let mut request = MetaGetRequest::value("x");
        request.opaque = 5;
        request.reset();
        assert!(request.key.is_empty());
        assert!(!request.fetch_value);
        assert_eq!(request.opaque, 0);
        assert_eq!(request.block_ttl, -1);
        assert_eq!(request.recache_ttl, -1);
        assert_eq!(request.update_ttl, -1);
    }
}
