//! The `ma` (meta arithmetic) command.
//!
//! Command format: `ma <key> <flags>*\r\n`
//!
//! Request flags:
//!
//! - `b`: interpret key as base64 encoded binary value
//! - `C(token)`: compare CAS value
//! - `E(token)`: use token as new CAS value
//! - `N(token)`: auto create item on miss with supplied TTL
//! - `J(token)`: initial value to use if auto created after miss
//! - `D(token)`: delta to apply (decimal unsigned 64-bit number, default 1)
//! - `T(token)`: update TTL on success
//! - `M(token)`: mode switch between incr and decr
//! - `O(token)`: opaque value, consumed and copied back in the response
//! - `t`: return current TTL
//! - `c`: return current CAS value if successful
//! - `v`: return new value
//! - `k`: return key as a token

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncReadExt};

use crate::codec::constants::*;
use crate::codec::util::*;
use crate::codec::{LinkDecoder, LinkEncoder};
use crate::error::{Error, Result};

const OP: &str = "ma";

#[derive(Debug, Clone)]
pub struct MetaArithmeticRequest {
    pub key: String,
    pub base64_key: bool,
    /// Only a non-zero value is emitted.
    pub cas_id: u64,
    /// Only a non-zero value is emitted.
    pub cas_override: u64,
    /// Negative values are ignored.
    pub block_ttl: i32,
    /// Only a non-zero value is emitted.
    pub initial_value: u64,
    /// The whole u64 range is valid; the delta token is always emitted.
    pub delta: u64,
    /// Negative values are ignored.
    pub ttl: i32,
    pub mode: ArithmeticMode,
    /// Only a non-zero value is emitted.
    pub opaque: u64,
    pub fetch_ttl: bool,
    pub fetch_cas: bool,
    pub fetch_value: bool,
    pub fetch_key: bool,
}

impl Default for MetaArithmeticRequest {
    fn default() -> Self {
        MetaArithmeticRequest {
            key: String::new(),
            base64_key: false,
            cas_id: 0,
            cas_override: 0,
            block_ttl: -1,
            initial_value: 0,
            delta: 0,
            ttl: -1,
            mode: ArithmeticMode::Increment,
            opaque: 0,
            fetch_ttl: false,
            fetch_cas: false,
            fetch_value: false,
            fetch_key: false,
        }
    }
}

impl MetaArithmeticRequest {
    /// Increment `key` by `delta`, returning the new value.
    pub fn increment(key: impl Into<String>, delta: u64) -> Self {
        MetaArithmeticRequest {
            key: key.into(),
            delta,
            fetch_value: true,
            ..Default::default()
        }
    }

    /// Decrement `key` by `delta`, returning the new value.
    pub fn decrement(key: impl Into<String>, delta: u64) -> Self {
        MetaArithmeticRequest {
            mode: ArithmeticMode::Decrement,
            ..Self::increment(key, delta)
        }
    }
}

impl LinkEncoder for MetaArithmeticRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.extend_from_slice(META_ARITHMETIC);
        write_key(buf, &self.key)?;

        if self.base64_key {
            buf.extend_from_slice(BASE64_KEY);
        }
        if self.mode == ArithmeticMode::Decrement {
            buf.extend_from_slice(DECREMENT_MODE);
        }
        if self.fetch_ttl {
            buf.extend_from_slice(FETCH_REMAINING_TTL);
        }
        if self.fetch_cas {
            buf.extend_from_slice(FETCH_CAS);
        }
        if self.fetch_value {
            buf.extend_from_slice(FETCH_VALUE);
        }
        if self.fetch_key {
            buf.extend_from_slice(FETCH_KEY);
        }

        write_compare_cas(buf, self.cas_id);
        write_cas_override(buf, self.cas_override);
        // T MUST come before N, or a vivifying miss keeps the N TTL instead
        // of the updated one:
        //   ma k T150 N100 J123 D1 ; mg k v t   -> VA 3 t148
        //   ma k N100 T150 J123 D1 would report t97 instead.
        write_ttl(buf, self.ttl);
        write_block_ttl(buf, self.block_ttl);
        write_initial_value(buf, self.initial_value);
        write_delta(buf, self.delta);
        write_opaque(buf, self.opaque);

        buf.extend_from_slice(CRLF);
        Ok(())
    }

    fn reset(&mut self) {
        *self = MetaArithmeticRequest::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetaArithmeticResponse {
    pub status: Status,
    pub opaque: u64,
    /// Only a non-zero value is valid.
    pub remaining_ttl: i32,
    /// Present only when the server sent a value block.
    pub value: Option<Bytes>,
    /// The value block parsed as an unsigned counter.
    pub value_u64: u64,
    /// Only a non-zero value is valid.
    pub cas_id: u64,
    pub item_key: String,

    /// Populated verbatim when the server returned an unrecognized status
    /// word.
    pub header_line: String,
}

#[async_trait]
impl LinkDecoder for MetaArithmeticResponse {
    async fn decode(&mut self, reader: &mut (dyn AsyncBufRead + Send + Unpin)) -> Result<()> {
        let line = read_header_line(reader).await?;

        let mut value_size: Option<usize> = None;
        for (idx, token) in tokens(&line).enumerate() {
            if idx == 0 {
                self.status = meta_arithmetic_status(token);
                if self.status == Status::Invalid {
                    self.header_line = String::from_utf8_lossy(&line).into_owned();
                    return Ok(());
                }
                continue;
            }

            if value_size.is_none() && token[0].is_ascii_digit() {
                value_size = Some(parse_value_size(OP, token)?);
                continue;
            }

            match token[0] {
                b'O' => self.opaque = parse_u64(OP, token)?,
                b't' => self.remaining_ttl = parse_i32(OP, token)?,
                b'c' => self.cas_id = parse_u64(OP, token)?,
                b'k' => self.item_key = String::from_utf8_lossy(&token[1..]).into_owned(),
                _ => {}
            }
        }

        if let Some(size) = value_size {
            let mut value = vec![0u8; size];
            reader.read_exact(&mut value).await?;
            self.value_u64 = btoi::btoi(&value).map_err(|_| Error::InvalidToken {
                op: OP,
                flag: 'v',
                token: String::from_utf8_lossy(&value).into_owned(),
            })?;
            self.value = Some(Bytes::from(value));
            return read_crlf(reader).await;
        }

        Ok(())
    }

    fn reset(&mut self) {
        *self = MetaArithmeticResponse::default();
    }
}
