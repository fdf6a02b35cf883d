//! Bulk (pipelined batch) framing.
//!
//! A bulk request is `request_1 ... request_n mn\r\n`; the server answers
//! with n responses in order followed by the literal `MN\r\n` sentinel.
//! Opaques for the whole batch are reserved with a single counter bump so
//! the range is contiguous, which is what makes response correlation
//! possible: the request and response sides must be built from the same
//! ordered key list.

use async_trait::async_trait;
use bytes::BytesMut;
use hashbrown::HashMap;
use tokio::io::AsyncBufRead;

use crate::codec::constants::NOOP_REQUEST;
use crate::codec::meta_get::{MetaGetRequest, MetaGetResponse};
use crate::codec::opaque::next_n_opaques;
use crate::codec::util::read_noop_response;
use crate::codec::{LinkDecoder, LinkEncoder};
use crate::error::Result;

/// Chains the encoders of a batch and terminates with the meta no-op.
#[derive(Debug, Clone, Default)]
pub struct BulkRequest<E> {
    pub encoders: Vec<E>,

    /// First opaque of the contiguous range assigned to this batch.
    pub opaque: u64,
}

impl<E: LinkEncoder> LinkEncoder for BulkRequest<E> {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        for encoder in &self.encoders {
            encoder.encode(buf)?;
        }
        buf.extend_from_slice(NOOP_REQUEST);
        Ok(())
    }

    fn reset(&mut self) {
        self.encoders.clear();
        self.opaque = 0;
    }
}

/// Runs the decoders of a batch in order and then consumes the `MN\r\n`
/// sentinel. A missing or malformed sentinel is an error.
#[derive(Debug, Clone, Default)]
pub struct BulkResponse<D> {
    pub decoders: Vec<D>,

    /// Correlation map from assigned opaque back to the submitted key.
    pub opaque_to_key: HashMap<u64, String>,
}

#[async_trait]
impl<D: LinkDecoder> LinkDecoder for BulkResponse<D> {
    async fn decode(&mut self, reader: &mut (dyn AsyncBufRead + Send + Unpin)) -> Result<()> {
        for decoder in &mut self.decoders {
            decoder.decode(reader).await?;
        }
        read_noop_response(reader).await
    }

    fn reset(&mut self) {
        self.decoders.clear();
        self.opaque_to_key.clear();
    }
}

/// Build a bulk value fetch over `keys`, assigning each sub-request a
/// sequential opaque from one reserved range.
pub fn bulk_get<K: AsRef<str>>(
    keys: &[K],
) -> (BulkRequest<MetaGetRequest>, BulkResponse<MetaGetResponse>) {
    let start = next_n_opaques(keys.len() as u64);

    let mut encoders = Vec::with_capacity(keys.len());
    let mut decoders = Vec::with_capacity(keys.len());
    let mut opaque_to_key = HashMap::with_capacity(keys.len());
    for (i, key) in keys.iter().enumerate() {
        let opaque = start + i as u64;
        let mut request = MetaGetRequest::value(key.as_ref());
        request.opaque = opaque;
        encoders.push(request);
        decoders.push(MetaGetResponse::default());
        opaque_to_key.insert(opaque, key.as_ref().to_string());
    }

    (
        BulkRequest {
            encoders,
            opaque: start,
        },
        BulkResponse {
            decoders,
            opaque_to_key,
        },
    )
}
