//! Meta-protocol codec: request encoders, response decoders and the link
//! that binds one of each to a single in-flight operation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::AsyncBufRead;
use tokio::sync::{oneshot, Mutex};

use crate::error::{Error, Result};

pub mod bulk;
pub mod constants;
pub mod meta_arithmetic;
pub mod meta_delete;
pub mod meta_get;
pub mod meta_set;
pub mod opaque;
pub mod util;
pub mod version;

pub use bulk::{bulk_get, BulkRequest, BulkResponse};
pub use constants::{ArithmeticMode, RecacheStatus, SetMode, Status};
pub use meta_arithmetic::{MetaArithmeticRequest, MetaArithmeticResponse};
pub use meta_delete::{MetaDeleteRequest, MetaDeleteResponse};
pub use meta_get::{MetaGetRequest, MetaGetResponse};
pub use meta_set::{MetaSetRequest, MetaSetResponse};
pub use opaque::{ensure_opaque, next_n_opaques, next_opaque};
pub use util::is_legal_key;
pub use version::{VersionRequest, VersionResponse};

/// Serializes one request into the connection's scratch buffer. Encoders for
/// a batch can be chained; a bulk encoder simply calls into each member
/// before appending the no-op sentinel.
pub trait LinkEncoder: Send {
    fn encode(&self, buf: &mut BytesMut) -> Result<()>;

    /// Return every field to its absent default so the value can be reused.
    fn reset(&mut self);
}

/// Parses one response off the connection's buffered reader, loading the
/// result into the decoder's own fields.
#[async_trait]
pub trait LinkDecoder: Send {
    async fn decode(&mut self, reader: &mut (dyn AsyncBufRead + Send + Unpin)) -> Result<()>;

    /// Return every field to its absent default so the value can be reused.
    fn reset(&mut self);
}

pub type SharedEncoder = Arc<Mutex<dyn LinkEncoder>>;
pub type SharedDecoder = Arc<Mutex<dyn LinkDecoder>>;

/// One request/response unit in flight: an encoder, the decoder that will
/// consume its response, and a one-shot completion.
///
/// A link is single-use. It travels pool -> list -> connection -> writer
/// queue -> reader queue and is completed exactly once, after which the
/// caller's clones of the encoder/decoder handles are the only owners left.
pub struct Link {
    encoder: SharedEncoder,
    decoder: SharedDecoder,
    done: oneshot::Sender<Result<()>>,
}

impl Link {
    /// Pair an encoder and decoder into a link. The returned [`Completion`]
    /// resolves when the response has been decoded (or the link failed);
    /// callers combine it with their own timeout or cancellation.
    pub fn new(encoder: SharedEncoder, decoder: SharedDecoder) -> (Self, Completion) {
        let (done, rx) = oneshot::channel();
        (
            Link {
                encoder,
                decoder,
                done,
            },
            Completion { rx },
        )
    }

    pub(crate) fn encoder(&self) -> &SharedEncoder {
        &self.encoder
    }

    pub(crate) fn decoder(&self) -> &SharedDecoder {
        &self.decoder
    }

    /// Finish the link. Drops the codec handles before signalling so that
    /// the waiting side observes itself as the sole owner.
    pub(crate) fn complete(self, result: Result<()>) {
        let Link {
            encoder,
            decoder,
            done,
        } = self;
        drop(encoder);
        drop(decoder);
        let _ = done.send(result);
    }
}

/// The receiving half of a link's one-shot completion signal.
pub struct Completion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Completion {
    /// Wait for the link to finish. Resolves to the terminal result of the
    /// operation; a link dropped without completion (a bug, never a normal
    /// teardown path) surfaces as [`Error::CompletionDropped`].
    pub async fn wait(self) -> Result<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::CompletionDropped),
        }
    }
}
