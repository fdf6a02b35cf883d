//! A typed convenience client over the connection pool.
//!
//! Each method builds a link from a request struct, submits it, awaits the
//! completion and hands back the populated response struct. Callers that
//! need deadlines wrap the returned future in `tokio::time::timeout`;
//! cancellation simply drops the future and lets the in-flight request
//! finish on the socket.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::codec::{
    bulk_get, ArithmeticMode, BulkResponse, Link, LinkDecoder, LinkEncoder, MetaArithmeticRequest,
    MetaArithmeticResponse, MetaDeleteRequest, MetaDeleteResponse, MetaGetRequest, MetaGetResponse,
    MetaSetRequest, MetaSetResponse, VersionRequest, VersionResponse,
};
use crate::error::Result;
use crate::net::{Backend, Pool};

#[derive(Clone)]
pub struct Client {
    pool: Arc<Pool>,
}

impl Client {
    /// Wrap an existing pool.
    pub fn new(pool: Arc<Pool>) -> Self {
        Client { pool }
    }

    /// Connect a pool with default options over the given backends.
    pub async fn connect(backends: Vec<Backend>) -> Result<Self> {
        Ok(Client {
            pool: Arc::new(Pool::connect(backends).await?),
        })
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub async fn meta_get(&self, request: MetaGetRequest) -> Result<MetaGetResponse> {
        self.exchange(request, MetaGetResponse::default()).await
    }

    pub async fn meta_set(&self, request: MetaSetRequest) -> Result<MetaSetResponse> {
        self.exchange(request, MetaSetResponse::default()).await
    }

    pub async fn meta_delete(&self, request: MetaDeleteRequest) -> Result<MetaDeleteResponse> {
        self.exchange(request, MetaDeleteResponse::default()).await
    }

    pub async fn meta_increment(
        &self,
        mut request: MetaArithmeticRequest,
    ) -> Result<MetaArithmeticResponse> {
        request.mode = ArithmeticMode::Increment;
        self.exchange(request, MetaArithmeticResponse::default())
            .await
    }

    pub async fn meta_decrement(
        &self,
        mut request: MetaArithmeticRequest,
    ) -> Result<MetaArithmeticResponse> {
        request.mode = ArithmeticMode::Decrement;
        self.exchange(request, MetaArithmeticResponse::default())
            .await
    }

    pub async fn version(&self) -> Result<VersionResponse> {
        self.exchange(VersionRequest, VersionResponse::default())
            .await
    }

    /// Pipeline one `mg` per key as a single bulk, all on one backend.
    /// Sub-responses come back in key order; the response's correlation map
    /// ties echoed opaques back to keys.
    pub async fn bulk_get<K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> Result<BulkResponse<MetaGetResponse>> {
        let (request, response) = bulk_get(keys);
        self.exchange(request, response).await
    }

    async fn exchange<E, D>(&self, request: E, response: D) -> Result<D>
    where
        E: LinkEncoder + 'static,
        D: LinkDecoder + Clone + 'static,
    {
        let decoder = Arc::new(Mutex::new(response));
        let (link, done) = Link::new(Arc::new(Mutex::new(request)), decoder.clone());
        self.pool.submit(link)?;
        done.wait().await?;

        // The link dropped its handles on completion, so this is normally
        // the sole reference and unwraps without copying.
        match Arc::try_unwrap(decoder) {
            Ok(mutex) => Ok(mutex.into_inner()),
            Err(shared) => Ok(shared.lock().await.clone()),
        }
    }
}
