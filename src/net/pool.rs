//! The connection pool: one connection list per backend, dispatched
//! through a pluggable hash function.
//!
//! The bundled hash is uniformly random and ignores the key, so the pool
//! spreads load without any key affinity; swap in your own function at
//! construction time for anything smarter. All sub-requests of a bulk land
//! on whichever backend the hash picks for the wrapping link.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use crate::codec::Link;
use crate::error::{Error, Result};
use crate::net::backend::Backend;
use crate::net::conn_list::ConnList;

fn next_pool_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Picks a backend index in `[0, n)` for a submission. The key parameter is
/// unused by the default hash.
pub type HashFn = Box<dyn Fn(&[u8], usize) -> usize + Send + Sync>;

/// The default backend picker: uniformly random, key-oblivious.
pub fn random_hash(_key: &[u8], n: usize) -> usize {
    rand::thread_rng().gen_range(0..n)
}

struct PoolInner {
    backends: Vec<Backend>,
    lists: HashMap<String, Arc<ConnList>>,
}

/// Fans submissions out across every configured backend.
pub struct Pool {
    pool_id: u64,
    hash_fn: HashFn,
    inner: RwLock<PoolInner>,
}

/// Construction-time options for a [`Pool`].
pub struct PoolBuilder {
    hash_fn: HashFn,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        PoolBuilder {
            hash_fn: Box::new(random_hash),
        }
    }
}

impl PoolBuilder {
    pub fn new() -> Self {
        PoolBuilder::default()
    }

    /// Override how a backend index is chosen per submission.
    pub fn hash_fn(
        mut self,
        hash_fn: impl Fn(&[u8], usize) -> usize + Send + Sync + 'static,
    ) -> Self {
        self.hash_fn = Box::new(hash_fn);
        self
    }

    /// Establish connection lists to every backend. Any backend that cannot
    /// be dialed fails the whole construction.
    pub async fn connect(self, backends: Vec<Backend>) -> Result<Pool> {
        let pool_id = next_pool_id();

        let mut lists = HashMap::with_capacity(backends.len());
        for backend in &backends {
            let list = ConnList::connect(backend.clone()).await?;
            lists.insert(backend.key(), Arc::new(list));
        }

        info!(pool_id, backends = backends.len(), "initialized connection pool");
        Ok(Pool {
            pool_id,
            hash_fn: self.hash_fn,
            inner: RwLock::new(PoolInner { backends, lists }),
        })
    }
}

impl Pool {
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Connect with the default options.
    pub async fn connect(backends: Vec<Backend>) -> Result<Pool> {
        PoolBuilder::new().connect(backends).await
    }

    /// Submit a link to some backend. Unhealthy backends are retried up to
    /// the number of configured backends; every other rejection surfaces
    /// immediately.
    pub fn submit(&self, mut link: Link) -> Result<()> {
        let inner = self.inner.read();
        if inner.lists.is_empty() {
            return Err(Error::EmptyPool);
        }

        let num_backends = inner.backends.len();
        for _ in 0..num_backends {
            let index = (self.hash_fn)(b"", num_backends);
            if index >= num_backends {
                return Err(Error::HashOutOfRange {
                    index,
                    len: num_backends,
                });
            }

            let key = inner.backends[index].key();
            let Some(list) = inner.lists.get(&key) else {
                return Err(Error::BackendNotFound {
                    backend: inner.backends[index].to_string(),
                });
            };
            match list.append(link) {
                Ok(()) => return Ok(()),
                Err((l, Error::BackendUnhealthy { .. })) => link = l,
                Err((_link, err)) => return Err(err),
            }
        }

        Err(Error::PoolExhausted)
    }

    /// Register a new backend, dialing its connections first so the pool
    /// never routes to a list that has not come up.
    pub async fn add(&self, backend: Backend) -> Result<()> {
        info!(
            pool_id = self.pool_id,
            backend = %backend,
            "adding a new connection list to backend"
        );
        let list = Arc::new(ConnList::connect(backend.clone()).await?);

        let mut inner = self.inner.write();
        inner.lists.insert(backend.key(), list);
        inner.backends.push(backend);
        Ok(())
    }

    /// Unregister a backend and close its list. The list is unhooked under
    /// the write lock first so no new submissions can reach it while close
    /// waits for the in-flight requests to complete.
    pub async fn remove(&self, backend: &Backend) -> Result<()> {
        info!(
            pool_id = self.pool_id,
            backend = %backend,
            "removing connection list to backend"
        );
        let list = {
            let mut inner = self.inner.write();
            let Some(position) = inner
                .backends
                .iter()
                .position(|candidate| candidate.key() == backend.key())
            else {
                return Err(Error::BackendNotFound {
                    backend: backend.to_string(),
                });
            };
            inner.backends.remove(position);
            inner.lists.remove(&backend.key())
        };

        match list {
            Some(list) => list.close().await,
            None => Ok(()),
        }
    }

    pub fn num_backends(&self) -> usize {
        self.inner.read().backends.len()
    }

    /// Close every list in the pool.
    pub async fn close(&self) {
        warn!(pool_id = self.pool_id, "closing connection pool");
        let lists: Vec<_> = {
            let mut inner = self.inner.write();
            inner.backends.clear();
            inner.lists.drain().map(|(_, list)| list).collect()
        };
        for list in lists {
            let _ = list.close().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::util::read_header_line;
    use crate::codec::{Completion, LinkDecoder, LinkEncoder};
    use async_trait::async_trait;
    use bytes::BytesMut;
    use tokio::io::AsyncBufRead;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as AsyncMutex;

    struct NoopEncoder;

    impl LinkEncoder for NoopEncoder {
        fn encode(&self, buf: &mut BytesMut) -> Result<()> {
            buf.extend_from_slice(b"noop\r\n");
            Ok(())
        }
        fn reset(&mut self) {}
    }

    struct NoopDecoder;

    #[async_trait]
    impl LinkDecoder for NoopDecoder {
        async fn decode(&mut self, reader: &mut (dyn AsyncBufRead + Send + Unpin)) -> Result<()> {
            read_header_line(reader).await?;
            Ok(())
        }
        fn reset(&mut self) {}
    }

    pub(crate) fn noop_link() -> (Link, Completion) {
        Link::new(
            Arc::new(AsyncMutex::new(NoopEncoder)),
            Arc::new(AsyncMutex::new(NoopDecoder)),
        )
    }

    async fn spawn_idle_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                sockets.push(socket);
            }
        });
        addr
    }

    #[tokio::test]
    async fn empty_pool_rejects_submissions() {
        let pool = Pool::connect(Vec::new()).await.unwrap();
        let (link, _done) = noop_link();
        assert!(matches!(pool.submit(link), Err(Error::EmptyPool)));
    }

    #[tokio::test]
    async fn out_of_range_hash_index_is_rejected() {
        let addr = spawn_idle_server().await;
        let pool = Pool::builder()
            .hash_fn(|_key, n| n)
            .connect(vec![Backend::new(addr, 1, None)])
            .await
            .unwrap();

        let (link, _done) = noop_link();
        assert!(matches!(
            pool.submit(link),
            Err(Error::HashOutOfRange { index: 1, len: 1 })
        ));
        pool.close().await;
    }

    #[tokio::test]
    async fn submits_through_the_hashed_backend() {
        let addr = spawn_idle_server().await;
        let pool = Pool::builder()
            .hash_fn(|_key, _n| 0)
            .connect(vec![Backend::new(addr, 1, None)])
            .await
            .unwrap();

        let (link, _done) = noop_link();
        pool.submit(link).unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn add_and_remove_backends() {
        let addr = spawn_idle_server().await;
        let backend = Backend::new(addr, 1, None);

        let pool = Pool::connect(Vec::new()).await.unwrap();
        pool.add(backend.clone()).await.unwrap();
        assert_eq!(pool.num_backends(), 1);

        pool.remove(&backend).await.unwrap();
        assert_eq!(pool.num_backends(), 0);

        assert!(matches!(
            pool.remove(&backend).await,
            Err(Error::BackendNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn closed_backend_surfaces_not_connected() {
        let addr = spawn_idle_server().await;
        let backend = Backend::new(addr, 1, None);
        let pool = Pool::connect(vec![backend.clone()]).await.unwrap();
        pool.close().await;

        let (link, _done) = noop_link();
        assert!(matches!(pool.submit(link), Err(Error::EmptyPool)));
    }
}
