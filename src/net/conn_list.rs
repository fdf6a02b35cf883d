//! A set of pipelined connections to one backend address, with round-robin
//! submission. Traffic is spread by a shared counter; there is no
//! alternative load-balancing policy.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use tracing::debug;

use crate::codec::Link;
use crate::error::{Error, Result};
use crate::net::backend::Backend;
use crate::net::conn::Conn;

fn next_list_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

pub struct ConnList {
    list_id: u64,
    backend: Backend,
    conns: Vec<Conn>,
    iter: AtomicU64,
}

impl ConnList {
    /// Establish `max(1, backend.num_conns())` connections to the backend.
    /// Fails if any single connection cannot be established.
    pub async fn connect(backend: Backend) -> Result<ConnList> {
        let num_conns = backend.num_conns().max(1);

        let mut conns = Vec::with_capacity(num_conns);
        for _ in 0..num_conns {
            conns.push(Conn::connect(backend.clone()).await?);
        }

        let list = ConnList {
            list_id: next_list_id(),
            backend,
            conns,
            iter: AtomicU64::new(0),
        };
        debug!(
            list_id = list.list_id,
            backend = %list.backend,
            conns = num_conns,
            "initialized connection list to backend"
        );
        Ok(list)
    }

    pub fn num_conns(&self) -> usize {
        self.conns.len()
    }

    /// Round-robin the link over the member connections. A connection that
    /// is mid-transition is skipped in favor of the next one; when every
    /// member is transitioning the backend is reported unhealthy. Any other
    /// rejection is final at this level.
    pub fn append(&self, mut link: Link) -> std::result::Result<(), (Link, Error)> {
        let num_conns = self.conns.len() as u64;
        for _ in 0..num_conns {
            let target = self.iter.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % num_conns;
            match self.conns[target as usize].append(link) {
                Ok(()) => return Ok(()),
                Err((l, Error::ChangingState)) => link = l,
                Err(rejected) => return Err(rejected),
            }
        }

        Err((
            link,
            Error::BackendUnhealthy {
                backend: self.backend.to_string(),
                attempts: num_conns,
            },
        ))
    }

    /// Close every member connection, waiting for all of them. Failures do
    /// not cut the sweep short; they are joined and returned as one error.
    pub async fn close(&self) -> Result<()> {
        debug!(
            list_id = self.list_id,
            backend = %self.backend,
            "closing connection list"
        );
        let results = join_all(self.conns.iter().map(|conn| conn.close())).await;
        let errs: Vec<Error> = results
            .into_iter()
            .filter_map(|result| result.err())
            .collect();
        if errs.is_empty() {
            Ok(())
        } else {
            Err(Error::CloseFailed(errs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

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
    async fn establishes_requested_connection_count() {
        let addr = spawn_idle_server().await;
        let list = ConnList::connect(Backend::new(addr, 3, None)).await.unwrap();
        assert_eq!(list.num_conns(), 3);
        list.close().await.unwrap();
    }

    #[tokio::test]
    async fn zero_connections_defaults_to_one() {
        let addr = spawn_idle_server().await;
        let list = ConnList::connect(Backend::new(addr, 0, None)).await.unwrap();
        assert_eq!(list.num_conns(), 1);
        list.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_joins_every_member_failure() {
        let addr = spawn_idle_server().await;
        let list = ConnList::connect(Backend::new(addr, 2, None)).await.unwrap();

        // Kill both supervisors so each member's close fails; the sweep
        // must report both failures, not just the first.
        for conn in &list.conns {
            conn.abort_supervisor();
        }

        match list.close().await.unwrap_err() {
            Error::CloseFailed(errs) => assert_eq!(errs.len(), 2),
            other => panic!("expected joined close error, got {other}"),
        }
    }

    #[tokio::test]
    async fn append_after_close_surfaces_member_error() {
        let addr = spawn_idle_server().await;
        let list = ConnList::connect(Backend::new(addr, 2, None)).await.unwrap();
        list.close().await.unwrap();

        let (link, _done) = crate::net::pool::tests::noop_link();
        let (_link, err) = list.append(link).unwrap_err();
        // Closed members report not-connected, which is final at the list
        // level rather than triggering the unhealthy sweep.
        assert!(matches!(err, Error::NotConnected { .. }));
    }
}
