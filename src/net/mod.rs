//! The pipelined connection engine: dialing, per-socket workers, per-backend
//! lists and the backend pool.

pub mod backend;
pub mod conn;
pub mod conn_list;
mod dialer;
pub mod pool;

pub use backend::{Backend, TlsConfig};
pub use conn::{Conn, ConnState};
pub use conn_list::ConnList;
pub use pool::{random_hash, HashFn, Pool, PoolBuilder};
