//! One pipelined connection to a backend.
//!
//! A connection owns a single socket and runs two cooperative tasks over
//! it: a writer that serializes queued links and a reader that decodes
//! responses in FIFO order. A supervising task restarts them across
//! reconnects and drains stranded links when a socket goes down.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::Link;
use crate::error::{Error, Result};
use crate::net::backend::Backend;
use crate::net::dialer::{dial, MaybeTlsStream};

/// The supervisor attempts to revive the connection this many cycles before
/// abandoning it; a successful dial resets the budget.
const MONITOR_ROUTINE_CYCLES: u32 = 1000;
/// Sleep between supervisor reconnection cycles.
const MONITOR_ROUTINE_SLEEP: Duration = Duration::from_millis(5);
/// Dial attempts per setup pass. If the backend is down for longer than
/// this covers, the connection parks in `ConnectFailed` until the next
/// cycle.
const CONN_ATTEMPT_COUNT: u32 = 3;
/// Pause between consecutive dial attempts inside one setup pass.
const RECONNECT_DELAY: Duration = Duration::from_millis(1);

/// Capacity of the outbound and inbound link queues.
const QUEUE_SIZE: usize = 1000;

/// Hard socket deadline applied to reads and writes regardless of any
/// request-level deadline the caller may hold.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
/// Re-arm the tracked deadline only when it is closer than this, so bursts
/// of requests share one deadline instead of paying for one each.
const DEADLINE_SLACK: Duration = Duration::from_secs(1);

/// Connection lifecycle.
///
/// ```text
///         Unavailable ──success──▶ Connected ◀──retry──┐
///              ▲                       │               │
///              │                  loss │               │
///              │                       ▼               │
///              │                 Reconnecting ──fail──▶ ConnectFailed
///              │                       │
///              │                close/terminate
///              ▼
///          Terminated  (absorbing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Unavailable,
    Connected,
    Terminated,
    Reconnecting,
    ConnectFailed,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Unavailable => "unavailable",
            ConnState::Connected => "open",
            ConnState::Terminated => "terminated",
            ConnState::Reconnecting => "reconnecting",
            ConnState::ConnectFailed => "connect_failed",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ConnReader = BufReader<ReadHalf<MaybeTlsStream>>;
type ConnWriter = BufWriter<WriteHalf<MaybeTlsStream>>;

fn next_conn_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Tracks the socket deadline so high-rate bursts amortize the cost of
/// arming a timer. A new deadline is taken only when none is set or the
/// current one is within [`DEADLINE_SLACK`] of expiring, which bounds the
/// worst-case wait at roughly twice [`SOCKET_TIMEOUT`].
struct DeadlineTracker {
    current: Option<Instant>,
}

impl DeadlineTracker {
    fn new() -> Self {
        DeadlineTracker { current: None }
    }

    fn refresh(&mut self) -> Instant {
        let now = Instant::now();
        match self.current {
            Some(at) if at >= now + DEADLINE_SLACK => at,
            _ => {
                let at = now + SOCKET_TIMEOUT;
                self.current = Some(at);
                at
            }
        }
    }
}

/// State and submission gate, behind one lock. `append` takes the read side
/// without blocking; teardown and redial are the only writers.
struct Gate {
    state: ConnState,
    outbound: Option<mpsc::Sender<Link>>,
    cancel: CancellationToken,
}

struct Shared {
    conn_id: u64,
    backend: Backend,
    gate: RwLock<Gate>,
}

impl Shared {
    fn is_terminated(&self) -> bool {
        self.gate.read().state == ConnState::Terminated
    }

    fn transition(&self, to: ConnState) {
        let mut gate = self.gate.write();
        if gate.state == ConnState::Terminated {
            return;
        }
        info!(
            conn_id = self.conn_id,
            backend = %self.backend,
            state = to.as_str(),
            "transitioning connection state"
        );
        gate.state = to;
    }
}

/// Everything one connected generation of tasks needs. Channels and the
/// cancellation token are remade on every successful dial.
struct Session {
    outbound_rx: mpsc::Receiver<Link>,
    reader: ConnReader,
    writer: ConnWriter,
    cancel: CancellationToken,
}

/// A single pipelined connection to one backend address.
pub struct Conn {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Conn {
    /// Dial the backend and start the supervising task. Construction fails
    /// if the initial dial attempts are exhausted.
    pub async fn connect(backend: Backend) -> Result<Conn> {
        let shared = Arc::new(Shared {
            conn_id: next_conn_id(),
            backend,
            gate: RwLock::new(Gate {
                state: ConnState::Unavailable,
                outbound: None,
                cancel: CancellationToken::new(),
            }),
        });

        let session = setup(&shared).await?;
        let handle = tokio::spawn(supervise(shared.clone(), Some(session)));
        Ok(Conn {
            shared,
            supervisor: Mutex::new(Some(handle)),
        })
    }

    pub fn state(&self) -> ConnState {
        self.shared.gate.read().state
    }

    /// Queue a link for transmission. Never blocks: a full queue, a
    /// non-connected state or a state transition in progress all hand the
    /// link back immediately so the caller can route it elsewhere.
    pub fn append(&self, link: Link) -> std::result::Result<(), (Link, Error)> {
        let Some(gate) = self.shared.gate.try_read() else {
            return Err((link, Error::ChangingState));
        };
        if gate.state != ConnState::Connected {
            return Err((
                link,
                Error::NotConnected {
                    state: gate.state.as_str(),
                },
            ));
        }
        let Some(outbound) = gate.outbound.as_ref() else {
            return Err((
                link,
                Error::NotConnected {
                    state: gate.state.as_str(),
                },
            ));
        };
        match outbound.try_send(link) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(link)) => Err((link, Error::QueueFull)),
            Err(TrySendError::Closed(link)) => Err((
                link,
                Error::NotConnected {
                    state: ConnState::Reconnecting.as_str(),
                },
            )),
        }
    }

    /// Terminate the connection. Every link still queued completes with a
    /// zombie error before this returns. Terminated is absorbing; closing
    /// twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        info!(
            conn_id = self.shared.conn_id,
            backend = %self.shared.backend,
            "received signal to close connection"
        );
        {
            let mut gate = self.shared.gate.write();
            gate.state = ConnState::Terminated;
            gate.outbound = None;
            gate.cancel.cancel();
        }
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|err| {
                Error::Io(io::Error::new(io::ErrorKind::Other, err.to_string()))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl Conn {
    /// Kill the supervising task in place so a later `close()` observes a
    /// join failure.
    pub(crate) fn abort_supervisor(&self) {
        if let Some(handle) = self.supervisor.lock().as_ref() {
            handle.abort();
        }
    }
}

/// Dial with retries and swing the gate open. Rebuilds the outbound queue
/// and cancellation token for the new socket generation.
async fn setup(shared: &Arc<Shared>) -> Result<Session> {
    let mut last_err = None;
    for attempt in 0..CONN_ATTEMPT_COUNT {
        debug!(
            conn_id = shared.conn_id,
            backend = %shared.backend,
            attempt,
            "trying to establish connection to backend"
        );
        match dial(&shared.backend).await {
            Ok(stream) => {
                let (read_half, write_half) = tokio::io::split(stream);
                let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_SIZE);
                let cancel = CancellationToken::new();
                {
                    let mut gate = shared.gate.write();
                    if gate.state == ConnState::Terminated {
                        return Err(Error::NotConnected {
                            state: ConnState::Terminated.as_str(),
                        });
                    }
                    gate.state = ConnState::Connected;
                    gate.outbound = Some(outbound_tx);
                    gate.cancel = cancel.clone();
                }
                debug!(
                    conn_id = shared.conn_id,
                    backend = %shared.backend,
                    "successfully established a connection"
                );
                return Ok(Session {
                    outbound_rx,
                    reader: BufReader::new(read_half),
                    writer: BufWriter::new(write_half),
                    cancel,
                });
            }
            Err(err) => {
                last_err = Some(err);
                sleep(RECONNECT_DELAY).await;
            }
        }
    }

    shared.transition(ConnState::ConnectFailed);
    Err(last_err.unwrap_or(Error::DialTimeout {
        backend: shared.backend.to_string(),
    }))
}

/// Run writer/reader generations until the connection terminates or the
/// cycle budget runs out. Each generation that falls over gets its queues
/// drained with zombie errors before the redial.
async fn supervise(shared: Arc<Shared>, mut session: Option<Session>) {
    let mut cycles: u32 = 0;
    while cycles < MONITOR_ROUTINE_CYCLES {
        cycles += 1;

        if shared.is_terminated() {
            debug!(
                conn_id = shared.conn_id,
                backend = %shared.backend,
                "supervisor exiting as connection is closed"
            );
            if let Some(s) = session.take() {
                drain_links(s.outbound_rx, || Error::ZombieOnEncoder);
            }
            return;
        }

        if let Some(s) = session.take() {
            let Session {
                outbound_rx,
                reader,
                writer,
                cancel,
            } = s;
            debug!(
                conn_id = shared.conn_id,
                backend = %shared.backend,
                "starting writer and reader routines"
            );
            let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_SIZE);
            let writer_task = tokio::spawn(write_loop(
                shared.clone(),
                outbound_rx,
                inbound_tx,
                writer,
                cancel.clone(),
            ));
            let reader_task = tokio::spawn(read_loop(shared.clone(), inbound_rx, reader, cancel));
            let (writer_rx, reader_rx) = tokio::join!(writer_task, reader_task);

            // Reconnecting blocks new submissions while the queues are
            // swept of links the dead generation never finished.
            if !shared.is_terminated() {
                shared.transition(ConnState::Reconnecting);
            }
            {
                let mut gate = shared.gate.write();
                gate.outbound = None;
            }
            if let Ok(rx) = writer_rx {
                drain_links(rx, || Error::ZombieOnEncoder);
            }
            if let Ok(rx) = reader_rx {
                drain_links(rx, || Error::ZombieOnDecoder);
            }
        }

        if shared.is_terminated() {
            debug!(
                conn_id = shared.conn_id,
                backend = %shared.backend,
                "supervisor exiting after cleaning up the zombie links in queue"
            );
            return;
        }

        sleep(MONITOR_ROUTINE_SLEEP).await;
        match setup(&shared).await {
            Ok(next) => {
                cycles = 0;
                session = Some(next);
            }
            Err(err) => {
                warn!(
                    conn_id = shared.conn_id,
                    backend = %shared.backend,
                    error = %err,
                    "failed to re-establish connection to backend"
                );
            }
        }
    }

    error!(
        conn_id = shared.conn_id,
        backend = %shared.backend,
        "supervisor giving up on trying to connect to backend"
    );
}

fn drain_links(mut rx: mpsc::Receiver<Link>, zombie: impl Fn() -> Error) {
    while let Ok(link) = rx.try_recv() {
        link.complete(Err(zombie()));
    }
}

/// Serialize outbound links one at a time and hand each to the inbound
/// queue after a successful flush; that ordering is what lets the reader
/// decode strictly in wire order.
async fn write_loop(
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::Receiver<Link>,
    inbound_tx: mpsc::Sender<Link>,
    mut writer: ConnWriter,
    cancel: CancellationToken,
) -> mpsc::Receiver<Link> {
    let mut scratch = BytesMut::with_capacity(4 * 1024);
    let mut deadline = DeadlineTracker::new();

    loop {
        let link = tokio::select! {
            _ = cancel.cancelled() => return outbound_rx,
            maybe_link = outbound_rx.recv() => match maybe_link {
                Some(link) => link,
                None => {
                    cancel.cancel();
                    return outbound_rx;
                }
            },
        };

        scratch.clear();
        let encoded = { link.encoder().lock().await.encode(&mut scratch) };
        if let Err(err) = encoded {
            warn!(
                conn_id = shared.conn_id,
                backend = %shared.backend,
                error = %err,
                "error trying to serialize request for backend"
            );
            link.complete(Err(err));
            cancel.cancel();
            return outbound_rx;
        }

        let at = deadline.refresh();
        let flushed = tokio::select! {
            result = timeout_at(at, async {
                writer.write_all(&scratch).await?;
                writer.flush().await
            }) => result,
            _ = cancel.cancelled() => {
                link.complete(Err(Error::ZombieOnEncoder));
                return outbound_rx;
            }
        };
        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(
                    conn_id = shared.conn_id,
                    backend = %shared.backend,
                    error = %err,
                    "error trying to flush request to backend"
                );
                link.complete(Err(err.into()));
                cancel.cancel();
                return outbound_rx;
            }
            Err(_) => {
                warn!(
                    conn_id = shared.conn_id,
                    backend = %shared.backend,
                    "write deadline expired"
                );
                link.complete(Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "socket write deadline expired",
                ))));
                cancel.cancel();
                return outbound_rx;
            }
        }

        tokio::select! {
            permit = inbound_tx.reserve() => match permit {
                Ok(permit) => permit.send(link),
                Err(_) => {
                    link.complete(Err(Error::ZombieOnEncoder));
                    cancel.cancel();
                    return outbound_rx;
                }
            },
            _ = cancel.cancelled() => {
                link.complete(Err(Error::ZombieOnEncoder));
                return outbound_rx;
            }
        }
    }
}

/// Decode inbound links strictly in queue order, completing each exactly
/// once. Any decode or I/O error takes the whole generation down.
async fn read_loop(
    shared: Arc<Shared>,
    mut inbound_rx: mpsc::Receiver<Link>,
    mut reader: ConnReader,
    cancel: CancellationToken,
) -> mpsc::Receiver<Link> {
    let mut deadline = DeadlineTracker::new();

    loop {
        let link = tokio::select! {
            _ = cancel.cancelled() => return inbound_rx,
            maybe_link = inbound_rx.recv() => match maybe_link {
                Some(link) => link,
                None => {
                    cancel.cancel();
                    return inbound_rx;
                }
            },
        };

        let at = deadline.refresh();
        let decoded = {
            let mut decoder = link.decoder().lock().await;
            tokio::select! {
                result = timeout_at(at, decoder.decode(&mut reader)) => match result {
                    Ok(result) => result,
                    Err(_) => Err(Error::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "socket read deadline expired",
                    ))),
                },
                _ = cancel.cancelled() => Err(Error::ZombieOnDecoder),
            }
        };

        match decoded {
            Ok(()) => link.complete(Ok(())),
            Err(err) => {
                warn!(
                    conn_id = shared.conn_id,
                    backend = %shared.backend,
                    error = %err,
                    "error trying to read response from backend"
                );
                link.complete(Err(err));
                cancel.cancel();
                return inbound_rx;
            }
        }
    }
}
