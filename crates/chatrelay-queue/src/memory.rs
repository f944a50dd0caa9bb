//! In-process broker.
//!
//! Mirrors the default-exchange work-queue behaviour of an AMQP broker
//! inside one process: named queues, messages buffered until a consumer
//! exists, and competing consumers served round-robin. Deliveries to a
//! manual-ack consumer stay outstanding until settled; closing the
//! session requeues the unsettled ones. Used by tests and for
//! `memory://` single-process demos.
//!
//! Faults can be injected to exercise the relay's startup error paths.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use chatrelay_types::config::TransportTimeouts;
use chatrelay_types::RelayError;

use crate::broker::{Acknowledger, BResult, Broker, BrokerSession, Delivery, DeliveryStream};
use crate::config::AckMode;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Per-queue counters, exposed for assertions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QueueStats {
    /// Messages waiting for a consumer.
    pub ready: usize,
    /// Live consumers.
    pub consumers: usize,
    /// Messages acked by a consumer.
    pub acked: usize,
    /// Messages rejected by a consumer.
    pub rejected: usize,
    /// Messages handed to a manual-ack consumer and not yet settled.
    pub unacked: usize,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    consumers: Vec<ConsumerSlot>,
    /// Delivery tag -> (session id, payload), for manual-ack consumers.
    unacked: BTreeMap<u64, (usize, Vec<u8>)>,
    next: usize,
    next_tag: u64,
    acked: usize,
    rejected: usize,
}

struct ConsumerSlot {
    session_id: usize,
    manual: bool,
    tx: mpsc::UnboundedSender<(u64, Vec<u8>)>,
}

impl QueueState {
    fn prune(&mut self) {
        self.consumers.retain(|slot| !slot.tx.is_closed());
    }

    /// Hands `payload` to the next live consumer, or buffers it.
    fn dispatch(&mut self, payload: Vec<u8>) {
        self.prune();
        let mut payload = payload;
        while !self.consumers.is_empty() {
            let idx = self.next % self.consumers.len();
            self.next = self.next.wrapping_add(1);
            let tag = self.next_tag;
            self.next_tag += 1;

            let slot = &self.consumers[idx];
            if slot.manual {
                self.unacked.insert(tag, (slot.session_id, payload.clone()));
            }
            match slot.tx.send((tag, payload)) {
                Ok(()) => return,
                Err(mpsc::error::SendError((_, returned))) => {
                    payload = returned;
                    self.unacked.remove(&tag);
                    self.consumers.remove(idx);
                }
            }
        }
        self.ready.push_back(payload);
    }

    /// Drops the consumers of `session_id` and redelivers everything
    /// they left unsettled, oldest first.
    fn release_session(&mut self, session_id: usize) {
        self.consumers.retain(|slot| slot.session_id != session_id);

        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, (owner, _))| *owner == session_id)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in tags {
            if let Some((_, payload)) = self.unacked.remove(&tag) {
                self.dispatch(payload);
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    open_sessions: AtomicUsize,
    next_session: AtomicUsize,
    connect_failures: AtomicUsize,
    fail_channel: AtomicBool,
}

impl Inner {
    fn queues(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        // A poisoned map is still structurally valid.
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

/// In-process broker. Clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` connection attempts fail as unreachable.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Makes the next connection succeed but its channel open fail.
    pub fn fail_next_channel(&self) {
        self.inner.fail_channel.store(true, Ordering::SeqCst);
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.inner.open_sessions.load(Ordering::SeqCst)
    }

    /// Counters for `queue`, or `None` if it was never declared.
    pub fn stats(&self, queue: &str) -> Option<QueueStats> {
        let mut queues = self.inner.queues();
        queues.get_mut(queue).map(|state| {
            state.prune();
            QueueStats {
                ready: state.ready.len(),
                consumers: state.consumers.len(),
                acked: state.acked,
                rejected: state.rejected,
                unacked: state.unacked.len(),
            }
        })
    }

    /// Publishes raw bytes without a session, as a foreign producer
    /// would. Dropped if `queue` was never declared.
    pub fn inject(&self, queue: &str, payload: Vec<u8>) {
        route(&self.inner, queue, payload);
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    /// Connects instantly; there is nothing to time out.
    async fn connect(&self, _timeouts: &TransportTimeouts) -> BResult<Box<dyn BrokerSession>> {
        let failures = &self.inner.connect_failures;
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RelayError::BrokerUnavailable {
                reason: "memory broker refused connection".into(),
            });
        }

        if self.inner.fail_channel.swap(false, Ordering::SeqCst) {
            // The "connection" is never counted as open.
            return Err(RelayError::ChannelError {
                reason: "memory broker refused channel".into(),
            });
        }

        self.inner.open_sessions.fetch_add(1, Ordering::SeqCst);
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemorySession {
            id,
            inner: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }

    fn describe(&self) -> String {
        "memory://".into()
    }
}

/// Routes `payload` through the default exchange.
fn route(inner: &Inner, queue: &str, payload: Vec<u8>) {
    let mut queues = inner.queues();
    match queues.get_mut(queue) {
        Some(state) => state.dispatch(payload),
        None => tracing::debug!(%queue, "memory broker dropped message for undeclared queue"),
    }
}

// ---------------------------------------------------------------------------
// MemorySession
// ---------------------------------------------------------------------------

struct MemorySession {
    id: usize,
    inner: Arc<Inner>,
    closed: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self, op: &str) -> BResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::ChannelError {
                reason: format!("{op} on closed channel"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn declare_queue(&self, queue: &str) -> BResult<()> {
        self.ensure_open("queue_declare")?;
        self.inner.queues().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn consume(&self, queue: &str, ack_mode: AckMode) -> BResult<DeliveryStream> {
        self.ensure_open("basic_consume")?;

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut queues = self.inner.queues();
            let state = queues.get_mut(queue).ok_or_else(|| RelayError::ChannelError {
                reason: format!("no queue '{queue}'"),
            })?;
            state.consumers.push(ConsumerSlot {
                session_id: self.id,
                manual: ack_mode == AckMode::Manual,
                tx,
            });
            // Backlog goes to the first consumer to arrive.
            let backlog: Vec<Vec<u8>> = state.ready.drain(..).collect();
            for payload in backlog {
                state.dispatch(payload);
            }
        }

        let inner = Arc::clone(&self.inner);
        let queue = queue.to_string();
        let stream = UnboundedReceiverStream::new(rx).map(move |(tag, payload)| {
            Ok(match ack_mode {
                AckMode::Auto => Delivery::settled(payload),
                AckMode::Manual => Delivery::pending(
                    payload,
                    Box::new(MemoryAcker {
                        inner: Arc::clone(&inner),
                        queue: queue.clone(),
                        tag,
                    }),
                ),
            })
        });

        Ok(stream.boxed())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> BResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::SendFailure {
                reason: format!("publish to '{queue}' on closed channel"),
            });
        }
        route(&self.inner, queue, payload);
        Ok(())
    }

    async fn close(&self) -> BResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Dropping the senders ends this session's delivery streams.
        for state in self.inner.queues().values_mut() {
            state.release_session(self.id);
        }
        self.inner.open_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryAcker
// ---------------------------------------------------------------------------

struct MemoryAcker {
    inner: Arc<Inner>,
    queue: String,
    tag: u64,
}

impl MemoryAcker {
    /// Settles the delivery. Fails if it was already requeued by a
    /// session close, as AMQP does for a stale delivery tag.
    fn settle(&self, op: &str, count: impl FnOnce(&mut QueueState)) -> BResult<()> {
        let mut queues = self.inner.queues();
        let state = queues
            .get_mut(&self.queue)
            .filter(|state| state.unacked.contains_key(&self.tag))
            .ok_or_else(|| RelayError::ChannelError {
                reason: format!("{op} of unknown delivery tag {}", self.tag),
            })?;
        state.unacked.remove(&self.tag);
        count(state);
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> BResult<()> {
        self.settle("ack", |state| state.acked += 1)
    }

    async fn reject(self: Box<Self>) -> BResult<()> {
        self.settle("reject", |state| state.rejected += 1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
