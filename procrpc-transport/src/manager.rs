//! Connection manager: a single-threaded reactor over mio.
//!
//! Each iteration:
//! 1. folds reactivation requests, registers new sockets with the poller and
//!    arms or cancels each connection's timer from its descriptor
//! 2. waits for readiness, bounded by the earliest timer deadline
//! 3. runs `receive`/`send` on connections that are ready
//! 4. applies expired timers through `reset(true)`
//! 5. dispatches every connection that needs attention
//! 6. reclaims dead auto-destroyable connections
//!
//! Every socket is registered once for both directions. mio readiness is
//! edge-triggered, so every slot keeps a sticky readiness hint per direction.
//! A hint is set by a poll event, by registration or by a reactivation, and
//! cleared once an operation comes back with exactly the descriptor it
//! started from, which is how a connection reports that the socket would
//! block. Each operation moves at most one datagram.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io::ErrorKind;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Registry, Token, Waker};
use tracing::{debug, info, trace, warn};

use crate::config::ReactorConfig;
use crate::connection::{ConnectionId, IoMode, Registration, RpcConnection};
use crate::error::TransportError;
use crate::timer::{TimerHandle, TimerQueue};

// Connection ids start at 1, so token 0 is free for the waker.
const WAKER_TOKEN: Token = Token(0);

/// Receives connections that have a complete request or reply buffered.
///
/// A server-side dispatcher must answer with exactly one reply operation or
/// abandon the request with `persona_non_grata`.
pub trait Dispatcher {
    fn dispatch(&mut self, id: ConnectionId, conn: &mut dyn RpcConnection);
}

impl<F> Dispatcher for F
where
    F: FnMut(ConnectionId, &mut dyn RpcConnection),
{
    fn dispatch(&mut self, id: ConnectionId, conn: &mut dyn RpcConnection) {
        self(id, conn)
    }
}

/// Counters kept by the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub iterations: u64,
    pub datagrams_received: u64,
    /// Datagrams dropped by clients as replies to an earlier request.
    pub discarded: u64,
    pub datagrams_sent: u64,
    pub dispatches: u64,
    pub timeouts: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub protocol_errors: u64,
    pub reclaimed: u64,
}

/// Thread-safe handle that stops the reactor loop.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Requests shutdown and interrupts a pending readiness wait.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake reactor");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct Slot {
    conn: Box<dyn RpcConnection>,
    registered: bool,
    readable: bool,
    writable: bool,
    timer: Option<TimerHandle>,
}

impl Slot {
    /// Whether an operation can be attempted without waiting.
    fn is_actionable(&self) -> bool {
        let mode = self.conn.io_mode();
        mode.needs_attention()
            || (mode.is_readable() && self.readable)
            || (mode.is_writeable() && self.writable)
    }
}

pub struct ConnectionManager {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    slots: BTreeMap<ConnectionId, Slot>,
    next_id: u64,
    timers: TimerQueue<ConnectionId>,
    reactivated: Rc<RefCell<VecDeque<ConnectionId>>>,
    shutdown: Arc<AtomicBool>,
    max_poll_interval: Duration,
    stats: ManagerStats,
}

impl ConnectionManager {
    pub fn new(config: &ReactorConfig) -> Result<Self, TransportError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity.max(1)),
            waker,
            slots: BTreeMap::new(),
            next_id: 1,
            timers: TimerQueue::new(),
            reactivated: Rc::new(RefCell::new(VecDeque::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            max_poll_interval: config.max_poll_interval(),
            stats: ManagerStats::default(),
        })
    }

    /// Registers a connection. Ids are handed out in increasing order and
    /// connections are serviced in that order.
    pub fn add_connection<C>(&mut self, conn: C) -> ConnectionId
    where
        C: RpcConnection + 'static,
    {
        self.add_boxed(Box::new(conn))
    }

    pub fn add_boxed(&mut self, mut conn: Box<dyn RpcConnection>) -> ConnectionId {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        conn.attach(Registration::new(id, self.reactivated.clone()));
        debug!(%id, role = ?conn.role(), local = ?conn.local_addr(), "connection added");
        self.slots.insert(
            id,
            Slot {
                conn,
                registered: false,
                readable: false,
                writable: false,
                timer: None,
            },
        );
        id
    }

    /// Deregisters a connection and hands it back to the caller.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Box<dyn RpcConnection>> {
        let mut slot = self.slots.remove(&id)?;
        release_slot(self.poll.registry(), &mut self.timers, id, &mut slot);
        slot.conn.detach();
        debug!(%id, "connection removed");
        Some(slot.conn)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&dyn RpcConnection> {
        self.slots.get(&id).map(|slot| slot.conn.as_ref())
    }

    pub fn connection_mut(
        &mut self,
        id: ConnectionId,
    ) -> Option<&mut (dyn RpcConnection + 'static)> {
        self.slots.get_mut(&id).map(|slot| slot.conn.as_mut())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Re-evaluates a connection on the next iteration without an I/O event.
    pub fn reactivate_connection(&mut self, id: ConnectionId) {
        self.reactivated.borrow_mut().push_back(id);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
            waker: self.waker.clone(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    /// Runs until shutdown is requested.
    pub fn run<D: Dispatcher>(&mut self, dispatcher: &mut D) -> Result<(), TransportError> {
        self.run_while(dispatcher, || true)
    }

    /// Runs until shutdown is requested or `keep_going` returns false.
    pub fn run_while<D, P>(
        &mut self,
        dispatcher: &mut D,
        mut keep_going: P,
    ) -> Result<(), TransportError>
    where
        D: Dispatcher,
        P: FnMut() -> bool,
    {
        info!(connections = self.slots.len(), "reactor started");
        while !self.is_shutdown() && keep_going() {
            self.run_once(dispatcher)?;
        }
        info!(iterations = self.stats.iterations, "reactor stopped");
        Ok(())
    }

    /// Runs a single reactor iteration.
    ///
    /// Only a failing readiness wait is reported as an error; connection
    /// failures are logged and counted.
    pub fn run_once<D: Dispatcher + ?Sized>(
        &mut self,
        dispatcher: &mut D,
    ) -> Result<(), TransportError> {
        self.stats.iterations += 1;

        let woken = self.drain_reactivations();
        self.sync_slots(Instant::now());

        let wait = if woken || self.slots.values().any(Slot::is_actionable) {
            Duration::ZERO
        } else {
            self.wait_bound(Instant::now())
        };
        self.wait_for_events(wait)?;

        self.service_io();
        self.fire_timers(Instant::now());
        self.dispatch_ready(dispatcher);
        self.reclaim_dead();
        Ok(())
    }

    fn drain_reactivations(&mut self) -> bool {
        let ids: Vec<ConnectionId> = self.reactivated.borrow_mut().drain(..).collect();
        let mut woken = false;
        for id in ids {
            if let Some(slot) = self.slots.get_mut(&id) {
                trace!(%id, "connection reactivated");
                slot.readable = true;
                slot.writable = true;
                woken = true;
            }
        }
        woken
    }

    fn sync_slots(&mut self, now: Instant) {
        let registry = self.poll.registry();
        for (&id, slot) in self.slots.iter_mut() {
            sync_slot(registry, &mut self.timers, id, slot, now);
        }
    }

    fn wait_bound(&mut self, now: Instant) -> Duration {
        match self.timers.earliest_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(now)
                .min(self.max_poll_interval),
            None => self.max_poll_interval,
        }
    }

    fn wait_for_events(&mut self, wait: Duration) -> Result<(), TransportError> {
        match self.poll.poll(&mut self.events, Some(wait)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                self.events.clear();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let id = ConnectionId::new(event.token().0 as u64);
            if let Some(slot) = self.slots.get_mut(&id) {
                if event.is_readable() || event.is_error() || event.is_read_closed() {
                    slot.readable = true;
                }
                if event.is_writable() || event.is_error() || event.is_write_closed() {
                    slot.writable = true;
                }
            }
        }
        Ok(())
    }

    fn service_io(&mut self) {
        for (&id, slot) in self.slots.iter_mut() {
            let before = slot.conn.io_mode();
            if before.is_readable() && slot.readable {
                let after = slot.conn.receive();
                if after == before {
                    slot.readable = false;
                } else {
                    if after.discarded() {
                        self.stats.discarded += 1;
                    } else if !after.has_errors() || after.had_error() {
                        self.stats.datagrams_received += 1;
                    }
                    record_failures(&mut self.stats, id, after);
                }
            } else if before.is_writeable() && slot.writable {
                let after = slot.conn.send();
                if after == before {
                    slot.writable = false;
                } else {
                    if !after.has_errors() {
                        self.stats.datagrams_sent += 1;
                    }
                    record_failures(&mut self.stats, id, after);
                }
            }
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        for id in self.timers.pop_expired(now) {
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            slot.timer = None;
            if slot.conn.io_mode().needs_timeout() {
                self.stats.timeouts += 1;
                let mode = slot.conn.reset(true);
                debug!(%id, mode = mode.bits(), "connection timed out");
            }
        }
    }

    fn dispatch_ready<D: Dispatcher + ?Sized>(&mut self, dispatcher: &mut D) {
        for (&id, slot) in self.slots.iter_mut() {
            if slot.conn.io_mode().needs_attention() {
                self.stats.dispatches += 1;
                dispatcher.dispatch(id, slot.conn.as_mut());
            }
        }
    }

    fn reclaim_dead(&mut self) {
        let dead: Vec<ConnectionId> = self
            .slots
            .iter()
            .filter(|(_, slot)| {
                slot.conn.io_mode().is_dead() && slot.conn.is_auto_destroyable()
            })
            .map(|(&id, _)| id)
            .collect();

        for id in dead {
            if let Some(mut slot) = self.slots.remove(&id) {
                release_slot(self.poll.registry(), &mut self.timers, id, &mut slot);
                self.stats.reclaimed += 1;
                debug!(%id, "dead connection reclaimed");
            }
        }
    }
}

/// Registers the socket of one slot on first sight and brings its timer in
/// line with its descriptor.
fn sync_slot(
    registry: &Registry,
    timers: &mut TimerQueue<ConnectionId>,
    id: ConnectionId,
    slot: &mut Slot,
    now: Instant,
) {
    let mode = slot.conn.io_mode();

    if mode.needs_timeout() {
        if slot.timer.is_none() {
            let deadline = now + slot.conn.timeout();
            slot.timer = Some(timers.schedule(deadline, id));
            trace!(%id, timeout = ?slot.conn.timeout(), "timer armed");
        }
    } else if let Some(handle) = slot.timer.take() {
        timers.cancel(handle);
    }

    if slot.registered {
        return;
    }
    let Some(source) = slot.conn.source() else {
        return;
    };
    let token = Token(id.as_u64() as usize);
    match registry.register(source, token, Interest::READABLE | Interest::WRITABLE) {
        Ok(()) => {
            slot.registered = true;
            slot.readable = true;
            slot.writable = true;
        }
        Err(e) => {
            warn!(%id, error = %e, "poller registration failed");
        }
    }
}

fn release_slot(
    registry: &Registry,
    timers: &mut TimerQueue<ConnectionId>,
    id: ConnectionId,
    slot: &mut Slot,
) {
    if let Some(handle) = slot.timer.take() {
        timers.cancel(handle);
    }
    if std::mem::take(&mut slot.registered) {
        if let Some(source) = slot.conn.source() {
            if let Err(e) = registry.deregister(source) {
                debug!(%id, error = %e, "deregistration failed");
            }
        }
    }
}

fn record_failures(stats: &mut ManagerStats, id: ConnectionId, mode: IoMode) {
    if mode.had_rx_error() {
        stats.rx_errors += 1;
        warn!(%id, "receive error");
    }
    if mode.had_tx_error() {
        stats.tx_errors += 1;
        warn!(%id, "send error");
    }
    if mode.had_error() {
        stats.protocol_errors += 1;
        debug!(%id, "protocol error");
    }
}
