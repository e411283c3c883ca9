//! The cooperative, single-threaded event loop: the thing that actually
//! drives probes out, collects replies, and dispatches both to whatever
//! algorithm instances are running.
//!
//! Grounded on `libparistraceroute/pt_loop.c`: one `epoll` fd multiplexes
//! the send queue, receive queue, sniffer sockets, an algorithm-event
//! queue, a user-event queue, and a signalfd for `SIGINT`/`SIGQUIT`. This
//! crate uses `mio::Poll` in place of raw `epoll_ctl` bookkeeping, but
//! keeps the same fd set and the same signal handling via a raw
//! `signalfd` (following the precedent in [`crate::queue`] of reaching
//! for `libc` directly rather than guessing at a higher-level crate's
//! exact API surface when that surface can't be checked by compiling).
//!
//! `pt_loop_t` hands every handler a `pt_loop_t*` it can call
//! `pt_send_probe`/`pt_raise_event`/`pt_raise_error`/`pt_raise_terminated`/
//! `pt_stop_instance` through; [`LoopHandle`] is that same seam. A
//! handler never touches `EventLoop` directly, only the buffers a
//! `LoopHandle` collects, which [`EventLoop::apply_handle`] then drains
//! into the real send queue, the real `algorithm_queue`, and the real
//! `user_queue` after the handler call returns — the disjoint-borrow
//! trick that lets one instance's dispatch run without a live borrow on
//! the rest of `EventLoop`'s state.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::algorithm::{AlgorithmEvent, AlgorithmInstance, AlgorithmOptions, AlgorithmRegistry, AlgorithmResult};
use crate::config::LoopConfig;
use crate::error::{ProbezError, Result};
use crate::network::Network;
use crate::probe::Probe;
use crate::probe_group::ProbeGroup;
use crate::queue::EventQueue;

const SENDQ: Token = Token(0);
const RECVQ: Token = Token(1);
const SNIFFER_V4: Token = Token(2);
const SNIFFER_V6: Token = Token(3);
const SIGNALS: Token = Token(4);
const ALGQ: Token = Token(5);
const USERQ: Token = Token(6);

/// A message the loop hands to whatever's watching the run from outside
/// (`ALGORITHM_EVENT`/`ALGORITHM_ERROR`/`ALGORITHM_TERMINATED`, surfaced
/// to a caller-supplied [`UserEventHandler`] rather than another
/// algorithm instance).
#[derive(Debug, Clone)]
pub enum UserEvent {
    /// `raise_event`: a handler-specific, human-readable status update.
    Instance { instance_id: u64, message: String },
    /// `raise_error`: a core-layer or handler-level failure.
    Error { instance_id: u64, message: String },
    /// An instance reached `raise_terminated` or was reaped by the loop.
    Terminated { instance_id: u64, result: AlgorithmResult },
}

/// Called once per drained [`UserEvent`]. A plain function pointer, like
/// [`crate::algorithm::AlgorithmHandler`] — this crate has no need for
/// closures with captured state at this seam.
pub type UserEventHandler = fn(&UserEvent);

/// The `probez-cli` default: logs every user event at `info`.
pub fn log_user_events(event: &UserEvent) {
    match event {
        UserEvent::Instance { instance_id, message } => info!(instance_id, message, "algorithm event"),
        UserEvent::Error { instance_id, message } => warn!(instance_id, message, "algorithm error"),
        UserEvent::Terminated { instance_id, result } => info!(instance_id, ?result, "algorithm terminated"),
    }
}

/// The seam a handler is actually called through. Everything a handler
/// does — send a probe, raise a user-visible event, terminate itself,
/// stop the whole loop — is recorded here rather than applied directly,
/// since the handler is invoked while the instance it belongs to is
/// mutably borrowed out of [`EventLoop::instances`].
pub struct LoopHandle {
    current_instance: u64,
    other_instance_ids: Vec<u64>,
    sent_probes: Vec<Probe>,
    user_events: Vec<UserEvent>,
    terminated: Option<AlgorithmResult>,
    stop_loop: bool,
}

impl LoopHandle {
    fn new(current_instance: u64, other_instance_ids: Vec<u64>) -> Self {
        Self {
            current_instance,
            other_instance_ids,
            sent_probes: Vec::new(),
            user_events: Vec::new(),
            terminated: None,
            stop_loop: false,
        }
    }

    /// Builds a handle with no live loop behind it, for exercising a
    /// handler in isolation: `EventLoop::new` opens real raw sockets, so
    /// unit tests of `ping_handler`/`traceroute_handler` construct a
    /// handle this way instead of standing up a whole loop.
    pub fn for_test(current_instance: u64) -> Self {
        Self::new(current_instance, Vec::new())
    }

    /// The ids of every other instance currently registered with the
    /// loop, at the moment this handle was created.
    pub fn other_instances(&self) -> &[u64] {
        &self.other_instance_ids
    }

    pub fn send_probe(&mut self, probe: Probe) -> Result<()> {
        self.sent_probes.push(probe);
        Ok(())
    }

    pub fn raise_event(&mut self, message: impl Into<String>) -> Result<()> {
        self.user_events.push(UserEvent::Instance { instance_id: self.current_instance, message: message.into() });
        Ok(())
    }

    pub fn raise_error(&mut self, message: impl Into<String>) -> Result<()> {
        self.user_events.push(UserEvent::Error { instance_id: self.current_instance, message: message.into() });
        Ok(())
    }

    pub fn raise_terminated(&mut self, result: AlgorithmResult) -> Result<()> {
        self.terminated = Some(result);
        Ok(())
    }

    /// Stops the whole loop, not just this instance: every other
    /// instance is broadcast `ALGORITHM_TERM` and the run loop exits
    /// once its current pass finishes.
    pub fn terminate(&mut self) {
        self.stop_loop = true;
    }

    #[cfg(test)]
    pub fn take_sent_probes(&mut self) -> Vec<Probe> {
        std::mem::take(&mut self.sent_probes)
    }

    #[cfg(test)]
    pub fn take_user_events(&mut self) -> Vec<UserEvent> {
        std::mem::take(&mut self.user_events)
    }

    #[cfg(test)]
    pub fn take_terminated(&mut self) -> Option<AlgorithmResult> {
        self.terminated.take()
    }
}

struct SignalFd {
    fd: OwnedFd,
}

impl SignalFd {
    fn new() -> Result<Self> {
        unsafe {
            let mut mask: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, libc::SIGINT);
            libc::sigaddset(&mut mask, libc::SIGQUIT);
            if libc::sigprocmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut()) < 0 {
                return Err(ProbezError::Io(io::Error::last_os_error()));
            }
            let raw = libc::signalfd(-1, &mask, libc::SFD_NONBLOCK);
            if raw < 0 {
                return Err(ProbezError::Io(io::Error::last_os_error()));
            }
            Ok(Self { fd: OwnedFd::from_raw_fd(raw) })
        }
    }

    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Drains one pending signal, returning its number, or `None` if
    /// there isn't one ready right now.
    fn read_signal(&self) -> Result<Option<i32>> {
        let mut info: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::read(
                self.as_raw_fd(),
                &mut info as *mut _ as *mut libc::c_void,
                std::mem::size_of::<libc::signalfd_siginfo>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(ProbezError::Io(err));
        }
        Ok(Some(info.ssi_signo as i32))
    }
}

pub struct EventLoop {
    poll: Poll,
    network: Network,
    group: ProbeGroup,
    instances: Vec<AlgorithmInstance>,
    results: Vec<(u64, AlgorithmResult)>,
    /// Pending `(instance_id, event)` deliveries: every reply, timeout,
    /// and `ALGORITHM_TERM` broadcast is queued here rather than
    /// dispatched inline, so the run loop's own poll/dispatch pass is
    /// the single place instance state actually mutates.
    algorithm_queue: EventQueue<(u64, AlgorithmEvent)>,
    user_queue: EventQueue<UserEvent>,
    user_handler: UserEventHandler,
    signals: SignalFd,
    timeout: Duration,
    deadline: Instant,
    stop: bool,
    next_instance_id: u64,
}

impl EventLoop {
    pub fn new(config: &LoopConfig, user_handler: UserEventHandler) -> Result<Self> {
        let poll = Poll::new()?;
        let mut network = Network::new()?;
        let signals = SignalFd::new()?;
        let algorithm_queue: EventQueue<(u64, AlgorithmEvent)> = EventQueue::new()?;
        let user_queue: EventQueue<UserEvent> = EventQueue::new()?;

        let registry = poll.registry();
        let sendq_fd = network.send_queue.as_raw_fd();
        let recvq_fd = network.recv_queue.as_raw_fd();
        let signal_fd = signals.as_raw_fd();
        let algq_fd = algorithm_queue.as_raw_fd();
        let userq_fd = user_queue.as_raw_fd();
        registry.register(&mut SourceFd(&sendq_fd), SENDQ, Interest::READABLE)?;
        registry.register(&mut SourceFd(&recvq_fd), RECVQ, Interest::READABLE)?;
        registry.register(&mut SourceFd(&signal_fd), SIGNALS, Interest::READABLE)?;
        registry.register(&mut SourceFd(&algq_fd), ALGQ, Interest::READABLE)?;
        registry.register(&mut SourceFd(&userq_fd), USERQ, Interest::READABLE)?;
        network.sniffer_mut().register(registry, SNIFFER_V4, SNIFFER_V6)?;

        let timeout = config.timeout();
        Ok(Self {
            poll,
            network,
            group: ProbeGroup::new(),
            instances: Vec::new(),
            results: Vec::new(),
            algorithm_queue,
            user_queue,
            user_handler,
            signals,
            timeout,
            deadline: Instant::now() + timeout * 10,
            stop: false,
            next_instance_id: 1,
        })
    }

    /// Creates and starts a new algorithm instance, immediately
    /// delivering `ALGORITHM_INIT` and queuing whatever it asks to send.
    pub fn add_instance(&mut self, name: &str, options: AlgorithmOptions, skeleton: Probe) -> Result<u64> {
        let descriptor = AlgorithmRegistry::global().by_name(name)?;
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        let instance = AlgorithmInstance::new(id, descriptor, options, skeleton);
        self.instances.push(instance);
        self.dispatch_to_instance(id, AlgorithmEvent::Init)?;
        Ok(id)
    }

    /// Runs `event` through instance `id`'s handler and folds whatever
    /// the handler asked for back into the loop's real state.
    fn dispatch_to_instance(&mut self, id: u64, event: AlgorithmEvent) -> Result<()> {
        let Some(idx) = self.instances.iter().position(|i| i.id == id) else {
            debug!(instance_id = id, "dropping event for unknown or already-reaped instance");
            return Ok(());
        };
        let other_ids: Vec<u64> = self.instances.iter().map(|i| i.id).filter(|&other| other != id).collect();
        let mut handle = LoopHandle::new(id, other_ids);
        self.instances[idx].dispatch(&mut handle, &event)?;
        self.apply_handle(id, handle)
    }

    /// Drains a handler's [`LoopHandle`] into the loop's actual send
    /// queue, scheduling group, user queue, and instance table.
    fn apply_handle(&mut self, instance_id: u64, handle: LoopHandle) -> Result<()> {
        let LoopHandle { sent_probes, user_events, terminated, stop_loop, .. } = handle;

        for mut probe in sent_probes {
            probe.caller = Some(instance_id);
            probe.queuing_time = Some(Instant::now());
            if probe.next_delay() > 0.0 {
                self.group.insert(probe);
            } else {
                self.network.send_queue.push(probe)?;
            }
        }
        for event in user_events {
            self.user_queue.push(event)?;
        }

        if let Some(result) = terminated {
            info!(instance_id, "algorithm instance terminated");
            self.results.push((instance_id, result.clone()));
            self.user_queue.push(UserEvent::Terminated { instance_id, result })?;
            // ALGORITHM_TERMINATED: give the handler a chance to release
            // whatever it's holding in `data` before the instance drops.
            if let Some(idx) = self.instances.iter().position(|i| i.id == instance_id) {
                let mut cleanup = LoopHandle::new(instance_id, Vec::new());
                self.instances[idx].dispatch(&mut cleanup, &AlgorithmEvent::Terminated)?;
            }
            self.instances.retain(|i| i.id != instance_id);
        }

        if stop_loop {
            self.stop = true;
            self.broadcast_term()?;
        }
        Ok(())
    }

    /// Queues `ALGORITHM_TERM` for every currently registered instance.
    fn broadcast_term(&mut self) -> Result<()> {
        for id in self.instances.iter().map(|i| i.id).collect::<Vec<_>>() {
            self.algorithm_queue.push((id, AlgorithmEvent::Term))?;
        }
        Ok(())
    }

    /// Moves every probe in the scheduling group whose delay has
    /// elapsed onto the send queue.
    fn promote_scheduled_probes(&mut self) -> Result<()> {
        while let Some(deadline) = self.group.next_deadline() {
            if deadline > Instant::now() {
                break;
            }
            if let Some(probe) = self.group.pop_next() {
                self.network.send_queue.push(probe)?;
            }
        }
        Ok(())
    }

    fn poll_timeout(&self) -> Duration {
        let mut wait = Duration::from_millis(200);
        if let Some(deadline) = self.group.next_deadline() {
            wait = wait.min(deadline.saturating_duration_since(Instant::now()));
        }
        if let Some(deadline) = self.network.next_timeout_deadline(self.timeout) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            wait = wait.min(remaining);
        }
        wait.min(self.deadline.saturating_duration_since(Instant::now()))
    }

    /// Runs until every algorithm instance has terminated, the watchdog
    /// deadline passes, or `SIGINT`/`SIGQUIT` is received. Returns the
    /// terminal result of every instance that completed.
    pub fn run(&mut self) -> Result<Vec<(u64, AlgorithmResult)>> {
        let mut events = Events::with_capacity(16);
        while !self.stop && !self.instances.is_empty() {
            if Instant::now() >= self.deadline {
                warn!("event loop watchdog expired, terminating outstanding instances");
                self.broadcast_term()?;
                self.drain_algorithm_queue()?;
                break;
            }
            self.promote_scheduled_probes()?;

            let wait = self.poll_timeout();
            if let Err(e) = self.poll.poll(&mut events, Some(wait)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    return Err(e.into());
                }
                continue;
            }

            for event in events.iter() {
                match event.token() {
                    SENDQ => {
                        self.network.process_send_queue()?;
                    }
                    RECVQ => {
                        while let Some((probe, reply)) = self.network.recv_queue.pop()? {
                            let Some(instance_id) = probe.caller else {
                                debug!("dropping reply with no owning instance");
                                continue;
                            };
                            self.algorithm_queue.push((instance_id, AlgorithmEvent::ProbeReply(probe, reply)))?;
                        }
                    }
                    SNIFFER_V4 => while self.network.process_sniffer(true)? {},
                    SNIFFER_V6 => while self.network.process_sniffer(false)? {},
                    ALGQ => self.drain_algorithm_queue()?,
                    USERQ => self.drain_user_queue()?,
                    SIGNALS => {
                        if let Some(signal) = self.signals.read_signal()? {
                            if signal == libc::SIGINT {
                                info!("received SIGINT, terminating");
                                self.broadcast_term()?;
                                self.drain_algorithm_queue()?;
                                self.stop = true;
                            } else if signal == libc::SIGQUIT {
                                info!("received SIGQUIT, exiting immediately");
                                self.stop = true;
                                self.drain_user_queue()?;
                                return Ok(std::mem::take(&mut self.results));
                            }
                        }
                    }
                    _ => {}
                }
            }

            self.network.process_send_queue()?;
            for probe in self.network.drain_timeouts(self.timeout) {
                let Some(instance_id) = probe.caller else {
                    debug!("dropping timeout with no owning instance");
                    continue;
                };
                self.algorithm_queue.push((instance_id, AlgorithmEvent::ProbeTimeout(probe)))?;
            }
            self.drain_algorithm_queue()?;
            self.drain_user_queue()?;
        }
        self.drain_user_queue()?;
        Ok(std::mem::take(&mut self.results))
    }

    fn drain_algorithm_queue(&mut self) -> Result<()> {
        while let Some((instance_id, event)) = self.algorithm_queue.pop()? {
            self.dispatch_to_instance(instance_id, event)?;
        }
        Ok(())
    }

    fn drain_user_queue(&mut self) -> Result<()> {
        while let Some(event) = self.user_queue.pop()? {
            (self.user_handler)(&event);
        }
        Ok(())
    }
}
