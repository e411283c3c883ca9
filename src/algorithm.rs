//! Algorithm instances: the handler contract the event loop drives
//! probes through, plus two built-in handlers used as the library's own
//! smoke test.
//!
//! Grounded on `libparistraceroute/algorithm.h`/`algorithm.c` (an
//! `algorithm_t` is a name plus a handler function pointer; an
//! `algorithm_instance_t` pairs one with its options, a probe skeleton to
//! forge from, and opaque per-run data) and `event.h` (the seven event
//! kinds a handler reacts to, and the loop-side helpers
//! `send_probe`/`raise_event`/`raise_error`/`raise_terminated`/
//! `terminate` the original exposes through the loop handle passed into
//! every handler call). `algorithms/ping.c` and `algorithms/traceroute.c`
//! ground the two built-ins below; the MDA family (`algorithms/mda/*.c`)
//! is deliberately not reproduced, only its shape through this same
//! contract.

use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{ProbezError, Result};
use crate::event_loop::LoopHandle;
use crate::field::{Field, FieldValue};
use crate::probe::Probe;

/// What the loop is telling an algorithm instance about.
pub enum AlgorithmEvent {
    /// Delivered exactly once, right after the instance is registered.
    Init,
    /// A matched `(probe, reply)` pair: `probe` is the instance's own
    /// probe as it was sent (timestamps included), `reply` is the
    /// dissected packet the network layer matched it against.
    ProbeReply(Probe, Probe),
    ProbeTimeout(Probe),
    /// Cleanup signal: the instance is being torn down (either it called
    /// `raise_terminated`/`raise_error` on itself, or the loop is
    /// reaping it). The handler must release anything held in `data`.
    Terminated,
    /// A core-layer failure surfaced to this instance (e.g. a `sendto`
    /// failure). Handlers are expected to relay a user-visible event and
    /// terminate.
    Error(String),
    /// Handler-specific nested payload; unused by the two built-ins, kept
    /// for instances that want to signal each other.
    Event(String),
    /// The loop was interrupted (`--timeout` elapsed, or SIGINT/SIGQUIT).
    /// The handler should stop issuing probes; whatever it returns from
    /// this event becomes moot since the loop does not wait for a further
    /// `raise_terminated` once `Term` has been broadcast.
    Term,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HopResult {
    pub ttl: u8,
    pub addr: Option<IpAddr>,
    pub rtt: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlgorithmResult {
    Ping(HopResult),
    Traceroute(Vec<HopResult>),
}

/// Options shared by the two built-in handlers; a handler ignores the
/// fields it doesn't need.
#[derive(Debug, Clone)]
pub struct AlgorithmOptions {
    pub target: IpAddr,
    pub max_ttl: u8,
    pub timeout: Duration,
}

/// Per-instance mutable state a handler threads across events.
pub enum AlgorithmData {
    Ping,
    Traceroute { ttl: u8, hops: Vec<HopResult> },
}

/// `handler(loop, event, &mut data, skeleton, options)`. The loop handle
/// is how a handler reaches the required helpers instead of returning a
/// value the loop interprets; the handler's own `Result` is reserved for
/// genuine internal failures (an unexpected `data` shape, a malformed
/// skeleton) that should propagate as a hard error rather than a
/// spec-level `ALGORITHM_ERROR`.
pub type AlgorithmHandler =
    fn(&mut LoopHandle, &AlgorithmEvent, &mut AlgorithmData, &Probe, &AlgorithmOptions) -> Result<()>;

pub struct AlgorithmDescriptor {
    pub name: &'static str,
    pub handler: AlgorithmHandler,
}

pub struct AlgorithmInstance {
    pub id: u64,
    pub descriptor: &'static AlgorithmDescriptor,
    pub options: AlgorithmOptions,
    pub skeleton: Probe,
    pub data: AlgorithmData,
    /// The instance that spawned this one, if any (`None` means the
    /// instance was created directly by the caller program).
    pub caller: Option<u64>,
}

impl AlgorithmInstance {
    pub fn new(id: u64, descriptor: &'static AlgorithmDescriptor, options: AlgorithmOptions, skeleton: Probe) -> Self {
        let data = match descriptor.name {
            "traceroute" => AlgorithmData::Traceroute { ttl: 1, hops: Vec::new() },
            _ => AlgorithmData::Ping,
        };
        Self {
            id,
            descriptor,
            options,
            skeleton,
            data,
            caller: None,
        }
    }

    pub fn dispatch(&mut self, loop_handle: &mut LoopHandle, event: &AlgorithmEvent) -> Result<()> {
        (self.descriptor.handler)(loop_handle, event, &mut self.data, &self.skeleton, &self.options)
    }
}

fn source_of(reply: &Probe) -> Option<IpAddr> {
    reply.extract("src_ip").ok().and_then(|v| v.as_ip_addr())
}

fn rtt_of(probe: &Probe) -> Option<Duration> {
    let sent = probe.sending_time?;
    let received = probe.receiving_time?;
    received.checked_duration_since(sent)
}

fn forge_from_skeleton(skeleton: &Probe, target: IpAddr, ttl: Option<u8>) -> Result<Probe> {
    let mut probe = skeleton.clone();
    probe.set_field(Field::ip_addr("dst_ip", target))?;
    if let Some(ttl) = ttl {
        probe.set_field(Field::u8("ttl", ttl))?;
    }
    Ok(probe)
}

/// Sends exactly one probe at `ALGORITHM_INIT` and terminates on its
/// first reply or timeout, reporting the measured round-trip time.
fn ping_handler(
    loop_handle: &mut LoopHandle,
    event: &AlgorithmEvent,
    _data: &mut AlgorithmData,
    skeleton: &Probe,
    options: &AlgorithmOptions,
) -> Result<()> {
    match event {
        AlgorithmEvent::Init => {
            let probe = forge_from_skeleton(skeleton, options.target, None)?;
            loop_handle.send_probe(probe)
        }
        AlgorithmEvent::ProbeReply(probe, reply) => {
            loop_handle.raise_terminated(AlgorithmResult::Ping(HopResult {
                ttl: 0,
                addr: source_of(reply),
                rtt: rtt_of(probe),
            }))
        }
        AlgorithmEvent::ProbeTimeout(_) => {
            loop_handle.raise_terminated(AlgorithmResult::Ping(HopResult { ttl: 0, addr: None, rtt: None }))
        }
        AlgorithmEvent::Error(message) => {
            loop_handle.raise_event(format!("ping: {message}"))?;
            loop_handle.raise_terminated(AlgorithmResult::Ping(HopResult { ttl: 0, addr: None, rtt: None }))
        }
        AlgorithmEvent::Terminated | AlgorithmEvent::Term | AlgorithmEvent::Event(_) => Ok(()),
    }
}

/// Walks TTLs one at a time, recording one hop per round, stopping at
/// the first reply carrying the target's own address or at `max_ttl`.
fn traceroute_handler(
    loop_handle: &mut LoopHandle,
    event: &AlgorithmEvent,
    data: &mut AlgorithmData,
    skeleton: &Probe,
    options: &AlgorithmOptions,
) -> Result<()> {
    let AlgorithmData::Traceroute { ttl, hops } = data else {
        return Err(ProbezError::Fatal("traceroute handler received foreign instance data".into()));
    };

    match event {
        AlgorithmEvent::Init => {
            let probe = forge_from_skeleton(skeleton, options.target, Some(*ttl))?;
            loop_handle.send_probe(probe)
        }
        AlgorithmEvent::ProbeReply(probe, reply) => {
            let addr = source_of(reply);
            let reached = addr == Some(options.target);
            hops.push(HopResult { ttl: *ttl, addr, rtt: rtt_of(probe) });
            if reached || *ttl >= options.max_ttl {
                loop_handle.raise_terminated(AlgorithmResult::Traceroute(hops.clone()))
            } else {
                *ttl += 1;
                let probe = forge_from_skeleton(skeleton, options.target, Some(*ttl))?;
                loop_handle.send_probe(probe)
            }
        }
        AlgorithmEvent::ProbeTimeout(_) => {
            hops.push(HopResult { ttl: *ttl, addr: None, rtt: None });
            if *ttl >= options.max_ttl {
                loop_handle.raise_terminated(AlgorithmResult::Traceroute(hops.clone()))
            } else {
                *ttl += 1;
                let probe = forge_from_skeleton(skeleton, options.target, Some(*ttl))?;
                loop_handle.send_probe(probe)
            }
        }
        AlgorithmEvent::Error(message) => {
            loop_handle.raise_event(format!("traceroute: {message}"))?;
            loop_handle.raise_terminated(AlgorithmResult::Traceroute(hops.clone()))
        }
        AlgorithmEvent::Terminated | AlgorithmEvent::Term | AlgorithmEvent::Event(_) => Ok(()),
    }
}

pub struct AlgorithmRegistry {
    descriptors: Vec<&'static AlgorithmDescriptor>,
}

impl AlgorithmRegistry {
    fn build() -> Self {
        static PING: AlgorithmDescriptor = AlgorithmDescriptor { name: "ping", handler: ping_handler };
        static TRACEROUTE: AlgorithmDescriptor = AlgorithmDescriptor { name: "traceroute", handler: traceroute_handler };
        Self {
            descriptors: vec![&PING, &TRACEROUTE],
        }
    }

    pub fn global() -> &'static AlgorithmRegistry {
        static REGISTRY: OnceLock<AlgorithmRegistry> = OnceLock::new();
        REGISTRY.get_or_init(AlgorithmRegistry::build)
    }

    pub fn by_name(&self, name: &str) -> Result<&'static AlgorithmDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name == name)
            .copied()
            .ok_or_else(|| ProbezError::UnknownProtocol(format!("unknown algorithm '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use std::net::Ipv4Addr;

    fn ping_options(target: IpAddr) -> AlgorithmOptions {
        AlgorithmOptions { target, max_ttl: 30, timeout: Duration::from_secs(1) }
    }

    #[test]
    fn ping_sends_once_then_terminates_on_reply() {
        let registry = AlgorithmRegistry::global();
        let descriptor = registry.by_name("ping").unwrap();
        let skeleton = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
        let target = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));
        let mut instance = AlgorithmInstance::new(1, descriptor, ping_options(target), skeleton);

        let mut handle = LoopHandle::for_test(1);
        instance.dispatch(&mut handle, &AlgorithmEvent::Init).unwrap();
        let sent = handle.take_sent_probes();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].extract("dst_ip").unwrap(), FieldValue::IpAddr(target));

        let probe = sent.into_iter().next().unwrap();
        let reply = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
        instance.dispatch(&mut handle, &AlgorithmEvent::ProbeReply(probe, reply)).unwrap();
        assert!(matches!(handle.take_terminated(), Some(AlgorithmResult::Ping(_))));
    }

    #[test]
    fn traceroute_advances_ttl_until_target_reached() {
        let registry = AlgorithmRegistry::global();
        let descriptor = registry.by_name("traceroute").unwrap();
        let skeleton = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
        let target = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        let mut instance = AlgorithmInstance::new(2, descriptor, ping_options(target), skeleton);

        let mut handle = LoopHandle::for_test(2);
        instance.dispatch(&mut handle, &AlgorithmEvent::Init).unwrap();
        let first_probe = handle.take_sent_probes().into_iter().next().unwrap();

        let mut hop = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
        hop.set_field(Field::ip_addr("src_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))).unwrap();
        instance
            .dispatch(&mut handle, &AlgorithmEvent::ProbeReply(first_probe, hop))
            .unwrap();
        let next_probe = handle.take_sent_probes().into_iter().next().unwrap();
        assert_eq!(next_probe.extract_ext(0, "ttl").unwrap(), FieldValue::U8(2));

        let mut last_hop = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
        last_hop.set_field(Field::ip_addr("src_ip", target)).unwrap();
        instance
            .dispatch(&mut handle, &AlgorithmEvent::ProbeReply(next_probe, last_hop))
            .unwrap();
        match handle.take_terminated() {
            Some(AlgorithmResult::Traceroute(hops)) => {
                assert_eq!(hops.len(), 2);
                assert_eq!(hops[1].addr, Some(target));
            }
            _ => panic!("expected traceroute to terminate at target"),
        }
    }
}
