//! A layered packet model and cooperative event loop for active
//! network-measurement algorithms (traceroute, ping, multipath
//! discovery).
//!
//! The crate is organized bottom-up: byte-level primitives
//! ([`buffer`], [`bitfield`], [`checksum`]), the protocol field/
//! descriptor system ([`field`], [`protocol`], [`protocols`]), the
//! packet/layer/probe stack ([`layer`], [`packet`], [`probe`],
//! [`matching`], [`metafield`]), the network layer
//! ([`queue`], [`socketpool`], [`sniffer`], [`probe_group`],
//! [`network`]), and finally the algorithm/event-loop contract
//! ([`algorithm`], [`event_loop`], [`config`]) that ties it together.

pub mod algorithm;
pub mod bitfield;
pub mod buffer;
pub mod checksum;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod field;
pub mod generator;
pub mod layer;
pub mod matching;
pub mod metafield;
pub mod network;
pub mod packet;
pub mod probe;
pub mod probe_group;
pub mod protocol;
pub mod protocols;
pub mod queue;
pub mod sniffer;
pub mod socketpool;

pub use algorithm::{AlgorithmEvent, AlgorithmInstance, AlgorithmOptions, AlgorithmResult, HopResult};
pub use config::LoopConfig;
pub use error::{ProbezError, Result};
pub use event_loop::{log_user_events, EventLoop, LoopHandle, UserEvent, UserEventHandler};
pub use field::{Field, FieldValue};
pub use packet::Packet;
pub use probe::Probe;
