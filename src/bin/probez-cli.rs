//! Minimal smoke-test harness: parses a target and a timeout, runs one
//! built-in `ping` or `traceroute` algorithm instance to completion, and
//! prints the result. Proves the library links and the event loop can
//! actually drive a probe out and back; it is not a feature surface.

use std::net::IpAddr;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use probez::algorithm::AlgorithmOptions;
use probez::event_loop::{log_user_events, EventLoop};
use probez::probe::Probe;
use probez::LoopConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("probez=info").init();

    let config = LoopConfig::parse();
    info!(target = %config.target, timeout_seconds = config.timeout_seconds, "starting probez-cli");

    let protocols: &[&str] = match config.target {
        IpAddr::V4(_) => &["ipv4", "icmpv4"],
        IpAddr::V6(_) => &["ipv6", "icmpv6"],
    };
    let skeleton = Probe::set_protocols(protocols)?;

    let options = AlgorithmOptions {
        target: config.target,
        max_ttl: config.max_ttl,
        timeout: config.timeout(),
    };

    let mut event_loop = EventLoop::new(&config, log_user_events)?;
    let algorithm = if config.traceroute { "traceroute" } else { "ping" };
    event_loop.add_instance(algorithm, options, skeleton)?;
    let results = event_loop.run()?;

    for (id, result) in results {
        println!("instance {id}: {result:?}");
    }
    Ok(())
}
