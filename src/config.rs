//! Loop-level CLI surface.
//!
//! Grounded on `mtr_ng::args::Args`'s `clap::Parser` style. Unlike the
//! teacher's `Args` (the whole UI's configuration), this carries only
//! what the event loop itself needs — target and timeout — since
//! spec.md's Non-goals explicitly keep the rest of the CLI surface out
//! of scope. `probez-cli` is the only caller of this type; the library
//! crate never invokes `clap` itself.

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "probez-cli")]
#[command(about = "Minimal smoke-test harness for the probez probe engine")]
pub struct LoopConfig {
    /// Target address to probe.
    pub target: IpAddr,

    /// Per-probe timeout in seconds before a probe is considered lost.
    #[arg(short = 't', long, default_value = "3")]
    pub timeout_seconds: u64,

    /// Run traceroute instead of a single ping.
    #[arg(long)]
    pub traceroute: bool,

    /// Maximum TTL for traceroute mode.
    #[arg(long, default_value = "30")]
    pub max_ttl: u8,
}

impl LoopConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_and_defaults() {
        let config = LoopConfig::try_parse_from(["probez-cli", "127.0.0.1"]).unwrap();
        assert_eq!(config.target, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.timeout_seconds, 3);
        assert!(!config.traceroute);
        assert_eq!(config.max_ttl, 30);
    }

    #[test]
    fn parses_custom_timeout_and_traceroute() {
        let config = LoopConfig::try_parse_from(["probez-cli", "-t", "1", "--traceroute", "10.0.0.1"]).unwrap();
        assert_eq!(config.timeout_seconds, 1);
        assert!(config.traceroute);
    }
}
