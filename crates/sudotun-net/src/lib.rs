//! sudotun-net - Address Resolution and the Relay Contract
//!
//! The network-facing half of sudotun below the session layer: resolving a
//! profile's server host into a concrete connectable address under an IP
//! family preference, and assembling the JSON configuration that is the
//! relay process's entire view of the world.
//!
//! The relay itself is consumed strictly as a start/stop/stats black box via
//! [`RelayProcess`].

mod relay;
mod resolve;

pub use relay::{RelayConfig, RelayError, RelayProcess, TrafficSnapshot, build_config};
pub use resolve::{HostLookup, ResolveError, ResolvedAddress, Resolver, SystemLookup};
