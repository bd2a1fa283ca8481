//! sudotun-proto - Profile Data Model and Short-Link Codec
//!
//! The pure-logic foundation of sudotun: the saved-server profile type with
//! its wire enums and invariants, and the `sudoku://` short-link codec used
//! to share a profile between devices.
//!
//! Nothing in this crate touches the network or the filesystem; the session
//! and store layers build on top of it.

mod link;
mod node;

pub use link::{DEFAULT_RULE_URLS, LinkError, SCHEME, decode, encode};
pub use node::{
    AeadMode, AsciiMode, HttpMaskMode, HttpMaskMultiplex, IpMode, NodeProfile, ProfileError,
    ProxyMode, strip_brackets,
};
