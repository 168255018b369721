//! # strand-core
//!
//! Shared building blocks for the strand runtime: IP address and endpoint
//! value types with kernel-compatible layouts, the common error type, and
//! leveled stderr logging macros.
//!
//! Nothing in this crate touches the reactor; it is plain data and
//! diagnostics used by `strand-runtime` and `strand-net`.

pub mod endpoint;
pub mod error;
pub mod ip;
pub mod slog;

pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use ip::{
    IpAddress, IPV4_ANY, IPV4_BROADCAST, IPV4_LOOPBACK, IPV6_ANY, IPV6_LOOPBACK,
};
