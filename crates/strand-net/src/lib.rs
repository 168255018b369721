//! # strand-net
//!
//! TCP adaptors for the strand runtime. A [`TcpStream`] or [`TcpListener`]
//! wraps a plain socket fd plus an [`Endpoint`](strand_core::Endpoint);
//! the async operations are awaiters that submit one io_uring request to
//! the current worker's ring and park the calling task until the
//! completion arrives.
//!
//! Sockets belong to the worker whose ring their operations go through.
//! Using one socket from several workers is not supported.

pub mod listener;
pub mod stream;

pub use listener::TcpListener;
pub use stream::TcpStream;
