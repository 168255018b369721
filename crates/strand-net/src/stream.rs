//! TCP connection.
//!
//! [`TcpStream`] is either *empty* (no socket) or *owned* (an open socket
//! plus the peer endpoint). The async operations are one-shot awaiters:
//! the first poll submits the request to the current worker's ring, the
//! second reads the completion record. Records and buffers live inside the
//! awaiter, which sits in the suspended frame, so their addresses are
//! stable while the operation is in flight.

use std::future::Future;
use std::marker::PhantomPinned;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use io_uring::{opcode, types};
use strand_core::endpoint::Endpoint;
use strand_core::error::{Error, Result};
use strand_runtime::{OpRecord, Worker};

pub(crate) const INVALID_SOCKET: i32 = -1;

/// A TCP connection bound to the worker its operations run on.
///
/// Move-only; dropping an owned stream closes the socket.
pub struct TcpStream {
    pub(crate) socket: i32,
    pub(crate) address: Endpoint,
}

impl TcpStream {
    /// Create an empty stream, not connected to anything.
    pub fn new() -> Self {
        Self {
            socket: INVALID_SOCKET,
            address: Endpoint::default(),
        }
    }

    pub(crate) fn from_parts(socket: i32, address: Endpoint) -> Self {
        Self { socket, address }
    }

    /// Peer endpoint of the connection. Meaningless for an empty stream.
    #[inline]
    pub fn peer_address(&self) -> &Endpoint {
        &self.address
    }

    /// Connect synchronously, blocking the calling thread. On success any
    /// previously owned socket is closed and replaced; on failure the
    /// stream is left untouched.
    pub fn connect(&mut self, address: Endpoint) -> Result<()> {
        let socket = unsafe {
            libc::socket(
                address.family() as i32,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                libc::IPPROTO_TCP,
            )
        };
        if socket < 0 {
            return Err(Error::last_os());
        }

        if unsafe { libc::connect(socket, address.as_sockaddr(), address.socklen()) } != 0 {
            let err = Error::last_os();
            unsafe { libc::close(socket) };
            return Err(err);
        }

        self.close();
        self.socket = socket;
        self.address = address;
        Ok(())
    }

    /// Connect through the current worker's ring, suspending the calling
    /// task until the connection is established or fails.
    pub fn connect_async(&mut self, address: Endpoint) -> ConnectFuture<'_> {
        ConnectFuture {
            stream: self,
            address,
            socket: INVALID_SOCKET,
            record: OpRecord::new(),
            submitted: false,
            _pin: PhantomPinned,
        }
    }

    /// Send synchronously. Returns the number of bytes accepted by the
    /// kernel, which may be short.
    pub fn send(&self, data: &[u8]) -> Result<u32> {
        let sent = unsafe {
            libc::send(
                self.socket,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if sent < 0 {
            return Err(Error::last_os());
        }
        Ok(sent as u32)
    }

    /// Send through the current worker's ring, suspending the calling task
    /// until the kernel accepts some prefix of `data`.
    pub fn send_async<'a>(&self, data: &'a [u8]) -> SendFuture<'a> {
        SendFuture {
            socket: self.socket,
            data,
            record: OpRecord::new(),
            submitted: false,
            _pin: PhantomPinned,
        }
    }

    /// Receive synchronously. Returns 0 at end of stream.
    pub fn receive(&self, data: &mut [u8]) -> Result<u32> {
        let received = unsafe {
            libc::recv(
                self.socket,
                data.as_mut_ptr() as *mut libc::c_void,
                data.len(),
                0,
            )
        };
        if received < 0 {
            return Err(Error::last_os());
        }
        Ok(received as u32)
    }

    /// Receive through the current worker's ring, suspending the calling
    /// task until data (or end of stream) arrives.
    pub fn receive_async<'a>(&self, data: &'a mut [u8]) -> RecvFuture<'a> {
        RecvFuture {
            socket: self.socket,
            data,
            record: OpRecord::new(),
            submitted: false,
            _pin: PhantomPinned,
        }
    }

    /// Enable or disable TCP keep-alive.
    pub fn set_keep_alive(&self, enable: bool) -> Result<()> {
        set_option_i32(
            self.socket,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            enable as i32,
        )
    }

    /// Enable or disable Nagle's algorithm suppression.
    pub fn set_no_delay(&self, enable: bool) -> Result<()> {
        set_option_i32(
            self.socket,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            enable as i32,
        )
    }

    /// Kernel-enforced send timeout. A zero duration disables the timeout.
    pub fn set_send_timeout(&self, timeout: Duration) -> Result<()> {
        set_timeout(self.socket, libc::SO_SNDTIMEO, timeout)
    }

    /// Kernel-enforced receive timeout. A zero duration disables the
    /// timeout.
    pub fn set_receive_timeout(&self, timeout: Duration) -> Result<()> {
        set_timeout(self.socket, libc::SO_RCVTIMEO, timeout)
    }

    /// Close the socket, if any, and leave the stream empty. Pending
    /// operations on the socket complete with errors.
    pub fn close(&mut self) {
        if self.socket != INVALID_SOCKET {
            unsafe { libc::close(self.socket) };
            self.socket = INVALID_SOCKET;
        }
    }
}

impl Default for TcpStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn set_option_i32(socket: i32, level: i32, option: i32, value: i32) -> Result<()> {
    let result = unsafe {
        libc::setsockopt(
            socket,
            level,
            option,
            &value as *const i32 as *const libc::c_void,
            mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(Error::last_os());
    }
    Ok(())
}

fn set_timeout(socket: i32, option: i32, timeout: Duration) -> Result<()> {
    let millis = timeout.as_millis().min(u32::MAX as u128) as u32;
    let value = libc::timeval {
        tv_sec: (millis / 1000) as libc::time_t,
        tv_usec: ((millis % 1000) * 1000) as libc::suseconds_t,
    };

    let result = unsafe {
        libc::setsockopt(
            socket,
            libc::SOL_SOCKET,
            option,
            &value as *const libc::timeval as *const libc::c_void,
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(Error::last_os());
    }
    Ok(())
}

// ── Awaiters ─────────────────────────────────────────────────────────

/// Awaiter for an asynchronous connect.
///
/// Creates the socket at submission time; the stream only takes it over
/// once the connection is established.
pub struct ConnectFuture<'a> {
    stream: &'a mut TcpStream,
    address: Endpoint,
    socket: i32,
    record: OpRecord,
    submitted: bool,
    _pin: PhantomPinned,
}

impl Future for ConnectFuture<'_> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: the future is never moved out of; record and address
        // stay pinned for the whole operation.
        let this = unsafe { self.get_unchecked_mut() };

        if !this.submitted {
            this.submitted = true;

            let socket = unsafe {
                libc::socket(
                    this.address.family() as i32,
                    libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                    libc::IPPROTO_TCP,
                )
            };
            if socket < 0 {
                return Poll::Ready(Err(Error::last_os()));
            }
            this.socket = socket;

            let worker = Worker::current().expect("connect_async outside of a worker");
            let entry = opcode::Connect::new(
                types::Fd(socket),
                this.address.as_sockaddr(),
                this.address.socklen(),
            )
            .build();

            // Safety: record and endpoint live in this pinned awaiter.
            if let Err(err) = unsafe { worker.submit_op(entry, &mut this.record) } {
                unsafe { libc::close(socket) };
                this.socket = INVALID_SOCKET;
                return Poll::Ready(Err(err));
            }
            return Poll::Pending;
        }

        if this.record.result == 0 {
            this.stream.close();
            this.stream.socket = this.socket;
            this.stream.address = this.address;
            this.socket = INVALID_SOCKET;
            Poll::Ready(Ok(()))
        } else {
            unsafe { libc::close(this.socket) };
            this.socket = INVALID_SOCKET;
            Poll::Ready(Err(Error::Os(-this.record.result)))
        }
    }
}

/// Awaiter for an asynchronous send.
pub struct SendFuture<'a> {
    socket: i32,
    data: &'a [u8],
    record: OpRecord,
    submitted: bool,
    _pin: PhantomPinned,
}

impl Future for SendFuture<'_> {
    type Output = Result<u32>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: the future is never moved out of; the record stays
        // pinned for the whole operation.
        let this = unsafe { self.get_unchecked_mut() };

        if !this.submitted {
            this.submitted = true;

            let worker = Worker::current().expect("send_async outside of a worker");
            let entry = opcode::Send::new(
                types::Fd(this.socket),
                this.data.as_ptr(),
                this.data.len() as u32,
            )
            .flags(libc::MSG_NOSIGNAL)
            .build();

            // Safety: record and buffer outlive the operation; the buffer
            // borrow is held by this awaiter.
            if let Err(err) = unsafe { worker.submit_op(entry, &mut this.record) } {
                return Poll::Ready(Err(err));
            }
            return Poll::Pending;
        }

        if this.record.result >= 0 {
            Poll::Ready(Ok(this.record.result as u32))
        } else {
            Poll::Ready(Err(Error::Os(-this.record.result)))
        }
    }
}

/// Awaiter for an asynchronous receive. Resolves to the byte count, 0 at
/// end of stream.
pub struct RecvFuture<'a> {
    socket: i32,
    data: &'a mut [u8],
    record: OpRecord,
    submitted: bool,
    _pin: PhantomPinned,
}

impl Future for RecvFuture<'_> {
    type Output = Result<u32>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: the future is never moved out of; the record stays
        // pinned for the whole operation.
        let this = unsafe { self.get_unchecked_mut() };

        if !this.submitted {
            this.submitted = true;

            let worker = Worker::current().expect("receive_async outside of a worker");
            let entry = opcode::Recv::new(
                types::Fd(this.socket),
                this.data.as_mut_ptr(),
                this.data.len() as u32,
            )
            .build();

            // Safety: record and buffer outlive the operation; the buffer
            // borrow is held by this awaiter.
            if let Err(err) = unsafe { worker.submit_op(entry, &mut this.record) } {
                return Poll::Ready(Err(err));
            }
            return Poll::Pending;
        }

        if this.record.result >= 0 {
            Poll::Ready(Ok(this.record.result as u32))
        } else {
            Poll::Ready(Err(Error::Os(-this.record.result)))
        }
    }
}
