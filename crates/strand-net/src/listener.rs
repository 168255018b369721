//! TCP listener.
//!
//! Listening sockets enable both address and port reuse, so several
//! workers can each bind their own listener to the same port and let the
//! kernel spread incoming connections across them.

use std::future::Future;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::task::{Context, Poll};

use io_uring::{opcode, types};
use strand_core::endpoint::Endpoint;
use strand_core::error::{Error, Result};
use strand_runtime::{OpRecord, Worker};

use crate::stream::{TcpStream, INVALID_SOCKET};

/// A listening TCP socket bound to an endpoint.
pub struct TcpListener {
    socket: i32,
    address: Endpoint,
}

impl TcpListener {
    /// Create a socket for the endpoint's family, enable address and port
    /// reuse, bind and listen. Any partial failure closes the socket
    /// before returning.
    pub fn bind(address: Endpoint) -> Result<Self> {
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

        let enable: i32 = 1;
        for option in [libc::SO_REUSEADDR, libc::SO_REUSEPORT] {
            let result = unsafe {
                libc::setsockopt(
                    socket,
                    libc::SOL_SOCKET,
                    option,
                    &enable as *const i32 as *const libc::c_void,
                    std::mem::size_of::<i32>() as libc::socklen_t,
                )
            };
            if result != 0 {
                return Err(close_on_error(socket));
            }
        }

        if unsafe { libc::bind(socket, address.as_sockaddr(), address.socklen()) } != 0 {
            return Err(close_on_error(socket));
        }

        if unsafe { libc::listen(socket, libc::SOMAXCONN) } != 0 {
            return Err(close_on_error(socket));
        }

        Ok(Self { socket, address })
    }

    /// The endpoint this listener is bound to.
    #[inline]
    pub fn local_address(&self) -> &Endpoint {
        &self.address
    }

    /// Accept synchronously, blocking the calling thread.
    pub fn accept(&self) -> Result<TcpStream> {
        let mut address = Endpoint::default();
        let mut addrlen = Endpoint::capacity();

        let socket = unsafe {
            libc::accept(self.socket, address.as_sockaddr_mut(), &mut addrlen)
        };
        if socket < 0 {
            return Err(Error::last_os());
        }

        Ok(TcpStream::from_parts(socket, address))
    }

    /// Accept through the current worker's ring, suspending the calling
    /// task until a connection arrives.
    pub fn accept_async(&self) -> AcceptFuture<'_> {
        AcceptFuture {
            listener: self,
            address: Endpoint::default(),
            addrlen: Endpoint::capacity(),
            record: OpRecord::new(),
            submitted: false,
            _pin: PhantomPinned,
        }
    }

    /// Close the socket, if any. Pending accepts complete with errors.
    pub fn close(&mut self) {
        if self.socket != INVALID_SOCKET {
            unsafe { libc::close(self.socket) };
            self.socket = INVALID_SOCKET;
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.close();
    }
}

fn close_on_error(socket: i32) -> Error {
    let err = Error::last_os();
    unsafe { libc::close(socket) };
    err
}

/// Awaiter for an asynchronous accept. Resolves to the connected stream
/// carrying the peer endpoint.
pub struct AcceptFuture<'a> {
    listener: &'a TcpListener,
    /// Output slot the kernel writes the peer address into.
    address: Endpoint,
    addrlen: libc::socklen_t,
    record: OpRecord,
    submitted: bool,
    _pin: PhantomPinned,
}

impl Future for AcceptFuture<'_> {
    type Output = Result<TcpStream>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: the future is never moved out of; record, address slot
        // and length stay pinned for the whole operation.
        let this = unsafe { self.get_unchecked_mut() };

        if !this.submitted {
            this.submitted = true;

            let worker = Worker::current().expect("accept_async outside of a worker");
            let entry = opcode::Accept::new(
                types::Fd(this.listener.socket),
                this.address.as_sockaddr_mut(),
                &mut this.addrlen,
            )
            .flags(libc::SOCK_CLOEXEC)
            .build();

            // Safety: record and address slot live in this pinned awaiter.
            if let Err(err) = unsafe { worker.submit_op(entry, &mut this.record) } {
                return Poll::Ready(Err(err));
            }
            return Poll::Pending;
        }

        if this.record.result >= 0 {
            Poll::Ready(Ok(TcpStream::from_parts(this.record.result, this.address)))
        } else {
            Poll::Ready(Err(Error::Os(-this.record.result)))
        }
    }
}
