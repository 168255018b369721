//! Strand echo server.
//!
//! Every worker binds its own listener to the same port (port reuse lets
//! the kernel spread connections), accepts in a loop, and echoes each
//! connection in its own task until the peer closes.
//!
//! Usage:
//!     strand-echo [port] [workers]
//!
//! Defaults: port 9999, one worker per hardware thread.
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 9999

use strand_core::endpoint::Endpoint;
use strand_core::ip::IPV4_ANY;
use strand_core::{serror, sinfo, swarn};
use strand_net::{TcpListener, TcpStream};
use strand_runtime::{schedule, Runtime, Task};

const BUF_SIZE: usize = 4096;

fn echo(stream: TcpStream) -> Task<()> {
    Task::new(async move {
        let mut buffer = [0u8; BUF_SIZE];

        loop {
            let received = match stream.receive_async(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n as usize,
                Err(err) => {
                    swarn!("echo: receive failed: {}", err);
                    break;
                }
            };

            let mut sent = 0usize;
            while sent < received {
                match stream.send_async(&buffer[sent..received]).await {
                    Ok(n) => sent += n as usize,
                    Err(err) => {
                        swarn!("echo: send failed: {}", err);
                        return;
                    }
                }
            }
        }
    })
}

fn acceptor(address: Endpoint) -> Task<()> {
    Task::new(async move {
        let listener = match TcpListener::bind(address) {
            Ok(listener) => listener,
            Err(err) => {
                serror!("echo: bind {:?} failed: {}", address, err);
                return;
            }
        };

        loop {
            match listener.accept_async().await {
                Ok(stream) => {
                    let _ = stream.set_no_delay(true);
                    schedule(echo(stream));
                }
                Err(err) => swarn!("echo: accept failed: {}", err),
            }
        }
    })
}

fn main() {
    let mut args = std::env::args().skip(1);
    let port: u16 = args
        .next()
        .map(|arg| arg.parse().expect("port must be a number"))
        .unwrap_or(9999);
    let workers: usize = args
        .next()
        .map(|arg| arg.parse().expect("worker count must be a number"))
        .unwrap_or(0);

    let runtime = Runtime::with_workers(workers).expect("runtime setup failed");
    let address = Endpoint::new(IPV4_ANY, port);

    runtime.dispatch(|| acceptor(address));

    sinfo!(
        "echo: listening on 0.0.0.0:{} with {} workers",
        port,
        runtime.worker_count()
    );
    runtime.run();
}
