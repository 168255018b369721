//! End-to-end TCP ping-pong over the IPv6 loopback.
//!
//! A listener task accepts one connection and echoes everything back; a
//! client task pushes a fixed byte volume through in fixed-size chunks and
//! reads the echo. Both run on a single worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strand_core::endpoint::Endpoint;
use strand_core::ip::IPV6_LOOPBACK;
use strand_net::{TcpListener, TcpStream};
use strand_runtime::{schedule, Runtime, Task};

const PACKET_COUNT: usize = 1000;
const PACKET_SIZE: usize = 1024;
const BUFFER_SIZE: usize = 1024;
const TOTAL_SIZE: usize = PACKET_COUNT * PACKET_SIZE;

/// Stop the runtime after a generous deadline so a broken run fails an
/// assertion instead of hanging the harness.
fn stop_watchdog(runtime: &Arc<Runtime>) {
    let runtime = runtime.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(60));
        runtime.stop();
    });
}

fn echo_server(stream: TcpStream, server_total: Arc<AtomicUsize>) -> Task<()> {
    Task::new(async move {
        let mut buffer = [0u8; BUFFER_SIZE];
        let mut total = 0usize;

        while total < TOTAL_SIZE {
            let want = PACKET_SIZE.min(TOTAL_SIZE - total);
            let received = stream
                .receive_async(&mut buffer[..want])
                .await
                .expect("server receive") as usize;
            assert!(received > 0, "peer closed early");
            total += received;

            let mut sent = 0usize;
            while sent < received {
                sent += stream
                    .send_async(&buffer[sent..received])
                    .await
                    .expect("server send") as usize;
            }
        }

        server_total.store(total, Ordering::SeqCst);
    })
}

fn listener_task(address: Endpoint, server_total: Arc<AtomicUsize>) -> Task<()> {
    Task::new(async move {
        let listener = TcpListener::bind(address).expect("bind");
        assert_eq!(*listener.local_address(), address);

        let connection = listener.accept_async().await.expect("accept");
        schedule(echo_server(connection, server_total));
    })
}

fn client_task(
    runtime: Arc<Runtime>,
    address: Endpoint,
    client_total: Arc<AtomicUsize>,
) -> Task<()> {
    Task::new(async move {
        let mut connection = TcpStream::new();
        connection.connect_async(address).await.expect("connect");
        assert_eq!(*connection.peer_address(), address);

        connection.set_keep_alive(true).expect("keep-alive");
        connection.set_no_delay(true).expect("no-delay");
        connection
            .set_send_timeout(Duration::from_secs(30))
            .expect("send timeout");
        connection
            .set_receive_timeout(Duration::from_secs(65))
            .expect("receive timeout");

        let buffer = [0u8; BUFFER_SIZE];
        let mut echo = [0u8; BUFFER_SIZE];
        let mut total = 0usize;

        while total < TOTAL_SIZE {
            let chunk = BUFFER_SIZE.min(TOTAL_SIZE - total);
            let sent = connection
                .send_async(&buffer[..chunk])
                .await
                .expect("client send") as usize;
            total += sent;

            let mut echoed = 0usize;
            while echoed < sent {
                let received = connection
                    .receive_async(&mut echo[echoed..sent])
                    .await
                    .expect("client receive") as usize;
                assert!(received > 0, "server closed early");
                echoed += received;
            }
        }

        client_total.store(total, Ordering::SeqCst);
        runtime.stop();
    })
}

#[test]
fn tcp_ping_pong_ipv6_loopback() {
    let runtime = Arc::new(Runtime::with_workers(1).expect("runtime"));
    let address = Endpoint::new(IPV6_LOOPBACK, 23333);

    let server_total = Arc::new(AtomicUsize::new(0));
    let client_total = Arc::new(AtomicUsize::new(0));

    {
        let server_total = server_total.clone();
        let mut slot = Some(listener_task(address, server_total));
        runtime.dispatch(move || slot.take().expect("single worker"));
    }
    {
        let runtime_handle = runtime.clone();
        let client_total = client_total.clone();
        let mut slot = Some(client_task(runtime_handle, address, client_total));
        runtime.dispatch(move || slot.take().expect("single worker"));
    }
    stop_watchdog(&runtime);
    runtime.run();

    assert_eq!(server_total.load(Ordering::SeqCst), TOTAL_SIZE);
    assert_eq!(client_total.load(Ordering::SeqCst), TOTAL_SIZE);
}
