//! Error surfacing: kernel-reported failures come back as typed results on
//! resume, without tearing the worker down.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strand_core::error::Error;
use strand_net::TcpStream;
use strand_runtime::{Runtime, Task};

/// Stop the runtime after a generous deadline so a broken run fails an
/// assertion instead of hanging the harness.
fn stop_watchdog(runtime: &Arc<Runtime>) {
    let runtime = runtime.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(60));
        runtime.stop();
    });
}

#[test]
fn completion_error_is_surfaced_on_resume() {
    let runtime = Arc::new(Runtime::with_workers(1).expect("runtime"));
    let seen = Arc::new(AtomicI32::new(0));

    {
        let runtime_handle = runtime.clone();
        let seen = seen.clone();
        runtime.dispatch(move || {
            let runtime_handle = runtime_handle.clone();
            let seen = seen.clone();
            Task::new(async move {
                // An empty stream has no socket; the kernel rejects the
                // receive and the task resumes with the error.
                let stream = TcpStream::new();
                let mut buffer = [0u8; 16];
                if let Err(Error::Os(errno)) = stream.receive_async(&mut buffer).await {
                    seen.store(errno, Ordering::SeqCst);
                }
                runtime_handle.stop();
            })
        });
    }
    stop_watchdog(&runtime);
    runtime.run();

    assert_eq!(seen.load(Ordering::SeqCst), libc::EBADF);
}
