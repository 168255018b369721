//! Task model scenarios: nested awaits, panic propagation, stop latency
//! and worker affinity.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use strand_runtime::{Runtime, Task, Worker};

/// Stop the runtime after a generous deadline so a broken run fails an
/// assertion instead of hanging the harness.
fn stop_watchdog(runtime: &Arc<Runtime>) {
    let runtime = runtime.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(60));
        runtime.stop();
    });
}

fn innermost() -> Task<&'static i32> {
    static VALUE: i32 = 42;
    Task::new(async { &VALUE })
}

fn middle() -> Task<String> {
    Task::new(async {
        let value = innermost().await;
        assert_eq!(*value, 42);
        String::from("Hello, world!")
    })
}

fn outer(runtime: Arc<Runtime>, witness: Arc<AtomicUsize>) -> Task<()> {
    Task::new(async move {
        let text = middle().await;
        assert_eq!(text, "Hello, world!");

        let value = innermost().await;
        assert_eq!(*value, 42);

        let text = middle().await;
        assert_eq!(text, "Hello, world!");

        witness.fetch_add(1, Ordering::SeqCst);
        runtime.stop();
    })
}

#[test]
fn nested_await_observes_inner_values() {
    let runtime = Arc::new(Runtime::with_workers(1).expect("runtime"));
    let witness = Arc::new(AtomicUsize::new(0));

    {
        let runtime_handle = runtime.clone();
        let witness = witness.clone();
        runtime.dispatch(move || outer(runtime_handle.clone(), witness.clone()));
    }
    stop_watchdog(&runtime);
    runtime.run();

    // The witness only advances past every nested assertion.
    assert_eq!(witness.load(Ordering::SeqCst), 1);
}

fn failing() -> Task<()> {
    Task::new(async {
        panic!("boom");
    })
}

#[test]
fn panic_propagates_to_awaiting_ancestor() {
    let runtime = Arc::new(Runtime::with_workers(1).expect("runtime"));
    let reached = Arc::new(AtomicBool::new(false));
    let sibling_ran = Arc::new(AtomicBool::new(false));

    let parent = {
        let reached = reached.clone();
        Task::new(async move {
            failing().await;
            reached.store(true, Ordering::SeqCst);
        })
    };
    let probe = parent.clone();

    let mut slot = Some(parent);
    runtime.dispatch(move || slot.take().expect("single worker"));

    {
        let runtime_handle = runtime.clone();
        let sibling_ran = sibling_ran.clone();
        runtime.dispatch(move || {
            let runtime_handle = runtime_handle.clone();
            let sibling_ran = sibling_ran.clone();
            Task::new(async move {
                sibling_ran.store(true, Ordering::SeqCst);
                runtime_handle.stop();
            })
        });
    }
    stop_watchdog(&runtime);
    runtime.run();

    // The panic unwound through the parent: the code after the await never
    // ran, the chain still completed, and the worker survived to run its
    // sibling.
    assert!(probe.is_done());
    assert!(!reached.load(Ordering::SeqCst));
    assert!(sibling_ran.load(Ordering::SeqCst));
}

struct NeverReady;

impl Future for NeverReady {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        Poll::Pending
    }
}

#[test]
fn stop_terminates_idle_workers_promptly() {
    let runtime = Arc::new(Runtime::with_workers(1).expect("runtime"));

    // One task parks forever; a second one, on the same worker, requests
    // the stop.
    runtime.dispatch(|| {
        Task::new(async {
            NeverReady.await;
        })
    });
    {
        let runtime_handle = runtime.clone();
        runtime.dispatch(move || {
            let runtime_handle = runtime_handle.clone();
            Task::new(async move {
                runtime_handle.stop();
            })
        });
    }

    let started = Instant::now();
    stop_watchdog(&runtime);
    runtime.run();

    // Exit within the next loop iteration, well under the wait timeout
    // plus scheduling slack.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn tasks_resume_on_their_worker() {
    let runtime = Arc::new(Runtime::with_workers(2).expect("runtime"));
    let finished = Arc::new(AtomicUsize::new(0));

    {
        let runtime_handle = runtime.clone();
        let finished = finished.clone();
        let mut index = 0usize;
        runtime.dispatch(move || {
            let i = index;
            index += 1;

            let runtime_handle = runtime_handle.clone();
            let finished = finished.clone();
            Task::new(async move {
                let worker = Worker::current().expect("running on a worker");
                assert!(std::ptr::eq(worker, &runtime_handle.workers()[i]));
                assert_eq!(worker.thread_id(), unsafe { libc::gettid() } as u64);

                if finished.fetch_add(1, Ordering::SeqCst) + 1 == runtime_handle.worker_count() {
                    runtime_handle.stop();
                }
            })
        });
    }
    stop_watchdog(&runtime);
    runtime.run();

    assert_eq!(finished.load(Ordering::SeqCst), 2);
}
