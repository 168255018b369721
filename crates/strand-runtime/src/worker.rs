//! Per-thread reactor.
//!
//! Each worker owns its own io_uring instance and ready queue. Tasks
//! submit I/O directly to their worker's ring (inline, no cross-thread
//! hop); the worker drains its own completions and resumes frames on the
//! same thread.
//!
//! ```text
//!  task ──▶ inline SQE push           worker loop:
//!            │                          submit + wait ≤1s
//!            ▼                          drain CQEs ──▶ ready queue
//!  kernel completion ─▶ OpRecord        swap queue ──▶ resume frames
//! ```
//!
//! Frames enqueued while a batch is resuming are observed no earlier than
//! the next loop turn: the ready queue is swapped with a local buffer
//! before any frame runs, so a task that keeps rescheduling itself cannot
//! starve its siblings.

use std::cell::{Cell, UnsafeCell};
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use io_uring::squeue;
use strand_core::error::Result;
use strand_core::{sdebug, strace};

use crate::op::OpRecord;
use crate::ring::{WorkerRing, WAKEUP_TOKEN};
use crate::task::{self, Header, Task};

thread_local! {
    /// Worker running on this thread, or null.
    static CURRENT_WORKER: Cell<*const Worker> = const { Cell::new(ptr::null()) };
}

/// How long one loop turn blocks waiting for a completion. Bounds how
/// late a cross-thread stop request is noticed.
const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// A single-threaded reactor: one OS thread, one io_uring, one ready
/// queue.
///
/// # Safety
///
/// `ring` and `ready` live behind `UnsafeCell` and are only accessed from
/// the thread running this worker, except during initial dispatch, which
/// happens strictly before the worker threads start. The atomics are the
/// only state shared across threads.
pub struct Worker {
    ring: UnsafeCell<WorkerRing>,
    /// Ready frames pending resumption, in FIFO order.
    ready: UnsafeCell<Vec<*const Header>>,
    is_running: AtomicBool,
    should_stop: AtomicBool,
    /// OS thread id while running, 0 otherwise.
    thread_id: AtomicU64,
}

// Safety: see the struct doc. Worker-pinned cells plus atomics.
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    /// Create a worker and its io_uring. Fails if the ring cannot be set
    /// up.
    pub fn new() -> Result<Self> {
        Ok(Self {
            ring: UnsafeCell::new(WorkerRing::new()?),
            ready: UnsafeCell::new(Vec::with_capacity(64)),
            is_running: AtomicBool::new(false),
            should_stop: AtomicBool::new(false),
            thread_id: AtomicU64::new(0),
        })
    }

    /// The worker running on the calling thread, if any.
    pub fn current() -> Option<&'static Worker> {
        let worker = CURRENT_WORKER.with(|cell| cell.get());
        // Safety: the pointer is installed for the duration of `run()` and
        // the worker outlives its run loop.
        unsafe { worker.as_ref() }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// OS thread id of the running worker. Valid only while running.
    #[inline]
    pub fn thread_id(&self) -> u64 {
        self.thread_id.load(Ordering::Relaxed)
    }

    /// Request the loop to exit between iterations. When called on the
    /// worker's own thread the blocked wait is interrupted immediately;
    /// from other threads the wait-timeout bounds the latency.
    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
        if self.is_current() {
            // Safety: on the owning thread.
            unsafe { &mut *self.ring.get() }.post_wakeup();
        }
    }

    /// Enqueue a root task for resumption on this worker, transferring the
    /// handle's reference to the runtime.
    ///
    /// Callable from the thread running this worker, or from any thread
    /// before the worker runs (initial dispatch). Scheduling onto a
    /// running worker from another thread is not supported.
    pub fn schedule<T: 'static>(&self, task: Task<T>) {
        debug_assert!(
            self.is_current() || !self.is_running(),
            "schedule() from a foreign thread on a running worker"
        );

        let frame = task.into_raw();
        // Safety: single-threaded by the contract above.
        unsafe {
            (*self.ready.get()).push(frame.as_ptr());
            // Self-wakeup so a blocked (or first) wait returns at once.
            (*self.ring.get()).post_wakeup();
        }
    }

    /// Re-enqueue a frame that is already owned by this worker. Used by
    /// wakers; takes no reference of its own.
    pub(crate) fn enqueue_frame(&self, frame: *const Header) {
        debug_assert!(self.is_current());
        unsafe {
            (*self.ready.get()).push(frame);
        }
    }

    /// Submit a kernel operation tagged with `record`. The record's task
    /// pointer is set to the frame being polled on this thread.
    ///
    /// # Safety
    ///
    /// Must be called on this worker's thread from inside a task. `record`
    /// and every buffer referenced by `entry` must stay at fixed addresses
    /// until the completion is drained.
    pub unsafe fn submit_op(&self, entry: squeue::Entry, record: *mut OpRecord) -> Result<()> {
        (*record).task = task::current_frame();
        debug_assert!(!(*record).task.is_null(), "I/O submitted outside of a task");

        let ring = &mut *self.ring.get();
        ring.push(entry.user_data(record as u64))
    }

    /// Run the reactor loop on the calling thread until stopped. Only the
    /// first caller runs; concurrent calls return immediately.
    pub fn run(&self) {
        if self.is_running.swap(true, Ordering::Relaxed) {
            return;
        }

        self.should_stop.store(false, Ordering::Relaxed);
        self.thread_id
            .store(unsafe { libc::gettid() } as u64, Ordering::Relaxed);
        CURRENT_WORKER.with(|cell| cell.set(self as *const Worker));

        sdebug!("worker: reactor loop on tid {}", self.thread_id());

        let mut resuming: Vec<*const Header> = Vec::with_capacity(64);

        while !self.should_stop.load(Ordering::Relaxed) {
            {
                // Safety: worker-pinned; no frame is running here.
                let ring = unsafe { &mut *self.ring.get() };
                let ready = unsafe { &mut *self.ready.get() };

                ring.submit_and_wait(WAIT_TIMEOUT);

                let drained = ring.drain(|user_data, result, flags| {
                    if user_data == WAKEUP_TOKEN {
                        return;
                    }
                    let record = user_data as *mut OpRecord;
                    // Safety: the record is pinned in a live suspended
                    // frame until this completion is observed.
                    unsafe {
                        (*record).result = result;
                        (*record).flags = flags;
                        ready.push((*record).task);
                    }
                });
                if drained > 0 {
                    strace!("worker: drained {} completions", drained);
                }

                // Swap before resuming: frames scheduled by these
                // resumptions wait for the next turn.
                mem::swap(ready, &mut resuming);
            }

            for &frame in resuming.iter() {
                unsafe {
                    let frame = NonNull::new_unchecked(frame as *mut Header);
                    // Read the stack bottom first: the resumed frame may
                    // be freed once its result is consumed.
                    let root = frame.as_ref().root();
                    task::resume(frame);
                    if (*root).is_done() {
                        // Release the reference taken at scheduling time.
                        Header::release(NonNull::new_unchecked(root as *mut Header));
                    }
                }
            }
            resuming.clear();
        }

        sdebug!("worker: reactor loop exit on tid {}", self.thread_id());

        CURRENT_WORKER.with(|cell| cell.set(ptr::null()));
        self.thread_id.store(0, Ordering::Relaxed);
        self.is_running.store(false, Ordering::Relaxed);
    }

    #[inline]
    fn is_current(&self) -> bool {
        CURRENT_WORKER.with(|cell| cell.get()) == self as *const Worker
    }
}
