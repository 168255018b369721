//! Task frames and handles.
//!
//! A task wraps a future into a heap-allocated, reference-counted frame.
//! Frames link into logical call stacks: awaiting a [`Task`] records the
//! awaiting frame as `parent` and propagates `root` (the stack bottom), so
//! a kernel completion can wake the innermost suspended frame and the
//! reactor can release a finished stack in O(1).
//!
//! ```text
//!  root frame ──await──▶ frame B ──await──▶ frame C ──▶ kernel op
//!      ▲                    ▲                  │
//!      └──── root ──────────┴───── parent ─────┘
//! ```
//!
//! The reference count is a plain `Cell<u32>`: a frame is owned by a single
//! worker for its whole life, and handles must not be shared across
//! threads. Handing a freshly-created root to a worker before it runs is a
//! transfer, not sharing.

use std::cell::{Cell, UnsafeCell};
use std::future::Future;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::ptr::{self, NonNull};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::worker::Worker;

thread_local! {
    /// Frame currently being polled on this thread, or null.
    static CURRENT_FRAME: Cell<*const Header> = const { Cell::new(ptr::null()) };
}

/// The frame currently executing on this thread. Null outside of a task.
#[inline]
pub(crate) fn current_frame() -> *const Header {
    CURRENT_FRAME.with(|cell| cell.get())
}

// ── Frame header ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Created or parked; may be polled.
    Suspended,
    /// Being polled right now.
    Running,
    /// Future finished; result or panic payload stored.
    Done,
}

/// Type-erased prefix of every task frame.
///
/// `Frame<F>` is laid out with the header first so a pointer to the frame
/// can address either.
pub(crate) struct Header {
    /// Non-atomic reference count; see the module docs.
    refs: Cell<u32>,
    state: Cell<State>,
    /// Awaiting frame; null for a stack bottom.
    parent: Cell<*const Header>,
    /// Bottom of the logical call stack. A fresh frame is its own root.
    root: Cell<*const Header>,
    vtable: &'static Vtable,
}

struct Vtable {
    /// Poll the frame's future once; sets `Done` when it finishes.
    poll: unsafe fn(NonNull<Header>),
    /// Move the finished result into `dst`, or re-raise a stored panic.
    take_output: unsafe fn(NonNull<Header>, *mut ()),
    /// Drop the frame's contents and free its allocation.
    drop_frame: unsafe fn(NonNull<Header>),
}

impl Header {
    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.state.get() == State::Done
    }

    #[inline]
    pub(crate) fn root(&self) -> *const Header {
        self.root.get()
    }

    #[inline]
    fn acquire(&self) {
        self.refs.set(self.refs.get() + 1);
    }

    /// Drop one reference; frees the frame when the count reaches zero.
    ///
    /// # Safety
    ///
    /// `this` must point to a live frame, and the caller must be on the
    /// frame's owning thread.
    pub(crate) unsafe fn release(this: NonNull<Header>) {
        let refs = this.as_ref().refs.get() - 1;
        this.as_ref().refs.set(refs);
        if refs == 0 {
            (this.as_ref().vtable.drop_frame)(this);
        }
    }
}

// ── Typed frame ──────────────────────────────────────────────────────

#[repr(C)]
struct Frame<F: Future> {
    /// Must stay the first field; `NonNull<Header>` doubles as the frame
    /// address.
    header: Header,
    future: UnsafeCell<Option<F>>,
    result: UnsafeCell<Option<std::thread::Result<F::Output>>>,
}

impl<F: Future> Frame<F> {
    const VTABLE: Vtable = Vtable {
        poll: Self::poll_raw,
        take_output: Self::take_output_raw,
        drop_frame: Self::drop_raw,
    };

    /// Poll the frame's future once, with this frame installed as the
    /// thread's current frame so nested awaiters can find it.
    unsafe fn poll_raw(this: NonNull<Header>) {
        let frame = this.cast::<Frame<F>>().as_ref();
        debug_assert_eq!(frame.header.state.get(), State::Suspended, "frame polled reentrantly");
        frame.header.state.set(State::Running);

        let waker = waker_for(this);
        let mut cx = Context::from_waker(&waker);

        let previous = CURRENT_FRAME.with(|cell| cell.replace(this.as_ptr()));

        let slot = &mut *frame.future.get();
        let future = slot.as_mut().expect("frame polled after completion");
        // Safety: the frame is heap-allocated and never moves.
        let polled = panic::catch_unwind(AssertUnwindSafe(|| {
            Pin::new_unchecked(future).poll(&mut cx)
        }));

        CURRENT_FRAME.with(|cell| cell.set(previous));

        match polled {
            Ok(Poll::Pending) => frame.header.state.set(State::Suspended),
            Ok(Poll::Ready(value)) => {
                *frame.result.get() = Some(Ok(value));
                *slot = None;
                frame.header.state.set(State::Done);
            }
            Err(payload) => {
                *frame.result.get() = Some(Err(payload));
                *slot = None;
                frame.header.state.set(State::Done);
            }
        }
    }

    unsafe fn take_output_raw(this: NonNull<Header>, dst: *mut ()) {
        let frame = this.cast::<Frame<F>>().as_ref();
        let result = (*frame.result.get()).take().expect("task result observed twice");
        match result {
            Ok(value) => ptr::write(dst.cast::<F::Output>(), value),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    unsafe fn drop_raw(this: NonNull<Header>) {
        drop(Box::from_raw(this.cast::<Frame<F>>().as_ptr()));
    }
}

// ── Waker ────────────────────────────────────────────────────────────

// The waker's data pointer is the frame header. Waking re-enqueues the
// frame on the worker running on the current thread; the runtime's own
// awaiters never invoke it (they wake through completion records), so this
// path only serves foreign futures polled inside a task.
const WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_waker, wake_frame, wake_frame, drop_waker);

unsafe fn clone_waker(data: *const ()) -> RawWaker {
    RawWaker::new(data, &WAKER_VTABLE)
}

unsafe fn wake_frame(data: *const ()) {
    if let Some(worker) = Worker::current() {
        worker.enqueue_frame(data as *const Header);
    }
}

unsafe fn drop_waker(_data: *const ()) {}

/// Build the waker passed into a frame's poll. It must not outlive the
/// frame; the runtime's awaiters never store it.
unsafe fn waker_for(frame: NonNull<Header>) -> Waker {
    Waker::from_raw(RawWaker::new(frame.as_ptr() as *const (), &WAKER_VTABLE))
}

// ── Resumption ───────────────────────────────────────────────────────

/// Resume a suspended frame. As frames finish, control walks up their
/// parent links so each awaiting frame observes the result immediately,
/// until a frame suspends again or the stack bottom completes.
///
/// # Safety
///
/// `frame` must point to a live, suspended frame owned by the calling
/// worker thread.
pub(crate) unsafe fn resume(mut frame: NonNull<Header>) {
    loop {
        (frame.as_ref().vtable.poll)(frame);
        if !frame.as_ref().is_done() {
            return;
        }

        let parent = frame.as_ref().parent.get();
        if parent.is_null() {
            return;
        }
        // The parent is suspended at its await of `frame`; polling it
        // consumes the result and continues.
        frame = NonNull::new_unchecked(parent as *mut Header);
    }
}

// ── Handle ───────────────────────────────────────────────────────────

/// Handle to a suspendable task returning `T`.
///
/// Created by [`Task::new`] around a future; the computation does not run
/// until the task is scheduled on a worker or awaited from another task.
/// Clones share the frame; the frame is destroyed when the last handle
/// (including the scheduler's, for roots) is dropped.
///
/// Awaiting a `Task` from inside another task links the two frames into
/// one logical call stack and transfers control directly, without a trip
/// through the worker queue. If the task already finished, the result is
/// observed without suspending. A panic inside the task is re-raised at
/// the awaiting site.
pub struct Task<T> {
    raw: NonNull<Header>,
    _marker: PhantomData<*const T>,
}

impl<T: 'static> Task<T> {
    /// Wrap a future into a suspended task frame.
    pub fn new<F>(future: F) -> Task<T>
    where
        F: Future<Output = T> + 'static,
    {
        let frame = Box::new(Frame {
            header: Header {
                refs: Cell::new(1),
                state: Cell::new(State::Suspended),
                parent: Cell::new(ptr::null()),
                root: Cell::new(ptr::null()),
                vtable: &Frame::<F>::VTABLE,
            },
            future: UnsafeCell::new(Some(future)),
            result: UnsafeCell::new(None),
        });

        let raw = NonNull::from(Box::leak(frame)).cast::<Header>();
        unsafe {
            raw.as_ref().root.set(raw.as_ptr());
        }

        Task {
            raw,
            _marker: PhantomData,
        }
    }

    /// Whether the task's future has finished.
    #[inline]
    pub fn is_done(&self) -> bool {
        unsafe { self.raw.as_ref().is_done() }
    }

    /// Detach the frame, transferring this handle's reference to the
    /// caller (the scheduler).
    pub(crate) fn into_raw(self) -> NonNull<Header> {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        unsafe {
            self.raw.as_ref().acquire();
        }
        Task {
            raw: self.raw,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        // Safety: handles never leave the frame's owning thread.
        unsafe {
            Header::release(self.raw);
        }
    }
}

impl<T: 'static> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        let header = self.raw;
        unsafe {
            if !header.as_ref().is_done() {
                let caller = current_frame();
                debug_assert!(
                    !caller.is_null(),
                    "tasks may only be awaited from inside a worker task"
                );

                // First await links this frame into the caller's stack:
                // the caller becomes the parent and the stack bottom is
                // inherited.
                header.as_ref().parent.set(caller);
                header.as_ref().root.set((*caller).root.get());

                // Direct transfer into the awaited frame; no queue trip.
                (header.as_ref().vtable.poll)(header);
                if !header.as_ref().is_done() {
                    return Poll::Pending;
                }
            }

            let mut output = MaybeUninit::<T>::uninit();
            (header.as_ref().vtable.take_output)(header, output.as_mut_ptr().cast());
            Poll::Ready(output.assume_init())
        }
    }
}

/// Schedule a root task on the worker running the current thread.
///
/// Panics when called outside of a worker.
pub fn schedule<T: 'static>(task: Task<T>) {
    Worker::current()
        .expect("schedule() called outside of a worker")
        .schedule(task);
}
