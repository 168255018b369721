//! io_uring wrapper for a single worker.
//!
//! Each worker owns one [`WorkerRing`]. Setup flags are chosen by probing
//! the running kernel version, so the ring gets single-issuer and
//! cooperative task-run on kernels that have them without failing on older
//! ones. The ring is torn down by the inner `IoUring`'s Drop.
//!
//! `user_data` discipline: `0` marks a self-wakeup no-op and is never a
//! valid record address; every other value is the address of an
//! [`OpRecord`](crate::op::OpRecord).

use std::mem;
use std::time::Duration;

use io_uring::{opcode, squeue, types, IoUring};
use strand_core::error::{Error, Result};
use strand_core::{sdebug, swarn};

/// Submission queue size. Clamped by the kernel if too large.
const RING_ENTRIES: u32 = 32768;

/// `user_data` tag of the self-wakeup no-op.
pub(crate) const WAKEUP_TOKEN: u64 = 0;

// ── Kernel version probing ───────────────────────────────────────────

/// Pack a kernel version triple for ordered comparison.
#[inline]
const fn make_version(major: u8, minor: u8, patch: u8) -> u32 {
    ((major as u32) << 16) | ((minor as u32) << 8) | patch as u32
}

/// Parse `utsname.release` into a packed version, 0 if unavailable.
fn kernel_version() -> u32 {
    let mut name: libc::utsname = unsafe { mem::zeroed() };
    if unsafe { libc::uname(&mut name) } != 0 {
        return 0;
    }

    let mut parts = [0u8; 3];
    let mut index = 0;
    for &c in name.release.iter() {
        let c = c as u8;
        match c {
            b'0'..=b'9' => parts[index] = parts[index].wrapping_mul(10).wrapping_add(c - b'0'),
            b'.' => {
                index += 1;
                if index >= parts.len() {
                    break;
                }
            }
            _ => break,
        }
    }

    make_version(parts[0], parts[1], parts[2])
}

/// One io_uring instance. NOT thread-safe; only its owning worker thread
/// may touch it while that worker runs.
pub(crate) struct WorkerRing {
    ring: IoUring,
}

impl WorkerRing {
    pub(crate) fn new() -> Result<Self> {
        Self::with_entries(RING_ENTRIES)
    }

    pub(crate) fn with_entries(entries: u32) -> Result<Self> {
        let version = kernel_version();

        let mut builder = IoUring::builder();
        builder.setup_clamp();
        if version >= make_version(5, 18, 0) {
            builder.setup_submit_all();
        }
        if version >= make_version(5, 19, 0) {
            builder.setup_coop_taskrun();
            builder.setup_taskrun_flag();
        }
        // Single-issuer (6.0+) would pin the ring to the thread that
        // created it, but rings are constructed with the pool and then
        // driven by the worker thread. Left disabled.

        let ring = builder
            .build(entries)
            .map_err(|e| Error::RingSetup(e.raw_os_error().unwrap_or(-1)))?;

        let params = ring.params();
        sdebug!(
            "ring: sq={} features single_mmap={} nodrop={} rw_cur_pos={} fast_poll={}",
            params.sq_entries(),
            params.is_feature_single_mmap(),
            params.is_feature_nodrop(),
            params.is_feature_rw_cur_pos(),
            params.is_feature_fast_poll(),
        );

        Ok(Self { ring })
    }

    /// Queue one SQE. If the submission queue is full, synchronously submit
    /// the pending batch and retry; only a failed submit is an error.
    ///
    /// # Safety
    ///
    /// Buffers and addresses referenced by `entry` must stay valid until
    /// the matching completion is drained.
    pub(crate) unsafe fn push(&mut self, entry: squeue::Entry) -> Result<()> {
        loop {
            if self.ring.submission().push(&entry).is_ok() {
                return Ok(());
            }

            self.ring
                .submit()
                .map_err(|e| Error::Submit(e.raw_os_error().unwrap_or(-1)))?;
        }
    }

    /// Submit queued entries and wait up to `timeout` for at least one
    /// completion. Timeouts and signal interruptions are not errors.
    pub(crate) fn submit_and_wait(&mut self, timeout: Duration) {
        let ts = types::Timespec::new()
            .sec(timeout.as_secs())
            .nsec(timeout.subsec_nanos());
        let args = types::SubmitArgs::new().timespec(&ts);

        match self.ring.submitter().submit_with_args(1, &args) {
            Ok(_) => {}
            Err(e) => match e.raw_os_error() {
                Some(libc::ETIME) | Some(libc::EINTR) => {}
                // CQ overflow pending; completions drain below as usual.
                Some(libc::EBUSY) => {}
                _ => swarn!("ring: submit_and_wait failed: {}", e),
            },
        }
    }

    /// Drain every immediately-available completion.
    pub(crate) fn drain(&mut self, mut f: impl FnMut(u64, i32, u32)) -> usize {
        let mut count = 0;
        for cqe in self.ring.completion() {
            f(cqe.user_data(), cqe.result(), cqe.flags());
            count += 1;
        }
        count
    }

    /// Queue and submit a no-op so a blocked [`submit_and_wait`] returns.
    ///
    /// [`submit_and_wait`]: Self::submit_and_wait
    pub(crate) fn post_wakeup(&mut self) {
        let nop = opcode::Nop::new().build().user_data(WAKEUP_TOKEN);
        // Safety: a no-op references no buffers.
        if unsafe { self.push(nop) }.is_ok() {
            if let Err(e) = self.ring.submit() {
                swarn!("ring: wakeup submit failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_packing_orders() {
        assert!(make_version(5, 19, 0) > make_version(5, 18, 2));
        assert!(make_version(6, 0, 0) > make_version(5, 19, 9));
        assert_eq!(make_version(0, 0, 0), 0);
    }

    #[test]
    fn kernel_version_is_parsed() {
        // Any Linux this test runs on is at least 5.1 (io_uring exists).
        assert!(kernel_version() >= make_version(5, 1, 0));
    }

    #[test]
    fn push_forces_submit_when_full() {
        // A tiny ring: 8 no-ops cannot fit in 4 SQ slots without the
        // forced submit-and-retry path.
        let mut ring = WorkerRing::with_entries(4).expect("ring setup");

        for i in 1..=8u64 {
            let nop = opcode::Nop::new().build().user_data(i);
            unsafe { ring.push(nop) }.expect("push");
        }

        let mut seen = Vec::new();
        while seen.len() < 8 {
            ring.submit_and_wait(Duration::from_millis(100));
            ring.drain(|user_data, result, _flags| {
                assert_eq!(result, 0);
                seen.push(user_data);
            });
        }

        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn wakeup_is_tagged_null() {
        let mut ring = WorkerRing::with_entries(4).expect("ring setup");
        ring.post_wakeup();

        let mut drained = Vec::new();
        while drained.is_empty() {
            ring.submit_and_wait(Duration::from_millis(100));
            ring.drain(|user_data, _result, _flags| drained.push(user_data));
        }
        assert_eq!(drained, vec![WAKEUP_TOKEN]);
    }
}
