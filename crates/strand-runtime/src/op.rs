//! Per-operation completion record.
//!
//! Every kernel operation in flight is tagged with the address of an
//! [`OpRecord`]. The reactor copies the CQE result into the record and
//! wakes the frame named by it. The record lives inline in the awaiter,
//! which lives in the suspended frame, so its address is stable for the
//! whole operation.

use std::ptr;

use crate::task::Header;

/// State block shared between a suspended task and the kernel.
///
/// `task` names the frame to wake; it is filled in by
/// [`Worker::submit_op`](crate::worker::Worker::submit_op) at submission
/// time and must reference a frame that stays alive and suspended until the
/// completion is drained.
pub struct OpRecord {
    /// CQE flags, copied verbatim.
    pub flags: u32,
    /// Signed operation result: byte count or `-errno`.
    pub result: i32,
    pub(crate) task: *const Header,
}

impl OpRecord {
    pub const fn new() -> Self {
        Self {
            flags: 0,
            result: 0,
            task: ptr::null(),
        }
    }
}

impl Default for OpRecord {
    fn default() -> Self {
        Self::new()
    }
}
