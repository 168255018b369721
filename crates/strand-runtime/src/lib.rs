//! # strand-runtime
//!
//! A multi-worker, completion-based I/O runtime. Each worker thread owns
//! its own io_uring instance and ready queue; tasks are reference-counted
//! suspendable frames that submit operations inline to their worker's ring
//! and are woken by the completions they tagged.
//!
//! ## Quick start
//!
//! ```ignore
//! use strand_runtime::{Runtime, Task};
//!
//! let runtime = Runtime::with_workers(1)?;
//! runtime.dispatch(|| Task::new(async {
//!     // await socket operations from strand-net here
//! }));
//! runtime.run();
//! ```
//!
//! Scheduling is worker-local by design: there is no work stealing, no
//! cross-worker migration, and no thread-safe scheduling from arbitrary
//! threads. Dispatch partitions work once, before the pool starts.

pub mod op;
pub mod runtime;
pub mod task;
pub mod worker;

mod ring;

pub use op::OpRecord;
pub use runtime::Runtime;
pub use task::{schedule, Task};
pub use worker::Worker;
