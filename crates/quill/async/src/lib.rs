#![deny(unsafe_code)]
//! # quill-async
//!
//! Non-blocking compilation for single-threaded frame loops.
//!
//! [`AsyncCompileTask`] compiles and audits on a dedicated worker thread and
//! is finalized on the host thread by [`AsyncCompileTask::poll`], which
//! commits the module into the [`ScriptDomain`](quill_domain::ScriptDomain).
//!
//! ```ignore
//! let mut task = AsyncCompileTask::start_sources(&domain, [source]);
//! // each frame:
//! if task.poll(&mut domain) && task.is_successful() {
//!     let ty = task.main_type()?;
//! }
//! ```

pub mod error;
pub mod task;

pub use error::{TaskError, TaskResult};
pub use task::{AsyncCompileTask, TaskId, TaskState};
