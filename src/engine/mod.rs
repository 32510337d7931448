//! Long-running operation tracking.
//!
//! An HTTP request that triggers a slow, externally-executed action
//! becomes a trackable, cancellable, deadline-governed task, driven to
//! completion by system-bus notifications and resolved into a terminal
//! HTTP-visible result. Callers supply a correlation rule and a
//! decision function; the engine owns correlation, the single deadline
//! timer per task, exactly-once finalization, and resource release.

pub mod admission;
pub mod registry;
pub mod task;
pub mod timer;

pub use admission::{AdmissionGuard, AdmissionTicket};
pub use registry::{CreateTaskError, DecisionFn, Task, TaskEvent, TaskRegistry, Verdict};
pub use task::{Payload, TaskCtl, TaskData, TaskState};
pub use timer::DeadlineTimer;
