//! # mgmtd
//!
//! Management-controller HTTP API daemon: hardware and firmware
//! operations (diagnostic dumps, firmware updates, crash-data
//! collection) exposed as pollable task resources.
//!
//! The heart of the crate is the task engine in [`engine`]: an HTTP
//! request that triggers a slow, externally-executed action becomes a
//! tracked, cancellable, deadline-governed task, driven to completion
//! by system-bus notifications and resolved into a terminal
//! HTTP-visible result.
//!
//! ## Task Flow
//! 1. A resource action handler starts the operation via a bus call
//! 2. It creates a task with a correlation rule and a decision function
//! 3. The engine delivers matching notifications (and timeouts) to the
//!    decision function until it returns a terminal verdict
//! 4. Clients poll the task monitor until the terminal result appears
//!
//! ## Modules
//! - `engine`: task registry, deadline timer, admission control
//! - `bus`: system-bus capability seam and the in-process loopback bus
//! - `api`: HTTP routes and the task-creating resource handlers
//! - `messages`: Redfish-style structured status messages

pub mod api;
pub mod bus;
pub mod config;
pub mod engine;
pub mod messages;

pub use config::Config;
