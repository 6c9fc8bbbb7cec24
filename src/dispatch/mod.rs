//! Action dispatch pipeline.
//!
//! Core components:
//! - `action`: the outbound commands (text, photo, photo set)
//! - `mailbox`: single-slot, most-recent-wins holding cell
//! - `executor`: capability trait for the platform send mechanism
//! - `dispatcher`: rate-limited worker with cancel-and-relaunch restarts

pub mod action;
pub mod dispatcher;
pub mod executor;
pub mod mailbox;

pub use action::Action;
pub use dispatcher::{DispatchStats, Dispatcher, WorkerState};
pub use executor::{Executor, LoggingExecutor, decode_images};
pub use mailbox::Mailbox;
