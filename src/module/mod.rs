//! Module scheduler.
//!
//! A module owns one [`Skeleton`]: a data-plane server, a command server,
//! a client for outgoing asynchronous calls, a worker pool and a timer
//! dispatcher. The skeleton loop waits on all of them and dispatches one
//! item at a time, so module state is only ever touched by its own task:
//!
//! ```text
//!   calls ─────┐
//!   commands ──┤
//!   replies ───┼──▶ Skeleton::next_ready ──▶ dispatch (one at a time)
//!   completions┤
//!   timers ────┘
//! ```
//!
//! [`ModuleHost`] starts a set of [`Module`]s and stops them in reverse order.

mod context;
mod lifecycle;
mod skeleton;

pub use context::ModuleContext;
pub use lifecycle::{Module, ModuleHost};
pub use skeleton::{CommandInfo, CommandSet, Ready, Skeleton, SkeletonState};
